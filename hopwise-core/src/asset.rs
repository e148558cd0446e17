//! Assets and the Asset Store.
//!
//! An [`Asset`] is a named, typed, status-tracked value. Its value lives
//! inside the `Ready` state, so "ready iff value is defined" holds by
//! construction.
//!
//! The [`AssetStore`] maps scope keys to shared [`AssetHandle`]s. Every
//! handle guards one Asset record with its own lock, which serializes
//! writers of the same Asset while leaving writes to different Assets
//! uncoordinated. Linking a handle under a second key (Hop input
//! projection) shares identity rather than copying the value.

use crate::{
    AssetError, AssetId, AssetSchema, EntityIdType, FieldPath, Timestamp, Value,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Role of an Asset in the data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    /// Supplied from outside; write-once once ready
    Input,
    /// Deliverable of a Hop or Mission
    Output,
    /// Working value passed between steps
    Intermediate,
}

/// Lifecycle status of an Asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    Ready,
    Error,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Ready => "ready",
            AssetStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status together with the data each status carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetState {
    #[default]
    Pending,
    Ready { value: Value },
    Error { reason: String },
}

impl AssetState {
    pub fn status(&self) -> AssetStatus {
        match self {
            AssetState::Pending => AssetStatus::Pending,
            AssetState::Ready { .. } => AssetStatus::Ready,
            AssetState::Error { .. } => AssetStatus::Error,
        }
    }
}

/// A named, typed value flowing between steps, hops and the mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    asset_id: AssetId,
    pub name: String,
    pub description: Option<String>,
    role: AssetRole,
    schema: AssetSchema,
    #[serde(flatten)]
    state: AssetState,
    /// Free-form annotations (token counts, `final` flag, ...)
    pub metadata: serde_json::Map<String, serde_json::Value>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl Asset {
    /// Create a pending Asset.
    pub fn new(name: impl Into<String>, role: AssetRole, schema: AssetSchema) -> Self {
        let now = Utc::now();
        Self {
            asset_id: AssetId::now_v7(),
            name: name.into(),
            description: None,
            role,
            schema,
            state: AssetState::Pending,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn input(name: impl Into<String>, schema: AssetSchema) -> Self {
        Self::new(name, AssetRole::Input, schema)
    }

    pub fn output(name: impl Into<String>, schema: AssetSchema) -> Self {
        Self::new(name, AssetRole::Output, schema)
    }

    pub fn intermediate(name: impl Into<String>, schema: AssetSchema) -> Self {
        Self::new(name, AssetRole::Intermediate, schema)
    }

    /// Create an Asset that is already ready (e.g. a user-supplied input).
    /// Fails if the value does not conform to the schema.
    pub fn ready(
        name: impl Into<String>,
        role: AssetRole,
        schema: AssetSchema,
        value: Value,
    ) -> Result<Self, AssetError> {
        let mut asset = Self::new(name, role, schema);
        asset.check_schema(&asset.name.clone(), &value)?;
        asset.state = AssetState::Ready { value };
        Ok(asset)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn role(&self) -> AssetRole {
        self.role
    }

    pub fn schema(&self) -> &AssetSchema {
        &self.schema
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    pub fn status(&self) -> AssetStatus {
        self.state.status()
    }

    /// The value, defined only while `ready`.
    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            AssetState::Ready { value } => Some(value),
            _ => None,
        }
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.state {
            AssetState::Error { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == AssetStatus::Ready
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn check_schema(&self, key: &str, value: &Value) -> Result<(), AssetError> {
        if self.schema.conforms(value) {
            Ok(())
        } else {
            Err(AssetError::SchemaMismatch {
                key: key.to_string(),
                expected: self.schema.to_string(),
                got: value.type_name().to_string(),
            })
        }
    }

    fn check_writable(&self, key: &str, policy: WritePolicy) -> Result<(), AssetError> {
        if self.role == AssetRole::Input && self.is_ready() && !policy.allow_input_overwrite {
            return Err(AssetError::InvalidTransition {
                key: key.to_string(),
                from: self.status(),
                reason: "input assets are write-once".to_string(),
            });
        }
        Ok(())
    }

    /// Replace the value and transition to `ready`.
    pub fn set_value(&mut self, key: &str, value: Value, policy: WritePolicy) -> Result<(), AssetError> {
        self.check_writable(key, policy)?;
        self.check_schema(key, &value)?;
        self.state = AssetState::Ready { value };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `error`, dropping any value.
    pub fn set_error(&mut self, key: &str, reason: impl Into<String>, policy: WritePolicy) -> Result<(), AssetError> {
        self.check_writable(key, policy)?;
        self.state = AssetState::Error {
            reason: reason.into(),
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Deep-set `path` to `value` on a copy of the current value and commit
    /// it only if the whole write succeeds. Returns `Ok(false)` when the path
    /// cannot be stepped through.
    pub fn merge_write(
        &mut self,
        key: &str,
        path: &FieldPath,
        value: Value,
        policy: WritePolicy,
    ) -> Result<bool, AssetError> {
        self.check_writable(key, policy)?;
        let mut merged = self.value().cloned().unwrap_or(Value::Null);
        if merged.set_path(path, value).is_err() {
            return Ok(false);
        }
        self.check_schema(key, &merged)?;
        self.state = AssetState::Ready { value: merged };
        self.updated_at = Utc::now();
        Ok(true)
    }
}

/// Overwrite policy applied by every Asset write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WritePolicy {
    /// Allow replacing a ready `input` Asset (off by default: inputs are write-once).
    pub allow_input_overwrite: bool,
}

// ============================================================================
// HANDLES
// ============================================================================

/// Shared reference to one Asset record. Clones share identity.
#[derive(Debug, Clone)]
pub struct AssetHandle(Arc<RwLock<Asset>>);

impl AssetHandle {
    pub fn new(asset: Asset) -> Self {
        Self(Arc::new(RwLock::new(asset)))
    }

    /// True when both handles point at the same record.
    pub fn same_asset(&self, other: &AssetHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Copy of the current record.
    pub fn snapshot(&self, key: &str) -> Result<Asset, AssetError> {
        self.read(key, Asset::clone)
    }

    /// Run `f` under the read lock.
    pub fn read<T>(&self, key: &str, f: impl FnOnce(&Asset) -> T) -> Result<T, AssetError> {
        let guard = self.0.read().map_err(|_| AssetError::LockPoisoned {
            key: key.to_string(),
        })?;
        Ok(f(&guard))
    }

    /// Run `f` under the write lock. Writers of the same Asset are serialized here.
    pub fn write<T>(&self, key: &str, f: impl FnOnce(&mut Asset) -> T) -> Result<T, AssetError> {
        let mut guard = self.0.write().map_err(|_| AssetError::LockPoisoned {
            key: key.to_string(),
        })?;
        Ok(f(&mut guard))
    }
}

// ============================================================================
// ASSET STORE
// ============================================================================

/// Keyed collection of Asset handles (a Mission's `mission_state` or a Hop's `hop_state`).
#[derive(Debug, Default)]
pub struct AssetStore {
    entries: IndexMap<String, AssetHandle>,
    policy: WritePolicy,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: WritePolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: WritePolicy) {
        self.policy = policy;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Snapshot of the Asset stored under `key`.
    pub fn get(&self, key: &str) -> Result<Asset, AssetError> {
        self.handle(key)?.snapshot(key)
    }

    /// Shared handle for `key`.
    pub fn handle(&self, key: &str) -> Result<&AssetHandle, AssetError> {
        self.entries.get(key).ok_or_else(|| AssetError::NotFound {
            key: key.to_string(),
        })
    }

    /// Insert (or replace) the Asset stored under `key` with a fresh record.
    pub fn put(&mut self, key: impl Into<String>, asset: Asset) {
        self.entries.insert(key.into(), AssetHandle::new(asset));
    }

    /// Store an existing handle under `key`, sharing its identity.
    pub fn link(&mut self, key: impl Into<String>, handle: AssetHandle) {
        self.entries.insert(key.into(), handle);
    }

    /// Set the value and transition to `ready` atomically.
    pub fn set_value(&self, key: &str, value: Value) -> Result<(), AssetError> {
        let policy = self.policy;
        self.handle(key)?
            .write(key, |asset| asset.set_value(key, value, policy))?
    }

    /// Transition the Asset to `error`.
    pub fn set_error(&self, key: &str, reason: impl Into<String>) -> Result<(), AssetError> {
        let policy = self.policy;
        let reason = reason.into();
        self.handle(key)?
            .write(key, |asset| asset.set_error(key, reason, policy))?
    }

    /// Read-modify-write of a sub-path under the Asset's lock.
    /// `Ok(false)` means the path could not be stepped through.
    pub fn merge_write(&self, key: &str, path: &FieldPath, value: Value) -> Result<bool, AssetError> {
        let policy = self.policy;
        self.handle(key)?
            .write(key, |asset| asset.merge_write(key, path, value, policy))?
    }

    /// Snapshots of every Asset, in insertion order.
    pub fn snapshot(&self) -> Result<IndexMap<String, Asset>, AssetError> {
        self.entries
            .iter()
            .map(|(key, handle)| Ok((key.clone(), handle.snapshot(key)?)))
            .collect()
    }

    /// Keys of Assets with the given role.
    pub fn keys_with_role(&self, role: AssetRole) -> Result<Vec<String>, AssetError> {
        let mut keys = Vec::new();
        for (key, handle) in &self.entries {
            if handle.read(key, |asset| asset.role() == role)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }
}

impl Serialize for AssetStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let snapshot = self.snapshot().map_err(serde::ser::Error::custom)?;
        snapshot.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AssetStore {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let assets = IndexMap::<String, Asset>::deserialize(deserializer)?;
        let mut store = AssetStore::new();
        for (key, asset) in assets {
            store.put(key, asset);
        }
        Ok(store)
    }
}
