//! Declarative parameter/result mappings and their resolution against an Asset Store.

use crate::{AssetStore, FieldPath, MappingError, Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Source of a tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mapping {
    /// A constant, passed through unchanged.
    Literal { value: Value },
    /// An Asset in scope, optionally narrowed to a sub-path of its value.
    AssetReference {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<FieldPath>,
    },
}

impl Mapping {
    pub fn literal(value: impl Into<Value>) -> Self {
        Mapping::Literal {
            value: value.into(),
        }
    }

    pub fn asset(key: impl Into<String>) -> Self {
        Mapping::AssetReference {
            key: key.into(),
            path: None,
        }
    }

    pub fn asset_path(key: impl Into<String>, path: FieldPath) -> Self {
        Mapping::AssetReference {
            key: key.into(),
            path: Some(path),
        }
    }

    /// Scope location this mapping reads, if any.
    pub fn reads(&self) -> Option<AssetRef<'_>> {
        match self {
            Mapping::Literal { .. } => None,
            Mapping::AssetReference { key, path } => Some(AssetRef {
                key,
                path: path.as_ref(),
            }),
        }
    }
}

/// Destination of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultTarget {
    AssetReference {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<FieldPath>,
    },
    Discard,
}

impl ResultTarget {
    pub fn asset(key: impl Into<String>) -> Self {
        ResultTarget::AssetReference {
            key: key.into(),
            path: None,
        }
    }

    pub fn asset_path(key: impl Into<String>, path: FieldPath) -> Self {
        ResultTarget::AssetReference {
            key: key.into(),
            path: Some(path),
        }
    }

    /// Scope location this target writes, if any.
    pub fn writes(&self) -> Option<AssetRef<'_>> {
        match self {
            ResultTarget::Discard => None,
            ResultTarget::AssetReference { key, path } => Some(AssetRef {
                key,
                path: path.as_ref(),
            }),
        }
    }
}

/// Borrowed `(key, path)` pair naming a location in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetRef<'a> {
    pub key: &'a str,
    pub path: Option<&'a FieldPath>,
}

impl AssetRef<'_> {
    /// True when both refer to the same Asset at paths where one contains the other.
    /// A missing path addresses the whole value.
    pub fn overlaps(&self, other: &AssetRef<'_>) -> bool {
        if self.key != other.key {
            return false;
        }
        match (self.path, other.path) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => true,
        }
    }
}

/// Parameter name → source, in declaration order.
pub type ParameterMapping = IndexMap<String, Mapping>;

/// Result name → destination, in declaration order.
pub type ResultMapping = IndexMap<String, ResultTarget>;

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve one parameter mapping against `scope`.
pub fn resolve_parameter(mapping: &Mapping, scope: &AssetStore) -> Result<Value, MappingError> {
    match mapping {
        Mapping::Literal { value } => Ok(value.clone()),
        Mapping::AssetReference { key, path } => {
            let handle = scope
                .handle(key)
                .map_err(|_| MappingError::UnresolvedAsset { key: key.clone() })?;
            handle.read(key, |asset| match asset.value() {
                None => Err(MappingError::AssetNotReady {
                    key: key.clone(),
                    status: asset.status(),
                }),
                Some(value) => match path {
                    None => Ok(value.clone()),
                    Some(path) => value.get_path(path).cloned().ok_or_else(|| {
                        MappingError::PathNotFound {
                            key: key.clone(),
                            path: path.to_string(),
                        }
                    }),
                },
            })?
        }
    }
}

/// Resolve every parameter, collecting all failures rather than stopping at the first.
pub fn resolve_parameters(
    mappings: &ParameterMapping,
    scope: &AssetStore,
) -> Result<ValueMap, Vec<MappingError>> {
    let mut params = ValueMap::with_capacity(mappings.len());
    let mut errors = Vec::new();
    for (name, mapping) in mappings {
        match resolve_parameter(mapping, scope) {
            Ok(value) => {
                params.insert(name.clone(), value);
            }
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(params)
    } else {
        Err(errors)
    }
}

/// Write result `name` from `raw_result` to its destination.
///
/// Returns `true` when something was written, `false` for `Discard`.
/// A path target merge-writes into the current value; the Asset becomes `ready`.
pub fn resolve_result(
    name: &str,
    target: &ResultTarget,
    scope: &AssetStore,
    raw_result: &ValueMap,
) -> Result<bool, MappingError> {
    let (key, path) = match target {
        ResultTarget::Discard => return Ok(false),
        ResultTarget::AssetReference { key, path } => (key, path),
    };
    if !scope.contains(key) {
        return Err(MappingError::UnresolvedAsset { key: key.clone() });
    }
    let value = raw_result
        .get(name)
        .cloned()
        .ok_or_else(|| MappingError::MissingResult {
            result: name.to_string(),
        })?;
    match path {
        None => scope.set_value(key, value)?,
        Some(path) => {
            if !scope.merge_write(key, path, value)? {
                return Err(MappingError::PathNotFound {
                    key: key.clone(),
                    path: path.to_string(),
                });
            }
        }
    }
    Ok(true)
}
