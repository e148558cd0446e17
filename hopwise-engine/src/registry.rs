//! Tool registry: an in-process [`ToolInvoker`] that dispatches by `tool_id`.
//!
//! Every call is bounded by a timeout (per-tool override or the registry
//! default). An elapsed timeout is reported as an ordinary retryable
//! `InvocationError`.

use async_trait::async_trait;
use hopwise_core::{
    EngineConfig, InvocationError, ResourceConfigs, ToolInvoker, ToolOutputs, ToolParams,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One registered tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

/// Wrap `f` as a handler. The closure receives owned copies of its inputs.
pub fn tool_fn<F, Fut>(f: F) -> FnTool<F>
where
    F: Fn(ToolParams, ResourceConfigs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutputs, InvocationError>> + Send,
{
    FnTool(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(ToolParams, ResourceConfigs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutputs, InvocationError>> + Send,
{
    async fn call(
        &self,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError> {
        (self.0)(params, resource_configs.clone()).await
    }
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
    timeout: Option<Duration>,
}

/// Named tool handlers with timeouts.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    default_timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("tools", &ids)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout,
        }
    }

    /// Registry using `config.default_tool_timeout`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_tool_timeout)
    }

    /// Register (or replace) the handler for `tool_id`.
    pub fn register(&mut self, tool_id: impl Into<String>, handler: impl ToolHandler + 'static) -> &mut Self {
        self.tools.insert(
            tool_id.into(),
            RegisteredTool {
                handler: Arc::new(handler),
                timeout: None,
            },
        );
        self
    }

    /// Register with a timeout that overrides the default.
    pub fn register_with_timeout(
        &mut self,
        tool_id: impl Into<String>,
        handler: impl ToolHandler + 'static,
        timeout: Duration,
    ) -> &mut Self {
        self.tools.insert(
            tool_id.into(),
            RegisteredTool {
                handler: Arc::new(handler),
                timeout: Some(timeout),
            },
        );
        self
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn tool_ids(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(
        &self,
        tool_id: &str,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError> {
        let Some(tool) = self.tools.get(tool_id) else {
            warn!(tool_id, "Unknown tool requested");
            return Err(InvocationError::unknown_tool(tool_id));
        };
        let timeout = tool.timeout.unwrap_or(self.default_timeout);

        debug!(tool_id, params = params.len(), ?timeout, "Invoking tool");
        match tokio::time::timeout(timeout, tool.handler.call(params, resource_configs)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool_id, ?timeout, "Tool timed out");
                Err(InvocationError::timeout(
                    tool_id,
                    format!("no response within {timeout:?}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopwise_core::{InvocationErrorKind, Value};

    fn upper() -> impl ToolHandler {
        tool_fn(|params: ToolParams, _configs: ResourceConfigs| async move {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| InvocationError::failed("upper", "missing text"))?;
            let mut out = ToolOutputs::new();
            out.insert("text".into(), Value::from(text.to_uppercase()));
            Ok(out)
        })
    }

    fn slow() -> impl ToolHandler {
        tool_fn(|_params: ToolParams, _configs: ResourceConfigs| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutputs::new())
        })
    }

    #[tokio::test]
    async fn test_dispatch_by_tool_id() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register("upper", upper());
        let mut params = ToolParams::new();
        params.insert("text".into(), Value::from("hop"));
        let out = registry
            .invoke("upper", params, &ResourceConfigs::new())
            .await
            .unwrap();
        assert_eq!(out.get("text"), Some(&Value::from("HOP")));
        assert!(registry.contains("upper"));
    }

    #[tokio::test]
    async fn test_handler_error_surfaces_verbatim() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register("upper", upper());
        let err = registry
            .invoke("upper", ToolParams::new(), &ResourceConfigs::new())
            .await
            .unwrap_err();
        assert_eq!(err, InvocationError::failed("upper", "missing text"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new(Duration::from_secs(1));
        let err = registry
            .invoke("nope", ToolParams::new(), &ResourceConfigs::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::UnknownTool);
        assert!(!err.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_tool_timeout_overrides_default() {
        let mut registry = ToolRegistry::new(Duration::from_secs(60));
        registry.register_with_timeout("slow", slow(), Duration::from_millis(10));
        let err = registry
            .invoke("slow", ToolParams::new(), &ResourceConfigs::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Timeout);
        assert!(err.retryable);
        assert_eq!(err.tool_id, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let config = EngineConfig::default().with_default_tool_timeout(Duration::from_millis(20));
        let mut registry = ToolRegistry::from_config(&config);
        registry.register("slow", slow());
        let err = registry
            .invoke("slow", ToolParams::new(), &ResourceConfigs::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Timeout);
    }
}
