//! Tool Invocation collaborator boundary.

use crate::{InvocationError, ResourceConfigs, ValueMap};
use async_trait::async_trait;
use std::sync::Arc;

/// Resolved parameters, in parameter-mapping declaration order.
pub type ToolParams = ValueMap;

/// Named outputs reported by a tool.
pub type ToolOutputs = ValueMap;

/// External capability that runs a named tool.
///
/// The engine calls `invoke` at most once per ToolStep. Timeouts and
/// cooperative cancellation are the implementation's concern and come back
/// as ordinary [`InvocationError`]s.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool_id: &str,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError>;
}

#[async_trait]
impl<T: ToolInvoker + ?Sized> ToolInvoker for Arc<T> {
    async fn invoke(
        &self,
        tool_id: &str,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError> {
        (**self).invoke(tool_id, params, resource_configs).await
    }
}
