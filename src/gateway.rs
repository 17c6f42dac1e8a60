//! Gateway seam and host-facing collaborator traits.
//!
//! Gateways own their transport (CLI stdin, websockets, Telegram, HTTP,
//! the scheduler). The engine only ever sees them through the [`Gateway`]
//! trait: enqueue on the way in, `send` on the way out. Delivery failures
//! are reported, not retried; retry policy belongs to the bus and applies
//! to processing, not delivery.

use crate::{CorrelationId, GatewayKind, OutboundMessage, ResponseCapability};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One transport the engine can route responses through.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Capabilities this gateway can deliver. Responses requiring an
    /// unsupported capability are downgraded to text by the router.
    fn capabilities(&self) -> &[ResponseCapability];

    /// Deliver one response. Returns whether delivery succeeded.
    async fn send(&self, message: &OutboundMessage) -> bool;
}

/// Routes outbound messages to the gateway they belong to.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn Gateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn Gateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> Option<&Arc<dyn Gateway>> {
        self.gateways.get(&kind)
    }

    /// Deliver `message` through its gateway. Returns false when the gateway
    /// is unregistered or reports a delivery failure.
    pub async fn deliver(&self, message: &OutboundMessage) -> bool {
        match self.get(message.gateway) {
            Some(gateway) => gateway.send(message).await,
            None => {
                tracing::warn!(gateway = %message.gateway, "no gateway registered for response");
                false
            }
        }
    }
}

/// Host capability probing for skill eligibility checks.
pub trait ProviderRegistry: Send + Sync {
    /// Whether a named provider (an LLM backend, a transcription service) is
    /// configured and reachable.
    fn is_available(&self, provider: &str) -> bool;

    /// Whether a named executable exists on the host.
    fn has_binary(&self, binary: &str) -> bool;
}

/// Answers whether a tool invocation was approved out-of-band.
pub trait ApprovalBroker: Send + Sync {
    fn has_approval(&self, correlation_id: CorrelationId, tool_name: &str) -> bool;
}

/// Broker that approves nothing. The default until an operator-facing
/// approval surface is wired in.
pub struct NoApprovals;

impl ApprovalBroker for NoApprovals {
    fn has_approval(&self, _correlation_id: CorrelationId, _tool_name: &str) -> bool {
        false
    }
}

/// Provider registry backed by the host environment: binaries are probed on
/// PATH, providers by configured name.
pub struct HostProviders {
    providers: Vec<String>,
}

impl HostProviders {
    pub fn new(providers: Vec<String>) -> Self {
        Self { providers }
    }
}

impl ProviderRegistry for HostProviders {
    fn is_available(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }

    fn has_binary(&self, binary: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| is_executable(&dir.join(binary)))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
