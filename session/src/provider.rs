//! Contract between the session manager and an externally owned wallet connection.
//!
//! A [`ProviderConnection`] is the opaque capability handed out by a selector.
//! The session only needs to derive a signer and network from it, listen to
//! its change notifications, and optionally ask it to disconnect.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::{SessionError, SessionResult};
use crate::validation::parse_chain_id;

/// The chain a capability is currently pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ens_address: Option<String>,
}

impl Network {
    pub fn new(chain_id: u64, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            ens_address: None,
        }
    }
}

/// Error payload carried by provider `disconnect` and `error` notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for ProviderRpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl From<ProviderRpcError> for SessionError {
    fn from(error: ProviderRpcError) -> Self {
        SessionError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// Change notifications a capability may emit.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
    Disconnect(ProviderRpcError),
    Error(ProviderRpcError),
}

impl ProviderEvent {
    /// Decode an EIP-1193 notification as a host bridge receives it: the event
    /// name plus its JSON payload. Chain ids arrive as hex strings.
    pub fn from_eip1193(name: &str, payload: &serde_json::Value) -> SessionResult<Self> {
        match name {
            "accountsChanged" => {
                let accounts: Vec<String> = serde_json::from_value(payload.clone())?;
                Ok(ProviderEvent::AccountsChanged(accounts))
            }
            "chainChanged" => {
                let chain_id = match payload {
                    serde_json::Value::String(raw) => parse_chain_id(raw)?,
                    serde_json::Value::Number(n) => n
                        .as_u64()
                        .filter(|id| *id > 0)
                        .ok_or_else(|| SessionError::InvalidChainId(n.to_string()))?,
                    other => return Err(SessionError::InvalidChainId(other.to_string())),
                };
                Ok(ProviderEvent::ChainChanged(chain_id))
            }
            "disconnect" => Ok(ProviderEvent::Disconnect(serde_json::from_value(
                payload.clone(),
            )?)),
            "error" => Ok(ProviderEvent::Error(serde_json::from_value(payload.clone())?)),
            other => Err(SessionError::ValidationError(format!(
                "Unsupported provider event '{}'",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderEvent::AccountsChanged(_) => "accountsChanged",
            ProviderEvent::ChainChanged(_) => "chainChanged",
            ProviderEvent::Disconnect(_) => "disconnect",
            ProviderEvent::Error(_) => "error",
        }
    }
}

/// Handle that can authorize on behalf of one account.
#[async_trait]
pub trait SignerIdentity: Send + Sync + fmt::Debug {
    async fn address(&self) -> SessionResult<String>;
}

/// An established connection to a wallet or signing endpoint.
#[async_trait]
pub trait ProviderConnection: Send + Sync + fmt::Debug {
    /// Id of the provider option this connection came from.
    fn id(&self) -> &str;

    async fn signer(&self) -> SessionResult<SharedSigner>;

    async fn network(&self) -> SessionResult<Network>;

    /// Subscribe to change notifications. `None` when the connection has no
    /// event surface, in which case the session simply never reconciles.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>>;

    fn supports_disconnect(&self) -> bool {
        false
    }

    async fn disconnect(&self) -> SessionResult<()> {
        Ok(())
    }
}

pub type SharedSigner = Arc<dyn SignerIdentity>;
pub type SharedProvider = Arc<dyn ProviderConnection>;

/// Identity comparison for shared handles; vtables are ignored.
pub(crate) fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub(crate) fn same_optional_handle<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_handle(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_bridge_notifications() {
        assert_eq!(
            ProviderEvent::from_eip1193("chainChanged", &json!("0x89")).unwrap(),
            ProviderEvent::ChainChanged(137)
        );
        assert_eq!(
            ProviderEvent::from_eip1193("chainChanged", &json!(5)).unwrap(),
            ProviderEvent::ChainChanged(5)
        );
        assert_eq!(
            ProviderEvent::from_eip1193("accountsChanged", &json!([])).unwrap(),
            ProviderEvent::AccountsChanged(Vec::new())
        );

        let event = ProviderEvent::from_eip1193(
            "disconnect",
            &json!({ "code": 1013, "message": "Bridge closed" }),
        )
        .unwrap();
        assert_eq!(event.kind(), "disconnect");
        assert_eq!(
            event,
            ProviderEvent::Disconnect(ProviderRpcError::new(1013, "Bridge closed"))
        );
    }

    #[test]
    fn rejects_malformed_notifications() {
        assert!(matches!(
            ProviderEvent::from_eip1193("chainChanged", &json!("0x0")),
            Err(SessionError::InvalidChainId(_))
        ));
        assert!(ProviderEvent::from_eip1193("chainChanged", &json!(null)).is_err());
        assert!(ProviderEvent::from_eip1193("accountsChanged", &json!("0xabc")).is_err());
        assert!(matches!(
            ProviderEvent::from_eip1193("message", &json!({})),
            Err(SessionError::ValidationError(_))
        ));
    }

    #[test]
    fn rpc_error_converts_to_session_error() {
        let err: SessionError = ProviderRpcError::new(4001, "User rejected the request.").into();
        assert!(err.is_user_rejection());
    }
}
