// lib.rs - Core library structure for the wallet session manager

pub mod app_state;
pub mod config;
pub mod controller;
pub mod errors;
pub mod provider;
pub mod reconciler;
pub mod selection_cache;
pub mod selector;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod validation;

// Re-export common types
pub use app_state::{SessionContext, SharedSessionContext};
pub use config::SessionConfig;
pub use controller::SessionController;
pub use errors::{SessionError, SessionResult};
pub use provider::{
    Network, ProviderConnection, ProviderEvent, ProviderRpcError, SharedProvider, SharedSigner,
    SignerIdentity,
};
pub use reconciler::Subscription;
pub use selection_cache::{CachedSelection, SelectionCache};
pub use selector::{
    CachedProviderSelector, ProviderDescriptor, ProviderOption, ProviderOptions,
    ProviderSelector, SelectionPrompt, SelectorErrorHandler, SelectorHandle,
};
pub use store::{SessionSnapshot, SessionSummary};
pub use validation::{parse_chain_id, AccountValidator};
