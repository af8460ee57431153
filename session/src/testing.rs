//! Test doubles for the provider and selector contracts.
//!
//! These drive the session lifecycle without a real wallet:
//! - [`MockProvider`]: scripted capability whose events are emitted by the test
//! - [`MockSelector`]: hands out queued providers and tracks the cached marker
//! - [`MockOption`] / [`MockPrompt`]: pieces for [`CachedProviderSelector`]
//!
//! # Example
//!
//! ```ignore
//! let provider = MockProvider::new("injected", "0x5aAe...eAed", 1);
//! let selector = MockSelector::new();
//! selector.push_provider(provider.clone());
//! let controller = SessionController::new(SelectorHandle::from_selector(selector));
//! controller.connect().await;
//! provider.emit(ProviderEvent::ChainChanged(137));
//! ```
//!
//! [`CachedProviderSelector`]: crate::selector::CachedProviderSelector

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::errors::{SessionError, SessionResult};
use crate::provider::{
    Network, ProviderConnection, ProviderEvent, SharedProvider, SharedSigner, SignerIdentity,
};
use crate::selector::{
    ProviderDescriptor, ProviderOption, ProviderOptions, ProviderSelector, SelectionPrompt,
    SelectorErrorHandler,
};

const EVENT_CAPACITY: usize = 64;

/// Name ethers-style libraries report for well-known chains.
pub fn network_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "homestead",
        5 => "goerli",
        137 => "matic",
        11155111 => "sepolia",
        _ => "unknown",
    }
}

#[derive(Debug)]
pub struct MockSigner {
    address: String,
    fail: bool,
}

#[async_trait]
impl SignerIdentity for MockSigner {
    async fn address(&self) -> SessionResult<String> {
        if self.fail {
            return Err(SessionError::Provider("signer unavailable".to_string()));
        }
        Ok(self.address.clone())
    }
}

/// Scripted provider connection.
#[derive(Debug)]
pub struct MockProvider {
    id: String,
    account: Mutex<String>,
    chain_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
    has_event_surface: bool,
    supports_disconnect: AtomicBool,
    fail_network: AtomicBool,
    fail_address: AtomicBool,
    fail_disconnect: AtomicBool,
    network_delay: Mutex<Option<Duration>>,
    disconnect_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: &str, account: &str, chain_id: u64) -> Arc<Self> {
        Arc::new(Self::build(id, account, chain_id, true))
    }

    /// A provider without any event surface.
    pub fn silent(id: &str, account: &str, chain_id: u64) -> Arc<Self> {
        Arc::new(Self::build(id, account, chain_id, false))
    }

    fn build(id: &str, account: &str, chain_id: u64, has_event_surface: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: id.to_string(),
            account: Mutex::new(account.to_string()),
            chain_id: AtomicU64::new(chain_id),
            events,
            has_event_surface,
            supports_disconnect: AtomicBool::new(true),
            fail_network: AtomicBool::new(false),
            fail_address: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            network_delay: Mutex::new(None),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Emit an event to every attached listener. Returns how many received it.
    pub fn emit(&self, event: ProviderEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Emit a raw EIP-1193 notification, decoded the way a host bridge would.
    pub fn emit_eip1193(&self, name: &str, payload: serde_json::Value) -> SessionResult<usize> {
        Ok(self.emit(ProviderEvent::from_eip1193(name, &payload)?))
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn set_account(&self, account: &str) {
        *self.account.lock() = account.to_string();
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    pub fn set_fail_network(&self, fail: bool) {
        self.fail_network.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_address(&self, fail: bool) {
        self.fail_address.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_supports_disconnect(&self, supported: bool) {
        self.supports_disconnect.store(supported, Ordering::SeqCst);
    }

    pub fn set_network_delay(&self, delay: Option<Duration>) {
        *self.network_delay.lock() = delay;
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderConnection for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn signer(&self) -> SessionResult<SharedSigner> {
        Ok(Arc::new(MockSigner {
            address: self.account.lock().clone(),
            fail: self.fail_address.load(Ordering::SeqCst),
        }))
    }

    async fn network(&self) -> SessionResult<Network> {
        let delay = *self.network_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_network.load(Ordering::SeqCst) {
            return Err(SessionError::Provider("could not detect network".to_string()));
        }
        let chain_id = self.chain_id.load(Ordering::SeqCst);
        Ok(Network::new(chain_id, network_name(chain_id)))
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        self.has_event_surface.then(|| self.events.subscribe())
    }

    fn supports_disconnect(&self) -> bool {
        self.supports_disconnect.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(SessionError::Provider("bridge already closed".to_string()));
        }
        Ok(())
    }
}

/// Selector handing out queued results; once the queue is drained it keeps
/// returning the last provider, like a wallet reusing its open connection.
#[derive(Default)]
pub struct MockSelector {
    queue: Mutex<VecDeque<SessionResult<SharedProvider>>>,
    last: Mutex<Option<SharedProvider>>,
    cached: AtomicBool,
    selections: AtomicUsize,
    clears: AtomicUsize,
    clear_delay: Mutex<Option<Duration>>,
    error_handlers: Mutex<Vec<SelectorErrorHandler>>,
}

impl MockSelector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_provider(&self, provider: SharedProvider) {
        self.queue.lock().push_back(Ok(provider));
    }

    pub fn push_failure(&self, error: SessionError) {
        self.queue.lock().push_back(Err(error));
    }

    pub fn set_cached(&self, cached: bool) {
        self.cached.store(cached, Ordering::SeqCst);
    }

    pub fn selection_count(&self) -> usize {
        self.selections.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn set_clear_delay(&self, delay: Option<Duration>) {
        *self.clear_delay.lock() = delay;
    }

    /// Report a selection-layer failure to registered handlers.
    pub fn raise_error(&self, message: &str) {
        let handlers = self.error_handlers.lock().clone();
        for handler in handlers {
            handler(message);
        }
    }
}

#[async_trait]
impl ProviderSelector for MockSelector {
    async fn select_provider(&self) -> SessionResult<SharedProvider> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().pop_front();
        match next {
            Some(Ok(provider)) => {
                *self.last.lock() = Some(provider.clone());
                self.cached.store(true, Ordering::SeqCst);
                Ok(provider)
            }
            Some(Err(err)) => {
                if let SessionError::Selection(msg) = &err {
                    self.raise_error(msg);
                }
                Err(err)
            }
            None => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| SessionError::Selection("No provider available".to_string())),
        }
    }

    async fn has_cached_selection(&self) -> bool {
        self.cached.load(Ordering::SeqCst)
    }

    async fn clear_cached_selection(&self) -> SessionResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        let delay = *self.clear_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.cached.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_error(&self, handler: SelectorErrorHandler) {
        self.error_handlers.lock().push(handler);
    }
}

/// Provider option that always connects to the same mock provider.
pub struct MockOption {
    descriptor: ProviderDescriptor,
    provider: Arc<MockProvider>,
    fail: AtomicBool,
    connects: AtomicUsize,
    last_options: Mutex<Option<ProviderOptions>>,
}

impl MockOption {
    pub fn new(id: &str, provider: Arc<MockProvider>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: id.to_string(),
                name: id.to_string(),
            },
            provider,
            fail: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ProviderOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl ProviderOption for MockOption {
    fn descriptor(&self) -> ProviderDescriptor {
        self.descriptor.clone()
    }

    async fn connect(&self, options: &ProviderOptions) -> SessionResult<SharedProvider> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(options.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Provider("User rejected the request.".to_string()));
        }
        Ok(self.provider.clone())
    }
}

/// Selection UI stand-in with a fixed answer.
pub struct MockPrompt {
    choice: Option<String>,
    prompts: AtomicUsize,
}

impl MockPrompt {
    pub fn choosing(id: &str) -> Self {
        Self {
            choice: Some(id.to_string()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn dismissing() -> Self {
        Self {
            choice: None,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SelectionPrompt for MockPrompt {
    async fn choose(&self, _options: &[ProviderDescriptor]) -> SessionResult<Option<String>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.choice.clone())
    }
}
