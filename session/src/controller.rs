//! Session lifecycle: connect, silent reconnect, disconnect, and reconciliation
//! of provider-initiated changes.
//!
//! Every path that changes the session derives its data from the provider
//! first and only then publishes one complete snapshot. Derivations take a
//! generation ticket when they start; a derivation that finishes after a newer
//! one has already published is discarded instead of overwriting it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::errors::{SessionError, SessionResult};
use crate::provider::{same_handle, Network, ProviderEvent, SharedProvider, SharedSigner};
use crate::reconciler::{self, ProviderEventHandler, Subscription};
use crate::selector::SelectorHandle;
use crate::store::{Generation, SessionSnapshot, SessionStore};
use crate::validation::AccountValidator;

/// The capability currently backing the session and its listeners.
#[derive(Debug)]
struct ActiveSession {
    provider: SharedProvider,
    // None when the provider has no event surface
    subscription: Option<Subscription>,
}

struct DerivedHandles {
    provider: SharedProvider,
    signer: SharedSigner,
    network: Network,
    // The selector handed back a different provider than the event source
    replaced: bool,
    events: Option<broadcast::Receiver<ProviderEvent>>,
}

struct ControllerInner {
    selector: SelectorHandle,
    store: SessionStore,
    validator: AccountValidator,
    active: Mutex<Option<ActiveSession>>,
    reload_tx: watch::Sender<bool>,
}

/// Owns the session: the only writer of the snapshot store.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(selector: SelectorHandle) -> Self {
        let store = SessionStore::new();
        let error_store = store.clone();
        selector.set_error_handler(Arc::new(move |message: &str| {
            if message.is_empty() {
                return;
            }
            let message = message.to_string();
            error_store.update(|prev| {
                (prev.error != message).then(|| SessionSnapshot {
                    error: message.clone(),
                    ..prev.clone()
                })
            });
        }));

        let (reload_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControllerInner {
                selector,
                store,
                validator: AccountValidator::default(),
                active: Mutex::new(None),
                reload_tx,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.current()
    }

    /// Receive every published snapshot as a whole value.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.store.subscribe()
    }

    /// Latches `true` once the wallet revokes all accounts and the application
    /// has to restart from scratch.
    pub fn reload_signal(&self) -> watch::Receiver<bool> {
        self.inner.reload_tx.subscribe()
    }

    pub fn reload_requested(&self) -> bool {
        *self.inner.reload_tx.borrow()
    }

    pub fn active_provider(&self) -> Option<SharedProvider> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.provider.clone())
    }

    /// Select a provider and establish a session on it. Never fails: on error
    /// the previous snapshot stays in place and is returned.
    pub async fn connect(&self) -> SessionSnapshot {
        self.inner.connect().await
    }

    /// Restore a previously selected provider without prompting. Does nothing
    /// when no selection is cached.
    pub async fn reconnect(&self) {
        self.inner.reconnect().await
    }

    /// Tear down the active session. Safe to call repeatedly.
    pub async fn disconnect(&self) -> SessionSnapshot {
        self.inner.teardown(None).await
    }

    /// Tear down the session, also disconnecting `provider` if it is not the
    /// active one.
    pub async fn disconnect_provider(&self, provider: SharedProvider) -> SessionSnapshot {
        self.inner.teardown(Some(provider)).await
    }

    /// Detach listeners and release the selector. The controller rejects
    /// further selections afterwards.
    pub fn shutdown(&self) {
        if self.inner.active.lock().take().is_some() {
            log::debug!("Detached active session on shutdown");
        }
        self.inner.selector.shutdown();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("selector", &self.inner.selector)
            .field("snapshot", &self.inner.store.current().summary())
            .finish()
    }
}

impl ControllerInner {
    async fn connect(self: &Arc<Self>) -> SessionSnapshot {
        let generation = self.store.begin();
        match self.establish(generation).await {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Connected account {} on chain {}",
                    snapshot.account_id.as_deref().unwrap_or("-"),
                    snapshot.chain_id.unwrap_or_default()
                );
                snapshot
            }
            Ok(None) => {
                log::debug!("Discarding connect result superseded by a newer update");
                self.settle_connecting()
            }
            Err(err) if err.is_user_rejection() => {
                log::info!("User declined the wallet connection");
                self.recover(&err)
            }
            Err(err) => {
                log::error!("Failed to connect wallet provider: {}", err);
                self.recover(&err)
            }
        }
    }

    async fn establish(
        self: &Arc<Self>,
        generation: Generation,
    ) -> SessionResult<Option<SessionSnapshot>> {
        let selector = self.selector.get()?;
        let provider = selector.select_provider().await?;
        // Subscribe before deriving so nothing emitted meanwhile is lost.
        let events = provider.events();
        let signer = provider.signer().await?;
        let network = provider.network().await?;
        let account_id = self.derive_account(&signer).await?;

        Ok(self.store.publish(generation, |prev| {
            self.install(provider.clone(), events);
            SessionSnapshot {
                connected: true,
                is_connecting: false,
                chain_id: Some(network.chain_id),
                network: Some(network),
                provider: Some(provider),
                signer: Some(signer),
                account_id: Some(account_id),
                ..prev.clone()
            }
        }))
    }

    async fn reconnect(self: &Arc<Self>) {
        let selector = match self.selector.get() {
            Ok(selector) => selector,
            Err(err) => {
                log::warn!("Cannot restore session: {}", err);
                return;
            }
        };

        let cached = selector.has_cached_selection().await;
        self.store.update(|prev| {
            let pending = cached && !prev.connected;
            (prev.is_connecting != pending).then(|| SessionSnapshot {
                is_connecting: pending,
                ..prev.clone()
            })
        });

        if cached {
            log::debug!("Restoring cached provider selection");
            self.connect().await;
        }
    }

    async fn teardown(&self, provider: Option<SharedProvider>) -> SessionSnapshot {
        let generation = self.store.begin();

        match self.selector.get() {
            Ok(selector) => {
                if let Err(err) = selector.clear_cached_selection().await {
                    log::warn!("Failed to clear cached provider: {}", err);
                }
            }
            Err(err) => log::debug!("Skipping provider cache clear: {}", err),
        }

        // The active session is only released if this teardown wins; a
        // connect that published meanwhile keeps its provider and listeners.
        let mut detached = None;
        let published = self.store.publish(generation, |prev| {
            // Dropping the subscription detaches its listeners.
            detached = self.active.lock().take().map(|active| active.provider);
            prev.cleared()
        });

        let Some(snapshot) = published else {
            log::debug!("Discarding teardown superseded by a newer session");
            return self.store.current();
        };

        let mut targets: Vec<SharedProvider> = provider.into_iter().collect();
        if let Some(detached) = detached {
            if !targets.iter().any(|p| same_handle(p, &detached)) {
                targets.push(detached);
            }
        }

        for target in targets.iter().filter(|p| p.supports_disconnect()) {
            if let Err(err) = target.disconnect().await {
                log::warn!("Provider '{}' failed to disconnect: {}", target.id(), err);
            }
        }

        log::info!("Wallet session disconnected");
        snapshot
    }

    async fn derive_account(&self, signer: &SharedSigner) -> SessionResult<String> {
        let address = signer.address().await?;
        Ok(self.validator.validate_account(&address)?.to_string())
    }

    /// Fetch a fresh provider from the selector along with its handles.
    async fn reacquire(&self, source: &SharedProvider) -> SessionResult<DerivedHandles> {
        let selector = self.selector.get()?;
        let provider = selector.select_provider().await?;
        let replaced = !same_handle(&provider, source);
        let events = if replaced { provider.events() } else { None };
        let signer = provider.signer().await?;
        let network = provider.network().await?;
        Ok(DerivedHandles {
            provider,
            signer,
            network,
            replaced,
            events,
        })
    }

    /// Replace the active session. The outgoing listeners are detached before
    /// the incoming ones start.
    fn install(
        self: &Arc<Self>,
        provider: SharedProvider,
        events: Option<broadcast::Receiver<ProviderEvent>>,
    ) {
        let mut active = self.active.lock();
        drop(active.take());
        let subscription =
            events.map(|events| reconciler::attach(provider.clone(), events, Arc::downgrade(self)));
        *active = Some(ActiveSession {
            provider,
            subscription,
        });
    }

    fn settle_connecting(&self) -> SessionSnapshot {
        self.store.update(|prev| {
            prev.is_connecting.then(|| SessionSnapshot {
                is_connecting: false,
                ..prev.clone()
            })
        })
    }

    fn recover(&self, err: &SessionError) -> SessionSnapshot {
        self.store.update(|prev| {
            let mut next = prev.clone();
            next.is_connecting = false;
            if let SessionError::Selection(message) = err {
                if !message.is_empty() {
                    next.error = message.clone();
                }
            }
            (next != *prev).then_some(next)
        })
    }

    async fn on_accounts_changed(self: &Arc<Self>, source: &SharedProvider, accounts: Vec<String>) {
        let Some(first) = accounts.first() else {
            log::warn!("Wallet revoked all accounts, application reload required");
            drop(self.active.lock().take());
            self.reload_tx.send_replace(true);
            return;
        };

        let generation = self.store.begin();
        let result = async {
            let account_id = self.validator.validate_account(first)?.to_string();
            let derived = self.reacquire(source).await?;
            Ok::<_, SessionError>((account_id, derived))
        }
        .await;

        match result {
            Ok((account_id, derived)) => {
                let DerivedHandles {
                    provider,
                    signer,
                    network,
                    replaced,
                    events,
                } = derived;
                self.store.publish(generation, |prev| {
                    // Only a different provider needs its own listeners.
                    if replaced {
                        self.install(provider.clone(), events);
                    }
                    SessionSnapshot {
                        chain_id: Some(network.chain_id),
                        network: Some(network),
                        provider: Some(provider),
                        signer: Some(signer),
                        account_id: Some(account_id),
                        ..prev.clone()
                    }
                });
            }
            Err(err) => log::error!("Failed to apply account change: {}", err),
        }
    }

    async fn on_chain_changed(self: &Arc<Self>, source: &SharedProvider, chain_id: u64) {
        let generation = self.store.begin();
        let result = async {
            let derived = self.reacquire(source).await?;
            let account_id = self.derive_account(&derived.signer).await?;
            Ok::<_, SessionError>((account_id, derived))
        }
        .await;

        match result {
            Ok((account_id, derived)) => {
                let DerivedHandles {
                    provider,
                    signer,
                    network,
                    replaced,
                    events,
                } = derived;
                self.store.publish(generation, |prev| {
                    if replaced {
                        self.install(provider.clone(), events);
                    }
                    SessionSnapshot {
                        chain_id: Some(chain_id),
                        network: Some(network),
                        provider: Some(provider),
                        signer: Some(signer),
                        account_id: Some(account_id),
                        ..prev.clone()
                    }
                });
            }
            Err(err) => log::error!("Failed to apply chain change to {}: {}", chain_id, err),
        }
    }
}

#[async_trait]
impl ProviderEventHandler for ControllerInner {
    async fn handle_event(self: Arc<Self>, source: SharedProvider, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                self.on_accounts_changed(&source, accounts).await
            }
            ProviderEvent::ChainChanged(chain_id) => self.on_chain_changed(&source, chain_id).await,
            ProviderEvent::Disconnect(err) | ProviderEvent::Error(err) => {
                log::warn!("Provider '{}' reported {}", source.id(), err);
                self.teardown(Some(source)).await;
            }
        }
    }
}
