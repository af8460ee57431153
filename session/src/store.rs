use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::provider::{same_optional_handle, Network, SharedProvider, SharedSigner};

/// Immutable view of the connection at one point in time.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub is_connecting: bool,
    pub network: Option<Network>,
    pub provider: Option<SharedProvider>,
    pub signer: Option<SharedSigner>,
    pub account_id: Option<String>,
    pub chain_id: Option<u64>,
    pub error: String,
}

impl SessionSnapshot {
    /// Teardown result: handles dropped, everything else kept as-is.
    pub fn cleared(&self) -> Self {
        Self {
            connected: false,
            is_connecting: false,
            provider: None,
            signer: None,
            ..self.clone()
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            connected: self.connected,
            is_connecting: self.is_connecting,
            network: self.network.clone(),
            provider_id: self.provider.as_ref().map(|p| p.id().to_string()),
            account_id: self.account_id.clone(),
            chain_id: self.chain_id,
            error: self.error.clone(),
        }
    }
}

impl PartialEq for SessionSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.connected == other.connected
            && self.is_connecting == other.is_connecting
            && self.network == other.network
            && same_optional_handle(&self.provider, &other.provider)
            && same_optional_handle(&self.signer, &other.signer)
            && self.account_id == other.account_id
            && self.chain_id == other.chain_id
            && self.error == other.error
    }
}

/// Serializable snapshot without live handles, for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub connected: bool,
    pub is_connecting: bool,
    pub network: Option<Network>,
    pub provider_id: Option<String>,
    pub account_id: Option<String>,
    pub chain_id: Option<u64>,
    pub error: String,
}

/// Ticket taken when a derivation starts; later tickets win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Generation(u64);

#[derive(Debug)]
struct StoreState {
    tx: watch::Sender<SessionSnapshot>,
    issued: AtomicU64,
    published: AtomicU64,
}

/// Single cell holding the current snapshot. Every publish replaces the whole value.
#[derive(Debug, Clone)]
pub(crate) struct SessionStore {
    state: Arc<StoreState>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            state: Arc::new(StoreState {
                tx,
                issued: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> SessionSnapshot {
        self.state.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.tx.subscribe()
    }

    pub(crate) fn begin(&self) -> Generation {
        Generation(self.state.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Replace the snapshot with `next(previous)` unless a newer generation
    /// already published. Returns the published value, or `None` when stale.
    pub(crate) fn publish<F>(&self, generation: Generation, next: F) -> Option<SessionSnapshot>
    where
        F: FnOnce(&SessionSnapshot) -> SessionSnapshot,
    {
        let mut published = None;
        self.state.tx.send_if_modified(|current| {
            // The watch write lock serializes publishers, so load/store is enough.
            if generation.0 < self.state.published.load(Ordering::SeqCst) {
                return false;
            }
            let replacement = next(current);
            self.state.published.store(generation.0, Ordering::SeqCst);
            published = Some(replacement.clone());
            *current = replacement;
            true
        });
        published
    }

    /// Generation-free replace, for fields no derivation owns (error text,
    /// pending reconnect). Returns the resulting snapshot.
    pub(crate) fn update<F>(&self, next: F) -> SessionSnapshot
    where
        F: FnOnce(&SessionSnapshot) -> Option<SessionSnapshot>,
    {
        self.state.tx.send_if_modified(|current| match next(current) {
            Some(replacement) => {
                *current = replacement;
                true
            }
            None => false,
        });
        self.current()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_is_empty() {
        let store = SessionStore::new();
        let snapshot = store.current();
        assert!(!snapshot.connected);
        assert!(!snapshot.is_connecting);
        assert!(snapshot.network.is_none());
        assert!(snapshot.signer.is_none());
        assert!(snapshot.account_id.is_none());
        assert!(snapshot.chain_id.is_none());
        assert_eq!(snapshot.error, "");
    }

    #[test]
    fn stale_generation_discarded() {
        let store = SessionStore::new();
        let slow = store.begin();
        let fast = store.begin();

        let published = store.publish(fast, |prev| SessionSnapshot {
            chain_id: Some(137),
            ..prev.clone()
        });
        assert!(published.is_some());

        let discarded = store.publish(slow, |prev| SessionSnapshot {
            chain_id: Some(1),
            ..prev.clone()
        });
        assert!(discarded.is_none());
        assert_eq!(store.current().chain_id, Some(137));
    }

    #[test]
    fn older_generation_publishes_when_newer_never_did() {
        let store = SessionStore::new();
        let first = store.begin();
        let _abandoned = store.begin();
        assert!(store
            .publish(first, |prev| SessionSnapshot {
                chain_id: Some(5),
                ..prev.clone()
            })
            .is_some());
    }

    #[tokio::test]
    async fn subscribers_see_whole_values() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();
        let generation = store.begin();
        store.publish(generation, |prev| SessionSnapshot {
            account_id: Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into()),
            chain_id: Some(1),
            ..prev.clone()
        });

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen, store.current());
        assert_eq!(seen.chain_id, Some(1));
    }

    #[test]
    fn update_without_change_does_not_notify() {
        let store = SessionStore::new();
        let rx = store.subscribe();
        store.update(|_| None);
        assert!(!rx.has_changed().unwrap());

        let updated = store.update(|prev| {
            Some(SessionSnapshot {
                error: "Modal closed by user".into(),
                ..prev.clone()
            })
        });
        assert_eq!(updated.error, "Modal closed by user");
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn cleared_keeps_network_and_account() {
        let snapshot = SessionSnapshot {
            connected: true,
            network: Some(Network::new(1, "homestead")),
            account_id: Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into()),
            chain_id: Some(1),
            error: "stale".into(),
            ..SessionSnapshot::default()
        };
        let cleared = snapshot.cleared();
        assert!(!cleared.connected);
        assert!(cleared.provider.is_none());
        assert!(cleared.signer.is_none());
        assert_eq!(cleared.network, snapshot.network);
        assert_eq!(cleared.account_id, snapshot.account_id);
        assert_eq!(cleared.chain_id, Some(1));
        assert_eq!(cleared.error, "stale");
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = SessionSnapshot {
            chain_id: Some(137),
            ..SessionSnapshot::default()
        }
        .summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["chainId"], 137);
        assert_eq!(json["isConnecting"], false);
    }
}
