//! Listener attachment for provider change notifications.
//!
//! Each attached capability gets one background task that drains its event
//! receiver and hands events, one at a time, to a [`ProviderEventHandler`].
//! The returned [`Subscription`] owns that task's lifetime: dropping it
//! detaches the listeners. Cancellation is cooperative, so a handler that is
//! already running (including one that detaches its own subscription) always
//! runs to completion.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;

use crate::provider::{ProviderEvent, SharedProvider};

#[async_trait]
pub(crate) trait ProviderEventHandler: Send + Sync + 'static {
    async fn handle_event(self: Arc<Self>, source: SharedProvider, event: ProviderEvent);
}

/// RAII handle for the listeners attached to one capability.
pub struct Subscription {
    provider: SharedProvider,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// Detach the listeners, equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("provider", &self.provider.id())
            .field("active", &self.cancel_tx.is_some())
            .finish()
    }
}

/// Start delivering `events` from `provider` to `handler`.
///
/// Must be called from within a Tokio runtime. The handler is held weakly so
/// an orphaned listener task never keeps the session alive.
pub(crate) fn attach<H>(
    provider: SharedProvider,
    mut events: broadcast::Receiver<ProviderEvent>,
    handler: Weak<H>,
) -> Subscription
where
    H: ProviderEventHandler,
{
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let source = provider.clone();

    tokio::spawn(async move {
        log::debug!("Attached listeners to provider '{}'", source.id());
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        let Some(handler) = handler.upgrade() else {
                            break;
                        };
                        log::debug!("Provider '{}' emitted {}", source.id(), event.kind());
                        handler.handle_event(source.clone(), event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "Provider '{}' listener lagged, {} events skipped",
                            source.id(),
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        log::debug!("Detached listeners from provider '{}'", source.id());
    });

    Subscription {
        provider,
        cancel_tx: Some(cancel_tx),
    }
}
