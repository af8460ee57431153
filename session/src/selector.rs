//! Provider selection: the contract the session relies on, an adapter that
//! remembers the chosen provider, and the explicitly owned selector singleton.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};
use crate::provider::SharedProvider;
use crate::selection_cache::SelectionCache;

pub type SelectorErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Produces provider connections, possibly by asking the user.
#[async_trait]
pub trait ProviderSelector: Send + Sync {
    async fn select_provider(&self) -> SessionResult<SharedProvider>;

    async fn has_cached_selection(&self) -> bool;

    async fn clear_cached_selection(&self) -> SessionResult<()>;

    /// Register a handler for selection-layer failures.
    fn on_error(&self, handler: SelectorErrorHandler);
}

/// Settings passed to provider options when they open a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    pub rpc_url: Option<String>,
}

/// What a selection prompt shows for each option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
}

/// One way of reaching a wallet (injected extension, bridge, ...).
#[async_trait]
pub trait ProviderOption: Send + Sync {
    fn descriptor(&self) -> ProviderDescriptor;

    async fn connect(&self, options: &ProviderOptions) -> SessionResult<SharedProvider>;
}

/// The selection UI. Returns the chosen option id, or `None` when dismissed.
#[async_trait]
pub trait SelectionPrompt: Send + Sync {
    async fn choose(&self, options: &[ProviderDescriptor]) -> SessionResult<Option<String>>;
}

/// Selector that remembers the last used option and reuses it without prompting.
pub struct CachedProviderSelector {
    options: Vec<Arc<dyn ProviderOption>>,
    prompt: Arc<dyn SelectionPrompt>,
    cache: SelectionCache,
    cache_enabled: bool,
    provider_options: ProviderOptions,
    error_handlers: Mutex<Vec<SelectorErrorHandler>>,
}

impl CachedProviderSelector {
    pub fn new(
        options: Vec<Arc<dyn ProviderOption>>,
        prompt: Arc<dyn SelectionPrompt>,
        cache: SelectionCache,
    ) -> Self {
        Self {
            options,
            prompt,
            cache,
            cache_enabled: true,
            provider_options: ProviderOptions::default(),
            error_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_provider_options(mut self, provider_options: ProviderOptions) -> Self {
        self.provider_options = provider_options;
        self
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.options.iter().map(|o| o.descriptor()).collect()
    }

    fn option(&self, id: &str) -> Option<&Arc<dyn ProviderOption>> {
        self.options.iter().find(|o| o.descriptor().id == id)
    }

    fn cached_option_id(&self) -> Option<String> {
        if !self.cache_enabled {
            return None;
        }
        match self.cache.load() {
            Ok(Some(cached)) if self.option(&cached.provider_id).is_some() => {
                Some(cached.provider_id)
            }
            Ok(Some(cached)) => {
                log::warn!(
                    "Cached provider '{}' is not a configured option",
                    cached.provider_id
                );
                None
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("Failed to read provider cache: {}", err);
                None
            }
        }
    }

    fn report(&self, error: &SessionError) {
        let message = match error {
            SessionError::Selection(msg) => msg.clone(),
            other => other.to_string(),
        };
        if message.is_empty() {
            return;
        }
        let handlers = self.error_handlers.lock().clone();
        for handler in handlers {
            handler(&message);
        }
    }

    async fn choose_option(&self) -> SessionResult<String> {
        if let Some(cached) = self.cached_option_id() {
            log::debug!("Reusing cached provider '{}'", cached);
            return Ok(cached);
        }

        match self.prompt.choose(&self.descriptors()).await? {
            Some(id) if self.option(&id).is_some() => Ok(id),
            Some(id) => Err(SessionError::Selection(format!(
                "Unknown provider option '{}'",
                id
            ))),
            None => Err(SessionError::Selection("Modal closed by user".to_string())),
        }
    }

    async fn connect_selected(&self) -> SessionResult<SharedProvider> {
        let id = self.choose_option().await?;
        let option = self
            .option(&id)
            .ok_or_else(|| SessionError::Selection(format!("Unknown provider option '{}'", id)))?;

        let provider = option
            .connect(&self.provider_options)
            .await
            .map_err(|err| match err {
                SessionError::Selection(_) => err,
                other => SessionError::Selection(other.to_string()),
            })?;

        if self.cache_enabled {
            if let Err(err) = self.cache.save(&id) {
                log::warn!("Failed to cache provider '{}': {}", id, err);
            }
        }
        Ok(provider)
    }
}

#[async_trait]
impl ProviderSelector for CachedProviderSelector {
    async fn select_provider(&self) -> SessionResult<SharedProvider> {
        let result = self.connect_selected().await;
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }

    async fn has_cached_selection(&self) -> bool {
        self.cached_option_id().is_some()
    }

    async fn clear_cached_selection(&self) -> SessionResult<()> {
        self.cache.clear()
    }

    fn on_error(&self, handler: SelectorErrorHandler) {
        self.error_handlers.lock().push(handler);
    }
}

pub type SelectorFactory = Box<dyn Fn() -> SessionResult<Arc<dyn ProviderSelector>> + Send + Sync>;

enum SelectorSlot {
    Empty,
    Ready(Arc<dyn ProviderSelector>),
    ShutDown,
}

/// Owns the application's single selector: built on first use, then reused
/// until [`shutdown`](Self::shutdown).
pub struct SelectorHandle {
    factory: SelectorFactory,
    slot: Mutex<SelectorSlot>,
    error_handler: Mutex<Option<SelectorErrorHandler>>,
}

impl SelectorHandle {
    pub fn new(factory: SelectorFactory) -> Self {
        Self {
            factory,
            slot: Mutex::new(SelectorSlot::Empty),
            error_handler: Mutex::new(None),
        }
    }

    pub fn from_selector(selector: Arc<dyn ProviderSelector>) -> Self {
        let shared = selector.clone();
        Self::new(Box::new(move || Ok(shared.clone())))
    }

    /// Handler registered on the selector when it is constructed.
    pub(crate) fn set_error_handler(&self, handler: SelectorErrorHandler) {
        *self.error_handler.lock() = Some(handler);
    }

    pub fn get(&self) -> SessionResult<Arc<dyn ProviderSelector>> {
        let mut slot = self.slot.lock();
        match &*slot {
            SelectorSlot::Ready(selector) => Ok(selector.clone()),
            SelectorSlot::ShutDown => Err(SessionError::ShutDown),
            SelectorSlot::Empty => {
                let selector = (self.factory)()?;
                if let Some(handler) = self.error_handler.lock().clone() {
                    selector.on_error(handler);
                }
                log::debug!("Provider selector constructed");
                *slot = SelectorSlot::Ready(selector.clone());
                Ok(selector)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.slot.lock(), SelectorSlot::Ready(_))
    }

    pub fn shutdown(&self) {
        *self.slot.lock() = SelectorSlot::ShutDown;
    }
}

impl std::fmt::Debug for SelectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.slot.lock() {
            SelectorSlot::Empty => "empty",
            SelectorSlot::Ready(_) => "ready",
            SelectorSlot::ShutDown => "shut down",
        };
        f.debug_struct("SelectorHandle").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOption, MockPrompt, MockProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ACCOUNT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn build_selector(
        temp: &TempDir,
        prompt: Arc<MockPrompt>,
    ) -> (CachedProviderSelector, Arc<MockOption>) {
        let option = Arc::new(MockOption::new(
            "injected",
            MockProvider::new("injected", ACCOUNT, 1),
        ));
        let cache = SelectionCache::new(temp.path().join("selected-provider.json"));
        let options = vec![option.clone() as Arc<dyn ProviderOption>];
        let selector = CachedProviderSelector::new(options, prompt, cache);
        (selector, option)
    }

    #[tokio::test]
    async fn caches_choice_and_skips_prompt_next_time() {
        let temp = TempDir::new().unwrap();
        let prompt = Arc::new(MockPrompt::choosing("injected"));
        let (selector, option) = build_selector(&temp, prompt.clone());

        assert!(!selector.has_cached_selection().await);
        selector.select_provider().await.unwrap();
        assert_eq!(prompt.prompt_count(), 1);
        assert!(selector.has_cached_selection().await);

        selector.select_provider().await.unwrap();
        assert_eq!(prompt.prompt_count(), 1);
        assert_eq!(option.connect_count(), 2);

        selector.clear_cached_selection().await.unwrap();
        assert!(!selector.has_cached_selection().await);
    }

    #[tokio::test]
    async fn dismissed_prompt_reports_error() {
        let temp = TempDir::new().unwrap();
        let (selector, _) = build_selector(&temp, Arc::new(MockPrompt::dismissing()));
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        selector.on_error(Arc::new(move |msg| sink.lock().push(msg.to_string())));

        let err = selector.select_provider().await.unwrap_err();
        assert_eq!(err, SessionError::Selection("Modal closed by user".into()));
        assert_eq!(*seen.lock(), vec!["Modal closed by user".to_string()]);
        assert!(!selector.has_cached_selection().await);
    }

    #[tokio::test]
    async fn disabled_cache_always_prompts() {
        let temp = TempDir::new().unwrap();
        let prompt = Arc::new(MockPrompt::choosing("injected"));
        let (selector, _) = build_selector(&temp, prompt.clone());
        let selector = selector.with_cache_enabled(false);

        selector.select_provider().await.unwrap();
        selector.select_provider().await.unwrap();
        assert_eq!(prompt.prompt_count(), 2);
        assert!(!selector.has_cached_selection().await);
    }

    #[test]
    fn handle_constructs_once_and_shuts_down() {
        let temp = TempDir::new().unwrap();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let path = temp.path().join("selected-provider.json");
        let handle = SelectorHandle::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let selector: Arc<dyn ProviderSelector> = Arc::new(CachedProviderSelector::new(
                Vec::new(),
                Arc::new(MockPrompt::dismissing()),
                SelectionCache::new(&path),
            ));
            Ok(selector)
        }));

        assert!(!handle.is_initialized());
        handle.get().unwrap();
        handle.get().unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        handle.shutdown();
        assert!(matches!(handle.get(), Err(SessionError::ShutDown)));
    }
}
