use std::fs;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::controller::SessionController;
use crate::errors::SessionResult;
use crate::selection_cache::SelectionCache;
use crate::selector::{
    CachedProviderSelector, ProviderOption, ProviderOptions, ProviderSelector, SelectionPrompt,
    SelectorHandle,
};
use crate::store::SessionSnapshot;

/// Everything a host application needs for one wallet session: configuration,
/// the selector singleton, and the controller. Built once at startup and shut
/// down explicitly.
#[derive(Debug)]
pub struct SessionContext {
    config: SessionConfig,
    controller: SessionController,
}

impl SessionContext {
    pub fn initialize(
        config: SessionConfig,
        options: Vec<Arc<dyn ProviderOption>>,
        prompt: Arc<dyn SelectionPrompt>,
    ) -> SessionResult<Self> {
        fs::create_dir_all(&config.cache_dir)?;

        let cache_file = config.cache_file();
        let cache_enabled = config.cache_provider;
        let provider_options = ProviderOptions {
            rpc_url: config.rpc_url.clone(),
        };
        let selector = SelectorHandle::new(Box::new(move || {
            let selector: Arc<dyn ProviderSelector> = Arc::new(
                CachedProviderSelector::new(
                    options.clone(),
                    prompt.clone(),
                    SelectionCache::new(&cache_file),
                )
                .with_cache_enabled(cache_enabled)
                .with_provider_options(provider_options.clone()),
            );
            Ok(selector)
        }));

        log::info!(
            "Session context initialized (provider cache {})",
            if cache_enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            controller: SessionController::new(selector),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.snapshot()
    }

    pub fn shutdown(&self) {
        self.controller.shutdown();
        log::info!("Session context shut down");
    }
}

/// Shared session context handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct SharedSessionContext(pub Arc<SessionContext>);

impl SharedSessionContext {
    pub fn new(inner: SessionContext) -> Self {
        Self(Arc::new(inner))
    }

    pub fn controller(&self) -> &SessionController {
        self.0.controller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOption, MockPrompt, MockProvider};
    use tempfile::TempDir;

    const ACCOUNT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn options(option: &Arc<MockOption>) -> Vec<Arc<dyn ProviderOption>> {
        vec![option.clone() as Arc<dyn ProviderOption>]
    }

    #[tokio::test]
    async fn connect_then_reconnect_after_restart() {
        let temp = TempDir::new().unwrap();
        let config = SessionConfig::new(temp.path()).with_rpc_url("https://rpc.example.org");
        let provider = MockProvider::new("injected", ACCOUNT, 1);
        let option = Arc::new(MockOption::new("injected", provider));
        let prompt = Arc::new(MockPrompt::choosing("injected"));

        let context =
            SessionContext::initialize(config.clone(), options(&option), prompt.clone()).unwrap();
        let snapshot = context.controller().connect().await;
        assert!(snapshot.connected);
        assert_eq!(
            option.last_options().unwrap().rpc_url.as_deref(),
            Some("https://rpc.example.org")
        );
        context.shutdown();

        // A fresh context over the same cache directory restores silently.
        let restarted =
            SessionContext::initialize(config, options(&option), prompt.clone()).unwrap();
        restarted.controller().reconnect().await;
        assert!(restarted.snapshot().connected);
        assert!(!restarted.snapshot().is_connecting);
        assert_eq!(prompt.prompt_count(), 1);
    }

    #[tokio::test]
    async fn dismissed_prompt_surfaces_error() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new("injected", ACCOUNT, 1);
        let option = Arc::new(MockOption::new("injected", provider));
        let context = SessionContext::initialize(
            SessionConfig::new(temp.path()),
            options(&option),
            Arc::new(MockPrompt::dismissing()),
        )
        .unwrap();

        let snapshot = context.controller().connect().await;
        assert!(!snapshot.connected);
        assert!(!snapshot.is_connecting);
        assert_eq!(snapshot.error, "Modal closed by user");
    }

    #[tokio::test]
    async fn shutdown_stops_selection() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new("injected", ACCOUNT, 1);
        let option = Arc::new(MockOption::new("injected", provider));
        let prompt = Arc::new(MockPrompt::choosing("injected"));
        let context = SessionContext::initialize(
            SessionConfig::new(temp.path()),
            options(&option),
            prompt.clone(),
        )
        .unwrap();

        context.shutdown();
        let before = context.snapshot();
        let after = context.controller().connect().await;
        assert_eq!(before, after);
        assert_eq!(prompt.prompt_count(), 0);
    }
}
