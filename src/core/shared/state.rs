use crate::core::config::AppConfig;
use crate::performance::store::PerformanceStore;
use crate::security::capability::CapabilityChecker;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn PerformanceStore>,
    pub capabilities: Arc<dyn CapabilityChecker>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PerformanceStore>,
        capabilities: Arc<dyn CapabilityChecker>,
    ) -> Self {
        Self {
            config,
            store,
            capabilities,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_prefix", &self.config.api_prefix)
            .finish_non_exhaustive()
    }
}
