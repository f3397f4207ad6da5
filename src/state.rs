//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::upload::{JobRunner, SessionRegistry, SessionStorage, SubmissionOrchestrator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: SessionRegistry,
    orchestrator: SubmissionOrchestrator,
}

impl AppState {
    /// Build the registry and orchestrator described by `config`
    pub fn new(config: Config) -> Self {
        let registry = SessionRegistry::with_limits(config.upload.limits());
        let orchestrator = SubmissionOrchestrator::new(
            SessionStorage::new(config.storage.root.clone()),
            JobRunner::new(config.processor.clone()),
        );

        Self {
            inner: Arc::new(AppStateInner {
                registry,
                orchestrator,
            }),
        }
    }

    /// Get the live session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Get the submission orchestrator
    pub fn orchestrator(&self) -> &SubmissionOrchestrator {
        &self.inner.orchestrator
    }

    /// Get the session storage
    pub fn storage(&self) -> &SessionStorage {
        self.inner.orchestrator.storage()
    }
}
