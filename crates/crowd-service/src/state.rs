use crate::config::ServiceConfig;
use crate::detector::{build_detector, Detector};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared service state. Analytics state is never stored here: every batch
/// job and live connection owns its own session.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    detector: Arc<dyn Detector>,
    shutdown: CancellationToken,
    live_sessions: RwLock<HashMap<String, CancellationToken>>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let detector = build_detector(&config)?;
        Ok(Self::with_detector(config, detector))
    }

    pub fn with_detector(config: ServiceConfig, detector: Arc<dyn Detector>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                detector,
                shutdown: CancellationToken::new(),
                live_sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn detector(&self) -> Arc<dyn Detector> {
        self.inner.detector.clone()
    }

    /// Register a live session; its token is cancelled on service shutdown.
    pub async fn register_live_session(&self, session_id: &str) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        let mut sessions = self.inner.live_sessions.write().await;
        sessions.insert(session_id.to_string(), token.clone());
        token
    }

    pub async fn unregister_live_session(&self, session_id: &str) {
        let mut sessions = self.inner.live_sessions.write().await;
        if let Some(token) = sessions.remove(session_id) {
            token.cancel();
        }
    }

    pub async fn live_session_count(&self) -> usize {
        self.inner.live_sessions.read().await.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub async fn shutdown(&self) -> Result<()> {
        let active = self.live_session_count().await;
        info!(active_sessions = active, "Shutting down crowd service...");
        self.inner.shutdown.cancel();
        info!("Crowd service shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_live_sessions() {
        let state = AppState::new(ServiceConfig::default()).unwrap();
        let token = state.register_live_session("a").await;
        assert_eq!(state.live_session_count().await, 1);

        state.shutdown().await.unwrap();
        assert!(token.is_cancelled());
        assert!(state.is_shutting_down());

        state.unregister_live_session("a").await;
        assert_eq!(state.live_session_count().await, 0);
    }
}
