/// Proxy fleet synchronization
///
/// When the review job changes a user's lifecycle status, the proxy
/// fleet has to follow: an activated user gets their inbound accounts
/// re-issued, a limited or expired user gets them torn down. The seam is
/// deliberately narrow; how accounts reach the nodes is the transport's
/// business.
///
/// Sync failures are logged by the caller and never block the status
/// transition itself: the store is the source of truth and the fleet
/// converges on the next connection attempt.
use async_trait::async_trait;
use relaymeter_shared::models::user::User;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait ProxySync: Send + Sync {
    /// Issues the user's accounts across the fleet
    async fn provision(&self, user: &User) -> anyhow::Result<()>;

    /// Removes the user's accounts from the fleet
    async fn deprovision(&self, user: &User) -> anyhow::Result<()>;
}

/// No-op sync for deployments without a live fleet attached
pub struct NoopProxySync;

#[async_trait]
impl ProxySync for NoopProxySync {
    async fn provision(&self, user: &User) -> anyhow::Result<()> {
        debug!(username = %user.username, "provision (noop)");
        Ok(())
    }

    async fn deprovision(&self, user: &User) -> anyhow::Result<()> {
        debug!(username = %user.username, "deprovision (noop)");
        Ok(())
    }
}

/// What a [`RecordingProxySync`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Provision,
    Deprovision,
}

/// In-memory sync for tests; records every call in order
#[derive(Default)]
pub struct RecordingProxySync {
    actions: Mutex<Vec<(SyncAction, Uuid)>>,
}

impl RecordingProxySync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<(SyncAction, Uuid)> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxySync for RecordingProxySync {
    async fn provision(&self, user: &User) -> anyhow::Result<()> {
        self.actions
            .lock()
            .unwrap()
            .push((SyncAction::Provision, user.id));
        Ok(())
    }

    async fn deprovision(&self, user: &User) -> anyhow::Result<()> {
        self.actions
            .lock()
            .unwrap()
            .push((SyncAction::Deprovision, user.id));
        Ok(())
    }
}
