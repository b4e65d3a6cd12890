//! In-memory transactional repository.
//!
//! Stands in for relational storage. Each campaign row sits behind its own
//! async mutex, so transactions on the same campaign serialize exactly like
//! `SELECT ... FOR UPDATE` on one row, while different campaigns proceed in
//! parallel. An optional per-write latency models a slow durable store.

use crate::application::error::RepositoryError;
use crate::application::ports::{CampaignRepository, CampaignTransaction};
use crate::domain::{
    application::CampaignApplication,
    campaign::{Campaign, CampaignId, UserId},
};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Applications = DashMap<(CampaignId, UserId), CampaignApplication, RandomState>;

/// Configuration for the in-memory repository.
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// Time every write (commit, save) takes to become durable
    pub write_latency: Duration,
}

/// In-memory implementation of [`CampaignRepository`].
///
/// Cloning shares the same tables.
#[derive(Clone)]
pub struct InMemoryRepository {
    campaigns: Arc<DashMap<CampaignId, Arc<Mutex<Campaign>>, RandomState>>,
    applications: Arc<Applications>,
    config: RepositoryConfig,
    fail_writes: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("campaigns", &self.campaigns.len())
            .field("applications", &self.applications.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    /// Create an empty repository with instant writes.
    pub fn new() -> Self {
        Self::with_config(RepositoryConfig::default())
    }

    /// Create an empty repository with custom configuration.
    pub fn with_config(config: RepositoryConfig) -> Self {
        Self {
            campaigns: Arc::new(DashMap::with_hasher(RandomState::new())),
            applications: Arc::new(DashMap::with_hasher(RandomState::new())),
            config,
            fail_writes: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the whole store unreachable (or reachable again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All application rows for a campaign.
    pub fn applications(&self, id: CampaignId) -> Vec<CampaignApplication> {
        let mut rows: Vec<_> = self
            .applications
            .iter()
            .filter(|entry| entry.key().0 == id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|row| (row.applied_at, row.user_id));
        rows
    }

    fn reachable(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn write_barrier(&self) -> Result<(), RepositoryError> {
        self.reachable()?;
        if !self.config.write_latency.is_zero() {
            tokio::time::sleep(self.config.write_latency).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::WriteFailed("storage rejected write".into()));
        }
        Ok(())
    }

    fn row(&self, id: CampaignId) -> Option<Arc<Mutex<Campaign>>> {
        self.campaigns.get(&id).map(|row| Arc::clone(row.value()))
    }
}

fn upsert(applications: &Applications, application: CampaignApplication) -> bool {
    match applications.entry(application.key()) {
        dashmap::mapref::entry::Entry::Occupied(mut existing) => {
            existing.get_mut().selected = application.selected;
            false
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(application);
            true
        }
    }
}

#[async_trait]
impl CampaignRepository for InMemoryRepository {
    async fn find_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, RepositoryError> {
        self.reachable()?;
        match self.row(id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError> {
        self.write_barrier().await?;
        match self.row(campaign.id) {
            Some(row) => *row.lock().await = campaign.clone(),
            None => {
                self.campaigns
                    .entry(campaign.id)
                    .or_insert_with(|| Arc::new(Mutex::new(campaign.clone())));
            }
        }
        Ok(())
    }

    async fn save_application(
        &self,
        application: CampaignApplication,
    ) -> Result<bool, RepositoryError> {
        self.write_barrier().await?;
        Ok(upsert(&self.applications, application))
    }

    async fn count_applications(&self, id: CampaignId) -> Result<u64, RepositoryError> {
        self.reachable()?;
        Ok(self
            .applications
            .iter()
            .filter(|entry| entry.key().0 == id)
            .count() as u64)
    }

    async fn count_selected(&self, id: CampaignId) -> Result<u64, RepositoryError> {
        self.reachable()?;
        Ok(self
            .applications
            .iter()
            .filter(|entry| entry.key().0 == id && entry.value().selected)
            .count() as u64)
    }

    async fn begin(
        &self,
        id: CampaignId,
    ) -> Result<Option<Box<dyn CampaignTransaction>>, RepositoryError> {
        self.reachable()?;
        let Some(row) = self.row(id) else {
            return Ok(None);
        };
        let guard = row.lock_owned().await;
        let working = guard.clone();
        Ok(Some(Box::new(InMemoryTransaction {
            guard,
            working,
            staged: Vec::new(),
            repository: self.clone(),
        })))
    }
}

/// Transaction holding one campaign row lock until commit or drop.
struct InMemoryTransaction {
    guard: OwnedMutexGuard<Campaign>,
    working: Campaign,
    staged: Vec<CampaignApplication>,
    repository: InMemoryRepository,
}

#[async_trait]
impl CampaignTransaction for InMemoryTransaction {
    fn campaign(&self) -> &Campaign {
        &self.working
    }

    fn campaign_mut(&mut self) -> &mut Campaign {
        &mut self.working
    }

    fn application(&self, user_id: UserId) -> Option<CampaignApplication> {
        self.staged
            .iter()
            .find(|row| row.user_id == user_id)
            .cloned()
            .or_else(|| {
                self.repository
                    .applications
                    .get(&(self.working.id, user_id))
                    .map(|row| row.value().clone())
            })
    }

    fn insert_application(&mut self, application: CampaignApplication) {
        self.staged.push(application);
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemoryTransaction {
            mut guard,
            working,
            staged,
            repository,
        } = *self;

        // The row lock is held through the durable write
        repository.write_barrier().await?;
        *guard = working;
        for application in staged {
            upsert(&repository.applications, application);
        }
        drop(guard);
        Ok(())
    }
}
