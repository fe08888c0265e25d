//! Campaign bookkeeping shared by the TWAP and grid drivers.
//!
//! The registry is the only mutation point for campaign lifecycle state. A
//! single mutex guards both maps and the id counter; the lock is held for map
//! mutations only, never across a network call, so a slow exchange never
//! blocks unrelated campaigns.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe active/completed maps for one campaign kind.
pub struct CampaignRegistry<T> {
    prefix: &'static str,
    inner: Mutex<RegistryInner<T>>,
}

struct RegistryInner<T> {
    active: HashMap<String, Arc<T>>,
    completed: HashMap<String, Arc<T>>,
    next_seq: u64,
}

impl<T> CampaignRegistry<T> {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            inner: Mutex::new(RegistryInner {
                active: HashMap::new(),
                completed: HashMap::new(),
                next_seq: 1,
            }),
        }
    }

    /// Registers a new campaign under a freshly issued id.
    ///
    /// Ids carry a timestamp for the operator plus a monotonic sequence
    /// number for uniqueness; they are never reused.
    pub async fn insert(&self, campaign: T) -> (String, Arc<T>) {
        let mut inner = self.inner.lock().await;
        let id = format!(
            "{}_{}_{}",
            self.prefix,
            Utc::now().format("%Y%m%d%H%M%S"),
            inner.next_seq
        );
        inner.next_seq += 1;
        let campaign = Arc::new(campaign);
        inner.active.insert(id.clone(), Arc::clone(&campaign));
        (id, campaign)
    }

    /// Looks up a campaign in the active map only.
    pub async fn get_active(&self, id: &str) -> Option<Arc<T>> {
        self.inner.lock().await.active.get(id).cloned()
    }

    /// Looks up a campaign in either map, reporting which one held it.
    pub async fn get(&self, id: &str) -> Option<(Arc<T>, bool)> {
        let inner = self.inner.lock().await;
        if let Some(campaign) = inner.active.get(id) {
            return Some((Arc::clone(campaign), true));
        }
        inner.completed.get(id).map(|c| (Arc::clone(c), false))
    }

    /// Moves a campaign from active to completed. Returns `false` when the id
    /// is not active (already promoted or never existed).
    pub async fn promote(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.active.remove(id) {
            Some(campaign) => {
                inner.completed.insert(id.to_string(), campaign);
                true
            }
            None => false,
        }
    }

    pub async fn active_ids(&self) -> Vec<String> {
        self.inner.lock().await.active.keys().cloned().collect()
    }

    pub async fn active(&self) -> Vec<(String, Arc<T>)> {
        self.inner
            .lock()
            .await
            .active
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect()
    }

    pub async fn completed(&self) -> Vec<(String, Arc<T>)> {
        self.inner
            .lock()
            .await
            .completed
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect()
    }

    /// Drops all completed campaigns, returning how many were removed.
    pub async fn clean_completed(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.completed.len();
        inner.completed.clear();
        count
    }
}
