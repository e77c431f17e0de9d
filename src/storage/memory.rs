//! In-memory storage backend
//!
//! Sites live in an arena keyed by (user id, site id). Each entry carries its
//! own lock, so a visit to one site never waits on another site, even under
//! the same user. DashMap guards are only held long enough to clone the
//! entry's `Arc`; no guard is ever held across an `.await`.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{NewUser, Prefs, SiteSnapshot, UserRecord};
use crate::storage::{Storage, StorageError, StorageResult, VisitRecord};

type SiteKey = (String, String);
type SiteCell = Arc<RwLock<SiteSnapshot>>;

#[derive(Default)]
pub struct MemoryStorage {
    users: DashMap<String, UserRecord>,
    sites: DashMap<SiteKey, SiteCell>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_site(&self, user_id: &str, site_id: &str) -> Option<SiteCell> {
        self.sites
            .get(&(user_id.to_string(), site_id.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn site_cell(&self, user_id: &str, site_id: &str) -> SiteCell {
        if let Some(cell) = self.existing_site(user_id, site_id) {
            return cell;
        }

        let cell = self
            .sites
            .entry((user_id.to_string(), site_id.to_string()))
            .or_default();
        Arc::clone(cell.value())
    }

    fn update_user<F>(&self, user_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut UserRecord),
    {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                update(user.value_mut());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, user: &NewUser) -> StorageResult<()> {
        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(user.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(UserRecord {
                    id: user.id.clone(),
                    password_hash: user.password_hash.clone(),
                    token: user.token.clone(),
                    prefs: Prefs::new(),
                    created_at: user.created_at,
                    last_access: None,
                });
                Ok(())
            }
        }
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.get(user_id).map(|user| user.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.users.iter().map(|user| user.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn touch_user(&self, user_id: &str, at: i64) -> Result<bool> {
        Ok(self.update_user(user_id, |user| user.last_access = Some(at)))
    }

    async fn set_pref(&self, user_id: &str, key: &str, value: &str) -> Result<bool> {
        Ok(self.update_user(user_id, |user| {
            user.prefs.insert(key.to_string(), value.to_string());
        }))
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<bool> {
        Ok(self.update_user(user_id, |user| user.token = token.to_string()))
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        Ok(self.update_user(user_id, |user| {
            user.password_hash = password_hash.to_string()
        }))
    }

    async fn ensure_site(&self, user_id: &str, site_id: &str) -> Result<i64> {
        let cell = self.site_cell(user_id, site_id);
        let count = cell.read().await.count;
        Ok(count)
    }

    async fn record_visit(
        &self,
        user_id: &str,
        site_id: &str,
        visit: &VisitRecord,
    ) -> Result<i64> {
        let cell = self.site_cell(user_id, site_id);
        let mut site = cell.write().await;

        // No await point between these three writes
        site.visits.increment(&visit.keys);
        site.log.push(visit.entry.clone());
        site.count += 1;

        Ok(site.count)
    }

    async fn get_site(&self, user_id: &str, site_id: &str) -> Result<Option<SiteSnapshot>> {
        let Some(cell) = self.existing_site(user_id, site_id) else {
            return Ok(None);
        };
        let site = cell.read().await.clone();
        Ok(Some(site))
    }

    async fn list_sites(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        let cells: Vec<(String, SiteCell)> = self
            .sites
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| (entry.key().1.clone(), Arc::clone(entry.value())))
            .collect();

        let mut sites = Vec::with_capacity(cells.len());
        for (site_id, cell) in cells {
            let count = cell.read().await.count;
            sites.push((site_id, count));
        }
        sites.sort();

        Ok(sites)
    }
}
