//! Visit aggregation facade
//!
//! Request handlers go through [`Tracker`] to record pings and to read
//! counters, logs and per-user site listings. Stored counters are always keyed
//! in UTC; a read with any other offset re-buckets the site's log through the
//! same normalizer used at record time.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::accounts::AccountManager;
use crate::buckets::{bucket_keys, UtcOffset};
use crate::error::{AppError, AppResult};
use crate::models::{
    Dump, LogData, SiteDump, SiteLinks, SiteSnapshot, TimedVisits, UserDump, Visit,
};
use crate::storage::{Storage, VisitRecord};

/// Longest accepted site id, in bytes
pub const MAX_SITE_ID_LEN: usize = 255;

pub struct Tracker {
    storage: Arc<dyn Storage>,
}

impl Tracker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Open a site, creating it empty on first use. Existing counters are kept.
    pub async fn new_site<'a>(
        &'a self,
        user_id: &'a str,
        site_id: &'a str,
    ) -> AppResult<SiteHandle<'a>> {
        validate_site_id(site_id)?;
        self.storage.ensure_site(user_id, site_id).await?;

        Ok(SiteHandle {
            tracker: self,
            user_id,
            site_id,
        })
    }

    /// Count one visit and append it to the site's log, as a single unit
    pub async fn record_visit(&self, user_id: &str, site_id: &str, visit: &Visit) -> AppResult<i64> {
        validate_site_id(site_id)?;

        let record = VisitRecord {
            keys: bucket_keys(visit.at, UtcOffset::utc()),
            entry: visit.log_entry(),
        };
        let count = self.storage.record_visit(user_id, site_id, &record).await?;

        debug!(%user_id, %site_id, count, day = %record.keys.day, "visit recorded");
        Ok(count)
    }

    /// Counters as seen from `offset`. A never-visited site yields empty buckets.
    pub async fn get_visits(
        &self,
        user_id: &str,
        site_id: &str,
        offset: UtcOffset,
    ) -> AppResult<TimedVisits> {
        let site = self.snapshot(user_id, site_id).await?;
        Ok(visits_for(&site, offset))
    }

    /// The full log in arrival order
    pub async fn get_logs(&self, user_id: &str, site_id: &str) -> AppResult<LogData> {
        Ok(self.snapshot(user_id, site_id).await?.log)
    }

    /// Every site the user has touched with its total count
    pub async fn get_site_links(&self, user_id: &str) -> AppResult<SiteLinks> {
        let sites = self.storage.list_sites(user_id).await?;
        Ok(sites.into_iter().collect())
    }

    /// Export the account and every site. Sites are read one at a time, so
    /// the result is not a single atomic snapshot.
    pub async fn dump(
        &self,
        accounts: &AccountManager,
        user_id: &str,
        offset: UtcOffset,
    ) -> AppResult<Dump> {
        let prefs = accounts.get_prefs(user_id).await?;
        let token = accounts.read_token(user_id).await?;

        let mut sites = BTreeMap::new();
        for site_id in self.get_site_links(user_id).await?.into_keys() {
            let site = self.snapshot(user_id, &site_id).await?;
            sites.insert(
                site_id,
                SiteDump {
                    count: site.count,
                    visits: visits_for(&site, offset),
                    logs: site.log,
                },
            );
        }

        Ok(Dump {
            sites,
            user: UserDump {
                id: user_id.to_string(),
                token,
                prefs,
            },
        })
    }

    async fn snapshot(&self, user_id: &str, site_id: &str) -> AppResult<SiteSnapshot> {
        Ok(self
            .storage
            .get_site(user_id, site_id)
            .await?
            .unwrap_or_default())
    }
}

/// A site opened for the duration of one request
pub struct SiteHandle<'a> {
    tracker: &'a Tracker,
    user_id: &'a str,
    site_id: &'a str,
}

impl SiteHandle<'_> {
    pub async fn record_visit(&self, visit: &Visit) -> AppResult<i64> {
        self.tracker
            .record_visit(self.user_id, self.site_id, visit)
            .await
    }

    pub async fn get_visits(&self, offset: UtcOffset) -> AppResult<TimedVisits> {
        self.tracker
            .get_visits(self.user_id, self.site_id, offset)
            .await
    }

    pub async fn get_logs(&self) -> AppResult<LogData> {
        self.tracker.get_logs(self.user_id, self.site_id).await
    }
}

fn visits_for(site: &SiteSnapshot, offset: UtcOffset) -> TimedVisits {
    if offset.is_utc() {
        site.visits.clone()
    } else {
        TimedVisits::from_log(&site.log, offset)
    }
}

pub fn validate_site_id(site_id: &str) -> AppResult<()> {
    if site_id.is_empty() {
        return Err(AppError::InvalidInput("no site id given".to_string()));
    }
    if site_id.len() > MAX_SITE_ID_LEN || site_id.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(format!(
            "site id must be at most {MAX_SITE_ID_LEN} bytes without control characters"
        )));
    }
    Ok(())
}
