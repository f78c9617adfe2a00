use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use moka::future::Cache;
use std::time::Duration;
use tracing::info;

use crate::store::AccountStore;

/// Positive cache of e-mail addresses that already belong to an account.
/// A miss says nothing; callers fall back to the store.
#[derive(Clone)]
pub struct EmailCache {
    taken: Cache<String, bool>,
}

impl Default for EmailCache {
    fn default() -> Self {
        Self::new(500_000, Duration::from_secs(86_400)) // 24h TTL
    }
}

impl EmailCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            taken: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn mark_taken(&self, email: &str) {
        self.taken.insert(email.to_lowercase(), true).await;
    }

    pub async fn is_taken(&self, email: &str) -> bool {
        self.taken
            .get(&email.to_lowercase())
            .await
            .unwrap_or(false)
    }

    /// Drops an entry, e.g. after a signup was rolled back.
    pub async fn forget(&self, email: &str) {
        self.taken.invalidate(&email.to_lowercase()).await;
    }

    async fn batch_mark(&self, emails: &[String]) {
        let inserts: Vec<_> = emails
            .iter()
            .map(|e| self.taken.insert(e.to_lowercase(), true))
            .collect();

        futures::future::join_all(inserts).await;
    }

    /// Loads addresses of accounts active in the last `days` days, streaming
    /// rows from the store and inserting them `batch_size` at a time.
    pub async fn warmup(
        &self,
        store: &dyn AccountStore,
        days: i64,
        batch_size: usize,
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let since = Utc::now() - ChronoDuration::days(days);
        let mut stream = store.recent_login_emails(since);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(email) = stream.next().await {
            batch.push(email?);
            total += 1;

            if batch.len() >= batch_size {
                self.batch_mark(&batch).await;
                batch.clear();
            }
        }

        // Insert any remaining addresses
        if !batch.is_empty() {
            self.batch_mark(&batch).await;
        }

        info!(total, days, "Email cache warmup complete");
        Ok(total)
    }
}
