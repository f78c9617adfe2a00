//! Persistence backends.
//!
//! `MySqlStore` backs the server deployment; `LocalStore` keeps every
//! collection in one JSON blob for the detached client-only mode and for
//! tests. Both implement the same traits so the services never know which
//! one they talk to.

pub mod local;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;
use crate::model::attendance::{
    AttendanceFilter, AttendanceKey, AttendanceRecord, BatchEntry, StatusCount, SummaryFilter,
};
use crate::model::school::{ClassRoster, EntityCounts};
use crate::model::user::{NewUser, User};

pub use local::LocalStore;
pub use mysql::MySqlStore;

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// `None` when the class does not exist.
    async fn class_roster(&self, class_id: &str) -> Result<Option<ClassRoster>, StoreError>;

    /// Deletes every record for `key` and inserts `entries` in one unit of
    /// work. Either the whole new set is visible afterwards or the old one is.
    async fn replace_attendance(
        &self,
        key: &AttendanceKey,
        entries: &[BatchEntry],
    ) -> Result<usize, StoreError>;

    /// Ordered by date descending, then student name ascending.
    async fn list_attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    async fn count_by_status(&self, filter: &SummaryFilter) -> Result<Vec<StatusCount>, StoreError>;

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError>;

    async fn log_activity(&self, user_id: &str, activity: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Fails with `StoreError::Duplicate` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<String, StoreError>;

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError>;

    /// Returns false when no account holds `token`.
    async fn confirm_email(&self, token: &str) -> Result<bool, StoreError>;

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Returns false when no account has `user_id`.
    async fn set_password(&self, user_id: &str, password_hash: &str) -> Result<bool, StoreError>;

    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Swaps the password hash for the account holding an unexpired `token`
    /// and clears it. Returns false when no such account exists.
    async fn reset_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Emails of accounts that logged in on or after `since`, most recent first.
    fn recent_login_emails(
        &self,
        since: DateTime<Utc>,
    ) -> BoxStream<'_, Result<String, StoreError>>;
}

/// Runs a store call under `limit`. Dropping the future on timeout also drops
/// any open transaction, which rolls it back.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout {
            operation,
            elapsed: limit,
        }),
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
