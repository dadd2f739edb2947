//! Persistence contract consumed by the background fetch runner, plus an
//! in-memory implementation.

pub mod memory;

pub use memory::MemoryStore;

use crate::model::audience::{AudienceKey, CustomAudienceRecord};
use crate::model::bookkeeping::FetchBookkeepingRecord;
use crate::model::update::UpdatableData;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Storage for audiences and their refresh bookkeeping.
///
/// Writes keyed by distinct audiences may run concurrently. Deleting an
/// audience always deletes its bookkeeping row.
pub trait AudienceStore: Send + Sync {
    /// Joins an audience, replacing any previous record with the same key.
    fn insert_or_overwrite(
        &self,
        record: CustomAudienceRecord,
        bookkeeping: FetchBookkeepingRecord,
    ) -> StoreFuture<'_, ()>;

    fn audience<'a>(&'a self, key: &'a AudienceKey)
        -> StoreFuture<'a, Option<CustomAudienceRecord>>;

    fn fetch_data<'a>(
        &'a self,
        key: &'a AudienceKey,
    ) -> StoreFuture<'a, Option<FetchBookkeepingRecord>>;

    fn delete_audience<'a>(&'a self, key: &'a AudienceKey) -> StoreFuture<'a, bool>;

    /// Removes every audience whose expiration is at or before `now`.
    fn delete_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;

    fn owners(&self) -> StoreFuture<'_, Vec<String>>;

    fn delete_owners(&self, owners: Vec<String>) -> StoreFuture<'_, usize>;

    fn buyers(&self) -> StoreFuture<'_, Vec<String>>;

    fn delete_buyers(&self, buyers: Vec<String>) -> StoreFuture<'_, usize>;

    fn app_install_packages(&self) -> StoreFuture<'_, Vec<String>>;

    /// Returns the number of app-install entries removed.
    fn delete_app_install_packages(&self, packages: Vec<String>) -> StoreFuture<'_, usize>;

    /// Bookkeeping rows due at `now` whose audience is active, least recently
    /// updated first.
    fn eligible_for_update(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<FetchBookkeepingRecord>>;

    /// Applies `update` to the audience and stores `bookkeeping` in one step.
    /// A no-op when the audience no longer exists.
    fn update_audience_and_fetch_data(
        &self,
        update: UpdatableData,
        bookkeeping: FetchBookkeepingRecord,
    ) -> StoreFuture<'_, ()>;

    /// Stores `bookkeeping` alone. A no-op when the audience no longer exists.
    fn update_fetch_data(&self, bookkeeping: FetchBookkeepingRecord) -> StoreFuture<'_, ()>;
}
