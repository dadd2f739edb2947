use crate::model::audience::{AudienceKey, CustomAudienceRecord};
use crate::model::bookkeeping::FetchBookkeepingRecord;
use crate::model::update::UpdatableData;
use crate::store::{AudienceStore, StoreFuture};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    audiences: BTreeMap<AudienceKey, CustomAudienceRecord>,
    fetch_data: BTreeMap<AudienceKey, FetchBookkeepingRecord>,
    app_installs: BTreeMap<String, BTreeSet<String>>,
}

impl Tables {
    fn remove_where(&mut self, predicate: impl Fn(&AudienceKey) -> bool) -> usize {
        let doomed: Vec<AudienceKey> = self
            .audiences
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &doomed {
            self.audiences.remove(key);
            self.fetch_data.remove(key);
        }
        doomed.len()
    }
}

/// Thread-safe in-memory [`AudienceStore`].
///
/// Every operation takes one lock, so combined updates are atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `package` installed an app on behalf of `buyer`.
    pub fn record_app_install(
        &self,
        package: impl Into<String>,
        buyer: impl Into<String>,
    ) -> Result<()> {
        self.lock()?
            .app_installs
            .entry(package.into())
            .or_default()
            .insert(buyer.into());
        Ok(())
    }

    pub fn audience_count(&self) -> Result<usize> {
        Ok(self.lock()?.audiences.len())
    }

    pub fn fetch_data_count(&self) -> Result<usize> {
        Ok(self.lock()?.fetch_data.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("audience store lock poisoned"))
    }
}

impl AudienceStore for MemoryStore {
    fn insert_or_overwrite(
        &self,
        record: CustomAudienceRecord,
        bookkeeping: FetchBookkeepingRecord,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if record.key != bookkeeping.key {
                bail!(
                    "bookkeeping key {} does not match audience {}",
                    bookkeeping.key,
                    record.key
                );
            }
            let mut tables = self.lock()?;
            tables.fetch_data.insert(record.key.clone(), bookkeeping);
            tables.audiences.insert(record.key.clone(), record);
            Ok(())
        })
    }

    fn audience<'a>(
        &'a self,
        key: &'a AudienceKey,
    ) -> StoreFuture<'a, Option<CustomAudienceRecord>> {
        Box::pin(async move { Ok(self.lock()?.audiences.get(key).cloned()) })
    }

    fn fetch_data<'a>(
        &'a self,
        key: &'a AudienceKey,
    ) -> StoreFuture<'a, Option<FetchBookkeepingRecord>> {
        Box::pin(async move { Ok(self.lock()?.fetch_data.get(key).cloned()) })
    }

    fn delete_audience<'a>(&'a self, key: &'a AudienceKey) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.lock()?.remove_where(|candidate| candidate == key) > 0) })
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tables = self.lock()?;
            let expired: BTreeSet<AudienceKey> = tables
                .audiences
                .values()
                .filter(|record| record.is_expired_at(now))
                .map(|record| record.key.clone())
                .collect();
            Ok(tables.remove_where(|key| expired.contains(key)))
        })
    }

    fn owners(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let tables = self.lock()?;
            let owners: BTreeSet<&String> = tables.audiences.keys().map(|key| &key.owner).collect();
            Ok(owners.into_iter().cloned().collect())
        })
    }

    fn delete_owners(&self, owners: Vec<String>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let owners: BTreeSet<String> = owners.into_iter().collect();
            Ok(self.lock()?.remove_where(|key| owners.contains(&key.owner)))
        })
    }

    fn buyers(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let tables = self.lock()?;
            let buyers: BTreeSet<&String> = tables.audiences.keys().map(|key| &key.buyer).collect();
            Ok(buyers.into_iter().cloned().collect())
        })
    }

    fn delete_buyers(&self, buyers: Vec<String>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let buyers: BTreeSet<String> = buyers.into_iter().collect();
            Ok(self.lock()?.remove_where(|key| buyers.contains(&key.buyer)))
        })
    }

    fn app_install_packages(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.lock()?.app_installs.keys().cloned().collect()) })
    }

    fn delete_app_install_packages(&self, packages: Vec<String>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tables = self.lock()?;
            let removed = packages
                .iter()
                .filter_map(|package| tables.app_installs.remove(package))
                .map(|buyers| buyers.len())
                .sum();
            Ok(removed)
        })
    }

    fn eligible_for_update(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<FetchBookkeepingRecord>> {
        Box::pin(async move {
            let tables = self.lock()?;
            let mut eligible: Vec<(&CustomAudienceRecord, &FetchBookkeepingRecord)> = tables
                .fetch_data
                .values()
                .filter(|row| row.is_eligible_at(now))
                .filter_map(|row| {
                    tables
                        .audiences
                        .get(&row.key)
                        .filter(|record| record.is_active_at(now))
                        .map(|record| (record, row))
                })
                .collect();
            eligible.sort_by(|(left, _), (right, _)| {
                left.last_ads_and_bidding_data_updated_time
                    .cmp(&right.last_ads_and_bidding_data_updated_time)
                    .then_with(|| left.key.cmp(&right.key))
            });
            Ok(eligible
                .into_iter()
                .take(limit)
                .map(|(_, row)| row.clone())
                .collect())
        })
    }

    fn update_audience_and_fetch_data(
        &self,
        update: UpdatableData,
        bookkeeping: FetchBookkeepingRecord,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.lock()?;
            let Some(current) = tables.audiences.get(&bookkeeping.key) else {
                tracing::debug!(audience = %bookkeeping.key, "audience gone before update landed");
                return Ok(());
            };
            let updated = current.copy_with_updatable_data(&update);
            tables.audiences.insert(bookkeeping.key.clone(), updated);
            tables.fetch_data.insert(bookkeeping.key.clone(), bookkeeping);
            Ok(())
        })
    }

    fn update_fetch_data(&self, bookkeeping: FetchBookkeepingRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.lock()?;
            if !tables.audiences.contains_key(&bookkeeping.key) {
                tracing::debug!(audience = %bookkeeping.key, "audience gone before bookkeeping landed");
                return Ok(());
            }
            tables.fetch_data.insert(bookkeeping.key.clone(), bookkeeping);
            Ok(())
        })
    }
}
