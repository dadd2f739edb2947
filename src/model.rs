//! Records persisted by the store and the transient values produced while
//! refreshing them.

pub mod audience;
pub mod bookkeeping;
pub mod update;

pub use audience::{AdData, AudienceKey, CustomAudienceRecord, TrustedBiddingData};
pub use bookkeeping::FetchBookkeepingRecord;
pub use update::{UpdatableData, UpdateResult};
