//! Background fetch: housekeeping sweeps and bounded-concurrency refresh of
//! eligible custom audiences.

pub mod policy;
pub mod runner;
pub mod worker;

pub use policy::{AllowAll, AllowList, BuyerEnrollment, OwnerPolicy};
pub use runner::{BackgroundFetchRunner, BackgroundFetchRunnerParams, DeletionStats};
pub use worker::{BackgroundFetchWorker, RunError, RunOutcome, RunSummary};
