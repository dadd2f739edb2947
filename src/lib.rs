pub mod background;
pub mod fetch;
pub mod model;
pub mod runtime;
pub mod store;
pub mod validation;

pub use background::{
    AllowAll, AllowList, BackgroundFetchRunner, BackgroundFetchRunnerParams,
    BackgroundFetchWorker, BuyerEnrollment, DeletionStats, OwnerPolicy, RunError, RunOutcome,
    RunSummary,
};
pub use fetch::{parse_update_uri, FetchError, HttpFetchOptions, HttpUpdateClient, UpdateSource};
pub use model::{
    AdData, AudienceKey, CustomAudienceRecord, FetchBookkeepingRecord, TrustedBiddingData,
    UpdatableData, UpdateResult,
};
pub use runtime::clock::{Clock, ManualClock, SystemClock};
pub use runtime::config::{FetchConfig, FetchConfigBuilder, FetchConfigParams};
pub use runtime::job::{BackgroundFetchJob, JobExecution, JobOutcome};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{AudienceStore, MemoryStore, StoreFuture};
pub use validation::{build_updatable_data, ReaderError, ReaderLimits, Section};
