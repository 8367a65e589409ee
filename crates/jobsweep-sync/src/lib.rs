//! Collection run: plan, retry/backoff, normalize, dedup, persist.

pub mod app;
pub mod config;
pub mod dedup;
pub mod normalize;
pub mod orchestrator;
pub mod pacing;
pub mod plan;
pub mod probe;
pub mod retry;
pub mod stats;

pub use app::{AdapterKind, AppConfig, StoreKind};
pub use config::{
    derive_location_fallbacks, CollectionConfig, ConfigError, DelayRange, NormalizerPolicy,
    PacingPolicy, RetryPolicy, SourceConfig,
};
pub use dedup::Deduplicator;
pub use normalize::{extract_region, Normalizer, Rejected};
pub use orchestrator::{preview_plan, run_collection, CollectionOrchestrator, StopSignal};
pub use pacing::{Pacer, RecordingSleeper, Sleeper, TokioSleeper};
pub use plan::{build_plan, effective_locations};
pub use probe::{probe_source, ProbeReport};
pub use retry::{DisableReason, RetryController, RunContext, SourceState, SourceStatus, TaskOutcome, TaskStatus};
pub use stats::{AdapterSwitch, LocationCounts, RunStatistics, SourceCounts, StateTransition};

pub const CRATE_NAME: &str = "jobsweep-sync";
