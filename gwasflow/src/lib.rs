//! # Gwasflow
//!
//! A dependency-aware stage graph executor for GWAS pipelines.
//!
//! Gwasflow turns a declarative table of named stages into a checkpointed,
//! parallel run:
//!
//! - **Stage registry**: stage definitions with dependency edges,
//!   validated up front (unknown references, cycles, bad placeholders)
//! - **Staleness resolution**: file timestamps and per-stage checkpoints
//!   decide what actually needs to rerun
//! - **Dispatch**: local subprocess execution or batch-queue submission
//!   behind a submit/poll/cancel capability trait
//! - **Run control**: a bounded worker pool drains the ready queue,
//!   failures stay on their branch, and the invocation ends in a report
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gwasflow::prelude::*;
//!
//! let config = gwasflow::config::load(Path::new("gwasflow.toml"))?;
//! let registry = Arc::new(StageRegistry::from_defs(config.stage_defs())?);
//! let report = controller.run(&config.run_request()).await?;
//! println!("{}", report.render());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod flowchart;
pub mod observability;
pub mod project;
pub mod registry;
pub mod run;
pub mod staleness;
pub mod template;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        command_digest, CheckpointRecord, CheckpointStore, FsCheckpointStore,
        InMemoryCheckpointStore,
    };
    pub use crate::config::{
        PipelineConfig, PipelineOptions, Rebuild, StageDefaults, StageOptions, Style,
        Verbosity,
    };
    pub use crate::dispatch::{
        BatchQueue, DispatchAction, Dispatcher, DispatchStyle, JobHandle, JobRequest,
        JobState, LocalQueue, StageOutcome,
    };
    pub use crate::errors::{
        ConfigurationError, GwasflowError, QueueError, StageExecutionError,
    };
    pub use crate::project::{JobLog, RunContext, RunContextBuilder};
    pub use crate::registry::{ResourceRequest, StageDef, StageRegistry};
    pub use crate::run::{
        RunController, RunPlan, RunReport, RunRequest, StageState,
    };
    pub use crate::staleness::{Freshness, StaleReason, StalenessResolver};
    pub use crate::template::{CommandTemplate, TemplateVars};
}
