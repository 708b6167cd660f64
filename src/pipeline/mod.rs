//! Per-channel consumption pipelines.
//!
//! - [`ConsumptionPipeline`] consumes one channel's topic and drives the fanout.
//! - [`PipelineManager`] owns the pipelines: reconcile, cleanup, shutdown, status.

mod consumer;
mod manager;

pub use consumer::{ConsumptionPipeline, PipelineExit, PipelineHealth, PipelineParams};
pub use manager::{ChannelPhase, Cleanup, PipelineManager, PipelineStatus, Reconciled};
