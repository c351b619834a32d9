//! Short-lived, typed processing buffers and a bounded, retrying job queue
//! for multi-step narrative generation pipelines.

pub mod buffer;
pub mod config;
pub mod infra;
