//! Session orchestration for fitness tracking.
//!
//! A [`SessionOrchestrator`] owns every registry of one session and advances
//! it one tick at a time. Producers enqueue messages through an [`Ingestor`];
//! [`runner::spawn`] drives the orchestrator from a tokio interval and
//! publishes owned snapshots.

mod error;
mod ingest;
mod orchestrator;
pub mod runner;

pub use error::SessionError;
pub use ingest::Ingestor;
pub use orchestrator::SessionOrchestrator;
pub use runner::{SessionHandle, SessionOutcome, spawn};
