//! # pulse-core
//!
//! Foundation types, errors, document IDs, and backoff math for the Pulse
//! analysis-progress client.
//!
//! This crate provides the shared vocabulary that the other Pulse crates
//! depend on:
//!
//! - **Document IDs**: [`RawDocumentId`] input and validated [`DocumentId`]
//! - **Wire frames**: [`ProgressEvent`], [`InboundFrame`], [`HeartbeatProbe`]
//! - **Errors**: [`ProgressError`] taxonomy via `thiserror`
//! - **Backoff**: exponential delay with additive jitter
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod backoff;
pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;

pub use errors::{ErrorCategory, ProgressError, Result};
pub use events::{HeartbeatProbe, InboundFrame, ProgressEvent, ProgressStatus};
pub use ids::{DocumentId, RawDocumentId, validate_document_id};
