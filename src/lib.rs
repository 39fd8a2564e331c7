//! Control orchestrator for Dectris Eiger area detectors.
//!
//! This library mediates between externally-exposed control/readback points
//! and the detector's request/response API: point writes become multi-step,
//! retried, state-gated device sequences, and the detector's output-file
//! store is drained into a locally deduplicated archive after every
//! exposure.
//!
//! The process-variable layer that publishes the points to operators is an
//! external collaborator; it drives [`orchestrator::Orchestrator`] through
//! the point table in [`points`] and consumes readbacks from the point bus.

pub mod client;
pub mod config;
pub mod error;
pub mod exposure;
pub mod gate;
pub mod harvest;
pub mod orchestrator;
pub mod points;
pub mod poller;
pub mod retry;
pub mod sequencer;
pub mod state;
pub mod validation;
