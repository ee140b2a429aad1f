//! Docker Image Syncer Library
//!
//! Bulk mirroring of container images into private registries or local
//! archives. The byte level transfer is delegated to an external copy tool
//! (skopeo); this crate computes destinations, drives the tool once per
//! image, and keeps observable per-task state.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod copy;
pub mod error;
pub mod events;
pub mod image;
pub mod logging;
pub mod output;
pub mod registry;
pub mod sync;
pub mod task;

pub use config::AppConfig;
pub use error::{Result, SyncError};
pub use output::OutputManager;
pub use sync::{StartSyncRequest, SyncOrchestrator};
