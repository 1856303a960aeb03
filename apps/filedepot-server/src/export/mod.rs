//! Archive Export Module
//!
//! Bundles many stored objects into one zip without holding them in memory:
//! - Requests are answered at once with a pollable job
//! - The archive is built in a supervised background task, one entry at a time
//! - Finished archives are downloadable until their retention window closes
//! - A periodic sweeper removes archives whose expiry timer was lost

pub mod archive;
pub mod engine;
pub mod store;
pub mod sweeper;
pub mod types;

pub use archive::{write_archive, ArchiveError, ArchiveSource, ArchiveSummary, EntryNames};
pub use engine::{ExportDownload, ExportEngine};
pub use store::{ExportJobStore, MemoryJobStore};
pub use sweeper::ExportSweeper;
pub use types::*;
