//! Resumable Chunked Upload Module
//!
//! Moves large objects into blob storage without buffering them whole:
//! - Blocks are staged independently, in any order and over many connections
//! - One global budget bounds how many blocks are in flight at once
//! - Commit assembles the staged blocks in the order the client lists them
//! - Expired sessions are retired by a periodic reaper
//!
//! Protocol Flow:
//! 1. Client opens a session and receives its target path
//! 2. Client stages blocks under ids of its choosing, optionally with `Content-Range`
//! 3. Client commits with the ordered block id list and receives the file id
//! 4. Progress can be followed over a server-push stream until commit

pub mod coordinator;
pub mod progress;
pub mod range;
pub mod reaper;
pub mod session;
pub mod types;

pub use coordinator::{format_bytes, UploadCoordinator};
pub use progress::ProgressTracker;
pub use range::{verify_length, ContentRange};
pub use reaper::{ReapReport, SessionReaper};
pub use session::{MemorySessionStore, SessionStore};
pub use types::*;
