#![deny(clippy::mod_module_files)]
//! Read-only mirroring of remote git repositories into local directories.
//!
//! Three phases: [`sync`] clones or pulls a remote into a per-URL object
//! store, [`walk`] turns a snapshot (optionally relative to an earlier one)
//! into a tree of files to write, and [`materialize`] writes that tree into a
//! [`destination::Destination`]. [`mirror::Mirror`] ties them together.

pub mod config;
pub mod destination;
pub mod error;
pub mod materialize;
pub mod mirror;
pub mod progress;
pub mod storage;
pub mod sync;
pub mod walk;

pub use config::MirrorConfig;
pub use destination::{Destination, FsDestination};
pub use error::Error;
pub use materialize::{MaterializeReport, Materializer};
pub use mirror::{Mirror, UpdateOutcome};
pub use progress::{BarProgress, HistorySink, Progress, ProgressSink, Silent};
pub use storage::ContentId;
pub use sync::{CommitRecord, RemoteSpec, RemoteSync, RepoState, SyncMode};
pub use walk::{WalkNode, WalkResult};
