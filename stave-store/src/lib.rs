//! # stave-store — Durable pack for Stave histories
//!
//! ```text
//! ┌──────────────────┐  Pack trait   ┌────────────────────────────────────┐
//! │ VersionControl   │ ────────────► │ RocksPack (RocksDB)                 │
//! │ (stave-vcs)      │               │  CF "deltas"   — LZ4 PackRecords    │
//! └────────┬─────────┘               │  CF "history"  — revision graph     │
//!          │ serialize()             │  CF "metadata" — counters           │
//!          └───────────────────────► └────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`] — Record formats (LZ4 + FNV checksum, bincode)
//! - [`rocks`] — RocksDB pack
//! - [`persist`] — Open/save a whole history

pub mod codec;
pub mod error;
pub mod persist;
pub mod rocks;

pub use codec::{HistoryRecord, PackRecord};
pub use error::StoreError;
pub use persist::{open_version_control, save_version_control};
pub use rocks::{RocksPack, StoreConfig, StoreMetadata};
