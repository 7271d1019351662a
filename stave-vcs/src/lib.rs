//! # stave-vcs — Embedded version control for Stave projects
//!
//! Tracks changes to the entities of one document as sparse revisions of
//! facet deltas, and rebuilds any entity's state at any revision.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   commit    ┌──────────────────┐
//! │ TrackedItems     │ ──────────► │ VersionControl   │
//! │ Source (host)    │ ◄────────── │ (head, redo)     │
//! └──────────────────┘  reset_to   └────────┬─────────┘
//!                                           │
//!                           ┌───────────────┼────────────────┐
//!                           ▼               ▼                ▼
//!                    ┌────────────┐  ┌────────────┐   ┌────────────┐
//!                    │ Revision   │  │ DiffLogic  │   │ Pack       │
//!                    │ Graph      │  │ Registry   │   │ (payloads) │
//!                    └─────┬──────┘  └────────────┘   └────────────┘
//!                          │
//!                    RevisionItem ── Delta (+ payload slot)
//! ```
//!
//! ## Modules
//!
//! - [`delta`] — Facet descriptors, payload-free
//! - [`payload`] — Facet payloads and entity state
//! - [`diff_logic`] — Per-type diff/apply strategies and their registry
//! - [`tracked`] — Host contracts
//! - [`revision_item`] — One entity's change within one revision
//! - [`pack`] — Payload store trait and in-memory pack
//! - [`revision`] — Revisions and the history graph
//! - [`snapshot`] — Full document state at one revision
//! - [`vcs`] — The orchestrator
//! - [`reconcile`] — Primitives for comparing histories
//! - [`tree`] — Generic metadata tree

pub mod delta;
pub mod diff_logic;
pub mod error;
pub mod pack;
pub mod payload;
pub mod reconcile;
pub mod revision;
pub mod revision_item;
pub mod snapshot;
pub mod tracked;
pub mod tree;
pub mod vcs;

// Re-exports for convenience
pub use delta::Delta;
pub use diff_logic::{DeltaWithData, DiffLogic, DiffLogicRegistry, FacetDiffLogic};
pub use error::{PackError, VcsError};
pub use pack::{MemoryPack, Pack, PackPtr};
pub use payload::{EntityState, Payload};
pub use reconcile::{diff_snapshots, EntityChange, ExportedPayload};
pub use revision::{ChangeSummary, Revision, RevisionGraph, RevisionSummary};
pub use revision_item::{RevisionItem, RevisionItemType};
pub use snapshot::{Snapshot, SnapshotItem};
pub use tracked::{live_item_ids, TrackedItem, TrackedItemsSource};
pub use tree::SerializedNode;
pub use vcs::{VcsConfig, VersionControl};
