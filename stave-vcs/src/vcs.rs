//! Version-control orchestrator.
//!
//! ```text
//!  ┌─────────────────────┐  commit / status   ┌──────────────────────────┐
//!  │ TrackedItemsSource  │ ─────────────────► │ VersionControl           │
//!  │ (host document)     │ ◄───────────────── │  Mutex<HistoryState>     │
//!  └─────────────────────┘  reset_to / undo   │   graph, head, redo,     │
//!                                             │   checkpoints            │
//!                                             └────────────┬─────────────┘
//!                                                          │ flush_data
//!                                                          ▼
//!                                                     Pack (PackPtr)
//! ```
//!
//! The history state sits behind a single mutex: commit, reset, undo and
//! redo are mutually exclusive. The host document is read through its own
//! reader/writer lock and is never touched while a revision is half built.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff_logic::DiffLogicRegistry;
use crate::error::VcsError;
use crate::pack::PackPtr;
use crate::payload::Payload;
use crate::reconcile::{diff_snapshots, EntityChange, ExportedPayload};
use crate::revision::{Revision, RevisionGraph, RevisionSummary};
use crate::revision_item::RevisionItem;
use crate::snapshot::{Replay, Snapshot};
use crate::tracked::TrackedItemsSource;
use crate::tree::{keys, SerializedNode};

// ─── Configuration ──────────────────────────────────────────────────

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Memoize the reconstructed snapshot of every revision whose sequence
    /// is a multiple of this. 0 keeps only the head.
    pub checkpoint_interval: usize,
    /// Move payloads into the pack as part of every commit.
    pub flush_on_commit: bool,
    /// Oldest redo entries are dropped beyond this depth.
    pub max_redo_depth: usize,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 16,
            flush_on_commit: true,
            max_redo_depth: 256,
        }
    }
}

impl VcsConfig {
    /// Small intervals so tests exercise checkpoint lookups.
    pub fn for_testing() -> Self {
        Self {
            checkpoint_interval: 2,
            flush_on_commit: true,
            max_redo_depth: 8,
        }
    }
}

// ─── History state ──────────────────────────────────────────────────

#[derive(Debug)]
struct HistoryState {
    graph: RevisionGraph,
    head: Uuid,
    redo: Vec<Uuid>,
    checkpoints: FxHashMap<Uuid, Snapshot>,
}

impl HistoryState {
    fn new(graph: RevisionGraph, head: Uuid) -> Self {
        Self {
            graph,
            head,
            redo: Vec::new(),
            checkpoints: FxHashMap::default(),
        }
    }

    /// Snapshot at `target`, replayed from the nearest memoized ancestor.
    ///
    /// Items are collected per entity along the path and payloads are
    /// resolved only for entities alive where the snapshot is taken.
    /// Interval checkpoints crossed on the way are memoized when they
    /// resolve; one whose payloads are missing is skipped.
    fn reconstruct(&mut self, target: Uuid, interval: usize) -> Result<Snapshot, VcsError> {
        if let Some(snapshot) = self.checkpoints.get(&target) {
            log::trace!("Checkpoint hit for {target}");
            return Ok(snapshot.clone());
        }

        let path = self.graph.ancestry(target)?;
        let start = path
            .iter()
            .rposition(|id| self.checkpoints.contains_key(id));

        let (base, ids) = match start {
            Some(index) => (self.checkpoints[&path[index]].clone(), &path[index + 1..]),
            None => (Snapshot::new(), &path[..]),
        };
        log::debug!(
            "Reconstructing {target}: replaying {} revisions (checkpoint: {})",
            ids.len(),
            start.is_some()
        );

        let mut replay = Replay::new(base);
        let mut memoized = Vec::new();
        for id in ids {
            let revision = self.graph.get(*id)?;
            replay.record(revision)?;
            if *id == target || !is_checkpoint(revision.sequence(), interval) {
                continue;
            }
            match replay.materialize() {
                Ok(snapshot) => {
                    memoized.push((*id, snapshot.clone()));
                    replay = Replay::new(snapshot);
                }
                Err(e) if e.is_recoverable() => log::debug!("Skipping checkpoint {id}: {e}"),
                Err(e) => return Err(e),
            }
        }

        let snapshot = replay.materialize()?;
        if self
            .graph
            .get(target)
            .map(|r| is_checkpoint(r.sequence(), interval))?
        {
            memoized.push((target, snapshot.clone()));
        }
        self.checkpoints.extend(memoized);

        Ok(snapshot)
    }

    /// Check the lineage of every revision on the path to `target` without
    /// reading any payload.
    fn validate_lineage(&self, target: Uuid) -> Result<(), VcsError> {
        let mut replay = Replay::new(Snapshot::new());
        for id in self.graph.ancestry(target)? {
            replay.record(self.graph.get(id)?)?;
        }
        Ok(())
    }

    /// Drop memoized snapshots that are neither interval checkpoints nor head.
    fn prune_checkpoints(&mut self, interval: usize) {
        let head = self.head;
        let graph = &self.graph;
        self.checkpoints.retain(|id, _| {
            *id == head
                || graph
                    .get(*id)
                    .map(|r| is_checkpoint(r.sequence(), interval))
                    .unwrap_or(false)
        });
    }

    fn move_head(&mut self, target: Uuid, snapshot: Snapshot, interval: usize) {
        self.head = target;
        self.checkpoints.insert(target, snapshot);
        self.prune_checkpoints(interval);
    }
}

fn is_checkpoint(sequence: u64, interval: usize) -> bool {
    interval > 0 && sequence % interval as u64 == 0
}

// ─── Orchestrator ───────────────────────────────────────────────────

/// History of one document.
pub struct VersionControl {
    config: VcsConfig,
    registry: Arc<DiffLogicRegistry>,
    pack: PackPtr,
    state: Mutex<HistoryState>,
}

impl VersionControl {
    /// Fresh history holding only an empty root revision.
    pub fn new(config: VcsConfig, registry: Arc<DiffLogicRegistry>, pack: PackPtr) -> Self {
        let root = Revision::root();
        let head = root.id();
        let mut state = HistoryState::new(RevisionGraph::new(root), head);
        state.checkpoints.insert(head, Snapshot::new());

        log::info!(
            "Version control created (root {head}, diff logics: {:?})",
            registry.type_tags()
        );

        Self {
            config,
            registry,
            pack,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &VcsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DiffLogicRegistry> {
        &self.registry
    }

    pub fn pack(&self) -> PackPtr {
        Arc::clone(&self.pack)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HistoryState>, VcsError> {
        self.state.lock().map_err(|_| VcsError::Poisoned)
    }

    pub fn head(&self) -> Result<Uuid, VcsError> {
        Ok(self.lock()?.head)
    }

    pub fn root(&self) -> Result<Uuid, VcsError> {
        Ok(self.lock()?.graph.root())
    }

    pub fn num_revisions(&self) -> Result<usize, VcsError> {
        Ok(self.lock()?.graph.len())
    }

    pub fn summary(&self, revision: Uuid) -> Result<RevisionSummary, VcsError> {
        Ok(self.lock()?.graph.get(revision)?.summary())
    }

    /// Head's ancestry, newest first.
    pub fn history(&self) -> Result<Vec<RevisionSummary>, VcsError> {
        let state = self.lock()?;
        let path = state.graph.ancestry(state.head)?;
        path.iter()
            .rev()
            .map(|id| state.graph.get(*id).map(Revision::summary))
            .collect()
    }

    /// Every revision, branches included, by sequence.
    pub fn all_revisions(&self) -> Result<Vec<RevisionSummary>, VcsError> {
        Ok(self.lock()?.graph.iter().map(Revision::summary).collect())
    }

    pub fn children_of(&self, revision: Uuid) -> Result<Vec<Uuid>, VcsError> {
        let state = self.lock()?;
        state.graph.get(revision)?;
        Ok(state.graph.children_of(revision).to_vec())
    }

    // ─── Commit ─────────────────────────────────────────────────────

    /// Diff the live document against `snapshot` without touching history.
    fn diff_live(
        &self,
        snapshot: &Snapshot,
        source: &dyn TrackedItemsSource,
    ) -> Result<Vec<RevisionItem>, VcsError> {
        let mut items = Vec::new();
        let mut seen = FxHashSet::default();
        let mut failure = None;

        source.visit_tracked_items(&mut |item| {
            if failure.is_some() {
                return;
            }
            let id = item.vcs_id();
            if !seen.insert(id) {
                failure = Some(VcsError::Host(format!("entity {id} is tracked twice")));
                return;
            }
            if snapshot.was_removed(id) {
                failure = Some(VcsError::Host(format!(
                    "entity {id} was removed earlier; re-adding it needs a new id"
                )));
                return;
            }
            match RevisionItem::capture_from(
                self.pack(),
                &self.registry,
                item,
                snapshot.state_of(id),
            ) {
                Ok(Some(captured)) => items.push(captured),
                Ok(None) => {}
                Err(e) => failure = Some(e),
            }
        })?;

        if let Some(e) = failure {
            return Err(e);
        }

        for gone in snapshot.iter().filter(|entity| !seen.contains(&entity.id)) {
            let logic = self.registry.create_logic_for(&gone.type_tag)?;
            items.push(RevisionItem::removed(self.pack(), logic, gone.id, &gone.name));
        }

        Ok(items)
    }

    /// Record the live document as a new revision on top of head.
    ///
    /// The revision is fully built, flushed and validated before the graph
    /// changes; any failure leaves head and graph as they were.
    pub fn commit(
        &self,
        source: &dyn TrackedItemsSource,
        message: &str,
    ) -> Result<RevisionSummary, VcsError> {
        let interval = self.config.checkpoint_interval;
        let mut state = self.lock()?;

        let head = state.head;
        let base = state.reconstruct(head, interval)?;
        let items = self.diff_live(&base, source)?;

        let mut revision = Revision::new(Some(head), state.graph.next_sequence(), message, items);
        if self.config.flush_on_commit {
            let written = revision.flush_data()?;
            log::debug!("Flushed {written} payloads for revision {}", revision.id());
        }

        let mut snapshot = base;
        snapshot.apply_revision(&revision)?;

        let summary = revision.summary();
        state.graph.insert(revision)?;
        state.redo.clear();
        state.move_head(summary.id, snapshot, interval);

        log::info!(
            "Committed revision {} (#{}, {} items) on '{}'",
            summary.id,
            summary.sequence,
            summary.changes.len(),
            source.vcs_name()
        );
        Ok(summary)
    }

    /// Uncommitted changes of the live document relative to head.
    /// Payloads stay in memory.
    pub fn status(&self, source: &dyn TrackedItemsSource) -> Result<Vec<RevisionItem>, VcsError> {
        let base = {
            let mut state = self.lock()?;
            let head = state.head;
            state.reconstruct(head, self.config.checkpoint_interval)?
        };
        self.diff_live(&base, source)
    }

    /// Run [`status`](Self::status) on a worker thread.
    ///
    /// The graph lock is held only while the head snapshot is rebuilt, so
    /// the host may keep saving the document meanwhile. A commit issued
    /// concurrently waits for that short section.
    pub fn spawn_diff_rebuild(
        self: &Arc<Self>,
        source: Arc<dyn TrackedItemsSource>,
    ) -> Result<JoinHandle<Result<Vec<RevisionItem>, VcsError>>, VcsError> {
        let vcs = Arc::clone(self);
        std::thread::Builder::new()
            .name("stave-diff-rebuild".into())
            .spawn(move || {
                log::debug!("Diff rebuild started for '{}'", source.vcs_name());
                let result = vcs.status(source.as_ref());
                match &result {
                    Ok(items) => log::debug!("Diff rebuild finished: {} pending items", items.len()),
                    Err(e) => log::warn!("Diff rebuild failed: {e}"),
                }
                result
            })
            .map_err(|e| VcsError::Worker(e.to_string()))
    }

    /// Flush every pending payload of every revision into the pack.
    pub fn flush(&self) -> Result<usize, VcsError> {
        let mut state = self.lock()?;
        let mut written = 0;
        for revision in state.graph.revisions_mut() {
            written += revision.flush_data()?;
        }
        if written > 0 {
            log::info!("Flushed {written} pending payloads");
        }
        Ok(written)
    }

    // ─── Checkout & navigation ──────────────────────────────────────

    /// Full document state at `revision`. Does not move head.
    pub fn checkout(&self, revision: Uuid) -> Result<Snapshot, VcsError> {
        let mut state = self.lock()?;
        state.reconstruct(revision, self.config.checkpoint_interval)
    }

    /// Per-entity differences between two revisions.
    pub fn diff_revisions(
        &self,
        base: Uuid,
        other: Uuid,
    ) -> Result<Vec<(Uuid, EntityChange)>, VcsError> {
        let mut state = self.lock()?;
        let interval = self.config.checkpoint_interval;
        let base = state.reconstruct(base, interval)?;
        let other = state.reconstruct(other, interval)?;
        Ok(diff_snapshots(&base, &other))
    }

    /// Rewrite the live document to the state at `target` and move head there.
    /// Clears the redo stack.
    pub fn reset_to(&self, target: Uuid, source: &dyn TrackedItemsSource) -> Result<(), VcsError> {
        let mut state = self.lock()?;
        self.reset_locked(&mut state, target, source)?;
        state.redo.clear();
        Ok(())
    }

    fn reset_locked(
        &self,
        state: &mut HistoryState,
        target: Uuid,
        source: &dyn TrackedItemsSource,
    ) -> Result<(), VcsError> {
        let interval = self.config.checkpoint_interval;
        let snapshot = state.reconstruct(target, interval)?;

        let live = crate::tracked::live_item_ids(source)?;
        let mut deleted = 0;
        for id in live.iter().filter(|id| !snapshot.contains(**id)) {
            if source.delete_tracked_item(*id)? {
                deleted += 1;
            } else {
                log::warn!("Host refused to delete entity {id} during reset");
            }
        }
        for item in snapshot.iter() {
            source.restore_tracked_item(&item.type_tag, item.id, &item.name, &item.state)?;
        }
        source.on_reset_state();

        log::info!(
            "Reset '{}' to {target}: {} entities restored, {deleted} deleted",
            source.vcs_name(),
            snapshot.len()
        );
        state.move_head(target, snapshot, interval);
        Ok(())
    }

    pub fn can_undo(&self) -> Result<bool, VcsError> {
        let state = self.lock()?;
        Ok(state.graph.get(state.head)?.parent().is_some())
    }

    pub fn can_redo(&self) -> Result<bool, VcsError> {
        Ok(!self.lock()?.redo.is_empty())
    }

    /// Move head to its parent. `None` at the root.
    pub fn undo(&self, source: &dyn TrackedItemsSource) -> Result<Option<Uuid>, VcsError> {
        let mut state = self.lock()?;
        let head = state.head;
        let Some(parent) = state.graph.get(head)?.parent() else {
            log::debug!("Nothing to undo");
            return Ok(None);
        };

        self.reset_locked(&mut state, parent, source)?;
        state.redo.push(head);
        if state.redo.len() > self.config.max_redo_depth {
            state.redo.remove(0);
        }
        log::info!("Undo {head} -> {parent}");
        Ok(Some(parent))
    }

    /// Move head back to the revision last undone. `None` when nothing to redo.
    pub fn redo(&self, source: &dyn TrackedItemsSource) -> Result<Option<Uuid>, VcsError> {
        let mut state = self.lock()?;
        let Some(target) = state.redo.last().copied() else {
            log::debug!("Nothing to redo");
            return Ok(None);
        };

        self.reset_locked(&mut state, target, source)?;
        state.redo.pop();
        log::info!("Redo -> {target}");
        Ok(Some(target))
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Metadata of the whole history and the head pointer.
    /// Payloads stay in the pack; call [`flush`](Self::flush) first.
    pub fn serialize(&self) -> Result<SerializedNode, VcsError> {
        let state = self.lock()?;
        if state.graph.iter().any(Revision::has_pending_data) {
            log::warn!("Serializing history with unflushed payloads");
        }
        let mut node = SerializedNode::new(keys::VERSION_CONTROL).with_attribute(keys::HEAD, state.head);
        node.push_child(state.graph.serialize());
        Ok(node)
    }

    /// Rebuild a history from [`serialize`](Self::serialize) output.
    ///
    /// Lineage is checked here, but no payload is read: a missing one
    /// surfaces as a recoverable [`VcsError::NotFound`] from the checkout,
    /// commit or reset that needs it, and the history stays usable.
    pub fn deserialize(
        node: &SerializedNode,
        config: VcsConfig,
        registry: Arc<DiffLogicRegistry>,
        pack: PackPtr,
    ) -> Result<Self, VcsError> {
        let root = node.find(keys::VERSION_CONTROL)?;
        let head = root.require_uuid(keys::HEAD)?;
        let graph = RevisionGraph::deserialize(root.find(keys::HISTORY)?, pack.clone(), &registry)?;
        if !graph.contains(head) {
            return Err(VcsError::UnknownRevision(head));
        }

        let mut state = HistoryState::new(graph, head);
        state.checkpoints.insert(state.graph.root(), Snapshot::new());
        state.validate_lineage(head)?;

        log::info!(
            "Version control restored: {} revisions, head {head}",
            state.graph.len()
        );

        Ok(Self {
            config,
            registry,
            pack,
            state: Mutex::new(state),
        })
    }

    // ─── Reconciliation ─────────────────────────────────────────────

    /// Metadata and payloads of one revision, for transfer to another history.
    pub fn export_revision(
        &self,
        revision: Uuid,
    ) -> Result<(SerializedNode, Vec<ExportedPayload>), VcsError> {
        let state = self.lock()?;
        let revision = state.graph.get(revision)?;

        let mut payloads = Vec::new();
        for item in revision.items() {
            for (delta, data) in item.deltas_with_data()? {
                payloads.push(ExportedPayload {
                    entity_id: item.vcs_id(),
                    delta_id: delta.id(),
                    data,
                });
            }
        }
        Ok((revision.serialize(), payloads))
    }

    /// Attach a foreign revision under its declared parent.
    ///
    /// Head never moves; the import becomes a sibling branch. Importing a
    /// revision that is already present is a no-op.
    pub fn import_revision(
        &self,
        node: &SerializedNode,
        payloads: Vec<ExportedPayload>,
    ) -> Result<Uuid, VcsError> {
        let interval = self.config.checkpoint_interval;
        let mut revision = Revision::deserialize(node, self.pack(), &self.registry)?;
        let id = revision.id();

        let mut state = self.lock()?;
        if state.graph.contains(id) {
            log::debug!("Revision {id} already present, skipping import");
            return Ok(id);
        }
        let parent = revision
            .parent()
            .ok_or_else(|| VcsError::BrokenHistory(format!("imported revision {id} has no parent")))?;
        if !state.graph.contains(parent) {
            return Err(VcsError::UnknownRevision(parent));
        }

        for ExportedPayload { entity_id, delta_id, data } in payloads {
            let item = revision.item_for_mut(entity_id).ok_or_else(|| {
                VcsError::BrokenHistory(format!(
                    "payload for entity {entity_id} has no item in revision {id}"
                ))
            })?;
            item.import_payload(data, delta_id);
        }
        if let Some(item) = revision.items().iter().find(|item| item.has_placeholders()) {
            return Err(VcsError::BrokenHistory(format!(
                "revision {id} carries payloads for undescribed deltas of entity {}",
                item.vcs_id()
            )));
        }

        revision.set_sequence(state.graph.next_sequence());

        let mut snapshot = state.reconstruct(parent, interval)?;
        snapshot.apply_revision(&revision)?;

        if self.config.flush_on_commit {
            revision.flush_data()?;
        }
        let sequence = revision.sequence();
        state.graph.insert(revision)?;
        if is_checkpoint(sequence, interval) {
            state.checkpoints.insert(id, snapshot);
        }

        log::info!("Imported revision {id} under {parent}");
        Ok(id)
    }

    /// Payload of one facet at `revision`, for hosts that need a single value.
    pub fn payload_at(
        &self,
        revision: Uuid,
        entity_id: Uuid,
        kind: &str,
    ) -> Result<Option<Payload>, VcsError> {
        let snapshot = self.checkout(revision)?;
        Ok(snapshot
            .state_of(entity_id)
            .and_then(|state| state.get(kind))
            .cloned())
    }
}

impl std::fmt::Debug for VersionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("VersionControl");
        debug.field("config", &self.config);
        if let Ok(state) = self.state.try_lock() {
            debug
                .field("head", &state.head)
                .field("revisions", &state.graph.len())
                .field("checkpoints", &state.checkpoints.len());
        }
        debug.finish()
    }
}
