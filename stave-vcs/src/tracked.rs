//! Host-side contracts.
//!
//! The engine never owns entity lifetimes. It observes live entities through
//! [`TrackedItem`] during commit and pushes reconstructed state back through
//! [`TrackedItemsSource`] during checkout.

use uuid::Uuid;

use crate::delta::Delta;
use crate::error::VcsError;
use crate::payload::{EntityState, Payload};

/// A host entity participating in versioning.
pub trait TrackedItem {
    /// Stable identifier, assigned once at creation.
    fn vcs_id(&self) -> Uuid;

    /// Display name, captured into revision items at commit time.
    fn vcs_name(&self) -> String;

    /// Tag selecting the entity's diff logic.
    fn type_tag(&self) -> &str;

    fn num_deltas(&self) -> usize;

    /// Facet descriptor at `index`.
    fn delta(&self, index: usize) -> Option<Delta>;

    /// Current payload of the facet at `index`.
    fn serialize_delta_data(&self, index: usize) -> Option<Payload>;

    /// All facets in index order.
    fn current_state(&self) -> EntityState {
        (0..self.num_deltas())
            .filter_map(|i| {
                let delta = self.delta(i)?;
                let data = self.serialize_delta_data(i)?;
                Some((delta.kind().to_string(), data))
            })
            .collect()
    }
}

/// The document that owns tracked items.
///
/// Implementations guard their item list with a reader/writer lock: visits
/// share it, restores and deletions take it exclusively.
pub trait TrackedItemsSource: Send + Sync {
    fn vcs_name(&self) -> String;

    /// Call `visitor` for every live tracked item, under the read lock.
    fn visit_tracked_items(
        &self,
        visitor: &mut dyn FnMut(&dyn TrackedItem),
    ) -> Result<(), VcsError>;

    /// Create the entity if it does not exist, then reset it to `state`.
    fn restore_tracked_item(
        &self,
        type_tag: &str,
        id: Uuid,
        name: &str,
        state: &EntityState,
    ) -> Result<(), VcsError>;

    /// Remove a live entity; `false` if the host does not know it or refuses.
    fn delete_tracked_item(&self, id: Uuid) -> Result<bool, VcsError>;

    /// Called once after a checkout rewrote the document.
    fn on_reset_state(&self) {}
}

/// Ids of every live tracked item, in visiting order.
pub fn live_item_ids(source: &dyn TrackedItemsSource) -> Result<Vec<Uuid>, VcsError> {
    let mut ids = Vec::new();
    source.visit_tracked_items(&mut |item| ids.push(item.vcs_id()))?;
    Ok(ids)
}
