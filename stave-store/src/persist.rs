//! Loading and saving a whole history through a [`RocksPack`].

use std::sync::Arc;

use stave_vcs::{DiffLogicRegistry, PackPtr, VcsConfig, VersionControl};

use crate::error::StoreError;
use crate::rocks::RocksPack;

/// Restore the history saved in `pack`, or start a fresh one.
pub fn open_version_control(
    pack: Arc<RocksPack>,
    config: VcsConfig,
    registry: Arc<DiffLogicRegistry>,
) -> Result<VersionControl, StoreError> {
    let shared: PackPtr = pack.clone();
    match pack.load_history()? {
        Some(node) => {
            log::info!("Restoring history from {}", pack.path().display());
            Ok(VersionControl::deserialize(&node, config, registry, shared)?)
        }
        None => {
            log::info!("No history in {}, starting fresh", pack.path().display());
            Ok(VersionControl::new(config, registry, shared))
        }
    }
}

/// Flush pending payloads, then persist the revision graph.
/// Returns the number of payloads flushed.
pub fn save_version_control(vcs: &VersionControl, pack: &RocksPack) -> Result<usize, StoreError> {
    let flushed = vcs.flush()?;
    let node = vcs.serialize()?;
    pack.save_history(&node)?;
    pack.sync()?;
    Ok(flushed)
}
