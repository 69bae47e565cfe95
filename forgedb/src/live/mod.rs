//! Hot-reload live deltas.
//!
//! Each export diffs the freshly compiled table blocks against the
//! last-known state (base snapshot overlaid with the prior live delta)
//! and writes only the changed tables plus a bumped generation counter.
//! Table blocks encode deterministically, so a byte comparison is an
//! exact change test.

use crate::error::Result;
use crate::snapshot::{self, CompiledTable};
use std::collections::BTreeMap;
use std::path::Path;

/// Last-known per-table block bytes, as a reader would see them.
#[derive(Debug, Default)]
pub struct LiveState {
    pub generation: u64,
    /// Whether a prior live delta file existed. The first live write is
    /// a full copy of all valid tables.
    pub has_live: bool,
    pub blocks: BTreeMap<String, Vec<u8>>,
}

/// Reconstruct the last-known state from the previous snapshot and live
/// delta. Call before overwriting the snapshot. Missing or unreadable
/// prior artifacts degrade to an empty state (forcing a full live
/// write), never to an error: hot reload must not wedge an export.
pub fn read_live_state(snapshot_path: &Path, live_path: &Path) -> LiveState {
    let mut state = LiveState::default();

    if let Some(parsed) = read_blocks(snapshot_path) {
        state.blocks.extend(parsed.1);
    }
    if let Some((generation, blocks)) = read_blocks(live_path) {
        state.generation = generation;
        state.has_live = true;
        state.blocks.extend(blocks);
    }

    state
}

fn read_blocks(path: &Path) -> Option<(u64, BTreeMap<String, Vec<u8>>)> {
    if !path.exists() {
        return None;
    }
    let buf = match std::fs::read(path) {
        Ok(buf) => buf,
        Err(e) => {
            log::warn!("could not read prior artifact {}: {e}", path.display());
            return None;
        }
    };
    let parsed = match snapshot::parse_file(&buf) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("could not parse prior artifact {}: {e}", path.display());
            return None;
        }
    };
    let blocks = parsed
        .tables
        .into_iter()
        .map(|t| {
            let bytes = buf[t.block].to_vec();
            (t.name, bytes)
        })
        .collect();
    Some((parsed.generation, blocks))
}

/// Write the live delta for this export and return the generation it
/// carries. With no prior live file every valid table is written; after
/// that, only tables whose block bytes changed.
pub fn write_live(live_path: &Path, prior: &LiveState, compiled: &[CompiledTable]) -> Result<u64> {
    let generation = prior.generation + 1;

    let changed: Vec<CompiledTable> = if prior.has_live {
        compiled
            .iter()
            .filter(|t| prior.blocks.get(&t.name) != Some(&t.block))
            .cloned()
            .collect()
    } else {
        compiled.to_vec()
    };

    log::debug!(
        "live delta generation {generation}: {} of {} tables changed",
        changed.len(),
        compiled.len()
    );
    snapshot::write_live_file(live_path, generation, &changed)?;
    Ok(generation)
}
