//! The merge engine: a pure fold of the base mapping, every present source
//! snapshot in index order, and the environment overlay.
//!
//! Precedence, lowest first: base, source 0, source 1, …, environment.

use confpit_core::{EnvOverlay, Result, Settings, merge_into};

/// Compute the merged mapping for one pass.
///
/// Absent snapshots (sources that were never loaded) are skipped. The first
/// failing fold abandons the whole pass; nothing partial is returned.
pub fn recompute(
    snapshots: &[Option<Settings>],
    base: &Settings,
    env: &EnvOverlay,
) -> Result<Settings> {
    let mut merged = base.clone();
    for snapshot in snapshots.iter().flatten() {
        merge_into(&mut merged, snapshot)?;
    }
    env.apply(&mut merged);
    Ok(merged)
}

/// The view published when the initial merge fails: base plus environment.
/// It carries no data from any source, not even the ones that merged cleanly.
pub fn fallback(base: &Settings, env: &EnvOverlay) -> Settings {
    let mut merged = base.clone();
    env.apply(&mut merged);
    merged
}
