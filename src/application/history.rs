//! Authorization of a caller-supplied source against what an application has
//! actually declared or synced.
//!
//! Disclosure endpoints (chart parameters, kustomize images) only reveal data
//! for sources that pass [`is_source_in_history`]. Any history entry with
//! missing or out-of-range data is skipped, never treated as a match.

use super::models::{Application, ApplicationSource, RevisionHistory};

/// Whether `candidate` is a current source of `app` or one it was synced to.
///
/// History entries are compared with their `target_revision` replaced by the
/// revision that was actually synced. Multi-source entries are only consulted
/// when their id equals `version_id`, and then only at `source_index`.
pub fn is_source_in_history(
    app: &Application,
    candidate: &ApplicationSource,
    source_index: i32,
    version_id: i32,
) -> bool {
    if app.spec.current_sources().into_iter().any(|s| s == candidate) {
        return true;
    }

    app.status
        .history
        .iter()
        .any(|entry| history_entry_matches(entry, candidate, source_index, version_id))
}

fn history_entry_matches(
    entry: &RevisionHistory,
    candidate: &ApplicationSource,
    source_index: i32,
    version_id: i32,
) -> bool {
    if entry.sources.is_empty() {
        let mut synced = entry.source.clone();
        synced.target_revision = entry.revision.clone();
        return &synced == candidate;
    }

    if entry.id != i64::from(version_id) {
        return false;
    }
    let Some(revisions) = entry.revisions.as_ref() else {
        return false;
    };
    let Ok(index) = usize::try_from(source_index) else {
        return false;
    };
    let (Some(source), Some(revision)) = (entry.sources.get(index), revisions.get(index)) else {
        return false;
    };

    let mut synced = source.clone();
    synced.target_revision = revision.clone();
    &synced == candidate
}
