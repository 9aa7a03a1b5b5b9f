//! Pure decisions over the label log.
//!
//! Both functions here are independent of storage: admissibility looks at
//! a candidate entry next to the newest existing entry with the same
//! identity tuple, and the collapse folds an ordered slice of the log into
//! the currently visible label set.

use std::collections::HashSet;

use tern_types::Entry;

/// Whether writing `candidate` would change the effective label state,
/// given `latest` — the newest existing entry sharing its identity tuple.
///
/// - With no prior entry, a negation retracts nothing and is a no-op.
/// - With a prior entry, the write is admitted when it flips the negation
///   state or changes the expiration (two absent expirations are equal).
///   A differing `exp` with matching `neg` is an update.
pub fn admissible(candidate: &Entry, latest: Option<&Entry>) -> bool {
    match latest {
        None => !candidate.neg,
        Some(prev) => prev.neg != candidate.neg || prev.exp != candidate.exp,
    }
}

/// Collapse a seq-ascending slice of the log into the effective label set.
///
/// Walks the slice newest-first, keeping the first sighting of each
/// identity tuple: a negation suppresses the identity, anything else is
/// the identity's current statement. Older sightings are shadowed either
/// way. Expired entries are still emitted — expiry filtering is the
/// consumer's concern.
///
/// The result is in ascending seq order of the surviving entries.
pub fn collapse(entries: &[Entry]) -> Vec<Entry> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();

    for entry in entries.iter().rev() {
        if !seen.insert(entry.identity()) {
            continue;
        }
        if entry.neg {
            continue;
        }
        kept.push(entry);
    }

    kept.reverse();
    kept.into_iter().cloned().collect()
}
