use std::collections::BTreeMap;

use tracing::debug;

use crate::config::ScanConfig;
use super::resolver::Resolution;

/// Fold a resolution into the counts stored in a record.
///
/// Every configured query and command gets an entry, zero if never seen.
/// Query entries hold the number of distinct non-empty arguments. Keys listed
/// under a named count are summed into that name and removed; the rest are
/// kept under their raw key.
pub fn fold_counts(resolution: &Resolution, scan: &ScanConfig) -> BTreeMap<String, u64> {
    let mut raw: BTreeMap<String, u64> = BTreeMap::new();
    for command in &scan.commands {
        raw.insert(command.clone(), resolution.tally.get(command));
    }
    let query_counts = resolution.occurrences.counts();
    for query in &scan.queries {
        raw.insert(query.clone(), query_counts.get(query).copied().unwrap_or(0));
    }

    let mut folded = BTreeMap::new();
    for (name, keys) in &scan.named_counts {
        let total: u64 = keys.iter().filter_map(|k| raw.remove(k)).sum();
        debug!("{} = {} (from {:?})", name, total, keys);
        *folded.entry(name.clone()).or_insert(0) += total;
    }

    for (key, value) in raw {
        folded.entry(key).or_insert(value);
    }
    folded
}
