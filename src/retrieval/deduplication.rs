//! Result deduplication by passage ID

use crate::retrieval::oracle::OracleHit;
use crate::retrieval::passage::PassageId;
use std::collections::HashSet;

/// Deduplicate oracle hits by passage_id, keeping the first (best ranked) instance
///
/// # Arguments
/// * `hits` - Oracle hits in oracle rank order, potentially with duplicates
///
/// # Returns
/// Deduplicated hits, maintaining oracle order
pub fn deduplicate_hits(hits: Vec<OracleHit>) -> Vec<OracleHit> {
    let mut seen: HashSet<PassageId> = HashSet::new();

    hits.into_iter()
        .filter(|hit| seen.insert(hit.passage_id))
        .collect()
}
