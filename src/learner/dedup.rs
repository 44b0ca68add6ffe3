//! Co-hit deduplication: an entity seen in several containers keeps only
//! its strongest container once it has enough evidence.

use std::collections::BTreeMap;

use super::DEDUP_MIN_TOTAL;

/// `map` keys are `"entity:container"`. For every entity with at least two
/// containers and a total of at least [`DEDUP_MIN_TOTAL`], keep the highest
/// count (alphabetical container on ties) and remove the rest.
pub(crate) fn run_dedup(map: &mut BTreeMap<String, u32>) {
    let mut by_entity: BTreeMap<&str, Vec<(&str, u32)>> = BTreeMap::new();
    for (key, count) in map.iter() {
        if let Some((entity, container)) = key.split_once(':') {
            by_entity.entry(entity).or_default().push((container, *count));
        }
    }

    let mut losers: Vec<String> = Vec::new();
    for (entity, mut containers) in by_entity {
        if containers.len() < 2 {
            continue;
        }
        let total: u64 = containers.iter().map(|(_, c)| *c as u64).sum();
        if total < DEDUP_MIN_TOTAL as u64 {
            continue;
        }
        containers.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        losers.extend(containers[1..].iter().map(|(c, _)| format!("{}:{}", entity, c)));
    }

    for key in losers {
        map.remove(&key);
    }
}
