//! Convergence helpers shared by resource kinds.

use std::collections::BTreeMap;

use itertools::Itertools;

/// Changes turning an observed keyed collection into the desired one.
///
/// An entry whose parameters changed appears in both sets: it is removed
/// with its observed parameters and added back with the desired ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedDiff<K, V> {
    pub add: BTreeMap<K, V>,
    pub remove: BTreeMap<K, V>,
}

impl<K, V> KeyedDiff<K, V> {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Three-way diff of `desired` against `observed`.
pub fn keyed_diff<K, V>(desired: &BTreeMap<K, V>, observed: &BTreeMap<K, V>) -> KeyedDiff<K, V>
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    let add = desired
        .iter()
        .filter(|(key, value)| observed.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let remove = observed
        .iter()
        .filter(|(key, value)| desired.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    KeyedDiff { add, remove }
}

/// Apply a diff to an observed collection: removals first, then additions.
pub fn apply_diff<K, V>(observed: &BTreeMap<K, V>, diff: &KeyedDiff<K, V>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut result = observed.clone();
    for key in diff.remove.keys() {
        result.remove(key);
    }
    result.extend(diff.add.iter().map(|(k, v)| (k.clone(), v.clone())));
    result
}

/// The tag set to write, or `None` when the remote already matches.
///
/// Tags compare as sets; the returned list is sorted and deduplicated.
pub fn tags_to_set(desired: &[String], observed: &[String]) -> Option<Vec<String>> {
    let desired: Vec<String> = desired.iter().cloned().sorted().dedup().collect();
    let observed: Vec<String> = observed.iter().cloned().sorted().dedup().collect();
    (desired != observed).then_some(desired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subports(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_converged_collection_has_empty_diff() {
        let both = subports(&[("p1", 100), ("p2", 200)]);
        assert!(keyed_diff(&both, &both).is_empty());
    }

    #[test]
    fn test_changed_parameters_remove_then_add() {
        let desired = subports(&[("p1", 101)]);
        let observed = subports(&[("p1", 100), ("p2", 200)]);
        let diff = keyed_diff(&desired, &observed);

        assert_eq!(diff.add, subports(&[("p1", 101)]));
        assert_eq!(diff.remove, subports(&[("p1", 100), ("p2", 200)]));
        assert_eq!(apply_diff(&observed, &diff), desired);
    }

    #[test]
    fn test_tags_compare_as_sets() {
        let desired = vec!["b".to_string(), "a".to_string(), "a".to_string()];
        let observed = vec!["a".to_string(), "b".to_string()];
        assert_eq!(tags_to_set(&desired, &observed), None);
        assert_eq!(
            tags_to_set(&desired, &[]),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(tags_to_set(&[], &observed), Some(Vec::new()));
    }
}
