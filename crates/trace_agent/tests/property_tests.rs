//! Property-based tests for the dictionary and the ignore filter.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use trace_agent::{DictionaryCache, IgnoreSuffixFilter, NULL_CODE};

proptest! {
    /// Codes are stable, dense from 1, and never exceed the capacity.
    #[test]
    fn prop_dictionary_codes_dense_and_stable(
        capacity in 1usize..16,
        names in prop::collection::vec(0u8..24, 0..120),
    ) {
        let dict = DictionaryCache::new("prop", capacity, 64);
        let mut seen: HashMap<u8, u32> = HashMap::new();
        let mut distinct = HashSet::new();

        for n in names {
            let name = format!("/op/{}", n);
            let code = dict.resolve(&name);
            distinct.insert(n);
            match seen.get(&n) {
                Some(&first) => prop_assert_eq!(code, first),
                None => {
                    seen.insert(n, code);
                }
            }
            if code != NULL_CODE {
                prop_assert!(code as usize <= capacity);
            }
        }

        let assigned: HashSet<u32> = seen.values().copied().filter(|&c| c != NULL_CODE).collect();
        prop_assert_eq!(assigned.len(), distinct.len().min(capacity));
        prop_assert_eq!(dict.len(), assigned.len());
        let expected: HashSet<u32> = (1..=assigned.len() as u32).collect();
        prop_assert_eq!(assigned, expected);
    }

    /// Every name that came back NULL is queued exactly once while the
    /// backlog has room.
    #[test]
    fn prop_unresolved_backlog_deduplicates(
        names in prop::collection::vec(0u8..12, 1..60),
    ) {
        let dict = DictionaryCache::new("prop", 2, 64);
        let mut nulls = HashSet::new();
        for n in &names {
            let name = format!("peer-{}", n);
            if dict.resolve(&name) == NULL_CODE {
                nulls.insert(name);
            }
        }

        let queued: Vec<String> = dict
            .take_unresolved(usize::MAX)
            .iter()
            .map(ToString::to_string)
            .collect();
        let queued_set: HashSet<String> = queued.iter().cloned().collect();
        prop_assert_eq!(queued.len(), queued_set.len());
        prop_assert_eq!(queued_set, nulls);
    }

    /// A name is ignored exactly when it ends with a listed suffix.
    #[test]
    fn prop_ignore_matches_listed_suffix(
        stem in "[a-z/]{0,12}",
        ext in "[a-z]{1,4}",
        listed in any::<bool>(),
    ) {
        let filter = if listed {
            IgnoreSuffixFilter::new([format!(".{}", ext)])
        } else {
            IgnoreSuffixFilter::new([".zzzzz"])
        };
        let name = format!("{}.{}", stem, ext);
        prop_assert_eq!(filter.is_ignored(&name), listed);
        prop_assert!(!filter.is_ignored(&stem));

        let multi = IgnoreSuffixFilter::new([format!(".min.{}", ext)]);
        let multi_name = format!("{}.min.{}", stem, ext);
        prop_assert!(multi.is_ignored(&multi_name));
        prop_assert!(!multi.is_ignored(&name));
    }
}
