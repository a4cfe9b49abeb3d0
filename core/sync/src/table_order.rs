//! Page fetch order across tables.

use std::collections::{HashMap, HashSet};

/// Produce the sequence of table names to fetch, one entry per page.
///
/// - Non-parallel tables emit all their pages back to back at their position.
/// - Each parallel table emits its first page at its own position. At the
///   last parallel table, the remaining rounds follow, each round giving one
///   entry per parallel table that still has a page left, in input order.
/// - Names without a page count and duplicate names are ignored, as are
///   parallel names that are not in `table_names`.
///
/// The result always has `sum(pages)` entries over the scheduled names.
pub fn sort_table_names(
    table_names: &[String],
    parallel_table_names: &[String],
    pages: &HashMap<String, usize>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let names: Vec<&str> = table_names
        .iter()
        .map(String::as_str)
        .filter(|name| pages.contains_key(*name) && seen.insert(*name))
        .collect();

    let is_parallel = |name: &str| parallel_table_names.iter().any(|p| p == name);
    let page_count = |name: &str| pages.get(name).copied().unwrap_or(0);

    let group: Vec<&str> = names.iter().copied().filter(|n| is_parallel(n)).collect();
    let last_parallel = group.last().copied();
    let rounds = group.iter().map(|n| page_count(n)).max().unwrap_or(0);

    let total: usize = names.iter().map(|n| page_count(n)).sum();
    let mut order = Vec::with_capacity(total);

    for name in names {
        let count = page_count(name);

        if !is_parallel(name) {
            order.extend(std::iter::repeat(name.to_string()).take(count));
            continue;
        }

        if count > 0 {
            order.push(name.to_string());
        }

        if Some(name) == last_parallel {
            for round in 2..=rounds {
                for member in &group {
                    if page_count(member) >= round {
                        order.push(member.to_string());
                    }
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn pages(list: &[(&str, usize)]) -> HashMap<String, usize> {
        list.iter().map(|(n, p)| (n.to_string(), *p)).collect()
    }

    #[test]
    fn test_no_parallel_tables() {
        let order = sort_table_names(
            &names(&["1", "2", "3", "4"]),
            &[],
            &pages(&[("1", 2), ("2", 2), ("3", 2), ("4", 2)]),
        );
        assert_eq!(order, names(&["1", "1", "2", "2", "3", "3", "4", "4"]));
    }

    #[test]
    fn test_adjacent_parallel_tables() {
        let order = sort_table_names(
            &names(&["1", "2", "3", "4"]),
            &names(&["2", "3"]),
            &pages(&[("1", 2), ("2", 2), ("3", 2), ("4", 2)]),
        );
        assert_eq!(order, names(&["1", "1", "2", "3", "2", "3", "4", "4"]));
    }

    #[test]
    fn test_separated_parallel_tables() {
        let order = sort_table_names(
            &names(&["1", "2", "3", "4"]),
            &names(&["1", "4"]),
            &pages(&[("1", 2), ("2", 2), ("3", 2), ("4", 2)]),
        );
        assert_eq!(order, names(&["1", "2", "2", "3", "3", "4", "1", "4"]));
    }

    #[test]
    fn test_uneven_parallel_tables() {
        let order = sort_table_names(
            &names(&["1", "2", "3", "4"]),
            &names(&["1", "2"]),
            &pages(&[("1", 6), ("2", 8), ("3", 1), ("4", 0)]),
        );
        assert_eq!(order.len(), 15);
        assert_eq!(
            order,
            names(&["1", "2", "1", "2", "1", "2", "1", "2", "1", "2", "1", "2", "2", "2", "3"])
        );
    }

    #[test]
    fn test_all_pages_zero() {
        let order = sort_table_names(
            &names(&["1", "2", "3", "4"]),
            &names(&["1", "2"]),
            &pages(&[("1", 0), ("2", 0), ("3", 0), ("4", 0)]),
        );
        assert!(order.is_empty());
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let order = sort_table_names(
            &names(&["a", "missing", "b"]),
            &names(&["b", "ghost"]),
            &pages(&[("a", 1), ("b", 2)]),
        );
        assert_eq!(order, names(&["a", "b", "b"]));
    }

    #[test]
    fn test_single_parallel_table_is_contiguous() {
        let order = sort_table_names(
            &names(&["a", "b", "c"]),
            &names(&["b"]),
            &pages(&[("a", 1), ("b", 3), ("c", 1)]),
        );
        assert_eq!(order, names(&["a", "b", "b", "b", "c"]));
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_page(
            page_counts in proptest::collection::vec(0usize..6, 1..7),
            parallel_mask in proptest::collection::vec(any::<bool>(), 7),
        ) {
            let table_names: Vec<String> =
                (0..page_counts.len()).map(|i| format!("t{}", i)).collect();
            let parallel: Vec<String> = table_names
                .iter()
                .zip(parallel_mask.iter())
                .filter(|(_, p)| **p)
                .map(|(n, _)| n.clone())
                .collect();
            let page_map: HashMap<String, usize> = table_names
                .iter()
                .cloned()
                .zip(page_counts.iter().copied())
                .collect();

            let order = sort_table_names(&table_names, &parallel, &page_map);

            prop_assert_eq!(order.len(), page_counts.iter().sum::<usize>());
            for (name, count) in &page_map {
                prop_assert_eq!(order.iter().filter(|n| *n == name).count(), *count);
            }

            // Non-parallel tables appear as one contiguous run
            for name in table_names.iter().filter(|n| !parallel.contains(n)) {
                let positions: Vec<usize> = order
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| *n == name)
                    .map(|(i, _)| i)
                    .collect();
                if let (Some(first), Some(last)) = (positions.first(), positions.last()) {
                    prop_assert_eq!(last - first + 1, positions.len());
                }
            }
        }
    }
}
