//! Sorted merge of persisted rows against incoming declarations.

use std::cmp::Ordering;

use crate::error::Result;

/// Walks `persisted` and `incoming`, both sorted by the key `compare_key`
/// looks at, and calls `remove` for keys only in `persisted`, `insert` for
/// keys only in `incoming` and `update` for keys in both. `update` decides
/// for itself whether anything changed.
pub fn insert_update_delete<V, I, C, N, U, R>(
    persisted: &[V],
    incoming: &[I],
    mut compare_key: C,
    mut insert: N,
    mut update: U,
    mut remove: R,
) -> Result<()>
where
    C: FnMut(&V, &I) -> Ordering,
    N: FnMut(&I) -> Result<()>,
    U: FnMut(&V, &I) -> Result<()>,
    R: FnMut(&V) -> Result<()>,
{
    let mut persisted = persisted.iter().peekable();
    let mut incoming = incoming.iter().peekable();

    loop {
        match (persisted.peek().copied(), incoming.peek().copied()) {
            (Some(view), Some(value)) => match compare_key(view, value) {
                Ordering::Less => {
                    remove(view)?;
                    persisted.next();
                }
                Ordering::Greater => {
                    insert(value)?;
                    incoming.next();
                }
                Ordering::Equal => {
                    update(view, value)?;
                    persisted.next();
                    incoming.next();
                }
            },
            (Some(view), None) => {
                remove(view)?;
                persisted.next();
            }
            (None, Some(value)) => {
                insert(value)?;
                incoming.next();
            }
            (None, None) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[derive(Debug, Default, PartialEq)]
    struct Actions {
        inserted: Vec<String>,
        updated: Vec<String>,
        removed: Vec<String>,
    }

    fn merge(persisted: &[&str], incoming: &[&str]) -> Actions {
        let actions = std::cell::RefCell::new(Actions::default());

        insert_update_delete(
            persisted,
            incoming,
            |view, value| view.cmp(value),
            |value| {
                actions.borrow_mut().inserted.push(value.to_string());
                Ok(())
            },
            |view, _| {
                actions.borrow_mut().updated.push(view.to_string());
                Ok(())
            },
            |view| {
                actions.borrow_mut().removed.push(view.to_string());
                Ok(())
            },
        )
        .unwrap();

        actions.into_inner()
    }

    #[test]
    fn test_merge_classifies_entries() {
        let actions = merge(&["a", "b", "d"], &["b", "c", "d", "e"]);

        assert_eq!(actions.removed, vec!["a"]);
        assert_eq!(actions.inserted, vec!["c", "e"]);
        assert_eq!(actions.updated, vec!["b", "d"]);
    }

    #[test]
    fn test_merge_empty_sides() {
        let actions = merge(&[], &["x", "y"]);
        assert_eq!(actions.inserted, vec!["x", "y"]);
        assert!(actions.removed.is_empty());

        let actions = merge(&["x", "y"], &[]);
        assert_eq!(actions.removed, vec!["x", "y"]);
        assert!(actions.inserted.is_empty());
    }

    #[test]
    fn test_merge_stops_on_first_error() {
        let mut inserted = 0;
        let result = insert_update_delete(
            &[] as &[&str],
            &["a", "b"],
            |view: &&str, value: &&str| view.cmp(value),
            |_| {
                inserted += 1;
                Err(crate::error::StorageError::InvalidSourcePath("a".to_string()))
            },
            |_, _| Ok(()),
            |_| Ok(()),
        );

        assert!(result.is_err());
        assert_eq!(inserted, 1);
    }

    proptest! {
        #[test]
        fn merge_matches_set_difference(
            persisted in proptest::collection::btree_set("[a-e]{1,3}", 0..12),
            incoming in proptest::collection::btree_set("[a-e]{1,3}", 0..12),
        ) {
            let persisted_names: Vec<&str> = persisted.iter().map(String::as_str).collect();
            let incoming_names: Vec<&str> = incoming.iter().map(String::as_str).collect();

            let actions = merge(&persisted_names, &incoming_names);

            let removed: BTreeSet<String> = persisted.difference(&incoming).cloned().collect();
            let inserted: BTreeSet<String> = incoming.difference(&persisted).cloned().collect();
            let updated: BTreeSet<String> = persisted.intersection(&incoming).cloned().collect();

            prop_assert_eq!(actions.removed.into_iter().collect::<BTreeSet<_>>(), removed);
            prop_assert_eq!(actions.inserted.into_iter().collect::<BTreeSet<_>>(), inserted);
            prop_assert_eq!(actions.updated.into_iter().collect::<BTreeSet<_>>(), updated);
        }
    }
}
