//! Evaluation order of object keys.
//!
//! A key that references a sibling is validated after it, so references
//! see the sibling's converted (or defaulted) value.

use crate::error::SchemaError;

/// Order `items` so each key comes after the siblings it depends on.
///
/// `items` are `(key, dependencies)` pairs; dependencies naming keys that
/// are not in the list are ignored. The sort is stable: independent keys
/// keep their declaration order. Returns indices into `items`.
///
/// # Errors
///
/// Returns `SchemaError::CircularDependency` when keys depend on each
/// other, directly or through a chain, or a key depends on itself.
pub(crate) fn order(items: &[(String, Vec<String>)]) -> Result<Vec<usize>, SchemaError> {
    let deps: Vec<Vec<usize>> = items
        .iter()
        .map(|(_, after)| {
            after
                .iter()
                .filter_map(|name| items.iter().position(|(key, _)| key == name))
                .collect()
        })
        .collect();

    for (i, targets) in deps.iter().enumerate() {
        if targets.contains(&i) {
            return Err(SchemaError::CircularDependency {
                key: items[i].0.clone(),
                chain: items[i].0.clone(),
            });
        }
    }

    let mut placed = vec![false; items.len()];
    let mut sorted = Vec::with_capacity(items.len());

    while sorted.len() < items.len() {
        let next = (0..items.len())
            .find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
        match next {
            Some(i) => {
                placed[i] = true;
                sorted.push(i);
            }
            None => {
                let start = (0..items.len()).find(|&i| !placed[i]).unwrap_or(0);
                return Err(cycle_error(items, &deps, &placed, start));
            }
        }
    }

    Ok(sorted)
}

fn cycle_error(
    items: &[(String, Vec<String>)],
    deps: &[Vec<usize>],
    placed: &[bool],
    start: usize,
) -> SchemaError {
    // Follow unplaced dependencies until a key repeats
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&d| !placed[d]) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let cycle: Vec<&str> = path[pos..]
                .iter()
                .chain(std::iter::once(&next))
                .map(|&i| items[i].0.as_str())
                .collect();
            return SchemaError::CircularDependency {
                key: items[next].0.clone(),
                chain: cycle.join(" -> "),
            };
        }
        path.push(next);
        current = next;
    }
    SchemaError::CircularDependency {
        key: items[start].0.clone(),
        chain: items[start].0.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(spec: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        spec.iter()
            .map(|(k, deps)| (k.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn keeps_declaration_order_without_dependencies() {
        let order = order(&items(&[("a", &[]), ("b", &[]), ("c", &[])])).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn moves_dependents_after_their_targets() {
        let order = order(&items(&[("a", &["c"]), ("b", &[]), ("c", &[])])).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn ignores_unknown_dependencies() {
        let order = order(&items(&[("a", &["zzz"]), ("b", &[])])).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn reports_self_dependency() {
        let err = order(&items(&[("a", &["a"])])).unwrap_err();
        assert_eq!(err.to_string(), "Item cannot come after itself: a (a)");
    }

    #[test]
    fn reports_cycles_with_their_chain() {
        let err = order(&items(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])])).unwrap_err();
        assert_eq!(err.to_string(), "Item cannot come after itself: a (a -> b -> c -> a)");
    }
}
