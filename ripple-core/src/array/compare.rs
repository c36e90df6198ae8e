//! Edit scripts between two sequences.
//!
//! [`compare_arrays`] computes a minimal insert/delete edit script with an
//! edit-distance table, walking it back from the bottom-right corner. Items
//! that were deleted and re-added elsewhere are then paired up as moves.
//!
//! Indexes follow the sequence each entry belongs to: `added` entries carry
//! their index in the new sequence, `deleted` entries their index in the old
//! one. The script is ordered by position.

use serde::{Deserialize, Serialize};

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Deleted,
    Retained,
}

/// One entry of an edit script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayChange<T> {
    pub status: ChangeStatus,
    pub value: T,
    /// Position in the new (added) or old (deleted) sequence. Retained
    /// entries have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// For a move, the index of the matching entry on the other side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved: Option<usize>,
}

impl<T> ArrayChange<T> {
    pub fn added(value: T, index: usize) -> Self {
        Self::with_status(ChangeStatus::Added, value, index)
    }

    pub fn deleted(value: T, index: usize) -> Self {
        Self::with_status(ChangeStatus::Deleted, value, index)
    }

    pub fn retained(value: T) -> Self {
        Self {
            status: ChangeStatus::Retained,
            value,
            index: None,
            moved: None,
        }
    }

    fn with_status(status: ChangeStatus, value: T, index: usize) -> Self {
        Self {
            status,
            value,
            index: Some(index),
            moved: None,
        }
    }

    /// Pair this entry with the entry at `index` on the other side.
    pub fn with_move(mut self, index: usize) -> Self {
        self.moved = Some(index);
        self
    }
}

/// Diff options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompareOptions {
    /// Leave `retained` entries out of the script.
    pub sparse: bool,
    /// Search every deleted/added pair for moves. By default the search
    /// gives up after `10 * shorter length` failed comparisons.
    pub dont_limit_moves: bool,
}

impl CompareOptions {
    pub fn sparse() -> Self {
        Self {
            sparse: true,
            dont_limit_moves: false,
        }
    }
}

/// Compute the edit script turning `old` into `new`.
pub fn compare_arrays<T: Clone + PartialEq>(old: &[T], new: &[T], options: CompareOptions) -> Vec<ArrayChange<T>> {
    if old.len() < new.len() {
        compare_small_to_big(old, new, ChangeStatus::Added, ChangeStatus::Deleted, options)
    } else {
        compare_small_to_big(new, old, ChangeStatus::Deleted, ChangeStatus::Added, options)
    }
}

fn compare_small_to_big<T: Clone + PartialEq>(
    small: &[T],
    big: &[T],
    not_in_small: ChangeStatus,
    not_in_big: ChangeStatus,
    options: CompareOptions,
) -> Vec<ArrayChange<T>> {
    let width = big.len() + 1;
    let at = |i: usize, j: usize| i * width + j;

    let mut distance = vec![0usize; (small.len() + 1) * width];
    for i in 0..=small.len() {
        for j in 0..=big.len() {
            distance[at(i, j)] = if j == 0 {
                i
            } else if i == 0 {
                j
            } else if small[i - 1] == big[j - 1] {
                distance[at(i - 1, j - 1)]
            } else {
                distance[at(i - 1, j)].min(distance[at(i, j - 1)]) + 1
            };
        }
    }

    let mut script = Vec::new();
    let mut only_in_big = Vec::new();
    let mut only_in_small = Vec::new();

    let (mut i, mut j) = (small.len(), big.len());
    while i > 0 || j > 0 {
        let step_back = distance[at(i, j)].checked_sub(1);
        if j > 0 && step_back == Some(distance[at(i, j - 1)]) {
            j -= 1;
            only_in_big.push(script.len());
            script.push(ArrayChange::with_status(not_in_small, big[j].clone(), j));
        } else if i > 0 && step_back == Some(distance[at(i - 1, j)]) {
            i -= 1;
            only_in_small.push(script.len());
            script.push(ArrayChange::with_status(not_in_big, small[i].clone(), i));
        } else {
            i -= 1;
            j -= 1;
            if !options.sparse {
                script.push(ArrayChange::retained(big[j].clone()));
            }
        }
    }

    let limit = if options.dont_limit_moves || small.is_empty() {
        None
    } else {
        Some(small.len() * 10)
    };
    find_moves(&mut script, &only_in_small, &only_in_big, limit);

    script.reverse();
    script
}

/// Pair entries of `left` with equal entries of `right` as moves.
///
/// Both slices index into `script`. Each right entry pairs at most once.
/// With a `limit`, the search stops once that many comparisons have failed
/// since the last match.
pub(crate) fn find_moves<T: PartialEq>(
    script: &mut [ArrayChange<T>],
    left: &[usize],
    right: &[usize],
    limit: Option<usize>,
) {
    if left.is_empty() || right.is_empty() {
        return;
    }

    let mut right = right.to_vec();
    let mut failed = 0;

    for &l in left {
        if limit.is_some_and(|limit| failed >= limit) {
            break;
        }

        match right.iter().position(|&r| script[r].value == script[l].value) {
            Some(position) => {
                let r = right.remove(position);
                let (left_index, right_index) = (script[l].index, script[r].index);
                script[l].moved = right_index;
                script[r].moved = left_index;
                failed = 0;
            }
            None => failed += right.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse<T: Clone + PartialEq>(old: &[T], new: &[T]) -> Vec<ArrayChange<T>> {
        compare_arrays(old, new, CompareOptions::sparse())
    }

    #[test]
    fn appended_items_are_added_at_the_end() {
        assert_eq!(
            sparse(&[1, 2, 3], &[1, 2, 3, 4, 5]),
            vec![ArrayChange::added(4, 3), ArrayChange::added(5, 4)]
        );
    }

    #[test]
    fn removed_items_carry_their_old_index() {
        assert_eq!(
            sparse(&[1, 2, 3], &[3]),
            vec![ArrayChange::deleted(1, 0), ArrayChange::deleted(2, 1)]
        );
    }

    #[test]
    fn identical_sequences_have_an_empty_sparse_script() {
        assert!(sparse(&["a", "b"], &["a", "b"]).is_empty());
        assert!(sparse::<i32>(&[], &[]).is_empty());
    }

    #[test]
    fn full_script_includes_retained_items() {
        let script = compare_arrays(&['a', 'b', 'c'], &['a', 'x', 'c'], CompareOptions::default());
        let statuses: Vec<ChangeStatus> = script.iter().map(|c| c.status).collect();

        assert_eq!(script.len(), 4);
        assert_eq!(statuses.iter().filter(|s| **s == ChangeStatus::Retained).count(), 2);
        assert!(script.contains(&ArrayChange::added('x', 1)));
        assert!(script.contains(&ArrayChange::deleted('b', 1)));
        assert_eq!(script[0], ArrayChange::retained('a'));
        assert_eq!(script[3], ArrayChange::retained('c'));
    }

    #[test]
    fn relocated_item_is_reported_as_a_move() {
        assert_eq!(
            sparse(&[1, 2, 3], &[3, 1, 2]),
            vec![ArrayChange::added(3, 0).with_move(2), ArrayChange::deleted(3, 2).with_move(0)]
        );
    }

    #[test]
    fn replacement_is_not_a_move() {
        let script = sparse(&["a", "b"], &["a", "c"]);
        assert_eq!(script.len(), 2);
        assert!(script.iter().all(|change| change.moved.is_none()));
    }

    #[test]
    fn move_search_respects_the_limit() {
        let mut script = vec![
            ArrayChange::deleted(1, 0),
            ArrayChange::deleted(2, 1),
            ArrayChange::added(9, 0),
            ArrayChange::added(2, 1),
        ];

        // The first left entry fails two comparisons, which hits the limit
        find_moves(&mut script, &[0, 1], &[2, 3], Some(2));
        assert!(script.iter().all(|change| change.moved.is_none()));

        find_moves(&mut script, &[0, 1], &[2, 3], None);
        assert_eq!(script[1].moved, Some(1));
        assert_eq!(script[3].moved, Some(1));
    }

    #[test]
    fn changes_serialize_with_lowercase_status() {
        let json = serde_json::to_value(ArrayChange::added("x", 2)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "added", "value": "x", "index": 2}));

        let json = serde_json::to_value(ArrayChange::deleted(1, 0).with_move(3)).unwrap();
        assert_eq!(json["moved"], 3);
    }
}
