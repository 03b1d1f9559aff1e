//! Symmetric difference between two ID sets.

use std::cmp::Ordering;
use std::collections::BTreeSet;

/// IDs to add and remove to turn one set into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    /// Present in the new set only, ascending.
    pub added: Vec<T>,
    /// Present in the old set only, ascending.
    pub removed: Vec<T>,
}

impl<T> SetDiff<T> {
    /// Whether the two sets were equal.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Every ID the diff touches, added first.
    pub fn touched(&self) -> impl Iterator<Item = &T> {
        self.added.iter().chain(self.removed.iter())
    }
}

impl<T> Default for SetDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Compute which IDs were added to and removed from `old` to produce `new`.
///
/// Walks both sorted sets once, so the cost is linear in their combined size.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use perms_store::domain::compute_diff;
///
/// let diff = compute_diff(&BTreeSet::from([1, 2, 3]), &BTreeSet::from([2, 3, 4]));
/// assert_eq!(diff.added, vec![4]);
/// assert_eq!(diff.removed, vec![1]);
/// ```
pub fn compute_diff<T>(old: &BTreeSet<T>, new: &BTreeSet<T>) -> SetDiff<T>
where
    T: Ord + Copy,
{
    let mut diff = SetDiff::default();
    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (Some(old_id), Some(new_id)) => match old_id.cmp(new_id) {
                Ordering::Less => {
                    diff.removed.push(**old_id);
                    old_iter.next();
                }
                Ordering::Greater => {
                    diff.added.push(**new_id);
                    new_iter.next();
                }
                Ordering::Equal => {
                    old_iter.next();
                    new_iter.next();
                }
            },
            (Some(_), None) => {
                diff.removed.extend(old_iter.copied());
                break;
            }
            (None, Some(_)) => {
                diff.added.extend(new_iter.copied());
                break;
            }
            (None, None) => break,
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[1, 2, 3], &[2, 3, 4], &[4], &[1])]
    #[case(&[], &[5, 1], &[1, 5], &[])]
    #[case(&[7, 3], &[], &[], &[3, 7])]
    #[case(&[1, 2], &[1, 2], &[], &[])]
    #[case(&[1, 3, 5, 7], &[2, 3, 6, 7, 9], &[2, 6, 9], &[1, 5])]
    fn diff_reports_sorted_changes(
        #[case] old: &[i32],
        #[case] new: &[i32],
        #[case] added: &[i32],
        #[case] removed: &[i32],
    ) {
        let old: BTreeSet<i32> = old.iter().copied().collect();
        let new: BTreeSet<i32> = new.iter().copied().collect();

        let diff = compute_diff(&old, &new);

        assert_eq!(diff.added, added);
        assert_eq!(diff.removed, removed);
    }

    #[rstest]
    fn applying_diff_reproduces_new_set() {
        let old: BTreeSet<i64> = (0..200).step_by(3).collect();
        let new: BTreeSet<i64> = (0..200).step_by(5).collect();

        let diff = compute_diff(&old, &new);
        let mut rebuilt = old.clone();
        for id in &diff.removed {
            rebuilt.remove(id);
        }
        rebuilt.extend(diff.added.iter().copied());

        assert_eq!(rebuilt, new);
    }

    #[rstest]
    fn equal_sets_produce_empty_diff() {
        let set = BTreeSet::from([4_u8, 8, 15]);
        assert!(compute_diff(&set, &set).is_empty());
    }
}
