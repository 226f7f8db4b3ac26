//! Cross-side identity matching.
//!
//! Exact identity equality first, then exact display-name equality. First
//! hit wins. A miss makes the item look new, which at worst duplicates it;
//! a wrong hit would overwrite an unrelated item, so nothing fuzzier is ever
//! tried. Two items sharing a display name in one container resolve to
//! whichever comes first in enumeration order.

use crate::model::{Item, SnapshotEntry};

pub trait Identified {
    fn identity(&self) -> Option<&str>;
    fn display_name(&self) -> &str;
}

impl Identified for Item {
    fn identity(&self) -> Option<&str> {
        Item::identity(self)
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl Identified for SnapshotEntry {
    fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|id| !id.is_empty())
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Index of the candidate matching `item`, if any.
pub fn match_index<T, C>(item: &T, candidates: &[C]) -> Option<usize>
where
    T: Identified + ?Sized,
    C: Identified,
{
    match_index_where(item, candidates, |_| true)
}

/// Like [`match_index`], restricted to candidates for which `available`
/// holds. Used when earlier matches have already claimed some candidates.
pub fn match_index_where<T, C, F>(item: &T, candidates: &[C], available: F) -> Option<usize>
where
    T: Identified + ?Sized,
    C: Identified,
    F: Fn(usize) -> bool,
{
    if let Some(identity) = item.identity()
        && let Some(index) = candidates
            .iter()
            .enumerate()
            .position(|(index, c)| available(index) && c.identity() == Some(identity))
    {
        return Some(index);
    }
    candidates
        .iter()
        .enumerate()
        .position(|(index, c)| available(index) && c.display_name() == item.display_name())
}

/// Pairs every local item with at most one remote item.
///
/// Returns `(local_index, remote_index)` pairs: `(Some, Some)` for matches,
/// `(Some, None)` for local-only items and `(None, Some)` for remote items
/// nothing claimed.
pub fn pair_up<L, R>(local: &[L], remote: &[R]) -> Vec<(Option<usize>, Option<usize>)>
where
    L: Identified,
    R: Identified,
{
    let mut claimed = vec![false; remote.len()];
    let mut pairs = Vec::with_capacity(local.len().max(remote.len()));

    // Identity matches are settled for everyone before any name fallback,
    // so a name match cannot steal a candidate another item owns by identity.
    let mut by_identity: Vec<Option<usize>> = vec![None; local.len()];
    for (index, item) in local.iter().enumerate() {
        let Some(identity) = item.identity() else {
            continue;
        };
        if let Some(found) = remote
            .iter()
            .enumerate()
            .position(|(r, c)| !claimed[r] && c.identity() == Some(identity))
        {
            claimed[found] = true;
            by_identity[index] = Some(found);
        }
    }

    for (index, item) in local.iter().enumerate() {
        let found = match by_identity[index] {
            Some(found) => Some(found),
            None => {
                let found = remote.iter().enumerate().position(|(r, c)| {
                    !claimed[r] && c.display_name() == item.display_name()
                });
                if let Some(found) = found {
                    claimed[found] = true;
                }
                found
            }
        };
        pairs.push((Some(index), found));
    }

    for (index, taken) in claimed.iter().enumerate() {
        if !taken {
            pairs.push((None, Some(index)));
        }
    }
    pairs
}
