//! Last-writer-wins decision for one matched pair.

use std::cmp::Ordering;

use crate::adapter::ItemAdapter;
use crate::model::{Direction, Item, Side};

/// The two halves of a match. At least one side is always present.
#[derive(Debug, Clone, Copy)]
pub enum MatchedPair<'a> {
    LocalOnly(&'a Item),
    RemoteOnly(&'a Item),
    Both { local: &'a Item, remote: &'a Item },
}

impl<'a> MatchedPair<'a> {
    pub fn from_options(local: Option<&'a Item>, remote: Option<&'a Item>) -> Option<Self> {
        match (local, remote) {
            (Some(local), Some(remote)) => Some(MatchedPair::Both { local, remote }),
            (Some(local), None) => Some(MatchedPair::LocalOnly(local)),
            (None, Some(remote)) => Some(MatchedPair::RemoteOnly(remote)),
            (None, None) => None,
        }
    }

    pub fn get(&self, side: Side) -> Option<&'a Item> {
        match (*self, side) {
            (MatchedPair::LocalOnly(item), Side::Local)
            | (MatchedPair::RemoteOnly(item), Side::Remote) => Some(item),
            (MatchedPair::Both { local, .. }, Side::Local) => Some(local),
            (MatchedPair::Both { remote, .. }, Side::Remote) => Some(remote),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'a str {
        match *self {
            MatchedPair::LocalOnly(item) | MatchedPair::RemoteOnly(item) => &item.display_name,
            MatchedPair::Both { local, .. } => &local.display_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NoOp,
    Create { target: Side, seed: Item },
    Update { target: Side, seed: Item },
    /// The winning write would land on a side the direction protects.
    Suppressed { target: Side },
}

impl Resolution {
    pub fn target(&self) -> Option<Side> {
        match self {
            Resolution::NoOp => None,
            Resolution::Create { target, .. }
            | Resolution::Update { target, .. }
            | Resolution::Suppressed { target } => Some(*target),
        }
    }
}

/// Compares modification stamps at whole-second resolution.
pub fn newer_side(local: &Item, remote: &Item) -> Option<Side> {
    match local.modified_secs().cmp(&remote.modified_secs()) {
        Ordering::Greater => Some(Side::Local),
        Ordering::Less => Some(Side::Remote),
        Ordering::Equal => None,
    }
}

pub fn resolve(
    pair: MatchedPair<'_>,
    direction: Direction,
    adapter: &dyn ItemAdapter,
) -> Resolution {
    let (target, seed, create) = match pair {
        MatchedPair::LocalOnly(local) => (Side::Remote, adapter.seed(local, None), true),
        MatchedPair::RemoteOnly(remote) => (Side::Local, adapter.seed(remote, None), true),
        MatchedPair::Both { local, remote } => match newer_side(local, remote) {
            None => return Resolution::NoOp,
            Some(Side::Local) => (Side::Remote, adapter.seed(local, Some(remote)), false),
            Some(Side::Remote) => (Side::Local, adapter.seed(remote, Some(local)), false),
        },
    };

    if !direction.writes_to(target) {
        return Resolution::Suppressed { target };
    }
    if create {
        Resolution::Create { target, seed }
    } else {
        Resolution::Update { target, seed }
    }
}
