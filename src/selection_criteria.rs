//! Describes which servers are suitable for a given operation — the "eligible node" concept
//! implied throughout spec §2/§4.7/§4.9, made concrete per the teacher driver's
//! `selection_criteria.rs`. Not named as its own component in spec.md, but required to make node
//! selection (C6) and transaction pinning (C10) testable; see SPEC_FULL.md §10.5.

use std::{fmt, sync::Arc};

use crate::sdam::{NodeStatus, ServerAddress};

/// Describes which servers are suitable for a given operation.
#[derive(Clone)]
pub enum SelectionCriteria {
    /// A preference based on replica-set role.
    ReadPreference(ReadPreference),

    /// An arbitrary predicate; a server is suitable iff `predicate(address, status)` is true.
    /// Used to pin operations to the server that accepted the first command of a transaction.
    Predicate(Predicate),
}

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadPreference(p) => f.debug_tuple("ReadPreference").field(p).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ReadPreference(a), Self::ReadPreference(b)) => a == b,
            (Self::Predicate(a), Self::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(pref: ReadPreference) -> Self {
        Self::ReadPreference(pref)
    }
}

impl SelectionCriteria {
    /// Criteria pinning to exactly one address, used by the transaction state machine (C10) to
    /// route every in-transaction command to the server that accepted the first one.
    pub fn pinned_to(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |addr, _status| *addr == address))
    }

    pub(crate) fn matches(&self, address: &ServerAddress, status: NodeStatus) -> bool {
        match self {
            SelectionCriteria::ReadPreference(pref) => pref.matches(status),
            SelectionCriteria::Predicate(pred) => pred(address, status),
        }
    }
}

/// An arbitrary predicate used to filter eligible servers.
pub type Predicate = Arc<dyn Fn(&ServerAddress, NodeStatus) -> bool + Send + Sync>;

/// Specifies how the core routes a read operation to members of a replica set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    fn matches(self, status: NodeStatus) -> bool {
        match self {
            ReadPreference::Primary => status == NodeStatus::Primary,
            ReadPreference::PrimaryPreferred => {
                status == NodeStatus::Primary || status == NodeStatus::Secondary
            }
            ReadPreference::Secondary => status == NodeStatus::Secondary,
            ReadPreference::SecondaryPreferred => {
                status == NodeStatus::Secondary || status == NodeStatus::Primary
            }
            ReadPreference::Nearest => {
                matches!(status, NodeStatus::Primary | NodeStatus::Secondary)
            }
        }
    }
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        SelectionCriteria::ReadPreference(ReadPreference::Primary)
    }
}
