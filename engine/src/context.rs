//! Operation contexts: the typed record threaded through the interceptor
//! chain for every request, and the bypass-set / session / control flags it
//! carries.

use crate::dn::Dn;
use crate::entry::{Entry, Modification};
use crate::filter::Filter;
use std::collections::{HashMap, HashSet};

/// Search scope, mirroring RFC 4511.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

/// The set of stage names to skip for a single call. `All` is the
/// `BYPASS_ALL` sentinel used by internal code paths (schema bootstrap,
/// change-log replay) to reach the nexus directly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum BypassSet {
    #[default]
    None,
    Names(HashSet<String>),
    All,
}

impl BypassSet {
    pub fn names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        BypassSet::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn is_bypassed(&self, name: &str) -> bool {
        match self {
            BypassSet::None => false,
            BypassSet::All => true,
            BypassSet::Names(set) => set.contains(name),
        }
    }
}

/// A bound identity plus its environment, for the duration of one session.
#[derive(Clone, Debug, Default)]
pub struct Session {
    /// The bound DN, or the root DSE for an anonymous bind.
    pub bound_dn: Dn,
    pub environment: HashMap<String, String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bound_as(dn: Dn) -> Self {
        Self {
            bound_dn: dn,
            environment: HashMap::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.bound_dn.is_root_dse()
    }
}

/// The request-specific payload, one variant per operation kind.
#[derive(Clone, Debug)]
pub enum OperationPayload {
    Add {
        entry: Entry,
    },
    Delete,
    Modify {
        modifications: Vec<Modification>,
    },
    Rename {
        new_rdn: String,
        delete_old_rdn: bool,
    },
    Move {
        new_superior: Dn,
    },
    MoveAndRename {
        new_superior: Dn,
        new_rdn: String,
        delete_old_rdn: bool,
    },
    Lookup {
        attributes: Option<Vec<String>>,
    },
    Search {
        scope: Scope,
        filter: Filter,
        attributes: Option<Vec<String>>,
    },
    HasEntry,
    Bind,
    Compare {
        attribute_type: String,
        value: String,
    },
}

impl OperationPayload {
    pub fn name(&self) -> &'static str {
        match self {
            OperationPayload::Add { .. } => "add",
            OperationPayload::Delete => "delete",
            OperationPayload::Modify { .. } => "modify",
            OperationPayload::Rename { .. } => "rename",
            OperationPayload::Move { .. } => "move",
            OperationPayload::MoveAndRename { .. } => "moveAndRename",
            OperationPayload::Lookup { .. } => "lookup",
            OperationPayload::Search { .. } => "search",
            OperationPayload::HasEntry => "hasEntry",
            OperationPayload::Bind => "bind",
            OperationPayload::Compare { .. } => "compare",
        }
    }

    /// Mutating operations are the ones the referral manager and change-log
    /// care about reconciling after a successful commit.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            OperationPayload::Add { .. }
                | OperationPayload::Delete
                | OperationPayload::Modify { .. }
                | OperationPayload::Rename { .. }
                | OperationPayload::Move { .. }
                | OperationPayload::MoveAndRename { .. }
        )
    }
}

/// The typed record carried through the interceptor chain for one request.
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub session: Session,
    /// Normalized past the schema stage; user-provided before it.
    pub target: Dn,
    pub payload: OperationPayload,
    pub manage_dsa_it: bool,
    pub bypass: BypassSet,
    pub message_id: Option<i64>,
}

impl OperationContext {
    pub fn new(session: Session, target: Dn, payload: OperationPayload) -> Self {
        Self {
            session,
            target,
            payload,
            manage_dsa_it: false,
            bypass: BypassSet::None,
            message_id: None,
        }
    }

    pub fn with_manage_dsa_it(mut self, manage_dsa_it: bool) -> Self {
        self.manage_dsa_it = manage_dsa_it;
        self
    }

    pub fn with_bypass(mut self, bypass: BypassSet) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Returns a copy of this context re-targeted at `BYPASS_ALL`, for
    /// internal re-entry (change-log revert, schema bootstrap).
    pub fn bypassing_all(&self) -> Self {
        let mut clone = self.clone();
        clone.bypass = BypassSet::All;
        clone
    }

    pub fn is_bypassed(&self, stage_name: &str) -> bool {
        self.bypass.is_bypassed(stage_name)
    }
}
