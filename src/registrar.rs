//! Registrar identity and group membership.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Stable identity of a lookup service.
///
/// Two registrar proxies denote the same lookup service iff their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque capability for a discovered lookup service.
///
/// The discovery machinery never calls into a registrar beyond asking for its
/// identity, which must be cheap and local.
pub trait Registrar: fmt::Debug + Send + Sync + 'static {
    /// Identity of the lookup service behind this proxy.
    fn service_id(&self) -> ServiceId;
}

/// Shared registrar proxy.
pub type RegistrarHandle = Arc<dyn Registrar>;

/// The set of groups a client is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupSet {
    /// Every group; no filtering.
    #[default]
    All,
    /// Only the listed groups. An empty set means no groups at all.
    Only(BTreeSet<String>),
}

impl GroupSet {
    /// The empty restriction: match nothing.
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    /// Restrict to `groups`.
    pub fn only<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(groups.into_iter().map(Into::into).collect())
    }

    /// Whether this is the unrestricted set.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether a registrar that is a member of `member_groups` is of interest.
    pub fn intersects<S: AsRef<str>>(&self, member_groups: &[S]) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => member_groups.iter().any(|g| wanted.contains(g.as_ref())),
        }
    }

    /// The explicit group names, or `None` when unrestricted.
    pub fn names(&self) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::Only(set) => Some(set.iter().cloned().collect()),
        }
    }
}

/// Whether two member-group lists name the same groups, ignoring order and
/// duplicates.
pub fn same_groups(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}
