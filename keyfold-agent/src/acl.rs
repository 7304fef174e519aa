//! Access control for the agent socket.
//!
//! The allow-set is owned by the surrounding application (it decides which
//! vault entries an integration may read); the server only ever looks at a
//! coherent snapshot of it per request.

use std::collections::HashSet;
use std::sync::RwLock;

/// A point-in-time view of the allow-set.
#[derive(Clone, Debug, Default)]
pub struct AclSnapshot {
    allow_all: bool,
    allowed: HashSet<String>,
}

impl AclSnapshot {
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            allowed: HashSet::new(),
        }
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_all: false,
            allowed: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, cipher_id: &str) -> bool {
        self.allow_all || self.allowed.contains(cipher_id)
    }
}

/// Source of the allow-set consulted on every request.
pub trait AclProvider: Send + Sync {
    fn snapshot(&self) -> AclSnapshot;
}

/// An in-process allow-set, replaced wholesale by the owner.
#[derive(Default)]
pub struct StaticAcl {
    inner: RwLock<AclSnapshot>,
}

impl StaticAcl {
    pub fn new(snapshot: AclSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: AclSnapshot) {
        *self.inner.write().expect("acl lock poisoned") = snapshot;
    }
}

impl AclProvider for StaticAcl {
    fn snapshot(&self) -> AclSnapshot {
        self.inner.read().expect("acl lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_overrides_the_set() {
        let snapshot = AclSnapshot::allow_all();
        assert!(snapshot.allows("anything"));

        let snapshot = AclSnapshot::from_ids(["a", "b"]);
        assert!(snapshot.allows("a"));
        assert!(!snapshot.allows("c"));
        assert!(!AclSnapshot::default().allows("a"));
    }

    #[test]
    fn static_acl_replaces_wholesale() {
        let acl = StaticAcl::default();
        assert!(!acl.snapshot().allows("x"));
        acl.set(AclSnapshot::from_ids(["x"]));
        assert!(acl.snapshot().allows("x"));
        acl.set(AclSnapshot::default());
        assert!(!acl.snapshot().allows("x"));
    }
}
