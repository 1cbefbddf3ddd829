//! Opaque actor handles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Weak;

use crate::runtime::mailbox::Mailbox;

/// An opaque address identifying an actor.
///
/// Everything dispatched to a `Pid` is processed one task at a time, in
/// dispatch order. Handles are cheap to clone and compare by identity;
/// a handle holds only a weak reference to the actor, so it can outlive
/// the actor without keeping it alive. Dispatching to a gone actor
/// silently drops the task.
pub struct Pid {
    id: u64,
    mailbox: Weak<Mailbox>,
}

impl Pid {
    pub(crate) fn new(id: u64, mailbox: Weak<Mailbox>) -> Self {
        Self { id, mailbox }
    }

    /// Returns the numeric actor identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn mailbox(&self) -> Option<std::sync::Arc<Mailbox>> {
        self.mailbox.upgrade()
    }
}

impl Clone for Pid {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            mailbox: Weak::clone(&self.mailbox),
        }
    }
}

impl PartialEq for Pid {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pid {}

impl Hash for Pid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.id)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    #[test]
    fn identity_survives_cloning() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pid = runtime.spawn();
        let other = runtime.spawn();

        assert_eq!(pid, pid.clone());
        assert_ne!(pid, other);
        assert_eq!(pid.clone().id(), pid.id());
    }

    #[test]
    fn display_shows_numeric_identity() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pid = runtime.spawn();
        assert_eq!(format!("{pid}"), format!("pid({})", pid.id()));
    }
}
