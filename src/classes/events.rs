//! Class Events
//!
//! Events emitted by the class registry so application instances that may
//! depend on a changed class get reconciled again.

use super::model::{ClassKind, ClassScope};

/// Events emitted by the class registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassEvent {
    /// A class was created or updated (including becoming invalid)
    Applied {
        kind: ClassKind,
        scope: ClassScope,
        name: String,
    },

    /// A class was removed
    Deleted {
        kind: ClassKind,
        scope: ClassScope,
        name: String,
    },

    /// All classes of one kind and scope type were relisted
    Resynced { kind: ClassKind },
}

impl ClassEvent {
    /// Get the kind of class this event concerns
    pub fn kind(&self) -> ClassKind {
        match self {
            ClassEvent::Applied { kind, .. }
            | ClassEvent::Deleted { kind, .. }
            | ClassEvent::Resynced { kind } => *kind,
        }
    }

    /// Project whose application instances are affected, None meaning every project
    pub fn affected_project(&self) -> Option<&str> {
        match self {
            ClassEvent::Applied {
                scope: ClassScope::Project(project),
                ..
            }
            | ClassEvent::Deleted {
                scope: ClassScope::Project(project),
                ..
            } => Some(project),
            _ => None,
        }
    }

    /// Get the class name if this event concerns a single class
    pub fn class_name(&self) -> Option<&str> {
        match self {
            ClassEvent::Applied { name, .. } | ClassEvent::Deleted { name, .. } => Some(name),
            ClassEvent::Resynced { .. } => None,
        }
    }
}
