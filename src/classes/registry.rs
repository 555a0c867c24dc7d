//! Class Registry
//!
//! Holds every known resource class, fed by the class watchers, and hands
//! out immutable versioned snapshots. Resolvers only ever see a snapshot, so
//! one resolution pass reads a single consistent view even while classes
//! change underneath it.

use super::events::ClassEvent;
use super::model::{ClassKind, ClassScope, ResourceClass};
use crate::domain::ports::ClassSource;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

// =============================================================================
// Class Key
// =============================================================================

/// Identity of a class: unique per kind, scope and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey {
    pub kind: ClassKind,
    pub scope: ClassScope,
    pub name: String,
}

impl ClassKey {
    pub fn new(kind: ClassKind, scope: ClassScope, name: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            name: name.into(),
        }
    }
}

impl From<&ResourceClass> for ClassKey {
    fn from(class: &ResourceClass) -> Self {
        Self::new(class.kind(), class.scope.clone(), class.name.clone())
    }
}

impl std::fmt::Display for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} class {} ({})", self.kind, self.name, self.scope)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Result of looking a class up by name
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassLookup<'a> {
    /// Visible and usable
    Active(&'a ResourceClass),
    /// Exists in scope but marked inactive
    Inactive(&'a ResourceClass),
    /// Not defined at any visible scope
    Missing,
}

/// Immutable, versioned view of all valid classes
#[derive(Debug, Default)]
pub struct ClassSnapshot {
    version: u64,
    classes: BTreeMap<ClassKey, ResourceClass>,
}

impl ClassSnapshot {
    /// Build a snapshot from a set of classes; a later duplicate replaces an earlier one
    pub fn new(version: u64, classes: impl IntoIterator<Item = ResourceClass>) -> Self {
        let classes = classes
            .into_iter()
            .map(|class| (ClassKey::from(&class), class))
            .collect();
        Self { version, classes }
    }

    /// Registry version this snapshot was taken at
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Active classes visible from a project, ordered by name
    ///
    /// A project class shadows a cluster class of the same name entirely.
    pub fn visible(&self, project: &str, kind: ClassKind) -> IndexMap<&str, &ResourceClass> {
        let mut visible = IndexMap::new();
        let in_scope = self
            .classes
            .values()
            .filter(|c| c.kind() == kind && c.active && c.scope.is_visible_from(project));

        // BTreeMap order puts cluster classes before project classes
        for class in in_scope {
            visible.insert(class.name.as_str(), class);
        }
        visible.sort_keys();
        visible
    }

    /// The effective default class for a project
    ///
    /// A project default wins over a cluster default. Two defaults at the
    /// same effective scope is an error.
    pub fn default_for(&self, project: &str, kind: ClassKind) -> Result<Option<&ResourceClass>> {
        let visible = self.visible(project, kind);

        for project_scoped in [true, false] {
            let defaults: Vec<&ResourceClass> = visible
                .values()
                .copied()
                .filter(|c| c.is_default && c.scope.is_project() == project_scoped)
                .collect();

            match defaults.as_slice() {
                [] => continue,
                [class] => return Ok(Some(*class)),
                _ => {
                    return Err(Error::AmbiguousDefault {
                        kind,
                        scope: if project_scoped {
                            format!("project {project}")
                        } else {
                            "cluster".to_string()
                        },
                        classes: defaults.iter().map(|c| c.name.clone()).collect(),
                    })
                }
            }
        }
        Ok(None)
    }

    /// An active default of the same kind and scope as `class`, other than itself
    pub fn conflicting_default(&self, class: &ResourceClass) -> Option<&ResourceClass> {
        if !class.is_default || !class.active {
            return None;
        }
        self.classes.values().find(|other| {
            other.is_default
                && other.active
                && other.kind() == class.kind()
                && other.scope == class.scope
                && other.name != class.name
        })
    }

    /// Look a class up by name from a project
    pub fn lookup(&self, project: &str, kind: ClassKind, name: &str) -> ClassLookup<'_> {
        let project_class = self
            .classes
            .get(&ClassKey::new(kind, ClassScope::Project(project.to_string()), name));
        let cluster_class = self.classes.get(&ClassKey::new(kind, ClassScope::Cluster, name));

        match (project_class, cluster_class) {
            (Some(class), _) if class.active => ClassLookup::Active(class),
            (_, Some(class)) if class.active => ClassLookup::Active(class),
            (Some(class), _) | (None, Some(class)) => ClassLookup::Inactive(class),
            (None, None) => ClassLookup::Missing,
        }
    }

    /// Inactive classes in scope for a project, ordered by name
    pub fn inactive(&self, project: &str, kind: ClassKind) -> Vec<&ResourceClass> {
        let mut inactive: Vec<&ResourceClass> = self
            .classes
            .values()
            .filter(|c| c.kind() == kind && !c.active && c.scope.is_visible_from(project))
            .collect();
        inactive.sort_by(|a, b| a.name.cmp(&b.name));
        inactive
    }

    /// Number of classes per kind and scope label
    pub fn counts(&self) -> BTreeMap<(ClassKind, &'static str), usize> {
        let mut counts = BTreeMap::new();
        for key in self.classes.keys() {
            *counts.entry((key.kind, key.scope.label())).or_insert(0) += 1;
        }
        counts
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Valid classes applied
    pub applied: AtomicU64,
    /// Classes removed
    pub deleted: AtomicU64,
    /// Class objects rejected by validation
    pub rejected: AtomicU64,
}

/// Point-in-time copy of the registry counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub classes: usize,
    pub version: u64,
    pub applied: u64,
    pub deleted: u64,
    pub rejected: u64,
}

// =============================================================================
// Class Registry
// =============================================================================

const SYNCED_ALL: u8 = 0b1111;

fn sync_bit(kind: ClassKind, project_scoped: bool) -> u8 {
    match (kind, project_scoped) {
        (ClassKind::Volume, false) => 0b0001,
        (ClassKind::Volume, true) => 0b0010,
        (ClassKind::Compute, false) => 0b0100,
        (ClassKind::Compute, true) => 0b1000,
    }
}

/// Live class cache
pub struct ClassRegistry {
    classes: RwLock<BTreeMap<ClassKey, ResourceClass>>,
    /// Latest published snapshot
    current: RwLock<Arc<ClassSnapshot>>,
    version: AtomicU64,
    /// One bit per watched class type, set once its initial list arrived
    synced: AtomicU8,
    stats: RegistryStats,
    event_sender: broadcast::Sender<ClassEvent>,
}

impl ClassRegistry {
    /// Create an empty registry that reports unsynced until every watcher lists
    pub fn new() -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            classes: RwLock::new(BTreeMap::new()),
            current: RwLock::new(Arc::new(ClassSnapshot::default())),
            version: AtomicU64::new(0),
            synced: AtomicU8::new(0),
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    /// Create a synced registry holding the given classes
    pub fn with_classes(classes: impl IntoIterator<Item = ResourceClass>) -> Arc<Self> {
        let registry = Self::new();
        for class in classes {
            registry.apply(class);
        }
        registry.synced.store(SYNCED_ALL, Ordering::Release);
        registry
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ClassEvent> {
        self.event_sender.subscribe()
    }

    /// Latest snapshot, regardless of sync state
    pub fn current(&self) -> Arc<ClassSnapshot> {
        self.current.read().clone()
    }

    /// Insert or replace a valid class
    pub fn apply(&self, class: ResourceClass) {
        let key = ClassKey::from(&class);
        {
            let mut classes = self.classes.write();
            classes.insert(key.clone(), class);
            self.publish(&classes);
        }
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        debug!(class = %key, "Class applied");
        self.emit_applied(key);
    }

    /// Record a watched class object that may have failed validation
    ///
    /// An invalid class is dropped from the registry so it can never be
    /// resolved against.
    pub fn observe(&self, key: ClassKey, class: Result<ResourceClass>) {
        match class {
            Ok(class) => self.apply(class),
            Err(e) => {
                warn!(class = %key, error = %e, "Skipping invalid class");
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                {
                    let mut classes = self.classes.write();
                    if classes.remove(&key).is_some() {
                        self.publish(&classes);
                    }
                }
                self.emit_applied(key);
            }
        }
    }

    /// Remove a class
    pub fn delete(&self, key: &ClassKey) {
        let removed = {
            let mut classes = self.classes.write();
            let removed = classes.remove(key).is_some();
            if removed {
                self.publish(&classes);
            }
            removed
        };
        if removed {
            self.stats.deleted.fetch_add(1, Ordering::Relaxed);
            debug!(class = %key, "Class deleted");
        }
        let _ = self.event_sender.send(ClassEvent::Deleted {
            kind: key.kind,
            scope: key.scope.clone(),
            name: key.name.clone(),
        });
    }

    /// Replace every class of one kind and scope type with a fresh listing
    pub fn resync(
        &self,
        kind: ClassKind,
        project_scoped: bool,
        entries: Vec<(ClassKey, Result<ResourceClass>)>,
    ) {
        {
            let mut classes = self.classes.write();
            classes.retain(|key, _| !(key.kind == kind && key.scope.is_project() == project_scoped));
            for (key, class) in entries {
                match class {
                    Ok(class) => {
                        classes.insert(key, class);
                    }
                    Err(e) => {
                        warn!(class = %key, error = %e, "Skipping invalid class");
                        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            self.publish(&classes);
        }
        self.mark_synced(kind, project_scoped);
        let _ = self.event_sender.send(ClassEvent::Resynced { kind });
    }

    /// Mark one watched class type as having completed its initial list
    pub fn mark_synced(&self, kind: ClassKind, project_scoped: bool) {
        self.synced
            .fetch_or(sync_bit(kind, project_scoped), Ordering::AcqRel);
    }

    /// Whether every watched class type has listed at least once
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire) == SYNCED_ALL
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            classes: self.classes.read().len(),
            version: self.version.load(Ordering::Acquire),
            applied: self.stats.applied.load(Ordering::Relaxed),
            deleted: self.stats.deleted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    /// Publish a new snapshot; callers hold the classes write lock
    fn publish(&self, classes: &BTreeMap<ClassKey, ResourceClass>) {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = ClassSnapshot {
            version,
            classes: classes.clone(),
        };
        *self.current.write() = Arc::new(snapshot);
    }

    fn emit_applied(&self, key: ClassKey) {
        let _ = self.event_sender.send(ClassEvent::Applied {
            kind: key.kind,
            scope: key.scope,
            name: key.name,
        });
    }
}

impl ClassSource for ClassRegistry {
    fn snapshot(&self) -> Result<Arc<ClassSnapshot>> {
        if !self.is_synced() {
            return Err(Error::ClassStoreUnavailable(
                "class caches have not completed their initial sync".to_string(),
            ));
        }
        Ok(self.current())
    }
}
