//! Refcounted transient artifacts.
//!
//! Every file a request creates on disk (downloaded media, intermediate WAV,
//! generated subtitles, muxed output) is registered with a [`ResourceManager`].
//! The file is removed when its refcount reaches zero, never before. Consumers
//! hold a [`ResourceLease`] and the lease releases its reference when dropped,
//! so an HTTP body that owns a lease keeps the file alive until the transport
//! has finished with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    RawMedia,
    NormalizedAudio,
    SubtitleTrack,
    MuxedOutput,
}

impl ResourceKind {
    fn prefix(self) -> &'static str {
        match self {
            ResourceKind::RawMedia => "raw",
            ResourceKind::NormalizedAudio => "audio",
            ResourceKind::SubtitleTrack => "subtitles",
            ResourceKind::MuxedOutput => "output",
        }
    }
}

pub type ResourceId = u64;

/// Handle to a registered artifact. Cheap to clone; cloning does not retain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    id: ResourceId,
    kind: ResourceKind,
    path: PathBuf,
}

impl ManagedResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Release of a handle that is unknown or already at refcount zero.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("release of {kind:?} resource {id} with no outstanding references")]
pub struct LifecycleViolation {
    pub id: ResourceId,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain.
    Retained { remaining: usize },
    /// Last reference dropped; the artifact is gone.
    Deleted,
    /// Nothing was released. Counted in [`ResourceManager::violations`].
    Violation(LifecycleViolation),
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    refcount: usize,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    next_id: AtomicU64,
    entries: Mutex<HashMap<ResourceId, Entry>>,
    violations: AtomicU64,
}

/// Process-local registry of transient artifacts under one work directory.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl ResourceManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
                violations: AtomicU64::new(0),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Register a new artifact with refcount 1.
    ///
    /// Only the path is reserved; the producing stage creates the file.
    pub fn allocate(&self, kind: ResourceKind, extension: &str) -> ManagedResource {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{}-{}-{}.{}", kind.prefix(), std::process::id(), id, extension);
        let path = self.inner.root.join(file_name);
        self.entries().insert(
            id,
            Entry {
                path: path.clone(),
                refcount: 1,
            },
        );
        tracing::debug!(id, ?kind, path = %path.display(), "resource allocated");
        ManagedResource { id, kind, path }
    }

    /// Add a reference. Returns the new refcount, or the violation if the
    /// resource was already released.
    pub fn retain(&self, resource: &ManagedResource) -> std::result::Result<usize, LifecycleViolation> {
        let refcount = self.entries().get_mut(&resource.id).map(|entry| {
            entry.refcount += 1;
            entry.refcount
        });
        refcount.ok_or_else(|| self.violation(resource))
    }

    /// Drop a reference, deleting the artifact when none remain.
    pub fn release(&self, resource: &ManagedResource) -> ReleaseOutcome {
        let removed = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&resource.id) else {
                return ReleaseOutcome::Violation(self.violation(resource));
            };
            if entry.refcount > 1 {
                entry.refcount -= 1;
                return ReleaseOutcome::Retained {
                    remaining: entry.refcount,
                };
            }
            entries.remove(&resource.id)
        };

        if let Some(entry) = removed {
            remove_artifact(&entry.path);
        }
        tracing::debug!(id = resource.id, kind = ?resource.kind, "resource deleted");
        ReleaseOutcome::Deleted
    }

    /// Wrap an existing reference in a lease that releases it on drop.
    pub fn lease(&self, resource: ManagedResource) -> ResourceLease {
        ResourceLease {
            manager: self.clone(),
            resource: Some(resource),
        }
    }

    pub fn refcount(&self, id: ResourceId) -> usize {
        self.entries().get(&id).map_or(0, |e| e.refcount)
    }

    /// Number of artifacts with outstanding references.
    pub fn live_count(&self) -> usize {
        self.entries().len()
    }

    /// Total lifecycle violations observed since creation.
    pub fn violations(&self) -> u64 {
        self.inner.violations.load(Ordering::Relaxed)
    }

    fn violation(&self, resource: &ManagedResource) -> LifecycleViolation {
        self.inner.violations.fetch_add(1, Ordering::Relaxed);
        let violation = LifecycleViolation {
            id: resource.id,
            kind: resource.kind,
        };
        tracing::error!(id = resource.id, kind = ?resource.kind, "{violation}");
        violation
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ResourceId, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}

/// One reference to a managed artifact, released exactly once.
#[derive(Debug)]
pub struct ResourceLease {
    manager: ResourceManager,
    resource: Option<ManagedResource>,
}

impl ResourceLease {
    pub fn resource(&self) -> Option<&ManagedResource> {
        self.resource.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.resource.as_ref().map(ManagedResource::path)
    }

    /// Release now instead of at drop.
    pub fn release(mut self) -> Option<ReleaseOutcome> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Option<ReleaseOutcome> {
        self.resource
            .take()
            .map(|resource| self.manager.release(&resource))
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// The leases of one pipeline invocation.
///
/// Dropping the scope releases everything it still holds, which is the failure
/// and cancellation path of a run.
#[derive(Debug)]
pub struct ResourceScope {
    manager: ResourceManager,
    leases: Vec<ResourceLease>,
}

impl ResourceScope {
    pub fn new(manager: ResourceManager) -> Self {
        Self {
            manager,
            leases: Vec::new(),
        }
    }

    /// Allocate an artifact owned by this scope.
    pub fn allocate(&mut self, kind: ResourceKind, extension: &str) -> ManagedResource {
        let resource = self.manager.allocate(kind, extension);
        self.leases.push(self.manager.lease(resource.clone()));
        resource
    }

    /// Release the scope's reference to `resource` early.
    pub fn release(&mut self, resource: &ManagedResource) -> Option<ReleaseOutcome> {
        let index = self
            .leases
            .iter()
            .position(|lease| lease.resource().is_some_and(|r| r.id == resource.id))?;
        self.leases.swap_remove(index).release()
    }

    /// Move the scope's reference to `resource` out as a standalone lease.
    pub fn take(&mut self, resource: &ManagedResource) -> Option<ResourceLease> {
        let index = self
            .leases
            .iter()
            .position(|lease| lease.resource().is_some_and(|r| r.id == resource.id))?;
        Some(self.leases.swap_remove(index))
    }

    /// Hand every remaining lease to the caller.
    pub fn into_leases(mut self) -> Vec<ResourceLease> {
        std::mem::take(&mut self.leases)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
