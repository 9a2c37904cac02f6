//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods are synchronous. The lock table is owned by the
//! backend, and `create` must do its conflict check and the insert as one
//! atomic step.
//!
use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dyn_clone::{DynClone, clone_trait_object};
use uuid::Uuid;

use crate::davpath::DavPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone, PartialEq)]
pub struct DavLock {
    /// Token, `opaquelocktoken:<uuid>`.
    pub token: String,
    /// Path of the lock root.
    pub path: DavPath,
    /// Principal that created the lock.
    pub principal: Option<String>,
    /// Owner description (text and markup) as sent by the client.
    pub owner: Option<String>,
    pub scope: LockScope,
    /// Depth infinity.
    pub deep: bool,
    pub created: DateTime<Utc>,
    /// When the lock turns stale (relative). `None` is infinite.
    pub timeout: Option<Duration>,
    /// When the lock turns stale (absolute).
    pub timeout_at: Option<DateTime<Utc>>,
}

impl DavLock {
    /// A new lock with a fresh token.
    pub fn new(path: DavPath, scope: LockScope, deep: bool, owner: Option<String>) -> DavLock {
        DavLock {
            token: new_lock_token(),
            path,
            principal: None,
            owner,
            scope,
            deep,
            created: Utc::now(),
            timeout: None,
            timeout_at: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.timeout_at = timeout
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.is_some_and(|t| t <= now)
    }

    /// Does this lock apply to `path`.
    pub fn covers(&self, path: &DavPath) -> bool {
        *path == self.path || (self.deep && self.path.is_ancestor_of(path))
    }

    pub fn is_exclusive(&self) -> bool {
        self.scope == LockScope::Exclusive
    }
}

pub(crate) fn new_lock_token() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4())
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync + DynClone {
    /// Add a lock. Returns `Ok(lock)` if succeeded, or `Err(conflicting_lock)`.
    ///
    /// An exclusive lock conflicts with any lock covering its path (or,
    /// if deep, any lock below it). A shared lock only conflicts with
    /// exclusive ones.
    fn create(&self, lock: DavLock) -> Result<DavLock, DavLock>;

    /// Refresh a lock covering `path`. Returns the updated lock.
    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>)
    -> Result<DavLock, ()>;

    /// Remove a lock covering `path`. `Err(())` if there is no such lock.
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()>;

    /// All locks covering `path`, plus those below it if `include_children`.
    fn discover(&self, path: &DavPath, include_children: bool) -> Vec<DavLock>;

    /// Delete all locks at this path and below (after MOVE or DELETE).
    fn delete(&self, path: &DavPath) -> Result<(), ()>;
}

clone_trait_object! {DavLockSystem}
