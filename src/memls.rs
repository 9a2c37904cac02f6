//! Simple in-memory locksystem.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemLs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemLs struct is just a handle, cloning is cheap.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::ls::*;

type Table = BTreeMap<DavPath, Vec<DavLock>>;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<Table>>);

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Box<MemLs> {
        Box::new(MemLs(Arc::new(Mutex::new(BTreeMap::new()))))
    }
}

// locks time out lazily, whenever we look at the table.
fn expire(table: &mut Table) {
    let now = Utc::now();
    table.retain(|_, locks| {
        locks.retain(|l| !l.is_expired(now));
        !locks.is_empty()
    });
}

impl DavLockSystem for MemLs {
    fn create(&self, lock: DavLock) -> Result<DavLock, DavLock> {
        let table = &mut *self.0.lock();
        expire(table);

        let shared_ok = !lock.is_exclusive();

        // any locks in the path?
        let rc = check_locks_to_path(table, &lock.path, shared_ok);
        trace!("lock: check_locks_to_path: {:?}", rc);
        rc?;

        // if it's a deep lock we need to check if there are locks further along the path.
        if lock.deep {
            let rc = check_locks_from_path(table, &lock.path, shared_ok);
            trace!("lock: check_locks_from_path: {:?}", rc);
            rc?;
        }

        trace!("lock {} created", &lock.token);
        table.entry(lock.path.clone()).or_default().push(lock.clone());
        Ok(lock)
    }

    fn refresh(
        &self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, ()> {
        trace!("refresh lock {}", token);
        let table = &mut *self.0.lock();
        expire(table);
        for (_, locks) in table.iter_mut() {
            if let Some(lock) = locks
                .iter_mut()
                .find(|l| l.token == token && l.covers(path))
            {
                lock.set_timeout(timeout);
                return Ok(lock.clone());
            }
        }
        trace!("lock not found");
        Err(())
    }

    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()> {
        let table = &mut *self.0.lock();
        expire(table);
        let root = table
            .iter()
            .find(|(_, locks)| locks.iter().any(|l| l.token == token && l.covers(path)))
            .map(|(p, _)| p.clone());
        let Some(root) = root else {
            trace!("unlock: {} not found at {}", token, path);
            return Err(());
        };
        if let Some(locks) = table.get_mut(&root) {
            locks.retain(|l| l.token != token);
            if locks.is_empty() {
                table.remove(&root);
            }
        }
        Ok(())
    }

    fn discover(&self, path: &DavPath, include_children: bool) -> Vec<DavLock> {
        let table = &mut *self.0.lock();
        expire(table);
        let mut locks = list_locks(table, path);
        if include_children {
            locks.extend(
                table
                    .iter()
                    .filter(|(p, _)| *p != path && path.is_ancestor_of(p))
                    .flat_map(|(_, l)| l.iter().cloned()),
            );
        }
        locks
    }

    fn delete(&self, path: &DavPath) -> Result<(), ()> {
        let table = &mut *self.0.lock();
        table.retain(|p, _| !path.is_ancestor_of(p));
        Ok(())
    }
}

// check if there are any locks along the path.
fn check_locks_to_path(table: &Table, path: &DavPath, shared_ok: bool) -> Result<(), DavLock> {
    for lock in list_locks(table, path) {
        if !lock.is_exclusive() && shared_ok {
            continue;
        }
        return Err(lock);
    }
    Ok(())
}

// See if there are locks in any path below this collection.
fn check_locks_from_path(table: &Table, path: &DavPath, shared_ok: bool) -> Result<(), DavLock> {
    for (p, locks) in table.iter() {
        if p == path || !path.is_ancestor_of(p) {
            continue;
        }
        for lock in locks {
            if !lock.is_exclusive() && shared_ok {
                continue;
            }
            return Err(lock.clone());
        }
    }
    Ok(())
}

// Find all locks that cover a path: the ones on the path itself
// and the deep ones on its ancestors.
fn list_locks(table: &Table, path: &DavPath) -> Vec<DavLock> {
    let mut locks = Vec::new();
    let mut p = DavPath::root();
    let segs = path.segments();
    for i in 0..=segs.len() {
        if let Some(l) = table.get(&p) {
            locks.extend(l.iter().filter(|l| i == segs.len() || l.deep).cloned());
        }
        if i < segs.len() {
            p.push_segment(&segs[i]);
        }
    }
    locks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[test]
    fn exclusive_conflicts() {
        let ls = MemLs::new();
        let l1 = DavLock::new(path("/a/b"), LockScope::Exclusive, false, None);
        let l1 = ls.create(l1).unwrap();

        let l2 = DavLock::new(path("/a/b"), LockScope::Shared, false, None);
        assert_eq!(ls.create(l2).unwrap_err().token, l1.token);

        // deep lock on the parent sees the lock below it.
        let l3 = DavLock::new(path("/a"), LockScope::Exclusive, true, None);
        assert!(ls.create(l3).is_err());

        // but a shallow one does not.
        let l4 = DavLock::new(path("/a"), LockScope::Exclusive, false, None);
        assert!(ls.create(l4).is_ok());
    }

    #[test]
    fn shared_coexist() {
        let ls = MemLs::new();
        let s1 = DavLock::new(path("/x"), LockScope::Shared, true, None);
        let s2 = DavLock::new(path("/x"), LockScope::Shared, true, None);
        ls.create(s1).unwrap();
        ls.create(s2).unwrap();
        assert_eq!(ls.discover(&path("/x/y"), false).len(), 2);
        let ex = DavLock::new(path("/x/y"), LockScope::Exclusive, false, None);
        assert!(ls.create(ex).is_err());
    }

    #[test]
    fn unlock_and_refresh() {
        let ls = MemLs::new();
        let l = DavLock::new(path("/d"), LockScope::Exclusive, true, None);
        let l = ls.create(l).unwrap();
        let r = ls
            .refresh(&path("/d/e"), &l.token, Some(Duration::from_secs(30)))
            .unwrap();
        assert_eq!(r.token, l.token);
        assert_eq!(r.timeout, Some(Duration::from_secs(30)));
        assert!(ls.unlock(&path("/other"), &l.token).is_err());
        assert!(ls.unlock(&path("/d"), &l.token).is_ok());
        assert!(ls.discover(&path("/d"), true).is_empty());
    }
}
