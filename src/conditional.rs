//! Conditional requests.
//!
//! Handles the HTTP precondition headers (RFC 7232: If-Match, If-None-Match,
//! If-Unmodified-Since) and the WebDAV `If` header (RFC 4918, 10.4),
//! including the check that every lock on the affected paths was
//! submitted.
use std::time::SystemTime;

use headers::HeaderMapExt;
use http::HeaderMap;

use crate::davheaders::{self, ETag, ETagList, IfTerm};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::ls::DavLock;
use crate::manager::DavManager;
use crate::util::DavMethod;

fn node_etag(node: Option<&DavNodeRef>) -> Option<ETag> {
    node.and_then(|n| n.etag()).and_then(|t| ETag::from_node_tag(&t))
}

// `*` matches any existing resource, even one without an etag.
fn etaglist_match(list: &ETagList, node: Option<&DavNodeRef>) -> bool {
    match list {
        ETagList::Star => node.is_some(),
        ETagList::Tags(_) => list.matches(node_etag(node).as_ref()),
    }
}

// The HTTP precondition headers. If-Match only applies to nodes with an etag.
fn http_if_match(headers: &HeaderMap, node: Option<&DavNodeRef>) -> DavResult<()> {
    let has_etag = node.is_some_and(|n| n.etag().is_some());
    if let Some(r) = headers.typed_get::<davheaders::IfMatch>().filter(|_| has_etag) {
        if !etaglist_match(&r.0, node) {
            debug!("precondition fail: If-Match {:?}", r);
            return Err(DavError::PreconditionFailed("If-Match"));
        }
    }
    if let Some(r) = headers.typed_get::<davheaders::IfNoneMatch>() {
        if etaglist_match(&r.0, node) {
            debug!("precondition fail: If-None-Match {:?}", r);
            return Err(DavError::PreconditionFailed("If-None-Match"));
        }
    }
    if let Some(r) = headers.typed_get::<headers::IfUnmodifiedSince>() {
        if let Some(modified) = node.and_then(|n| n.modified()) {
            if !r.precondition_passes(SystemTime::from(modified)) {
                debug!("precondition fail: If-Unmodified-Since {:?}", r);
                return Err(DavError::PreconditionFailed("If-Unmodified-Since"));
            }
        }
    }
    Ok(())
}

// Locks that the request must hold a token for.
fn affected_locks(
    mgr: &DavManager,
    method: DavMethod,
    path: &DavPath,
    dest: Option<&DavPath>,
) -> Vec<DavLock> {
    let Some(ls) = mgr.locksystem() else {
        return Vec::new();
    };
    let mut locks = match method {
        DavMethod::Delete | DavMethod::Move => ls.discover(path, true),
        DavMethod::MkCol
        | DavMethod::Put
        | DavMethod::Patch
        | DavMethod::PropPatch
        | DavMethod::Acl => ls.discover(path, false),
        // LOCK conflicts are found by the lock table itself.
        _ => Vec::new(),
    };
    if let (DavMethod::Copy | DavMethod::Move, Some(dest)) = (method, dest) {
        locks.extend(ls.discover(dest, true));
    }
    let mut seen = Vec::new();
    locks.retain(|l| {
        if seen.contains(&l.token) {
            false
        } else {
            seen.push(l.token.clone());
            true
        }
    });
    locks
}

/// Run all precondition checks for a request on `path`.
///
/// `node` is the resource at `path`, if it exists. `dest` is the
/// destination of a COPY or MOVE.
pub(crate) fn conditional_request(
    mgr: &DavManager,
    headers: &HeaderMap,
    method: DavMethod,
    node: Option<&DavNodeRef>,
    path: &DavPath,
    dest: Option<&DavPath>,
) -> DavResult<()> {
    http_if_match(headers, node)?;

    let mut outstanding = affected_locks(mgr, method, path, dest);

    let if_hdr = match headers.typed_try_get::<davheaders::If>() {
        Ok(h) => h,
        Err(_) => return Err(DavError::BadRequest("invalid If header".into())),
    };
    let Some(if_hdr) = if_hdr else {
        return match outstanding.into_iter().next() {
            Some(lock) => {
                debug!("locked: no token for {}", lock.token);
                Err(DavError::Locked(Some(lock)))
            }
            None => Ok(()),
        };
    };

    // First pass: which tokens are valid. A submitted token releases the
    // lock it belongs to.
    let mut matched: Vec<DavLock> = Vec::new();
    for list in &if_hdr.0 {
        let list_path = resource_path(mgr, list.resource_tag.as_deref(), path);
        for term in &list.terms {
            let Some(ref token) = term.token else {
                continue;
            };
            if let Some(idx) = outstanding.iter().position(|l| l.token == *token) {
                matched.push(outstanding.remove(idx));
            } else if let (Some(ls), Some(p)) = (mgr.locksystem(), list_path.as_ref()) {
                if let Some(l) = ls.discover(p, false).into_iter().find(|l| l.token == *token) {
                    matched.push(l);
                }
            }
        }
    }
    // One token is enough for a set of shared locks on the same root.
    outstanding.retain(|l| {
        l.is_exclusive() || !matched.iter().any(|m| !m.is_exclusive() && m.path == l.path)
    });
    if let Some(lock) = outstanding.into_iter().next() {
        debug!("locked: no token for {}", lock.token);
        return Err(DavError::Locked(Some(lock)));
    }

    // Second pass: every group needs one term that holds.
    for list in &if_hdr.0 {
        let list_path = resource_path(mgr, list.resource_tag.as_deref(), path);
        let ok = list
            .terms
            .iter()
            .any(|t| term_holds(mgr, t, list_path.as_ref(), &matched));
        if !ok {
            debug!("precondition fail: If {:?}", list);
            return Err(DavError::PreconditionFailed("If"));
        }
    }
    Ok(())
}

// The path a group is about. `None` if the tag points somewhere we don't serve.
fn resource_path(mgr: &DavManager, tag: Option<&str>, path: &DavPath) -> Option<DavPath> {
    match tag {
        Some(uri) => mgr.uri_to_path(uri),
        None => Some(path.clone()),
    }
}

fn term_holds(
    mgr: &DavManager,
    term: &IfTerm,
    path: Option<&DavPath>,
    matched: &[DavLock],
) -> bool {
    let valid = match (&term.token, path) {
        (_, None) => false,
        // tokens in the DAV: namespace never match (10.4.8).
        (Some(t), _) if t.starts_with("DAV:") => false,
        (Some(t), Some(p)) => {
            let token_ok = matched.iter().any(|l| l.token == *t && l.covers(p));
            token_ok && term.etag.as_ref().is_none_or(|e| etag_holds(mgr, e, p))
        }
        (None, Some(p)) => term.etag.as_ref().is_some_and(|e| etag_holds(mgr, e, p)),
    };
    valid != term.negated
}

fn etag_holds(mgr: &DavManager, etag: &ETag, path: &DavPath) -> bool {
    match mgr.store().node(path) {
        Ok(n) => n.etag().is_some_and(|t| t == etag.as_str()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::fs::DavNode;
    use crate::ls::{DavLock, DavLockSystem, LockScope};
    use crate::manager::tests::test_manager;
    use crate::memls::MemLs;
    use http::HeaderValue;

    #[derive(Debug)]
    struct Untagged;

    impl DavNode for Untagged {
        fn path(&self) -> DavPath {
            path("/x")
        }
    }

    fn path(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    fn locked_manager() -> (DavManager, DavLock) {
        let mut mgr = test_manager(None);
        let ls = MemLs::new();
        let lock = ls
            .create(DavLock::new(path("/docs/a.txt"), LockScope::Exclusive, false, None))
            .unwrap();
        mgr.ls = Some(ls);
        (mgr, lock)
    }

    fn check(mgr: &DavManager, h: &HeaderMap, method: DavMethod, p: &str) -> DavResult<()> {
        let p = path(p);
        let node = mgr.store().node(&p).ok();
        conditional_request(mgr, h, method, node.as_ref(), &p, None)
    }

    #[test]
    fn lock_needs_token() {
        let (mgr, lock) = locked_manager();
        let r = check(&mgr, &HeaderMap::new(), DavMethod::PropPatch, "/docs/a.txt");
        assert!(matches!(r, Err(DavError::Locked(Some(ref l))) if l.token == lock.token));

        let h = headers("if", &format!("(<{}>)", lock.token));
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());

        // DELETE of the parent discovers the lock below it.
        let r = check(&mgr, &HeaderMap::new(), DavMethod::Delete, "/docs/");
        assert!(matches!(r, Err(DavError::Locked(_))));
    }

    #[test]
    fn xor_negation() {
        let (mgr, lock) = locked_manager();
        let bogus = "opaquelocktoken:00000000-0000-0000-0000-000000000000";

        // a single valid term.
        let h = headers("if", &format!("(<{}>)", lock.token));
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());

        // a single negated valid term.
        let h = headers("if", &format!("(<{}>) (Not <{}>)", lock.token, lock.token));
        assert!(matches!(
            check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If"))
        ));
        let h = headers("if", &format!("(<{}>) (Not <DAV:no-lock>)", lock.token));
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());

        // an invalid term, but the lock itself was submitted elsewhere.
        let h = headers("if", &format!("(<{}>) (<{}>)", lock.token, bogus));
        assert!(matches!(
            check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If"))
        ));
        // one negated and one plain term in the same group: either will do.
        let h = headers("if", &format!("(<{}> Not <{}>)", bogus, bogus));
        let mgr2 = test_manager(None);
        assert!(check(&mgr2, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());
        let h = headers("if", &format!("(<{}>)", bogus));
        assert!(matches!(
            check(&mgr2, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If"))
        ));
        let h = headers("if", &format!("(Not <{}>)", bogus));
        assert!(check(&mgr2, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());
    }

    #[test]
    fn http_preconditions() {
        let mgr = test_manager(None);
        let node = mgr.store().node(&path("/docs/a.txt")).unwrap();
        let etag = node.etag().unwrap();

        let h = headers("if-match", &etag);
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());
        let h = headers("if-match", "\"nope\"");
        assert!(matches!(
            check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If-Match"))
        ));
        let h = headers("if-none-match", "*");
        assert!(matches!(
            check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If-None-Match"))
        ));
        assert!(check(&mgr, &h, DavMethod::MkCol, "/docs/new/").is_ok());
        // nothing to compare against without an etag.
        for tag in ["\"nope\"", "*"] {
            let h = headers("if-match", tag);
            assert!(check(&mgr, &h, DavMethod::MkCol, "/docs/new/").is_ok());
            let untagged: DavNodeRef = Arc::new(Untagged);
            let p = path("/x");
            let r = conditional_request(&mgr, &h, DavMethod::PropPatch, Some(&untagged), &p, None);
            assert!(r.is_ok());
        }
        let h = headers("if-unmodified-since", "Sat, 01 Jan 2000 00:00:00 GMT");
        assert!(matches!(
            check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt"),
            Err(DavError::PreconditionFailed("If-Unmodified-Since"))
        ));
    }

    #[test]
    fn etag_in_if_header() {
        let mgr = test_manager(None);
        let etag = mgr.store().node(&path("/docs/a.txt")).unwrap().etag().unwrap();
        let h = headers("if", &format!("([{}])", etag));
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_ok());
        let h = headers("if", "([\"other\"])");
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/a.txt").is_err());
        let h = headers("if", &format!("</docs/a.txt> ([{}])", etag));
        assert!(check(&mgr, &h, DavMethod::PropPatch, "/docs/").is_ok());
    }
}
