use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::conditional::conditional_request;
use crate::davheaders::{self, Depth};
use crate::davprops::{PropMap, PropName};
use crate::davrequest::LockInfo;
use crate::davvalue::PropValue;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::ls::{DavLock, DavLockSystem};
use crate::manager::DavManager;
use crate::multistatus::empty_response;
use crate::util::DavMethod;
use crate::xmltree_ext::{ElementExt, dav_root};

impl DavManager {
    // must have a locksystem or bail
    fn lock_system(&self, node: Option<&DavNodeRef>) -> DavResult<&dyn DavLockSystem> {
        self.locksystem()
            .ok_or_else(|| DavError::MethodNotAllowed(self.allow_strings(node)))
    }

    pub(crate) fn handle_lock(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.store().node(&path).ok();
        let ls = self.lock_system(node.as_ref())?;
        let timeout = self.timeout(req.headers())?;

        // lock refresh?
        let Some(info) = LockInfo::parse(req.body())? else {
            let (token, from_if) = refresh_token(req)?;
            let lock = match ls.refresh(&path, &token, timeout) {
                Ok(lock) => lock,
                Err(_) if from_if => {
                    debug!("LOCK refresh: {} does not cover {}", token, path);
                    return Err(DavError::PreconditionFailed("If"));
                }
                Err(_) => return Err(DavError::LockTokenMismatch),
            };
            debug!("LOCK {} refreshed", lock.token);
            return self.lock_response(StatusCode::OK, lock);
        };

        // handle Depth:
        let depth = self.depth_one_of(req.headers(), Depth::Infinity, &[Depth::ZERO, Depth::Infinity])?;

        // a new lock on an unmapped URL needs a parent to create it in.
        let parent = match node {
            Some(ref n) => {
                self.acl(n, &["write-content"])?;
                None
            }
            None => {
                let (parent, rest) = self.store().lookup(&path)?;
                if rest.len() != 1 {
                    return Err(DavError::Conflict);
                }
                self.acl(&parent, &["bind"])?;
                Some(parent)
            }
        };
        conditional_request(self, req.headers(), DavMethod::Lock, node.as_ref(), &path, None)?;

        let mut lock = DavLock::new(path.clone(), info.scope, depth == Depth::Infinity, info.owner);
        lock.token = info.token;
        lock.principal = self.principal().map(|p| p.path().as_url_string(true));
        lock.set_timeout(timeout);
        let lock = match ls.create(lock) {
            Ok(lock) => lock,
            Err(conflict) => {
                debug!("LOCK {}: conflicts with {}", path, conflict.token);
                return Err(DavError::ConflictingLock(conflict));
            }
        };

        // lock-null: create an empty resource.
        if let Some(parent) = parent {
            let name = path.file_name().unwrap_or_default();
            let created = match parent.as_creator() {
                Some(c) => c.dav_create(name, &[], &PropMap::new()).map_err(DavError::from),
                None => Err(DavError::Conflict),
            };
            if let Err(e) = created {
                let _ = ls.unlock(&path, &lock.token);
                return Err(e);
            }
            debug!("LOCK {} created {}", lock.token, path);
            return self.lock_response(StatusCode::CREATED, lock);
        }
        debug!("LOCK {} on {}", lock.token, path);
        self.lock_response(StatusCode::OK, lock)
    }

    fn lock_response(&self, status: StatusCode, lock: DavLock) -> DavResult<Response<Bytes>> {
        let token = lock.token.clone();
        let prop = dav_root("D:prop").child(
            PropValue::LockDiscovery {
                locks: vec![lock],
                show_token: true,
            }
            .render(&PropName::dav("lockdiscovery"), self),
        );
        let body = Bytes::from(prop.to_xml(true)?);
        Response::builder()
            .status(status)
            .header("Lock-Token", format!("<{}>", token))
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Content-Length", body.len().to_string())
            .body(body)
            .map_err(|_| DavError::XmlWriteError)
    }

    pub(crate) fn handle_unlock(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.store().node(&path).ok();
        let ls = self.lock_system(node.as_ref())?;

        // Must have Lock-Token header
        let t = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or_else(|| DavError::BadRequest("UNLOCK without Lock-Token".into()))?;
        let token = t.token();

        let Some(lock) = ls.discover(&path, false).into_iter().find(|l| l.token == token) else {
            debug!("UNLOCK {}: {} does not cover it", path, token);
            return Err(DavError::LockTokenMismatch);
        };

        // the lock creator may always unlock.
        let own = match (&lock.principal, self.principal()) {
            (Some(owner), Some(p)) => *owner == p.path().as_url_string(true),
            _ => false,
        };
        if !own {
            if let Some(ref n) = node {
                self.acl(n, &["unlock"])?;
            }
        }

        match ls.unlock(&path, token) {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(()) => Err(DavError::LockTokenMismatch),
        }
    }
}

// The token of a refresh: the Lock-Token header, or else the one token
// in the If header. The flag tells which one it was.
fn refresh_token(req: &Request<Bytes>) -> DavResult<(String, bool)> {
    if let Some(t) = req.headers().typed_get::<davheaders::LockToken>() {
        return Ok((t.token().to_string(), false));
    }
    let if_hdr = req
        .headers()
        .typed_try_get::<davheaders::If>()
        .map_err(|_| DavError::BadRequest("invalid If header".into()))?;
    let tokens: Vec<String> = if_hdr
        .iter()
        .flat_map(|h| h.0.iter())
        .flat_map(|l| l.terms.iter())
        .filter(|t| !t.negated)
        .filter_map(|t| t.token.clone())
        .collect();
    match tokens.as_slice() {
        [t] => Ok((t.clone(), true)),
        _ => Err(DavError::BadRequest("LOCK refresh needs one lock token".into())),
    }
}
