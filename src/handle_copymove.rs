use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::conditional::conditional_request;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::manager::DavManager;
use crate::multistatus::empty_response;
use crate::util::DavMethod;

impl DavManager {
    pub(crate) fn handle_copymove(
        &self,
        req: &Request<Bytes>,
        method: DavMethod,
    ) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;

        // get and check headers.
        let overwrite = req
            .headers()
            .typed_try_get::<davheaders::Overwrite>()
            .map_err(|_| DavError::BadRequest("invalid Overwrite header".into()))?
            .is_none_or(|o| o.0);
        let depth = match method {
            DavMethod::Copy if node.is_collection() => {
                self.depth_one_of(req.headers(), Depth::Infinity, &[Depth::ZERO, Depth::Infinity])?
            }
            DavMethod::Copy => Depth::Infinity,
            _ => self.depth_one_of(req.headers(), Depth::Infinity, &[Depth::Infinity])?,
        };
        let dest = match req.headers().typed_try_get::<davheaders::Destination>() {
            Ok(Some(d)) => DavPath::from_str_and_prefix(&d.0, &self.prefix)?,
            _ => return Err(DavError::BadRequest("missing or invalid Destination".into())),
        };
        debug!("{} {} -> {} depth {}", method.as_str(), path, dest, depth);

        // source must not be the destination, or an ancestor of it.
        if path.is_ancestor_of(&dest) {
            return Err(DavError::Forbidden);
        }
        if method == DavMethod::Move && path.is_root() {
            return Err(DavError::Forbidden);
        }

        // the destination's parent must exist.
        let (found, rest) = self.store().lookup(&dest)?;
        let (dparent, existing) = match rest.len() {
            0 => {
                if !overwrite {
                    debug!("{}: {} exists, Overwrite: F", method.as_str(), dest);
                    return Err(DavError::PreconditionFailed("Overwrite"));
                }
                (self.resolve_path(&dest.parent(), true)?, Some(found))
            }
            1 => (found, None),
            _ => return Err(DavError::Conflict),
        };
        let name = dest
            .file_name()
            .ok_or_else(|| DavError::BadRequest("invalid Destination".into()))?
            .to_string();

        conditional_request(self, req.headers(), method, Some(&node), &path, Some(&dest))?;

        self.acl(&node, &["read"])?;
        self.acl(&dparent, &["bind"])?;
        if existing.is_some() {
            self.acl(&dparent, &["unbind"])?;
        }
        if method == DavMethod::Move {
            let sparent = self.resolve_path(&path.parent(), true)?;
            self.acl(&sparent, &["unbind"])?;
        }

        if let Some(ref old) = existing {
            self.store().delete(old, true)?;
            if let Some(ls) = self.locksystem() {
                let _ = ls.delete(&dest);
            }
        }
        self.store()
            .clone_node(&node, &dparent, &name, depth == Depth::Infinity)?;

        if method == DavMethod::Move {
            self.store().delete(&node, true)?;
            if let Some(ls) = self.locksystem() {
                let _ = ls.delete(&path);
            }
        }

        match existing {
            Some(_) => empty_response(StatusCode::NO_CONTENT),
            None => empty_response(StatusCode::CREATED),
        }
    }
}
