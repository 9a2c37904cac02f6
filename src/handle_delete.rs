use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::conditional::conditional_request;
use crate::davheaders::Depth;
use crate::errors::{DavError, DavResult};
use crate::manager::DavManager;
use crate::multistatus::empty_response;
use crate::util::DavMethod;

impl DavManager {
    pub(crate) fn handle_delete(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;

        // RFC 4918 9.6.1: DELETE on a collection acts as Depth: infinity.
        let depth = self.depth(req.headers(), Depth::Infinity)?;
        if node.is_collection() && depth != Depth::Infinity {
            return Err(DavError::BadRequest("DELETE of a collection needs Depth: infinity".into()));
        }
        if path.is_root() {
            return Err(DavError::Forbidden);
        }

        conditional_request(self, req.headers(), DavMethod::Delete, Some(&node), &path, None)?;
        let parent = self.resolve_path(&path.parent(), true)?;
        self.acl(&parent, &["unbind"])?;

        self.store().delete(&node, true)?;
        if let Some(ls) = self.locksystem() {
            let _ = ls.delete(&path);
        }
        debug!("DELETE {}", path);
        empty_response(StatusCode::NO_CONTENT)
    }
}
