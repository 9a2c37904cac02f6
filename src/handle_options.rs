use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::DavResult;
use crate::errors::DavError;
use crate::manager::DavManager;

impl DavManager {
    pub(crate) fn handle_options(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        // an unmapped URL still gets an answer: what can be done there.
        let node = self.store().node(&path).ok();

        let dav = self.dav_features(node.as_ref()).join(", ");
        let allow = self.allow_strings(node.as_ref()).join(", ");
        trace!("OPTIONS {}: DAV: {} Allow: {}", path, dav, allow);

        Response::builder()
            .status(StatusCode::OK)
            .header("DAV", dav)
            .header("Allow", allow)
            .header("MS-Author-Via", "DAV")
            .header("Content-Length", "0")
            .body(Bytes::new())
            .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

#[cfg(test)]
mod tests {
    use crate::davhandler::DavConfig;
    use crate::manager::tests::test_fs;
    use crate::memls::MemLs;
    use bytes::Bytes;
    use http::Request;

    fn options(uri: &str, with_locks: bool) -> (String, String) {
        let mut config = DavConfig::new().store(test_fs());
        if with_locks {
            config = config.locksystem(MemLs::new());
        }
        let h = config.build_handler();
        let req = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Bytes::new())
            .unwrap();
        let resp = h.handle(req);
        assert_eq!(resp.status(), 200);
        let hdr = |n: &str| resp.headers()[n].to_str().unwrap().to_string();
        (hdr("dav"), hdr("allow"))
    }

    #[test]
    fn classes_and_methods() {
        let (dav, allow) = options("/docs/", true);
        assert!(dav.starts_with("1, 2, 3, access-control"));
        assert!(dav.contains("sync-collection"));
        assert!(allow.contains("LOCK"));
        assert!(allow.contains("MKCOL"));

        let (dav, allow) = options("/docs/a.txt", false);
        assert!(!dav.contains(" 2,"));
        assert!(!allow.contains("LOCK"));
        assert!(!allow.contains("MKCOL"));

        let (_, allow) = options("/nothing/here", false);
        assert_eq!(allow, "OPTIONS, MKCOL");
    }
}
