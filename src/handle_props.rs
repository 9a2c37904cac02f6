//
// PROPFIND and PROPPATCH.
//
use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::conditional::conditional_request;
use crate::davheaders::Depth;
use crate::davprops::PropName;
use crate::davrequest::{PropFind, parse_proppatch};
use crate::errors::{DavError, DavResult};
use crate::fs::{DavNodeRef, FsError};
use crate::manager::DavManager;
use crate::multistatus::{DavResponse, MultiStatus, ResponseTarget};
use crate::util::DavMethod;

impl DavManager {
    pub(crate) fn handle_propfind(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;

        // RFC 4918 9.1: no Depth header means infinity.
        let depth = self.depth(req.headers(), Depth::Infinity)?;
        if depth == Depth::Infinity && !self.infinite_depth {
            debug!("PROPFIND {}: refusing Depth: infinity", path);
            return Err(DavError::PropfindFiniteDepth);
        }
        if let Depth::Finite(n) = depth {
            if n > 1 {
                return Err(DavError::BadRequest(format!("invalid Depth {}", n)));
            }
        }

        let propfind = PropFind::parse(req.body())?;
        let wanted = propfind.propset();
        self.acl(&node, &["read"])?;
        debug!("PROPFIND {} depth {} {:?}", path, depth, propfind);

        let mut ms = MultiStatus::new();
        self.propfind_walk(&node, &wanted, depth, propfind.names_only(), &mut ms)?;
        ms.into_response(self)
    }

    // depth first, node before children. Unreadable nodes are a 403
    // response, and are not descended into.
    fn propfind_walk(
        &self,
        node: &DavNodeRef,
        wanted: &crate::davprops::PropSet,
        depth: Depth,
        names_only: bool,
        ms: &mut MultiStatus,
    ) -> DavResult<()> {
        if !self.has_privileges(node, &[PropName::dav("read")]) {
            trace!("propfind: {} not readable", node.path());
            ms.push(DavResponse::status(
                ResponseTarget::Node(node.clone()),
                StatusCode::FORBIDDEN,
            ));
            return Ok(());
        }
        let mut resp = DavResponse::props(node.clone(), self.get_node_props(node, wanted));
        resp.names_only = names_only;
        ms.push(resp);

        let Some(next) = depth.decrement() else {
            return Ok(());
        };
        if !node.is_collection() && node.as_principal().is_none() {
            return Ok(());
        }
        let children = match self.store().children(node) {
            Ok(c) => c,
            Err(FsError::NotImplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for child in children {
            self.propfind_walk(&child, wanted, next, names_only, ms)?;
        }
        Ok(())
    }

    pub(crate) fn handle_proppatch(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;

        conditional_request(
            self,
            req.headers(),
            DavMethod::PropPatch,
            Some(&node),
            &path,
            None,
        )?;
        self.acl(&node, &["write-properties"])?;

        let props = parse_proppatch(req.body(), &self.type_map)?;
        debug!("PROPPATCH {}: {} properties", path, props.len());
        let stats = self.set_node_props(&node, props);

        let mut ms = MultiStatus::new();
        ms.push(DavResponse::props(node, stats));
        ms.into_response(self)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Request, StatusCode};
    use xmltree::Element;

    use crate::acl::{Ace, Acl, PrincipalMatcher};
    use crate::davhandler::{DavConfig, DavHandler};
    use crate::davprops::NS_DAV_URI;
    use crate::manager::tests::test_fs;
    use crate::memfs::MemFs;
    use crate::xmltree_ext::ElementExt;

    fn handler(fs: &MemFs) -> DavHandler {
        DavConfig::new()
            .store(Box::new(fs.clone()))
            .principal("/principals/users/alice/")
            .build_handler()
    }

    fn propfind(h: &DavHandler, uri: &str, depth: Option<&str>, body: &str) -> (StatusCode, Element) {
        let mut req = Request::builder().method("PROPFIND").uri(uri);
        if let Some(d) = depth {
            req = req.header("Depth", d);
        }
        let resp = h.handle(req.body(Bytes::from(body.to_string())).unwrap());
        let status = resp.status();
        (status, Element::parse2(resp.body().as_ref()).unwrap())
    }

    fn hrefs(ms: &Element) -> Vec<String> {
        ms.elements()
            .filter(|e| e.is_elem(NS_DAV_URI, "response"))
            .filter_map(|r| r.find_elem(NS_DAV_URI, "href").map(|h| h.text_content()))
            .collect()
    }

    #[test]
    fn depth() {
        let fs = test_fs();
        let h = handler(&fs);
        let (st, ms) = propfind(&h, "/docs/", Some("0"), "");
        assert_eq!(st, StatusCode::MULTI_STATUS);
        assert_eq!(hrefs(&ms), ["/docs/"]);
        fs.create("/docs/sub/", crate::memfs::NodeKind::Collection).unwrap();
        fs.create("/docs/sub/deep.txt", crate::memfs::NodeKind::Resource).unwrap();
        let (_, ms) = propfind(&h, "/docs/", Some("1"), "");
        assert_eq!(hrefs(&ms), ["/docs/", "/docs/a.txt", "/docs/sub/"]);

        let (st, ms) = propfind(&h, "/docs/", None, "");
        assert_eq!(st, StatusCode::FORBIDDEN);
        assert!(ms.find_elem(NS_DAV_URI, "propfind-finite-depth").is_some());
    }

    #[test]
    fn unreadable_member() {
        let fs = test_fs();
        fs.set_acl(
            "/docs/a.txt",
            Acl(vec![Ace::deny(PrincipalMatcher::All, &["read"])]),
        )
        .unwrap();
        let h = handler(&fs);
        let (_, ms) = propfind(&h, "/docs/", Some("1"), "");
        let responses: Vec<&Element> = ms.elements().collect();
        assert_eq!(responses.len(), 2);
        let status = responses[1].find_elem(NS_DAV_URI, "status").unwrap();
        assert_eq!(status.text_content(), "HTTP/1.1 403 Forbidden");
    }

    #[test]
    fn propname() {
        let fs = test_fs();
        let h = handler(&fs);
        let (_, ms) = propfind(
            &h,
            "/docs/a.txt",
            Some("0"),
            r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#,
        );
        let prop = ms
            .find_descendant(NS_DAV_URI, "getetag")
            .expect("getetag listed");
        assert!(prop.children.is_empty());
    }

    #[test]
    fn proppatch() {
        let fs = test_fs();
        let h = handler(&fs);
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:x">
            <D:set><D:prop><D:displayname>Docs</D:displayname><X:color>red</X:color></D:prop></D:set>
            </D:propertyupdate>"#;
        let req = Request::builder()
            .method("PROPPATCH")
            .uri("/docs/")
            .body(Bytes::from(body))
            .unwrap();
        let resp = h.handle(req);
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let ms = Element::parse2(resp.body().as_ref()).unwrap();
        assert_eq!(
            ms.find_descendant(NS_DAV_URI, "status").unwrap().text_content(),
            "HTTP/1.1 200 OK"
        );

        let (_, ms) = propfind(
            &h,
            "/docs/",
            Some("0"),
            r#"<D:propfind xmlns:D="DAV:" xmlns:X="urn:x"><D:prop><X:color/></D:prop></D:propfind>"#,
        );
        assert_eq!(ms.find_descendant("urn:x", "color").unwrap().text_content(), "red");
    }
}
