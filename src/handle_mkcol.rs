use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::conditional::conditional_request;
use crate::davheaders;
use crate::davrequest::MkCol;
use crate::errors::{DavError, DavResult};
use crate::fs::FsError;
use crate::manager::DavManager;
use crate::multistatus::{empty_response, status_line, xml_response};
use crate::util::DavMethod;
use crate::xmltree_ext::{ElementExt, dav_root};

impl DavManager {
    pub(crate) fn handle_mkcol(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;

        // RFC 4918 9.3.1 MKCOL Status Codes.
        let (parent, rest) = self.store().lookup(&path)?;
        if rest.is_empty() {
            debug!("MKCOL {}: exists", path);
            return Err(DavError::MethodNotAllowed(self.allow_strings(Some(&parent))));
        }
        let content_type = req.headers().typed_get::<davheaders::ContentType>();
        let mkcol = MkCol::parse(&rest, req.body(), content_type.as_ref(), &self.type_map)?;

        conditional_request(self, req.headers(), DavMethod::MkCol, None, &path, None)?;
        self.acl(&parent, &["bind"])?;

        let (node, stats) =
            match self.make_collection(&parent, &mkcol.name, &mkcol.resource_type, &mkcol.props) {
                Ok(r) => r,
                Err(DavError::FsError(FsError::Exists)) => {
                    return Err(DavError::MethodNotAllowed(self.allow_strings(Some(&parent))));
                }
                Err(DavError::NotImplemented(_)) => return Err(DavError::Forbidden),
                Err(e) => return Err(e),
            };
        debug!("MKCOL {} created {:?}", node.path(), mkcol.resource_type);

        if !mkcol.extended {
            return empty_response(StatusCode::CREATED);
        }

        // extended MKCOL (RFC 5689): report what was set.
        let mut doc = dav_root("D:mkcol-response");
        for (status, props) in &stats {
            if props.is_empty() {
                continue;
            }
            let mut prop = Element::new2("D:prop");
            for (name, _) in props.iter() {
                prop.push_elem(name.element());
            }
            doc.push_elem(
                Element::new2("D:propstat")
                    .child(prop)
                    .child(Element::new_text("D:status", status_line(*status))),
            );
        }
        xml_response(StatusCode::CREATED, &doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davpath::DavPath;
    use crate::davprops::NS_DAV_URI;
    use crate::manager::tests::{manager_for, test_fs};

    fn mkcol(body: &str, ct: Option<&str>, uri: &str) -> Request<Bytes> {
        let mut req = Request::builder().method("MKCOL").uri(uri);
        if let Some(ct) = ct {
            req = req.header("Content-Type", ct);
        }
        req.body(Bytes::from(body.to_string())).unwrap()
    }

    #[test]
    fn plain() {
        let fs = test_fs();
        let mgr = manager_for(&fs, None);
        let resp = mgr.handle_mkcol(&mkcol("", None, "/docs/new/")).unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let node = mgr.store().node(&DavPath::new("/docs/new/").unwrap()).unwrap();
        assert!(node.is_collection());

        assert!(matches!(
            mgr.handle_mkcol(&mkcol("", None, "/docs/new/")),
            Err(DavError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            mgr.handle_mkcol(&mkcol("", None, "/a/b/c/")),
            Err(DavError::Conflict)
        ));
    }

    #[test]
    fn extended() {
        let fs = test_fs();
        let mgr = manager_for(&fs, None);
        let body = r#"<D:mkcol xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
            <D:set><D:prop>
              <D:resourcetype><D:collection/><C:addressbook/></D:resourcetype>
              <D:displayname>Contacts</D:displayname>
            </D:prop></D:set></D:mkcol>"#;
        let resp = mgr
            .handle_mkcol(&mkcol(body, Some("application/xml"), "/book/"))
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let doc = xmltree::Element::parse2(resp.body().as_ref()).unwrap();
        assert!(doc.is_elem(NS_DAV_URI, "mkcol-response"));
        assert!(doc.find_descendant(NS_DAV_URI, "displayname").is_some());
        let node = mgr.store().node(&DavPath::new("/book/").unwrap()).unwrap();
        assert!(node.is_addressbook());

        assert!(matches!(
            mgr.handle_mkcol(&mkcol(body, Some("text/plain"), "/book2/")),
            Err(DavError::UnsupportedMediaType)
        ));
    }
}
