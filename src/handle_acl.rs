//
// The ACL method (RFC 3744, 8.1).
//
use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::conditional::conditional_request;
use crate::davrequest::parse_acl;
use crate::errors::{DavError, DavResult};
use crate::fs::FsError;
use crate::manager::DavManager;
use crate::multistatus::empty_response;
use crate::util::DavMethod;

impl DavManager {
    pub(crate) fn handle_acl(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;

        conditional_request(self, req.headers(), DavMethod::Acl, Some(&node), &path, None)?;
        self.acl(&node, &["write-acl"])?;

        let mut acl = parse_acl(req.body())?;
        // inherited ACEs belong to the ancestor.
        acl.0.retain(|a| a.inherited.is_none());
        let old = node.acl().unwrap_or_default();
        acl.validate_update(&old, &node.acl_restrictions(), self)?;

        match node.set_acl(acl) {
            Ok(()) => {}
            Err(FsError::NotImplemented) => {
                debug!("ACL {}: node has a fixed ACL", path);
                return Err(DavError::Forbidden);
            }
            Err(e) => return Err(e.into()),
        }
        debug!("ACL {} updated", path);
        empty_response(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Ace, Acl, AclRestrictions, PrincipalMatcher};
    use crate::davprops::PropName;
    use crate::manager::tests::{manager_for, test_fs};

    fn acl_req(body: &str) -> Request<Bytes> {
        Request::builder()
            .method("ACL")
            .uri("/docs/")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn ace(principal: &str, tag: &str, privs: &str) -> String {
        format!(
            "<D:ace><D:principal>{}</D:principal><D:{}><D:privilege>{}</D:privilege></D:{}></D:ace>",
            principal, tag, privs, tag
        )
    }

    fn body(aces: &[String]) -> String {
        format!(r#"<D:acl xmlns:D="DAV:">{}</D:acl>"#, aces.concat())
    }

    #[test]
    fn set_acl() {
        let fs = test_fs();
        let mgr = manager_for(&fs, Some("/principals/users/alice/"));
        let b = body(&[
            ace("<D:href>/principals/users/bob/</D:href>", "grant", "<D:read/>"),
            ace("<D:authenticated/>", "grant", "<D:write/>"),
        ]);
        let resp = mgr.handle_acl(&acl_req(&b)).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let node = mgr
            .resolve_path(&crate::davpath::DavPath::new("/docs/").unwrap(), true)
            .unwrap();
        let acl = node.acl().unwrap();
        assert_eq!(acl.0.len(), 2);
        assert_eq!(acl.0[0].grant, vec![PropName::dav("read")]);
    }

    #[test]
    fn rejected() {
        let fs = test_fs();
        let mgr = manager_for(&fs, Some("/principals/users/alice/"));
        let nobody = "<D:href>/principals/users/nobody/</D:href>";
        let unknown = body(&[ace(nobody, "grant", "<D:read/>")]);
        assert!(matches!(
            mgr.handle_acl(&acl_req(&unknown)),
            Err(DavError::UnrecognizedPrincipal)
        ));
        let abstract_priv = body(&[ace("<D:all/>", "grant", "<D:all/>")]);
        assert!(matches!(
            mgr.handle_acl(&acl_req(&abstract_priv)),
            Err(DavError::NoAbstractPrivilege)
        ));
        let bogus = body(&[ace("<D:all/>", "grant", "<D:fly/>")]);
        assert!(matches!(
            mgr.handle_acl(&acl_req(&bogus)),
            Err(DavError::UnsupportedPrivilege)
        ));

        fs.set_acl_restrictions(
            "/docs/",
            AclRestrictions {
                grant_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        let deny = body(&[ace("<D:all/>", "deny", "<D:write/>")]);
        assert!(matches!(
            mgr.handle_acl(&acl_req(&deny)),
            Err(DavError::AclRestricted("grant-only"))
        ));
    }

    #[test]
    fn needs_write_acl() {
        let fs = test_fs();
        fs.set_acl(
            "/docs/",
            Acl(vec![Ace::grant(PrincipalMatcher::All, &["read", "write-properties"])]),
        )
        .unwrap();
        let mgr = manager_for(&fs, Some("/principals/users/bob/"));
        let b = body(&[ace("<D:all/>", "grant", "<D:all/>")]);
        assert!(matches!(
            mgr.handle_acl(&acl_req(&b)),
            Err(DavError::NeedPrivileges { .. })
        ));
    }
}
