mod common;

use common::*;
use dav_engine::davprops::PropName;
use dav_engine::davvalue::PropValue;
use dav_engine::memfs::NodeKind;
use dav_engine::{DavConfig, DavHandler};
use http::StatusCode;

const ALLPROP: &str = r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;

#[test]
fn options() {
    let (_fs, dav) = setup();
    let resp = dav.handle(req("OPTIONS", "/book/", &[], ""));
    assert_eq!(resp.status(), StatusCode::OK);
    let classes = resp.headers()["DAV"].to_str().unwrap();
    assert!(classes.starts_with("1, 2, 3"));
    assert!(classes.contains("access-control"));
    assert!(classes.contains("addressbook"));
    let allow = resp.headers()["Allow"].to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("REPORT"));
}

#[test]
fn content_methods() {
    let (_fs, dav) = setup();
    for method in ["GET", "HEAD", "PUT"] {
        let resp = dav.handle(req(method, "/docs/a.txt", &[], ""));
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED, "{}", method);
        assert!(resp.headers().contains_key("Allow"));
    }
}

#[test]
fn propfind_allprop_hides_exempt() {
    let (fs, dav) = setup();
    fs.set_prop("/docs/a.txt", PropName::dav("displayname"), PropValue::text("x"))
        .unwrap();
    fs.set_prop("/docs/a.txt", PropName::dav("getetag"), PropValue::text("\"abc\""))
        .unwrap();
    fs.set_prop("/docs/a.txt", PropName::dav("sync-token"), PropValue::text("urn:x:1"))
        .unwrap();

    let resp = dav.handle(req("PROPFIND", "/docs/a.txt", &[("Depth", "0")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    assert_eq!(hrefs(&doc), vec!["/docs/a.txt"]);
    assert_eq!(text_of(&doc, "displayname").as_deref(), Some("x"));
    assert_eq!(text_of(&doc, "getetag").as_deref(), Some("\"abc\""));
    assert!(find_all(&doc, "sync-token").is_empty());
}

#[test]
fn propfind_depth() {
    let (_fs, dav) = setup();
    let resp = dav.handle(req("PROPFIND", "/docs/", &[("Depth", "1")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(hrefs(&parse(&resp)), vec!["/docs/", "/docs/a.txt"]);

    let resp = dav.handle(req("PROPFIND", "/docs/", &[], ALLPROP));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(&resp).contains("propfind-finite-depth"));

    let (fs, _) = setup();
    let dav = common::config(&fs, "/principals/users/alice/")
        .infinite_depth(true)
        .build_handler();
    let resp = dav.handle(req("PROPFIND", "/", &[("Depth", "infinity")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(hrefs(&parse(&resp)).contains(&"/principals/users/bob/".to_string()));
}

#[test]
fn anonymous_is_refused() {
    init_log();
    let fs = setup_fs();
    let dav = DavHandler::builder().store(fs).build_handler();
    let resp = dav.handle(req("PROPFIND", "/docs/", &[("Depth", "0")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(&resp).contains("need-privileges"));
}

#[test]
fn proppatch_readonly() {
    let (_fs, dav) = setup();
    let body = r#"<D:propertyupdate xmlns:D="DAV:">
        <D:set><D:prop><D:getetag>"x"</D:getetag></D:prop></D:set>
        <D:set><D:prop><D:displayname>Docs</D:displayname></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = dav.handle(req("PROPPATCH", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    for propstat in find_all(&doc, "propstat") {
        let status = text_of(propstat, "status").unwrap();
        if !find_all(propstat, "getetag").is_empty() {
            assert!(status.contains("403"), "{}", status);
        } else {
            assert!(!find_all(propstat, "displayname").is_empty());
            assert!(status.contains("200"), "{}", status);
        }
    }

    // the writable property went through.
    let propfind = r#"<D:propfind xmlns:D="DAV:"><D:prop><D:displayname/></D:prop></D:propfind>"#;
    let resp = dav.handle(req("PROPFIND", "/docs/", &[("Depth", "0")], propfind));
    let doc = parse(&resp);
    assert!(text_of(&doc, "status").unwrap().contains("200"));
    assert_eq!(text_of(&doc, "displayname").as_deref(), Some("Docs"));
}

#[test]
fn proppatch_then_propfind() {
    let (_fs, dav) = setup();
    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example">
        <D:set><D:prop><D:displayname>Docs</D:displayname><Z:color>red</Z:color></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = dav.handle(req("PROPPATCH", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(text_of(&parse(&resp), "status").unwrap().contains("200"));

    let propfind = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:example">
        <D:prop><D:displayname/><Z:color/></D:prop></D:propfind>"#;
    let resp = dav.handle(req("PROPFIND", "/docs/", &[("Depth", "0")], propfind));
    let doc = parse(&resp);
    assert_eq!(text_of(&doc, "displayname").as_deref(), Some("Docs"));
    assert_eq!(text_of(&doc, "color").as_deref(), Some("red"));
}

#[test]
fn mkcol_copy_move_delete() {
    let (fs, dav) = setup();
    let resp = dav.handle(req("MKCOL", "/docs/sub/", &[], ""));
    assert_eq!(resp.status(), StatusCode::CREATED);
    fs.create("/docs/sub/b.txt", NodeKind::Resource).unwrap();

    let dest = [("Destination", "http://localhost/copy/")];
    let resp = dav.handle(req("COPY", "/docs/", &dest, ""));
    assert_eq!(resp.status(), StatusCode::CREATED);

    let dest = [("Destination", "/moved/")];
    let resp = dav.handle(req("MOVE", "/copy/", &dest, ""));
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav.handle(req("PROPFIND", "/moved/sub/b.txt", &[("Depth", "0")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let resp = dav.handle(req("PROPFIND", "/copy/", &[("Depth", "0")], ALLPROP));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = dav.handle(req("DELETE", "/moved/", &[], ""));
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = dav.handle(req("DELETE", "/moved/", &[], ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[test]
fn acl_method() {
    let (_fs, dav) = setup();
    // DAV:all is abstract and cannot be used in an ACE.
    let body = r#"<D:acl xmlns:D="DAV:">
        <D:ace><D:principal><D:href>/principals/users/alice/</D:href></D:principal>
          <D:grant><D:privilege><D:all/></D:privilege></D:grant></D:ace>
        </D:acl>"#;
    let resp = dav.handle(req("ACL", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert!(!find_all(&parse(&resp), "no-abstract").is_empty());

    let body = r#"<D:acl xmlns:D="DAV:">
        <D:ace><D:principal><D:href>/principals/users/alice/</D:href></D:principal>
          <D:grant><D:privilege><D:read/></D:privilege>
            <D:privilege><D:write/></D:privilege></D:grant></D:ace>
        <D:ace><D:principal><D:authenticated/></D:principal>
          <D:grant><D:privilege><D:read/></D:privilege></D:grant></D:ace>
        </D:acl>"#;
    let resp = dav.handle(req("ACL", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::OK);

    let propfind = r#"<D:propfind xmlns:D="DAV:"><D:prop>
        <D:current-user-privilege-set/></D:prop></D:propfind>"#;
    let resp = dav.handle_with(
        DavConfig::new().principal("/principals/users/bob/"),
        req("PROPFIND", "/docs/a.txt", &[("Depth", "0")], propfind),
    );
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    assert!(!find_all(&doc, "read").is_empty());
    assert!(find_all(&doc, "write").is_empty());

    let resp = dav.handle_with(
        DavConfig::new().principal("/principals/users/bob/"),
        req("MKCOL", "/docs/x/", &[], ""),
    );
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
