mod common;

use std::sync::Arc;

use common::*;
use dav_engine::davprops::PropName;
use dav_engine::davvalue::PropValue;
use dav_engine::memfs::NodeKind;
use dav_engine::multistatus::{MultiStatus, ReportResult};
use dav_engine::report::{DavReport, ReportRequest};
use dav_engine::{DavConfig, DavResult, manager::DavManager};
use http::StatusCode;

fn sync_body(token: &str) -> String {
    format!(
        r#"<D:sync-collection xmlns:D="DAV:">
            <D:sync-token>{}</D:sync-token>
            <D:sync-level>1</D:sync-level>
            <D:prop><D:getetag/></D:prop>
        </D:sync-collection>"#,
        token
    )
}

#[test]
fn sync_collection() {
    let (fs, dav) = setup();
    fs.create("/docs/b.txt", NodeKind::Resource).unwrap();

    let resp = dav.handle(req("REPORT", "/docs/", &[], &sync_body("")));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    assert_eq!(hrefs(&doc), vec!["/docs/a.txt", "/docs/b.txt"]);
    let token = text_of(&doc, "sync-token").unwrap();
    assert!(token.starts_with(dav_engine::DEFAULT_SYNC_TOKEN_PREFIX));

    // nothing happened since.
    let resp = dav.handle(req("REPORT", "/docs/", &[], &sync_body(&token)));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    assert!(hrefs(&doc).is_empty());
    assert_eq!(text_of(&doc, "sync-token"), Some(token.clone()));

    fs.modify("/docs/a.txt").unwrap();
    fs.remove("/docs/b.txt").unwrap();
    let resp = dav.handle(req("REPORT", "/docs/", &[], &sync_body(&token)));
    let doc = parse(&resp);
    assert_eq!(hrefs(&doc), vec!["/docs/a.txt", "/docs/b.txt"]);
    let responses = find_all(&doc, "response");
    assert!(text_of(responses[1], "status").unwrap().contains("404"));
    assert_ne!(text_of(&doc, "sync-token"), Some(token));
}

#[test]
fn sync_collection_bad_token() {
    let (_fs, dav) = setup();
    let body = sync_body("http://example.com/other-server/1");
    let resp = dav.handle(req("REPORT", "/docs/", &[], &body));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(&resp).contains("valid-sync-token"));

    let future = format!("{}999999", dav_engine::DEFAULT_SYNC_TOKEN_PREFIX);
    let resp = dav.handle(req("REPORT", "/docs/", &[], &sync_body(&future)));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // a plain resource has no history.
    let resp = dav.handle(req("REPORT", "/docs/a.txt", &[], &sync_body("")));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(&resp).contains("supported-report"));
}

#[test]
fn expand_property() {
    let (fs, dav) = setup();
    fs.set_prop(
        "/principals/users/alice/",
        PropName::dav("displayname"),
        PropValue::text("Alice"),
    )
    .unwrap();
    let body = r#"<D:expand-property xmlns:D="DAV:">
        <D:property name="current-user-principal">
            <D:property name="displayname"/>
        </D:property>
    </D:expand-property>"#;
    let resp = dav.handle(req("REPORT", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    let cup = find_all(&doc, "current-user-principal");
    assert_eq!(cup.len(), 1);
    assert_eq!(hrefs(cup[0]), vec!["/principals/users/alice/"]);
    assert_eq!(text_of(cup[0], "displayname").as_deref(), Some("Alice"));
}

#[test]
fn principal_property_search() {
    let (fs, dav) = setup();
    fs.set_prop(
        "/principals/users/bob/",
        PropName::dav("displayname"),
        PropValue::text("Robert Roe"),
    )
    .unwrap();
    let body = r#"<D:principal-property-search xmlns:D="DAV:">
        <D:property-search>
            <D:prop><D:displayname/></D:prop>
            <D:match>robert</D:match>
        </D:property-search>
        <D:prop><D:displayname/></D:prop>
    </D:principal-property-search>"#;
    let resp = dav.handle(req("REPORT", "/principals/users/", &[], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(hrefs(&parse(&resp)), vec!["/principals/users/bob/"]);

    let body = r#"<D:principal-search-property-set xmlns:D="DAV:"/>"#;
    let resp = dav.handle(req("REPORT", "/principals/users/", &[], body));
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!find_all(&parse(&resp), "principal-search-property").is_empty());
}

#[test]
fn addressbook_query() {
    let (fs, dav) = setup();
    for (name, email) in [("ann", "ann@example.com"), ("bob", "bob@mail.test")] {
        let path = format!("/book/{}.vcf", name);
        fs.create(&path, NodeKind::Card).unwrap();
        let card = format!(
            "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:{name}\r\nFN:{name}\r\nEMAIL:{email}\r\nEND:VCARD\r\n"
        );
        fs.set_vcard(&path, &card).unwrap();
    }
    let body = r#"<C:addressbook-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
        <D:prop><D:getetag/><C:address-data/></D:prop>
        <C:filter><C:prop-filter name="EMAIL">
            <C:text-match match-type="ends-with">EXAMPLE.COM</C:text-match>
        </C:prop-filter></C:filter>
    </C:addressbook-query>"#;
    let resp = dav.handle(req("REPORT", "/book/", &[("Depth", "1")], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let doc = parse(&resp);
    assert_eq!(hrefs(&doc), vec!["/book/ann.vcf"]);
    assert!(text_of(&doc, "address-data").unwrap().contains("FN:ann"));

    let body = r#"<C:addressbook-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
        <D:prop><D:getetag/></D:prop>
        <D:href>/book/bob.vcf</D:href>
    </C:addressbook-multiget>"#;
    let resp = dav.handle(req("REPORT", "/book/", &[], body));
    assert_eq!(hrefs(&parse(&resp)), vec!["/book/bob.vcf"]);
}

#[derive(Debug)]
struct CountReport;

impl DavReport for CountReport {
    fn name(&self) -> PropName {
        PropName::new("urn:example", "count")
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let mut ms = MultiStatus::new();
        ms.sync_token = mgr.sync_token(&req.node);
        Ok(ReportResult::MultiStatus(ms))
    }
}

#[test]
fn custom_report() {
    let (fs, _) = setup();
    let dav = common::config(&fs, "/principals/users/alice/")
        .report(Arc::new(CountReport))
        .build_handler();
    let body = r#"<Z:count xmlns:Z="urn:example"/>"#;
    let resp = dav.handle(req("REPORT", "/docs/", &[], body));
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(text_of(&parse(&resp), "sync-token").is_some());

    let resp = dav.handle_with(DavConfig::new(), req("REPORT", "/docs/", &[], r#"<Z:nope xmlns:Z="urn:example"/>"#));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
