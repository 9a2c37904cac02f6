#![allow(dead_code)]

use bytes::Bytes;
use dav_engine::acl::{Ace, Acl, PrincipalMatcher};
use dav_engine::memfs::{MemFs, NodeKind};
use dav_engine::memls::MemLs;
use dav_engine::{DavConfig, DavHandler};
use http::{Request, Response};
use xmltree::Element;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two users, a group, a document tree and an address book.
pub fn setup_fs() -> Box<MemFs> {
    let fs = MemFs::new();
    fs.set_acl("/", Acl(vec![Ace::grant(PrincipalMatcher::Authenticated, &["all"])]))
        .unwrap();
    fs.create("/principals/", NodeKind::Collection).unwrap();
    fs.create("/principals/users/", NodeKind::PrincipalCollection).unwrap();
    fs.create("/principals/users/alice/", NodeKind::Principal).unwrap();
    fs.create("/principals/users/bob/", NodeKind::Principal).unwrap();
    fs.create("/docs/", NodeKind::Collection).unwrap();
    fs.create("/docs/a.txt", NodeKind::Resource).unwrap();
    fs.create("/book/", NodeKind::AddressBook).unwrap();
    fs
}

pub fn config(fs: &MemFs, principal: &str) -> DavConfig {
    DavConfig::new()
        .store(Box::new(fs.clone()))
        .locksystem(MemLs::new())
        .principal(principal)
        .principal_collections(vec!["/principals/users/"])
}

pub fn setup() -> (Box<MemFs>, DavHandler) {
    init_log();
    let fs = setup_fs();
    let dav = config(&fs, "/principals/users/alice/").build_handler();
    (fs, dav)
}

pub fn req(method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Request<Bytes> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::from(body.to_string())).unwrap()
}

pub fn body_string(resp: &Response<Bytes>) -> String {
    String::from_utf8(resp.body().to_vec()).unwrap()
}

pub fn parse(resp: &Response<Bytes>) -> Element {
    Element::parse(resp.body().as_ref()).unwrap()
}

/// All descendants of `elem` with local name `name`, document order.
pub fn find_all<'a>(elem: &'a Element, name: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    for child in elem.children.iter().filter_map(|c| c.as_element()) {
        if child.name == name {
            found.push(child);
        }
        found.extend(find_all(child, name));
    }
    found
}

pub fn text_of(elem: &Element, name: &str) -> Option<String> {
    find_all(elem, name)
        .first()
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
}

/// Hrefs of the `response` elements of a multistatus.
pub fn hrefs(doc: &Element) -> Vec<String> {
    find_all(doc, "response")
        .into_iter()
        .filter_map(|r| text_of(r, "href"))
        .collect()
}
