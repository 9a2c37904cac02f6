//! Property values.
//!
//! `PropValue` is a closed enum. Every variant knows how to render itself
//! as the content of a property element, and the request-parseable ones
//! can be read back through a `ValueKind`.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use xmltree::Element;

use crate::acl::{Ace, Acl, AclRestrictions, PrivilegeDef};
use crate::davpath::DavPath;
use crate::davprops::{NS_DAV_URI, PropName};
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::ls::{DavLock, LockScope};
use crate::manager::DavManager;
use crate::multistatus::DavResponse;
use crate::util::{httpdate, parse_httpdate, parse_rfc3339, rfc3339};
use crate::xmltree_ext::ElementExt;

/// What an href points at.
#[derive(Clone, Debug)]
pub enum HrefTarget {
    /// Literal URI or path, as received or configured.
    Uri(String),
    /// A path below the prefix.
    Path(DavPath),
    /// A live node.
    Node(DavNodeRef),
}

/// `<D:href>` value.
///
/// Resolution is lazy: `get_uri()` and `get_node()` go through the manager, so
/// an href can point at a node whose properties are computed later.
#[derive(Clone, Debug)]
pub struct Href {
    pub target: HrefTarget,
    /// Render without scheme and host.
    pub path_only: bool,
}

impl Href {
    pub fn uri(s: impl Into<String>) -> Href {
        Href {
            target: HrefTarget::Uri(s.into()),
            path_only: true,
        }
    }

    pub fn path(p: DavPath) -> Href {
        Href {
            target: HrefTarget::Path(p),
            path_only: true,
        }
    }

    pub fn node(n: DavNodeRef) -> Href {
        Href {
            target: HrefTarget::Node(n),
            path_only: true,
        }
    }

    pub fn absolute(mut self) -> Href {
        self.path_only = false;
        self
    }

    /// The URI as it goes on the wire.
    pub fn get_uri(&self, mgr: &DavManager) -> String {
        match self.target {
            HrefTarget::Uri(ref s) => s.clone(),
            HrefTarget::Path(ref p) => mgr.path_uri(p, self.path_only),
            HrefTarget::Node(ref n) => mgr.node_uri(n, self.path_only),
        }
    }

    /// The path below the prefix, if this href points into our namespace.
    pub fn get_path(&self, mgr: &DavManager) -> Option<DavPath> {
        match self.target {
            HrefTarget::Uri(ref s) => mgr.uri_to_path(s),
            HrefTarget::Path(ref p) => Some(p.clone()),
            HrefTarget::Node(ref n) => Some(n.path()),
        }
    }

    /// Resolve to a node (exact match only).
    pub fn get_node(&self, mgr: &DavManager) -> Option<DavNodeRef> {
        match self.target {
            HrefTarget::Node(ref n) => Some(n.clone()),
            _ => mgr.resolve_path(&self.get_path(mgr)?, true).ok(),
        }
    }

    // comparison key, independent of how the target is held.
    fn key(&self) -> String {
        let s = match self.target {
            HrefTarget::Uri(ref s) => s.clone(),
            HrefTarget::Path(ref p) => p.as_url_string(false),
            HrefTarget::Node(ref n) => n.path().as_url_string(false),
        };
        match s.strip_suffix('/') {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => s,
        }
    }

    fn element(&self, mgr: &DavManager) -> Element {
        Element::new_text("D:href", self.get_uri(mgr))
    }
}

impl PartialEq for Href {
    fn eq(&self, other: &Href) -> bool {
        self.key() == other.key()
    }
}

/// A property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Text(String),
    /// ISO 8601 (`creationdate`).
    Date(DateTime<Utc>),
    /// HTTP-date (`getlastmodified`).
    HttpDate(DateTime<Utc>),
    /// One empty child element per tag.
    ResourceType(Vec<PropName>),
    Href(Href),
    HrefList(Vec<Href>),
    /// A single child tag, with optional text.
    Tag(PropName, Option<String>),
    SupportedPrivilegeSet(PrivilegeDef),
    PrivilegeList(Vec<PropName>),
    Ace(Ace),
    Acl(Acl),
    AclRestrictions(AclRestrictions),
    LockDiscovery { locks: Vec<DavLock>, show_token: bool },
    SupportedLock,
    SupportedReportSet(Vec<PropName>),
    SupportedCollationSet(Vec<String>),
    SupportedAddressData,
    AddressData(String),
    /// Result of expand-property: full responses for the href targets.
    Expanded(Vec<DavResponse>),
    /// Dead property, kept verbatim.
    Xml(Element),
}

impl PropValue {
    pub fn text(s: impl Into<String>) -> PropValue {
        PropValue::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) | PropValue::AddressData(s) => Some(s),
            _ => None,
        }
    }

    /// The hrefs in this value, if it is href-valued.
    pub fn hrefs(&self) -> Option<Vec<Href>> {
        match self {
            PropValue::Href(h) => Some(vec![h.clone()]),
            PropValue::HrefList(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Render as the property element `name`.
    pub fn render(&self, name: &PropName, mgr: &DavManager) -> Element {
        if let PropValue::Xml(e) = self {
            return e.clone();
        }
        let mut e = name.element();
        match self {
            PropValue::Text(s) | PropValue::AddressData(s) => e = e.text(s.clone()),
            PropValue::Date(d) => e = e.text(rfc3339(d)),
            PropValue::HttpDate(d) => e = e.text(httpdate(d)),
            PropValue::ResourceType(tags) => {
                for t in tags {
                    e.push_elem(t.element());
                }
            }
            PropValue::Href(h) => e.push_elem(h.element(mgr)),
            PropValue::HrefList(v) => {
                for h in v {
                    e.push_elem(h.element(mgr));
                }
            }
            PropValue::Tag(t, text) => {
                let mut c = t.element();
                if let Some(text) = text {
                    c = c.text(text.clone());
                }
                e.push_elem(c);
            }
            PropValue::SupportedPrivilegeSet(def) => e.push_elem(def.render()),
            PropValue::PrivilegeList(privs) => {
                for p in privs {
                    e.push_elem(Element::new2("D:privilege").child(p.element()));
                }
            }
            PropValue::Ace(ace) => e.push_elem(ace.render(mgr)),
            PropValue::Acl(acl) => {
                for a in acl.render(mgr) {
                    e.push_elem(a);
                }
            }
            PropValue::AclRestrictions(r) => {
                for c in r.render() {
                    e.push_elem(c);
                }
            }
            PropValue::LockDiscovery { locks, show_token } => {
                for l in locks {
                    e.push_elem(active_lock(l, *show_token, mgr));
                }
            }
            PropValue::SupportedLock => {
                for scope in ["D:exclusive", "D:shared"] {
                    e.push_elem(
                        Element::new2("D:lockentry")
                            .child(Element::new2("D:lockscope").child(Element::new2(scope)))
                            .child(Element::new2("D:locktype").child(Element::new2("D:write"))),
                    );
                }
            }
            PropValue::SupportedReportSet(names) => {
                for n in names {
                    e.push_elem(
                        Element::new2("D:supported-report")
                            .child(Element::new2("D:report").child(n.element())),
                    );
                }
            }
            PropValue::SupportedCollationSet(v) => {
                let tag = PropName::new(name.ns.clone(), "supported-collation");
                for c in v {
                    e.push_elem(tag.element().text(c.clone()));
                }
            }
            PropValue::SupportedAddressData => {
                for version in ["3.0", "4.0"] {
                    let mut t = Element::new2("CARD:address-data-type");
                    t.attributes
                        .insert("content-type".to_string(), "text/vcard".to_string());
                    t.attributes
                        .insert("version".to_string(), version.to_string());
                    e.push_elem(t);
                }
            }
            PropValue::Expanded(responses) => {
                for r in responses {
                    e.push_elem(r.render(mgr));
                }
            }
            PropValue::Xml(_) => {}
        }
        e
    }
}

/// `<D:activelock>`. The token is only shown to the lock owner.
pub(crate) fn active_lock(lock: &DavLock, show_token: bool, mgr: &DavManager) -> Element {
    let scope = match lock.scope {
        LockScope::Exclusive => "D:exclusive",
        LockScope::Shared => "D:shared",
    };
    let timeout = match lock.timeout {
        None => "Infinite".to_string(),
        Some(d) => format!("Second-{}", d.as_secs()),
    };
    let mut e = Element::new2("D:activelock")
        .child(Element::new2("D:lockscope").child(Element::new2(scope)))
        .child(Element::new2("D:locktype").child(Element::new2("D:write")))
        .child(Element::new_text(
            "D:depth",
            if lock.deep { "infinity" } else { "0" },
        ))
        .child(Element::new_text("D:timeout", timeout));
    if show_token {
        e.push_elem(
            Element::new2("D:locktoken").child(Element::new_text("D:href", lock.token.clone())),
        );
    }
    e.push_elem(
        Element::new2("D:lockroot")
            .child(Element::new_text("D:href", mgr.path_uri(&lock.path, true))),
    );
    if let Some(ref o) = lock.owner {
        e.push_elem(owner_element(o));
    }
    e
}

// the owner was stored as serialized XML content; put it back as markup.
fn owner_element(owner: &str) -> Element {
    let xml = format!(r#"<D:owner xmlns:D="DAV:">{}</D:owner>"#, owner);
    match Element::parse2(xml.as_bytes()) {
        Ok(e) => e,
        Err(_) => Element::new_text("D:owner", owner.to_string()),
    }
}

/// How a property's value is parsed from a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Date,
    HttpDate,
    ResourceType,
    Href,
    HrefList,
    Ace,
    Acl,
    SupportedAddressData,
    Xml,
}

lazy_static! {
    static ref DEFAULT_KINDS: Vec<(PropName, ValueKind)> = vec![
        (PropName::dav("resourcetype"), ValueKind::ResourceType),
        (PropName::dav("creationdate"), ValueKind::Date),
        (PropName::dav("getlastmodified"), ValueKind::HttpDate),
        (PropName::dav("displayname"), ValueKind::Text),
        (PropName::dav("getcontenttype"), ValueKind::Text),
        (PropName::dav("owner"), ValueKind::Href),
        (PropName::dav("group"), ValueKind::Href),
        (PropName::dav("group-member-set"), ValueKind::HrefList),
        (PropName::dav("group-membership"), ValueKind::HrefList),
        (PropName::dav("alternate-URI-set"), ValueKind::HrefList),
        (PropName::dav("principal-URL"), ValueKind::Href),
        (PropName::dav("ace"), ValueKind::Ace),
        (PropName::dav("acl"), ValueKind::Acl),
        (PropName::caldav("calendar-home-set"), ValueKind::HrefList),
        (PropName::carddav("addressbook-home-set"), ValueKind::HrefList),
        (PropName::carddav("supported-address-data"), ValueKind::SupportedAddressData),
    ];
}

/// Property name to value kind. Callers can add entries.
#[derive(Clone, Debug)]
pub struct TypeMap(HashMap<PropName, ValueKind>);

impl Default for TypeMap {
    fn default() -> Self {
        TypeMap(DEFAULT_KINDS.iter().cloned().collect())
    }
}

impl TypeMap {
    /// A map without the builtin entries.
    pub fn empty() -> Self {
        TypeMap(HashMap::new())
    }

    pub fn insert(&mut self, name: PropName, kind: ValueKind) {
        self.0.insert(name, kind);
    }

    pub fn merge(&mut self, other: &TypeMap) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), *v);
        }
    }

    pub fn get(&self, name: &PropName) -> Option<ValueKind> {
        self.0.get(name).copied()
    }

    /// Parse a property element. Unknown properties are kept as text, or
    /// as raw XML if they have child elements.
    pub fn parse(&self, elem: &Element) -> DavResult<PropValue> {
        let name = PropName::from_element(elem);
        match self.get(&name) {
            Some(kind) => parse_value(kind, elem),
            None if elem.has_elements() => Ok(PropValue::Xml(elem.clone())),
            None => Ok(PropValue::Text(elem.text_content())),
        }
    }
}

fn bad(what: &str) -> DavError {
    DavError::BadRequest(format!("invalid {} value", what))
}

fn hrefs(elem: &Element) -> Vec<Href> {
    elem.elements()
        .filter(|e| e.is_elem(NS_DAV_URI, "href"))
        .map(|e| Href::uri(e.text_content()))
        .collect()
}

pub fn parse_value(kind: ValueKind, elem: &Element) -> DavResult<PropValue> {
    let v = match kind {
        ValueKind::Text => PropValue::Text(elem.text_content()),
        ValueKind::Date => {
            PropValue::Date(parse_rfc3339(&elem.text_content()).ok_or_else(|| bad("date"))?)
        }
        ValueKind::HttpDate => {
            PropValue::HttpDate(parse_httpdate(&elem.text_content()).ok_or_else(|| bad("date"))?)
        }
        ValueKind::ResourceType => {
            PropValue::ResourceType(elem.elements().map(PropName::from_element).collect())
        }
        ValueKind::Href => {
            let mut v = hrefs(elem);
            if v.len() != 1 {
                return Err(bad("href"));
            }
            PropValue::Href(v.remove(0))
        }
        ValueKind::HrefList => PropValue::HrefList(hrefs(elem)),
        ValueKind::Ace => {
            let ace = elem
                .find_elem(NS_DAV_URI, "ace")
                .ok_or_else(|| bad("ace"))?;
            PropValue::Ace(Ace::parse(ace)?)
        }
        ValueKind::Acl => PropValue::Acl(Acl::parse(elem)?),
        ValueKind::SupportedAddressData => PropValue::SupportedAddressData,
        ValueKind::Xml => PropValue::Xml(elem.clone()),
    };
    Ok(v)
}

/// Shared, immutable type map.
pub type TypeMapRef = Arc<TypeMap>;
