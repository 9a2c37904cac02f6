//! The property vocabulary.
//!
//! Property names are (namespace, local-name) pairs. The derived sets
//! `DEFAULT_PROPS`, `ALLPROPS_EXEMPT` and `RO_PROPS` are built once and are
//! read-only afterwards.
use std::collections::{BTreeMap, HashSet};

use http::StatusCode;
use lazy_static::lazy_static;
use xmltree::{Element, Namespace};

use crate::davvalue::PropValue;

pub const NS_DAV_URI: &str = "DAV:";
pub const NS_CALDAV_URI: &str = "urn:ietf:params:xml:ns:caldav";
pub const NS_CARDDAV_URI: &str = "urn:ietf:params:xml:ns:carddav";
pub const NS_CALSERVER_URI: &str = "http://calendarserver.org/ns/";

const NS_PREFIXES: &[(&str, &str)] = &[
    ("D", NS_DAV_URI),
    ("C", NS_CALDAV_URI),
    ("CARD", NS_CARDDAV_URI),
    ("CS", NS_CALSERVER_URI),
];

/// Namespace URI of one of the well-known prefixes.
pub(crate) fn ns_uri(prefix: &str) -> Option<&'static str> {
    NS_PREFIXES.iter().find(|(p, _)| *p == prefix).map(|(_, u)| *u)
}

/// Prefix of one of the well-known namespaces.
pub(crate) fn ns_prefix(uri: &str) -> Option<&'static str> {
    NS_PREFIXES.iter().find(|(_, u)| *u == uri).map(|(p, _)| *p)
}

/// Name of a property (or of any other tag in the DAV vocabulary).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub ns: String,
    pub name: String,
}

impl PropName {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            ns: ns.into(),
            name: name.into(),
        }
    }

    pub fn dav(name: &str) -> PropName {
        PropName::new(NS_DAV_URI, name)
    }

    pub fn caldav(name: &str) -> PropName {
        PropName::new(NS_CALDAV_URI, name)
    }

    pub fn carddav(name: &str) -> PropName {
        PropName::new(NS_CARDDAV_URI, name)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == NS_DAV_URI
    }

    /// Name of an element as we received it.
    pub fn from_element(e: &Element) -> PropName {
        PropName::new(e.namespace.clone().unwrap_or_default(), e.name.clone())
    }

    /// An empty element with this name.
    ///
    /// Well-known namespaces use their fixed prefix, anything else gets
    /// a default namespace declaration on the element itself.
    pub fn element(&self) -> Element {
        let mut e = Element::new(&self.name);
        if self.ns.is_empty() {
            return e;
        }
        e.namespace = Some(self.ns.clone());
        match ns_prefix(&self.ns) {
            Some(p) => e.prefix = Some(p.to_string()),
            None => {
                let mut ns = Namespace::empty();
                ns.force_put("", self.ns.as_str());
                e.namespaces = Some(ns);
            }
        }
        e
    }
}

impl std::fmt::Display for PropName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.ns, self.name)
    }
}

impl std::fmt::Debug for PropName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

fn dav_names(ns: &str, names: &[&str]) -> Vec<PropName> {
    names.iter().map(|n| PropName::new(ns, *n)).collect()
}

lazy_static! {
    /// Returned on a PROPFIND without a body.
    pub static ref DEFAULT_PROPS: Vec<PropName> = dav_names(
        NS_DAV_URI,
        &[
            "creationdate",
            "displayname",
            "getcontentlength",
            "getcontenttype",
            "getetag",
            "getlastmodified",
            "resourcetype",
        ]
    );

    /// Never part of an "all properties" enumeration.
    pub static ref ALLPROPS_EXEMPT: HashSet<PropName> = {
        let mut s = HashSet::new();
        s.extend(dav_names(
            NS_DAV_URI,
            &[
                "sync-token",
                "acl",
                "acl-restrictions",
                "inherited-acl-set",
                "current-user-privilege-set",
                "supported-privilege-set",
                "principal-collection-set",
                "group-member-set",
                "group-membership",
                "expand-property",
            ],
        ));
        s.extend(dav_names(
            NS_CALDAV_URI,
            &[
                "calendar-data",
                "calendar-free-busy-set",
                "supported-collation-set",
                "calendar-home-set",
            ],
        ));
        s.extend(dav_names(
            NS_CARDDAV_URI,
            &[
                "address-data",
                "supported-address-data",
                "supported-collation-set",
                "addressbook-home-set",
                "directory-gateway",
                "max-resource-size",
            ],
        ));
        s
    };

    /// Server computed, so PROPPATCH can never set or remove them.
    pub static ref RO_PROPS: HashSet<PropName> = {
        let mut s = HashSet::new();
        s.extend(dav_names(
            NS_DAV_URI,
            &[
                "creationdate",
                "getcontentlength",
                "getetag",
                "getlastmodified",
                "lockdiscovery",
                "resourcetype",
                "supportedlock",
                "supported-report-set",
                "sync-token",
                "current-user-principal",
                "current-user-privilege-set",
                "supported-privilege-set",
                "acl",
                "acl-restrictions",
                "inherited-acl-set",
                "principal-collection-set",
                "principal-URL",
                "alternate-URI-set",
                "group-membership",
                "owner",
                "group",
            ],
        ));
        s.extend(dav_names(NS_CALDAV_URI, &["supported-collation-set"]));
        s.extend(dav_names(
            NS_CARDDAV_URI,
            &["supported-address-data", "supported-collation-set", "address-data"],
        ));
        s
    };
}

/// Which properties a request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum PropSet {
    /// Nothing was asked for explicitly.
    Default,
    /// `allprop`, plus the exempt properties listed in `include`.
    All(Vec<PropName>),
    /// An explicit list.
    Names(Vec<PropName>),
}

impl PropSet {
    /// Might this set contain `name`.
    pub fn wants(&self, name: &PropName) -> bool {
        match self {
            PropSet::Default => DEFAULT_PROPS.contains(name),
            PropSet::All(include) => !ALLPROPS_EXEMPT.contains(name) || include.contains(name),
            PropSet::Names(names) => names.contains(name),
        }
    }
}

/// Ordered map of property name to value.
///
/// A `None` value is a name without a value: a removal in PROPPATCH,
/// or an entry of a `propname` listing. Inserting an existing key replaces
/// the value and keeps the original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropMap(Vec<(PropName, Option<PropValue>)>);

impl PropMap {
    pub fn new() -> PropMap {
        PropMap(Vec::new())
    }

    pub fn insert(&mut self, name: PropName, value: Option<PropValue>) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Insert, unless the name is already there.
    pub fn insert_default(&mut self, name: PropName, value: PropValue) {
        if !self.contains(&name) {
            self.0.push((name, Some(value)));
        }
    }

    pub fn get(&self, name: &PropName) -> Option<&Option<PropValue>> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &PropName) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    pub fn remove(&mut self, name: &PropName) -> Option<Option<PropValue>> {
        let idx = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropName, &Option<PropValue>)> {
        self.0.iter().map(|(n, v)| (n, v))
    }

    pub fn names(&self) -> impl Iterator<Item = &PropName> {
        self.0.iter().map(|(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn retain(&mut self, mut f: impl FnMut(&PropName) -> bool) {
        self.0.retain(|(n, _)| f(n))
    }
}

impl IntoIterator for PropMap {
    type Item = (PropName, Option<PropValue>);
    type IntoIter = std::vec::IntoIter<(PropName, Option<PropValue>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(PropName, Option<PropValue>)> for PropMap {
    fn from_iter<I: IntoIterator<Item = (PropName, Option<PropValue>)>>(iter: I) -> Self {
        let mut m = PropMap::new();
        for (n, v) in iter {
            m.insert(n, v);
        }
        m
    }
}

/// Properties grouped by the status they are reported under.
pub type PropStats = BTreeMap<StatusCode, PropMap>;

pub(crate) fn add_propstat(
    stats: &mut PropStats,
    status: StatusCode,
    name: PropName,
    value: Option<PropValue>,
) {
    stats.entry(status).or_default().insert(name, value);
}
