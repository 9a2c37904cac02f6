//! Request body parsers.
//!
//! Each parser takes the raw body. Malformed XML, or a wrong root element,
//! is a bad request.
use xmltree::{Element, XMLNode};

use crate::acl::Acl;
use crate::davheaders::ContentType;
use crate::davprops::{NS_DAV_URI, PropMap, PropName, PropSet};
use crate::davvalue::{PropValue, TypeMap};
use crate::errors::{DavError, DavResult};
use crate::ls::{LockScope, new_lock_token};
use crate::xmltree_ext::ElementExt;

// parse, and check the root element.
pub(crate) fn parse_root(body: &[u8], ns: &str, name: &str) -> DavResult<Element> {
    let root = Element::parse2(body)?;
    if !root.is_elem(ns, name) {
        debug!("expected root element {}{}, got {}", ns, name, root.name);
        return Err(DavError::BadRequest(format!("expected <{}> element", name)));
    }
    Ok(root)
}

fn prop_names(prop: &Element) -> Vec<PropName> {
    prop.elements().map(PropName::from_element).collect()
}

/// PROPFIND body.
#[derive(Debug, Clone, PartialEq)]
pub enum PropFind {
    /// No body.
    Default,
    /// `<allprop/>`, with the extra names from `<include>`.
    AllProp { include: Vec<PropName> },
    /// `<propname/>`.
    PropName,
    /// `<prop>`.
    Prop(Vec<PropName>),
}

impl PropFind {
    pub fn parse(body: &[u8]) -> DavResult<PropFind> {
        if body.iter().all(|c| c.is_ascii_whitespace()) {
            return Ok(PropFind::Default);
        }
        let root = parse_root(body, NS_DAV_URI, "propfind")?;
        let Some(first) = root.first_elem() else {
            return Ok(PropFind::Default);
        };
        if !first.namespace.as_deref().is_some_and(|ns| ns == NS_DAV_URI) {
            return Err(DavError::BadRequest("unknown propfind element".into()));
        }
        let pf = match first.name.as_str() {
            "allprop" => PropFind::AllProp {
                include: root
                    .find_elem(NS_DAV_URI, "include")
                    .map(prop_names)
                    .unwrap_or_default(),
            },
            "propname" => PropFind::PropName,
            "prop" => PropFind::Prop(prop_names(first)),
            _ => return Err(DavError::BadRequest("unknown propfind element".into())),
        };
        Ok(pf)
    }

    /// The set of properties to compute. `propname` computes all of
    /// them, and then only reports the names.
    pub fn propset(&self) -> PropSet {
        match self {
            PropFind::Default => PropSet::Default,
            PropFind::AllProp { include } => PropSet::All(include.clone()),
            PropFind::PropName => PropSet::All(Vec::new()),
            PropFind::Prop(names) => PropSet::Names(names.clone()),
        }
    }

    pub fn names_only(&self) -> bool {
        matches!(self, PropFind::PropName)
    }
}

/// Parse a `<D:prop>` container into values.
pub(crate) fn parse_prop_values(prop: &Element, type_map: &TypeMap) -> DavResult<PropMap> {
    let mut m = PropMap::new();
    for e in prop.elements() {
        m.insert(PropName::from_element(e), Some(type_map.parse(e)?));
    }
    Ok(m)
}

/// PROPPATCH body: one ordered map, `None` is a removal. Later
/// instructions win.
pub fn parse_proppatch(body: &[u8], type_map: &TypeMap) -> DavResult<PropMap> {
    let root = parse_root(body, NS_DAV_URI, "propertyupdate")?;
    let mut m = PropMap::new();
    for elem in root.elements() {
        let set = elem.is_elem(NS_DAV_URI, "set");
        if !set && !elem.is_elem(NS_DAV_URI, "remove") {
            continue;
        }
        for prop in elem.elements().filter(|e| e.is_elem(NS_DAV_URI, "prop")) {
            if set {
                for (n, v) in parse_prop_values(prop, type_map)? {
                    m.insert(n, v);
                }
            } else {
                for n in prop_names(prop) {
                    m.insert(n, None);
                }
            }
        }
    }
    Ok(m)
}

/// MKCOL request.
#[derive(Debug, Clone)]
pub struct MkCol {
    /// Name of the new member.
    pub name: String,
    pub resource_type: Vec<PropName>,
    /// Properties to set, besides the resource type.
    pub props: PropMap,
    /// The request had a body (extended MKCOL).
    pub extended: bool,
}

impl MkCol {
    /// `rest` is what is left of the request path after walking the
    /// existing part of it.
    pub fn parse(
        rest: &[String],
        body: &[u8],
        content_type: Option<&ContentType>,
        type_map: &TypeMap,
    ) -> DavResult<MkCol> {
        let name = match rest.len() {
            0 => return Err(DavError::MethodNotAllowed(Vec::new())),
            1 => rest[0].clone(),
            _ => return Err(DavError::Conflict),
        };

        if body.iter().all(|c| c.is_ascii_whitespace()) {
            return Ok(MkCol {
                name,
                resource_type: vec![PropName::dav("collection")],
                props: PropMap::new(),
                extended: false,
            });
        }

        if !content_type.is_some_and(|c| c.is_xml()) {
            return Err(DavError::UnsupportedMediaType);
        }
        let root = parse_root(body, NS_DAV_URI, "mkcol")?;
        let mut props = PropMap::new();
        for set in root.elements().filter(|e| e.is_elem(NS_DAV_URI, "set")) {
            for prop in set.elements().filter(|e| e.is_elem(NS_DAV_URI, "prop")) {
                for (n, v) in parse_prop_values(prop, type_map)? {
                    props.insert(n, v);
                }
            }
        }

        let resource_type = match props.remove(&PropName::dav("resourcetype")) {
            Some(Some(PropValue::ResourceType(rt))) => rt,
            _ => return Err(DavError::BadRequest("mkcol without resourcetype".into())),
        };
        if !resource_type.contains(&PropName::dav("collection")) {
            return Err(DavError::InvalidResourceType);
        }
        Ok(MkCol {
            name,
            resource_type,
            props,
            extended: true,
        })
    }
}

/// LOCK body.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub scope: LockScope,
    /// Text and serialized markup of `<D:owner>`.
    pub owner: Option<String>,
    /// Fresh token for the new lock.
    pub token: String,
}

impl LockInfo {
    /// `None` for an empty body (a refresh).
    pub fn parse(body: &[u8]) -> DavResult<Option<LockInfo>> {
        if body.iter().all(|c| c.is_ascii_whitespace()) {
            return Ok(None);
        }
        let root = parse_root(body, NS_DAV_URI, "lockinfo")?;
        let scope = if root.find_descendant(NS_DAV_URI, "exclusive").is_some() {
            LockScope::Exclusive
        } else {
            LockScope::Shared
        };
        let owner = match root.find_elem(NS_DAV_URI, "owner") {
            Some(o) => Some(owner_content(o)?),
            None => None,
        };
        Ok(Some(LockInfo {
            scope,
            owner,
            token: new_lock_token(),
        }))
    }
}

// concatenated text and markup of the owner element.
fn owner_content(owner: &Element) -> DavResult<String> {
    let mut s = String::new();
    for c in &owner.children {
        match c {
            XMLNode::Text(t) | XMLNode::CData(t) => {
                s.push_str(&xml::escape::escape_str_pcdata(t));
            }
            XMLNode::Element(e) => {
                let b = e.to_xml(false)?;
                s.push_str(&String::from_utf8_lossy(&b));
            }
            _ => {}
        }
    }
    Ok(s.trim().to_string())
}

/// ACL method body.
pub fn parse_acl(body: &[u8]) -> DavResult<Acl> {
    let root = parse_root(body, NS_DAV_URI, "acl")?;
    Acl::parse(&root)
}
