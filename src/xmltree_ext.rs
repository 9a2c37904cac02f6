use std::io::Cursor;

use xmltree::{self, Element, EmitterConfig, Namespace, XMLNode};

use crate::davprops::{NS_CALDAV_URI, NS_CALSERVER_URI, NS_CARDDAV_URI, NS_DAV_URI, ns_uri};
use crate::{DavError, DavResult};

pub(crate) trait ElementExt {
    /// Builds an element from "prefix:name". Well-known prefixes get their namespace filled in.
    fn new2(n: &str) -> Self;
    fn new_text(n: &str, t: impl Into<String>) -> Self;
    fn ns(self, prefix: &str, namespace: &str) -> Self;
    fn text(self, t: impl Into<String>) -> Self;
    fn push_elem(&mut self, e: Element);
    fn child(self, e: Element) -> Self;
    fn elements(&self) -> impl Iterator<Item = &Element>;
    fn first_elem(&self) -> Option<&Element>;
    fn find_elem(&self, ns: &str, name: &str) -> Option<&Element>;
    fn find_descendant(&self, ns: &str, name: &str) -> Option<&Element>;
    fn is_elem(&self, ns: &str, name: &str) -> bool;
    fn text_content(&self) -> String;
    fn has_elements(&self) -> bool;
    fn parse2(data: &[u8]) -> DavResult<Element>;
    fn to_xml(&self, declaration: bool) -> DavResult<Vec<u8>>;
}

impl ElementExt for Element {
    fn new2(n: &str) -> Element {
        match n.split_once(':') {
            None => Element::new(n),
            Some((prefix, name)) => {
                let mut e = Element::new(name);
                e.namespace = ns_uri(prefix).map(|s| s.to_string());
                e.prefix = Some(prefix.to_string());
                e
            }
        }
    }

    fn new_text(n: &str, t: impl Into<String>) -> Element {
        Element::new2(n).text(t)
    }

    fn ns(mut self, prefix: &str, namespace: &str) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(Namespace::empty);
        ns.force_put(prefix, namespace);
        self.namespaces = Some(ns);
        self
    }

    fn text(mut self, t: impl Into<String>) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push_elem(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child(mut self, e: Element) -> Element {
        self.push_elem(e);
        self
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XMLNode::Element(e) => Some(e),
            _ => None,
        })
    }

    fn first_elem(&self) -> Option<&Element> {
        self.elements().next()
    }

    fn find_elem(&self, ns: &str, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is_elem(ns, name))
    }

    fn find_descendant(&self, ns: &str, name: &str) -> Option<&Element> {
        for e in self.elements() {
            if e.is_elem(ns, name) {
                return Some(e);
            }
            if let Some(d) = e.find_descendant(ns, name) {
                return Some(d);
            }
        }
        None
    }

    fn is_elem(&self, ns: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref().unwrap_or("") == ns
    }

    fn text_content(&self) -> String {
        let mut s = String::new();
        for c in &self.children {
            match c {
                XMLNode::Text(t) | XMLNode::CData(t) => s.push_str(t),
                XMLNode::Element(e) => s.push_str(&e.text_content()),
                _ => {}
            }
        }
        s.trim().to_string()
    }

    fn has_elements(&self) -> bool {
        self.elements().next().is_some()
    }

    fn parse2(data: &[u8]) -> DavResult<Element> {
        Element::parse(Cursor::new(data)).map_err(|e| {
            debug!("xml parse error: {}", e);
            DavError::XmlReadError
        })
    }

    fn to_xml(&self, declaration: bool) -> DavResult<Vec<u8>> {
        let mut out = Vec::new();
        let config = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(declaration);
        self.write_with_config(&mut out, config).map_err(|e| {
            error!("xml write error: {}", e);
            DavError::XmlWriteError
        })?;
        Ok(out)
    }
}

/// Root element with all the namespaces we emit declared on it.
pub(crate) fn dav_root(n: &str) -> Element {
    Element::new2(n)
        .ns("D", NS_DAV_URI)
        .ns("C", NS_CALDAV_URI)
        .ns("CARD", NS_CARDDAV_URI)
        .ns("CS", NS_CALSERVER_URI)
}

/// Element text, parsed into a number.
pub(crate) fn elem_u64(e: &Element) -> Option<u64> {
    e.text_content().parse().ok()
}
