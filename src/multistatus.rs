//! Multistatus response assembly.
use bytes::Bytes;
use http::{Response, StatusCode};
use xmltree::Element;

use crate::davpath::DavPath;
use crate::davprops::PropStats;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::manager::DavManager;
use crate::xmltree_ext::{ElementExt, dav_root};

/// What a `<D:response>` is about.
#[derive(Clone, Debug)]
pub enum ResponseTarget {
    Node(DavNodeRef),
    Path(DavPath),
    /// Literal href, e.g. a deleted member or an unresolvable multiget href.
    Uri(String),
}

impl ResponseTarget {
    fn href(&self, mgr: &DavManager) -> String {
        match self {
            ResponseTarget::Node(n) => mgr.node_uri(n, true),
            ResponseTarget::Path(p) => mgr.path_uri(p, true),
            ResponseTarget::Uri(s) => s.clone(),
        }
    }

    fn key(&self) -> String {
        match self {
            ResponseTarget::Node(n) => n.path().as_url_string(false),
            ResponseTarget::Path(p) => p.as_url_string(false),
            ResponseTarget::Uri(s) => s.clone(),
        }
    }
}

/// One `<D:response>`.
#[derive(Clone, Debug)]
pub struct DavResponse {
    pub target: ResponseTarget,
    /// Status for the whole resource. Set instead of propstats.
    pub status: Option<StatusCode>,
    pub propstats: PropStats,
    /// Render property names without values (`propname`).
    pub names_only: bool,
    pub error: Option<Element>,
    pub description: Option<String>,
}

impl PartialEq for DavResponse {
    fn eq(&self, other: &DavResponse) -> bool {
        self.target.key() == other.target.key()
            && self.status == other.status
            && self.propstats == other.propstats
            && self.names_only == other.names_only
            && self.error == other.error
    }
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {}", status)
}

impl DavResponse {
    pub fn props(node: DavNodeRef, propstats: PropStats) -> DavResponse {
        DavResponse {
            target: ResponseTarget::Node(node),
            status: None,
            propstats,
            names_only: false,
            error: None,
            description: None,
        }
    }

    pub fn status(target: ResponseTarget, status: StatusCode) -> DavResponse {
        DavResponse {
            target,
            status: Some(status),
            propstats: PropStats::new(),
            names_only: false,
            error: None,
            description: None,
        }
    }

    pub fn with_error(mut self, error: Element) -> DavResponse {
        self.error = Some(error);
        self
    }

    pub fn render(&self, mgr: &DavManager) -> Element {
        let mut e =
            Element::new2("D:response").child(Element::new_text("D:href", self.target.href(mgr)));

        if let Some(status) = self.status {
            e.push_elem(Element::new_text("D:status", status_line(status)));
        } else {
            let mut any = false;
            for (status, props) in &self.propstats {
                if props.is_empty() {
                    continue;
                }
                any = true;
                let mut prop = Element::new2("D:prop");
                for (name, value) in props.iter() {
                    match value {
                        Some(v) if !self.names_only => prop.push_elem(v.render(name, mgr)),
                        _ => prop.push_elem(name.element()),
                    }
                }
                e.push_elem(
                    Element::new2("D:propstat")
                        .child(prop)
                        .child(Element::new_text("D:status", status_line(*status))),
                );
            }
            if !any {
                e.push_elem(
                    Element::new2("D:propstat")
                        .child(Element::new2("D:prop"))
                        .child(Element::new_text("D:status", status_line(StatusCode::OK))),
                );
            }
        }

        if let Some(ref err) = self.error {
            e.push_elem(Element::new2("D:error").child(err.clone()));
        }
        if let Some(ref d) = self.description {
            e.push_elem(Element::new_text("D:responsedescription", d.clone()));
        }
        e
    }
}

/// A `<D:multistatus>` document.
#[derive(Clone, Debug, Default)]
pub struct MultiStatus {
    pub responses: Vec<DavResponse>,
    pub sync_token: Option<String>,
}

impl MultiStatus {
    pub fn new() -> MultiStatus {
        MultiStatus::default()
    }

    pub fn push(&mut self, r: DavResponse) {
        self.responses.push(r);
    }

    pub fn to_element(&self, mgr: &DavManager) -> Element {
        let mut root = dav_root("D:multistatus");
        for r in &self.responses {
            root.push_elem(r.render(mgr));
        }
        if let Some(ref t) = self.sync_token {
            root.push_elem(Element::new_text("D:sync-token", t.clone()));
        }
        root
    }

    pub fn into_response(self, mgr: &DavManager) -> DavResult<Response<Bytes>> {
        xml_response(StatusCode::MULTI_STATUS, &self.to_element(mgr))
    }
}

/// What a report produces.
#[derive(Debug)]
pub enum ReportResult {
    MultiStatus(MultiStatus),
    /// Some reports answer with their own document type.
    Document(Element),
}

/// A complete XML response.
pub(crate) fn xml_response(status: StatusCode, doc: &Element) -> DavResult<Response<Bytes>> {
    let body = Bytes::from(doc.to_xml(true)?);
    Response::builder()
        .status(status)
        .header("Content-Type", "application/xml; charset=utf-8")
        .header("Content-Length", body.len().to_string())
        .body(body)
        .map_err(|_| DavError::XmlWriteError)
}

/// A response without a body.
pub(crate) fn empty_response(status: StatusCode) -> DavResult<Response<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Length", "0")
        .body(Bytes::new())
        .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davprops::{PropMap, PropName, add_propstat};
    use crate::davvalue::PropValue;
    use crate::manager::tests::test_manager;

    #[test]
    fn empty_propstat() {
        let mgr = test_manager(None);
        let node = mgr.resolve_path(&DavPath::root(), true).unwrap();
        let r = DavResponse::props(node, PropStats::new());
        let e = r.render(&mgr);
        let ps: Vec<_> = e.elements().filter(|e| e.name == "propstat").collect();
        assert_eq!(ps.len(), 1);
        assert_eq!(
            ps[0].find_elem("DAV:", "status").unwrap().text_content(),
            "HTTP/1.1 200 OK"
        );
    }

    #[test]
    fn grouped_by_status() {
        let mgr = test_manager(None);
        let node = mgr.resolve_path(&DavPath::root(), true).unwrap();
        let mut stats = PropStats::new();
        add_propstat(
            &mut stats,
            StatusCode::OK,
            PropName::dav("displayname"),
            Some(PropValue::text("root")),
        );
        add_propstat(&mut stats, StatusCode::NOT_FOUND, PropName::dav("getetag"), None);
        stats.insert(StatusCode::FORBIDDEN, PropMap::new());
        let e = DavResponse::props(node, stats).render(&mgr);
        let statuses: Vec<_> = e
            .elements()
            .filter(|e| e.name == "propstat")
            .map(|p| p.find_elem("DAV:", "status").unwrap().text_content())
            .collect();
        assert_eq!(statuses, vec!["HTTP/1.1 200 OK", "HTTP/1.1 404 Not Found"]);
    }

    #[test]
    fn status_only() {
        let mgr = test_manager(None);
        let r = DavResponse::status(
            ResponseTarget::Uri("/gone.vcf".into()),
            StatusCode::NOT_FOUND,
        );
        let e = r.render(&mgr);
        assert_eq!(e.find_elem("DAV:", "href").unwrap().text_content(), "/gone.vcf");
        assert!(e.find_elem("DAV:", "propstat").is_none());
    }
}
