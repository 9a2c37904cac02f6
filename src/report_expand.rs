//! The DAV:expand-property report (RFC 3253, 3.8).
use http::StatusCode;
use xmltree::Element;

use crate::davprops::{NS_DAV_URI, PropName, PropSet, PropStats};
use crate::davvalue::PropValue;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::manager::DavManager;
use crate::multistatus::{DavResponse, MultiStatus, ReportResult, ResponseTarget};
use crate::report::{DavReport, ReportRequest};
use crate::xmltree_ext::ElementExt;

/// Requested properties, each with the properties to expand on the
/// resources its hrefs point to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandTree(pub Vec<(PropName, ExpandTree)>);

impl ExpandTree {
    /// Parse the `<D:property>` children of `elem`. Nesting deeper than
    /// `max_depth` is refused.
    pub fn parse(elem: &Element, max_depth: u32) -> DavResult<ExpandTree> {
        let mut v = Vec::new();
        for p in elem.elements().filter(|e| e.is_elem(NS_DAV_URI, "property")) {
            let name = p
                .attributes
                .get("name")
                .ok_or_else(|| DavError::BadRequest("property without name".into()))?;
            let ns = p.attributes.get("namespace").map(|s| s.as_str()).unwrap_or(NS_DAV_URI);
            let sub = if p.has_elements() {
                if max_depth == 0 {
                    return Err(DavError::BadRequest("expand-property nested too deep".into()));
                }
                ExpandTree::parse(p, max_depth - 1)?
            } else {
                ExpandTree::default()
            };
            v.push((PropName::new(ns, name.as_str()), sub));
        }
        Ok(ExpandTree(v))
    }

    fn names(&self) -> Vec<PropName> {
        self.0.iter().map(|(n, _)| n.clone()).collect()
    }

    fn subtree(&self, name: &PropName) -> Option<&ExpandTree> {
        self.0
            .iter()
            .find(|(n, t)| n == name && !t.0.is_empty())
            .map(|(_, t)| t)
    }
}

// expand the href-valued properties in the 200 bucket.
fn expand_stats(mgr: &DavManager, tree: &ExpandTree, mut stats: PropStats) -> PropStats {
    let Some(ok) = stats.get_mut(&StatusCode::OK) else {
        return stats;
    };
    let names: Vec<PropName> = ok.names().cloned().collect();
    for name in names {
        let Some(sub) = tree.subtree(&name) else {
            continue;
        };
        let hrefs = match ok.get(&name) {
            Some(Some(v)) => v.hrefs(),
            _ => None,
        };
        let Some(hrefs) = hrefs else {
            continue;
        };
        let responses = hrefs
            .iter()
            .map(|h| match h.get_node(mgr) {
                Some(node) => expand_node(mgr, &node, sub),
                None => DavResponse::status(
                    ResponseTarget::Uri(h.get_uri(mgr)),
                    StatusCode::NOT_FOUND,
                ),
            })
            .collect();
        ok.insert(name, Some(PropValue::Expanded(responses)));
    }
    stats
}

fn expand_node(mgr: &DavManager, node: &DavNodeRef, tree: &ExpandTree) -> DavResponse {
    if !mgr.has_privileges(node, &[PropName::dav("read")]) {
        return DavResponse::status(ResponseTarget::Node(node.clone()), StatusCode::FORBIDDEN);
    }
    let stats = mgr.get_node_props(node, &PropSet::Names(tree.names()));
    DavResponse::props(node.clone(), expand_stats(mgr, tree, stats))
}

#[derive(Debug)]
pub struct ExpandPropertyReport;

impl DavReport for ExpandPropertyReport {
    fn name(&self) -> PropName {
        PropName::dav("expand-property")
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let tree = ExpandTree::parse(&req.body, mgr.expand_property_depth)?;
        let set = PropSet::Names(tree.names());
        let mut ms = MultiStatus::new();
        for (node, stats) in mgr.get_path_props(&req.node, &set, req.depth)? {
            if !mgr.has_privileges(&node, &[PropName::dav("read")]) {
                continue;
            }
            ms.push(DavResponse::props(node, expand_stats(mgr, &tree, stats)));
        }
        Ok(ReportResult::MultiStatus(ms))
    }
}
