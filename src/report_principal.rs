//! The principal reports of RFC 3744, section 9.
use http::StatusCode;
use xmltree::Element;

use crate::acl::{PrincipalMatcher, principal_is_href};
use crate::davprops::{NS_DAV_URI, PropName, PropSet};
use crate::davvalue::Href;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::manager::DavManager;
use crate::multistatus::{DavResponse, MultiStatus, ReportResult, ResponseTarget};
use crate::report::{DavReport, ReportRequest};
use crate::xmltree_ext::{ElementExt, dav_root};

// the names in the <D:prop> child of the request, if any.
fn requested_props(mgr: &DavManager, body: &Element) -> Vec<PropName> {
    body.find_elem(NS_DAV_URI, "prop")
        .map(|p| mgr.parse_propnames(p))
        .unwrap_or_default()
}

// a response for a principal the caller may or may not read.
fn principal_response(mgr: &DavManager, node: &DavNodeRef, names: &[PropName]) -> DavResponse {
    if !mgr.has_privileges(node, &[PropName::dav("read")]) {
        return DavResponse::status(ResponseTarget::Node(node.clone()), StatusCode::FORBIDDEN);
    }
    let stats = mgr.get_node_props(node, &PropSet::Names(names.to_vec()));
    DavResponse::props(node.clone(), stats)
}

fn push_unique(v: &mut Vec<DavNodeRef>, node: DavNodeRef) {
    let p = node.path();
    if !v.iter().any(|n| n.path() == p) {
        v.push(node);
    }
}

/// DAV:principal-property-search (9.4).
#[derive(Debug)]
pub struct PrincipalPropertySearchReport;

impl PrincipalPropertySearchReport {
    fn parse_terms(mgr: &DavManager, body: &Element) -> DavResult<Vec<(PropName, String)>> {
        let mut terms = Vec::new();
        for ps in body
            .elements()
            .filter(|e| e.is_elem(NS_DAV_URI, "property-search"))
        {
            let m = ps
                .find_elem(NS_DAV_URI, "match")
                .ok_or_else(|| DavError::BadRequest("property-search without match".into()))?
                .text_content();
            let props = ps
                .find_elem(NS_DAV_URI, "prop")
                .ok_or_else(|| DavError::BadRequest("property-search without prop".into()))?;
            for name in mgr.parse_propnames(props) {
                terms.push((name, m.clone()));
            }
        }
        if terms.is_empty() {
            return Err(DavError::BadRequest("no property-search".into()));
        }
        Ok(terms)
    }
}

impl DavReport for PrincipalPropertySearchReport {
    fn name(&self) -> PropName {
        PropName::dav("principal-property-search")
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let terms = Self::parse_terms(mgr, &req.body)?;
        let anyof = match req.body.attributes.get("test").map(|s| s.as_str()) {
            None | Some("allof") => false,
            Some("anyof") => true,
            Some(t) => return Err(DavError::BadRequest(format!("unknown test {}", t))),
        };
        let names = requested_props(mgr, &req.body);

        let scopes: Vec<DavNodeRef> = if req
            .body
            .find_elem(NS_DAV_URI, "apply-to-principal-collection-set")
            .is_some()
        {
            mgr.principal_collections
                .iter()
                .filter_map(|p| mgr.resolve_path(p, true).ok())
                .collect()
        } else {
            vec![req.node.clone()]
        };

        let mut found = Vec::new();
        for scope in &scopes {
            let Some(search) = scope.as_search() else {
                debug!("principal-property-search: {} is not searchable", scope.path());
                continue;
            };
            for n in search.search_principals(mgr.store(), &terms, anyof)? {
                push_unique(&mut found, n);
            }
        }

        let mut ms = MultiStatus::new();
        let truncated = mgr.max_search_results.is_some_and(|max| found.len() > max);
        if let Some(max) = mgr.max_search_results {
            found.truncate(max);
        }
        for node in &found {
            ms.push(principal_response(mgr, node, &names));
        }
        if truncated {
            ms.push(
                DavResponse::status(
                    ResponseTarget::Path(req.path.clone()),
                    StatusCode::INSUFFICIENT_STORAGE,
                )
                .with_error(Element::new2("D:number-of-matches-within-limits")),
            );
        }
        Ok(ReportResult::MultiStatus(ms))
    }
}

/// DAV:principal-search-property-set (9.5).
#[derive(Debug)]
pub struct PrincipalSearchPropertySetReport;

impl DavReport for PrincipalSearchPropertySetReport {
    fn name(&self) -> PropName {
        PropName::dav("principal-search-property-set")
    }

    fn supports(&self, node: &DavNodeRef, _mgr: &DavManager) -> bool {
        node.as_search().is_some()
    }

    fn invoke(&self, _mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let search = req.node.as_search().ok_or(DavError::ReportNotSupported)?;
        let mut doc = dav_root("D:principal-search-property-set");
        for (name, description) in search.search_fields() {
            let mut desc = Element::new_text("D:description", description);
            desc.attributes.insert("xml:lang".to_string(), "en".to_string());
            doc.push_elem(
                Element::new2("D:principal-search-property")
                    .child(Element::new2("D:prop").child(name.element()))
                    .child(desc),
            );
        }
        Ok(ReportResult::Document(doc))
    }
}

/// DAV:acl-principal-prop-set (9.2).
#[derive(Debug)]
pub struct AclPrincipalPropSetReport;

impl DavReport for AclPrincipalPropSetReport {
    fn name(&self) -> PropName {
        PropName::dav("acl-principal-prop-set")
    }

    fn supports(&self, node: &DavNodeRef, mgr: &DavManager) -> bool {
        mgr.effective_acl(node).is_some()
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        mgr.acl(&req.node, &["read-acl"])?;
        let acl = mgr
            .effective_acl(&req.node)
            .ok_or(DavError::ReportNotSupported)?;
        let names = requested_props(mgr, &req.body);

        let mut principals = Vec::new();
        for ace in &acl.0 {
            let href = match ace.principal {
                PrincipalMatcher::Href(ref h) => Some(h.clone()),
                PrincipalMatcher::Property(ref name) => {
                    let computed = mgr.props(&req.node, &PropSet::Names(vec![name.clone()]));
                    match computed.values.get(name) {
                        Some(Some(v)) => v.hrefs().and_then(|h| h.into_iter().next()),
                        _ => None,
                    }
                }
                PrincipalMatcher::SelfPrincipal if req.node.as_principal().is_some() => {
                    Some(Href::node(req.node.clone()))
                }
                _ => None,
            };
            if let Some(node) = href.and_then(|h| h.get_node(mgr)) {
                if node.as_principal().is_some() {
                    push_unique(&mut principals, node);
                }
            }
        }

        let mut ms = MultiStatus::new();
        for node in &principals {
            ms.push(principal_response(mgr, node, &names));
        }
        Ok(ReportResult::MultiStatus(ms))
    }
}

/// DAV:principal-match (9.3).
#[derive(Debug)]
pub struct PrincipalMatchReport;

impl DavReport for PrincipalMatchReport {
    fn name(&self) -> PropName {
        PropName::dav("principal-match")
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let self_mode = req.body.find_elem(NS_DAV_URI, "self").is_some();
        let property = req.body.find_elem(NS_DAV_URI, "principal-property");
        let names = requested_props(mgr, &req.body);
        let mut ms = MultiStatus::new();

        let lookup = match (self_mode, property) {
            (true, Some(_)) => {
                return Err(DavError::BadRequest("both self and principal-property".into()));
            }
            (false, None) => {
                return Err(DavError::BadRequest("need self or principal-property".into()));
            }
            (true, None) => None,
            (false, Some(p)) => Some(
                p.first_elem()
                    .map(PropName::from_element)
                    .ok_or_else(|| DavError::BadRequest("empty principal-property".into()))?,
            ),
        };

        let Some(principal) = mgr.principal().cloned() else {
            return Ok(ReportResult::MultiStatus(ms));
        };

        match lookup {
            None => {
                let Some(search) = req.node.as_search() else {
                    return Ok(ReportResult::MultiStatus(ms));
                };
                for node in search.match_self(mgr.store(), &principal.path())? {
                    ms.push(principal_response(mgr, &node, &names));
                }
            }
            Some(lookup) => {
                let mut wanted = names.clone();
                if !wanted.contains(&lookup) {
                    wanted.push(lookup.clone());
                }
                let set = PropSet::Names(wanted);
                let all = mgr.get_path_props(&req.node, &set, crate::davheaders::Depth::Infinity)?;
                for (node, mut stats) in all {
                    let hit = stats
                        .get(&StatusCode::OK)
                        .and_then(|ok| ok.get(&lookup).cloned().flatten())
                        .and_then(|v| v.hrefs())
                        .is_some_and(|hrefs| {
                            hrefs.iter().any(|h| principal_is_href(&principal, h, mgr))
                        });
                    if !hit || !mgr.has_privileges(&node, &[PropName::dav("read")]) {
                        continue;
                    }
                    // the lookup property was added by us.
                    if !names.contains(&lookup) {
                        for bucket in stats.values_mut() {
                            bucket.remove(&lookup);
                        }
                    }
                    ms.push(DavResponse::props(node, stats));
                }
            }
        }
        Ok(ReportResult::MultiStatus(ms))
    }
}
