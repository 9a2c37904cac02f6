//! The CardDAV reports, addressbook-query and addressbook-multiget
//! (RFC 6352, sections 8.6 and 8.7).
use http::StatusCode;
use xmltree::Element;

use crate::carddav::{AddressDataProp, VCard, parse_address_data};
use crate::dav_filters::Filter;
use crate::davheaders::Depth;
use crate::davprops::{NS_CARDDAV_URI, NS_DAV_URI, PropName, PropSet};
use crate::davvalue::PropValue;
use crate::errors::{DavError, DavResult};
use crate::fs::{DavNodeRef, FsError};
use crate::manager::DavManager;
use crate::multistatus::{DavResponse, MultiStatus, ReportResult, ResponseTarget};
use crate::report::{DavReport, ReportRequest};
use crate::xmltree_ext::{ElementExt, elem_u64};

// what to return for every card: property names, plus the address-data
// projection if the client asked for one.
struct CardProps {
    names: Vec<PropName>,
    projection: Option<Vec<AddressDataProp>>,
}

impl CardProps {
    fn parse(mgr: &DavManager, body: &Element) -> CardProps {
        let Some(prop) = body.find_elem(NS_DAV_URI, "prop") else {
            return CardProps {
                names: vec![PropName::dav("getetag")],
                projection: None,
            };
        };
        CardProps {
            names: mgr.parse_propnames(prop),
            projection: prop
                .find_elem(NS_CARDDAV_URI, "address-data")
                .and_then(parse_address_data),
        }
    }

    fn response(&self, mgr: &DavManager, node: &DavNodeRef) -> DavResponse {
        if !mgr.has_privileges(node, &[PropName::dav("read")]) {
            return DavResponse::status(ResponseTarget::Node(node.clone()), StatusCode::FORBIDDEN);
        }
        let mut stats = mgr.get_node_props(node, &PropSet::Names(self.names.clone()));
        if let (Some(wanted), Some(ok)) = (&self.projection, stats.get_mut(&StatusCode::OK)) {
            let name = PropName::carddav("address-data");
            let projected = match ok.get(&name) {
                Some(Some(PropValue::AddressData(data))) => match VCard::parse(data) {
                    Ok(card) => Some(card.project(wanted).to_string()),
                    Err(e) => {
                        warn!("{}: cannot parse vCard: {}", node.path(), e);
                        None
                    }
                },
                _ => None,
            };
            if let Some(p) = projected {
                ok.insert(name, Some(PropValue::AddressData(p)));
            }
        }
        DavResponse::props(node.clone(), stats)
    }
}

/// CARD:addressbook-query.
#[derive(Debug)]
pub struct AddressbookQueryReport;

impl AddressbookQueryReport {
    // the cards below `coll`, depth first.
    fn collect(
        mgr: &DavManager,
        coll: &DavNodeRef,
        depth: Depth,
        out: &mut Vec<DavNodeRef>,
    ) -> DavResult<()> {
        let children = match mgr.store().children(coll) {
            Ok(c) => c,
            Err(FsError::NotImplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for child in children {
            if child.as_card().is_some() {
                out.push(child);
            } else if child.is_collection() {
                if let Some(next) = depth.decrement() {
                    Self::collect(mgr, &child, next, out)?;
                }
            }
        }
        Ok(())
    }
}

impl DavReport for AddressbookQueryReport {
    fn name(&self) -> PropName {
        PropName::carddav("addressbook-query")
    }

    fn supports(&self, node: &DavNodeRef, _mgr: &DavManager) -> bool {
        node.is_addressbook() || node.as_card().is_some()
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let body = &req.body;
        let filter = match body.find_elem(NS_CARDDAV_URI, "filter") {
            Some(f) => Filter::parse(f)?,
            None => Filter::default(),
        };
        let limit = body
            .find_elem(NS_CARDDAV_URI, "limit")
            .and_then(|l| l.find_elem(NS_CARDDAV_URI, "nresults"))
            .and_then(elem_u64);
        let props = CardProps::parse(mgr, body);

        // depth 0 on an address book still means its members.
        let mut cards = Vec::new();
        if req.node.as_card().is_some() {
            cards.push(req.node.clone());
        } else {
            Self::collect(mgr, &req.node, req.depth, &mut cards)?;
        }

        let mut ms = MultiStatus::new();
        let mut matched = 0u64;
        let mut truncated = false;
        for node in &cards {
            if !mgr.has_privileges(node, &[PropName::dav("read")]) {
                continue;
            }
            let Some(card) = node.as_card() else {
                continue;
            };
            let vcard = match VCard::parse(&card.vcard()) {
                Ok(v) => v,
                Err(e) => {
                    warn!("addressbook-query: skipping {}: {}", node.path(), e);
                    continue;
                }
            };
            if !filter.matches(&vcard) {
                continue;
            }
            if limit.is_some_and(|l| matched >= l) {
                truncated = true;
                break;
            }
            matched += 1;
            ms.push(props.response(mgr, node));
        }
        if truncated {
            debug!("addressbook-query: truncated at {} results", matched);
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

/// CARD:addressbook-multiget.
#[derive(Debug)]
pub struct AddressbookMultigetReport;

impl DavReport for AddressbookMultigetReport {
    fn name(&self) -> PropName {
        PropName::carddav("addressbook-multiget")
    }

    fn supports(&self, node: &DavNodeRef, _mgr: &DavManager) -> bool {
        node.is_addressbook() || node.as_card().is_some()
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let hrefs: Vec<String> = req
            .body
            .elements()
            .filter(|e| e.is_elem(NS_DAV_URI, "href"))
            .map(|e| e.text_content())
            .collect();
        if hrefs.is_empty() {
            return Err(DavError::BadRequest("addressbook-multiget without href".into()));
        }
        let props = CardProps::parse(mgr, &req.body);

        let mut ms = MultiStatus::new();
        for href in hrefs {
            let node = mgr
                .uri_to_path(&href)
                .and_then(|p| mgr.resolve_path(&p, true).ok());
            match node {
                Some(node) => ms.push(props.response(mgr, &node)),
                None => {
                    trace!("addressbook-multiget: {} not found", href);
                    ms.push(DavResponse::status(
                        ResponseTarget::Uri(href),
                        StatusCode::NOT_FOUND,
                    ));
                }
            }
        }
        Ok(ReportResult::MultiStatus(ms))
    }
}
