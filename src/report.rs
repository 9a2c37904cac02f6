//! The REPORT method and the report registry.
//!
//! A report is a strategy keyed by the name of the root element of the
//! request body. The manager owns a `ReportRegistry` that starts out with
//! the builtin reports; more can be added through `DavConfig::report`.
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::davprops::PropName;
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::handle_carddav::{AddressbookMultigetReport, AddressbookQueryReport};
use crate::manager::DavManager;
use crate::multistatus::{ReportResult, xml_response};
use crate::report_expand::ExpandPropertyReport;
use crate::report_principal::{
    AclPrincipalPropSetReport, PrincipalMatchReport, PrincipalPropertySearchReport,
    PrincipalSearchPropertySetReport,
};
use crate::report_sync::SyncCollectionReport;
use crate::xmltree_ext::ElementExt;

/// One REPORT request, after the body was parsed and the target resolved.
#[derive(Debug)]
pub struct ReportRequest {
    pub name: PropName,
    pub body: Element,
    pub node: DavNodeRef,
    pub path: DavPath,
    /// The Depth header, `0` if absent.
    pub depth: Depth,
}

/// A report implementation.
pub trait DavReport: Debug + Send + Sync {
    /// Name of the root element of the request body.
    fn name(&self) -> PropName;

    /// Can this report run on `node`. Reports that are not supported are
    /// not advertised in `supported-report-set` and fail with 403.
    #[allow(unused_variables)]
    fn supports(&self, node: &DavNodeRef, mgr: &DavManager) -> bool {
        true
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult>;
}

/// Name to implementation table.
#[derive(Debug, Clone)]
pub struct ReportRegistry(Vec<Arc<dyn DavReport>>);

impl Default for ReportRegistry {
    fn default() -> ReportRegistry {
        ReportRegistry(vec![
            Arc::new(ExpandPropertyReport),
            Arc::new(PrincipalPropertySearchReport),
            Arc::new(PrincipalSearchPropertySetReport),
            Arc::new(AclPrincipalPropSetReport),
            Arc::new(PrincipalMatchReport),
            Arc::new(SyncCollectionReport),
            Arc::new(AddressbookQueryReport),
            Arc::new(AddressbookMultigetReport),
        ])
    }
}

impl ReportRegistry {
    /// An empty registry.
    pub fn empty() -> ReportRegistry {
        ReportRegistry(Vec::new())
    }

    /// Add a report, replacing one with the same name.
    pub fn register(&mut self, report: Arc<dyn DavReport>) {
        let name = report.name();
        self.0.retain(|r| r.name() != name);
        self.0.push(report);
    }

    pub fn get(&self, name: &PropName) -> Option<&Arc<dyn DavReport>> {
        self.0.iter().find(|r| r.name() == *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DavReport>> {
        self.0.iter()
    }
}

impl DavManager {
    pub(crate) fn handle_report(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.resolve_path(&path, true)?;
        let body = Element::parse2(req.body().as_ref())?;
        let name = PropName::from_element(&body);
        debug!("REPORT {} on {}", name, path);

        let report = match self.reports.get(&name) {
            Some(r) if r.supports(&node, self) => r.clone(),
            _ => {
                debug!("report {} not supported on {}", name, path);
                return Err(DavError::ReportNotSupported);
            }
        };
        self.acl(&node, &["read"])?;

        let depth = self.depth(req.headers(), Depth::ZERO)?;
        let rreq = ReportRequest {
            name,
            body,
            node,
            path,
            depth,
        };
        match report.invoke(self, &rreq)? {
            ReportResult::MultiStatus(ms) => ms.into_response(self),
            ReportResult::Document(doc) => xml_response(StatusCode::OK, &doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::test_manager;
    use crate::multistatus::MultiStatus;

    #[derive(Debug)]
    struct Echo;

    impl DavReport for Echo {
        fn name(&self) -> PropName {
            PropName::new("urn:example", "echo")
        }

        fn invoke(&self, _mgr: &DavManager, _req: &ReportRequest) -> DavResult<ReportResult> {
            Ok(ReportResult::MultiStatus(MultiStatus::new()))
        }
    }

    #[test]
    fn register_replaces() {
        let mut reg = ReportRegistry::default();
        let n = reg.iter().count();
        reg.register(Arc::new(Echo));
        reg.register(Arc::new(Echo));
        assert_eq!(reg.iter().count(), n + 1);
        assert!(reg.get(&PropName::new("urn:example", "echo")).is_some());
        assert!(reg.get(&PropName::dav("sync-collection")).is_some());
    }

    #[test]
    fn advertised_per_node() {
        let mgr = test_manager(None);
        let docs = mgr.resolve_path(&DavPath::new("/docs/").unwrap(), true).unwrap();
        let names = mgr.supported_report_set(&docs);
        assert!(names.contains(&PropName::dav("expand-property")));
        assert!(names.contains(&PropName::dav("acl-principal-prop-set")));
        assert!(!names.contains(&PropName::carddav("addressbook-query")));

        let users = mgr
            .resolve_path(&DavPath::new("/principals/users/").unwrap(), true)
            .unwrap();
        let names = mgr.supported_report_set(&users);
        assert!(names.contains(&PropName::dav("principal-search-property-set")));
    }
}
