//! The per-request manager.
//!
//! At the start of a request, the `DavConfig` is turned into a
//! `DavManager`. It holds the store, the locksystem and the requesting
//! principal, and it is what all handlers and reports work through:
//! property computation, authorization, URI mapping and capability
//! negotiation.
use std::time::Duration;

use headers::HeaderMapExt;
use http::{HeaderMap, StatusCode};
use xmltree::Element;

use crate::acl::{Acl, DEFAULT_PRIVILEGES};
use crate::collation::SUPPORTED_COLLATIONS;
use crate::davheaders::{DavTimeout, Depth, Timeout};
use crate::davpath::DavPath;
use crate::davprops::{
    DEFAULT_PROPS, NS_CALDAV_URI, NS_CARDDAV_URI, PropMap, PropName, PropSet, PropStats, RO_PROPS,
    add_propstat,
};
use crate::davrequest::parse_prop_values;
use crate::davvalue::{Href, PropValue, TypeMap};
use crate::errors::{DavError, DavResult};
use crate::fs::{DavNodeRef, DavStore, FsError, is_collection_like};
use crate::ls::DavLockSystem;
use crate::report::ReportRegistry;
use crate::util::{DavMethod, DavMethodSet};

/// Properties computed for one node.
#[derive(Debug, Default)]
pub struct ComputedProps {
    pub values: PropMap,
    /// Names that were asked for but may not be read.
    pub forbidden: Vec<PropName>,
}

/// See the module documentation.
#[derive(Debug)]
pub struct DavManager {
    pub(crate) prefix: String,
    /// Scheme and authority used for absolute URIs.
    pub(crate) base_url: Option<url::Url>,
    /// Host the request was sent to.
    pub(crate) host: Option<String>,
    pub(crate) store: Box<dyn DavStore>,
    pub(crate) ls: Option<Box<dyn DavLockSystem>>,
    pub(crate) allow: Option<DavMethodSet>,
    pub(crate) principal: Option<DavNodeRef>,
    pub(crate) principal_collections: Vec<DavPath>,
    pub(crate) sync_token_prefix: String,
    pub(crate) expand_property_depth: u32,
    pub(crate) max_lock_timeout: Option<Duration>,
    pub(crate) infinite_depth: bool,
    pub(crate) max_search_results: Option<usize>,
    pub(crate) default_acl: Option<Acl>,
    pub(crate) type_map: TypeMap,
    pub(crate) reports: ReportRegistry,
}

// helper.
fn set_if_wanted(
    values: &mut PropMap,
    wanted: &PropSet,
    name: PropName,
    f: impl FnOnce() -> Option<PropValue>,
) {
    if wanted.wants(&name) && !values.contains(&name) {
        if let Some(v) = f() {
            values.insert(name, Some(v));
        }
    }
}

fn hrefs(paths: Vec<DavPath>) -> PropValue {
    PropValue::HrefList(paths.into_iter().map(Href::path).collect())
}

impl DavManager {
    pub fn store(&self) -> &dyn DavStore {
        self.store.as_ref()
    }

    pub fn principal(&self) -> Option<&DavNodeRef> {
        self.principal.as_ref()
    }

    pub fn locksystem(&self) -> Option<&dyn DavLockSystem> {
        self.ls.as_deref()
    }

    //
    // URI helpers.
    //

    /// URI for a path. Collections (and principals) get a trailing slash.
    pub fn path_uri(&self, path: &DavPath, path_only: bool) -> String {
        let coll = self
            .store
            .node(path)
            .map(|n| is_collection_like(&n))
            .unwrap_or(false);
        self.make_uri(path, coll, path_only)
    }

    pub fn node_uri(&self, node: &DavNodeRef, path_only: bool) -> String {
        self.make_uri(&node.path(), is_collection_like(node), path_only)
    }

    fn make_uri(&self, path: &DavPath, coll: bool, path_only: bool) -> String {
        let p = format!("{}{}", self.prefix, path.as_url_string(coll));
        match self.base_url {
            Some(ref base) if !path_only => {
                format!("{}{}", base.as_str().trim_end_matches('/'), p)
            }
            _ => p,
        }
    }

    /// Map a URI (absolute or path-absolute) to a path below the prefix.
    /// URIs for another host map to `None`.
    pub fn uri_to_path(&self, uri: &str) -> Option<DavPath> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let url = url::Url::parse(uri).ok()?;
            let our_host = match self.base_url {
                Some(ref b) => b.host_str().map(|h| h.to_string()),
                None => self.host.clone(),
            };
            if let (Some(ours), Some(theirs)) = (our_host, url.host_str()) {
                let ours = ours.split(':').next().unwrap_or("");
                if !ours.eq_ignore_ascii_case(theirs) {
                    debug!("uri_to_path: {} is on another host", uri);
                    return None;
                }
            }
            return DavPath::from_url(&url, &self.prefix).ok();
        }
        DavPath::from_str_and_prefix(uri, &self.prefix).ok()
    }

    /// Resolve a URI to a node.
    pub fn resolve_uri(&self, uri: &str, exact: bool) -> DavResult<DavNodeRef> {
        let path = self
            .uri_to_path(uri)
            .ok_or_else(|| DavError::BadRequest(format!("cannot resolve {}", uri)))?;
        self.resolve_path(&path, exact)
    }

    /// Resolve a path to a node. If not `exact`, the deepest existing
    /// node on the path is returned.
    pub fn resolve_path(&self, path: &DavPath, exact: bool) -> DavResult<DavNodeRef> {
        if exact {
            Ok(self.store.node(path)?)
        } else {
            Ok(self.store.lookup(path)?.0)
        }
    }

    //
    // Header helpers.
    //

    /// The Depth header, or `default` if absent.
    pub fn depth(&self, headers: &HeaderMap, default: Depth) -> DavResult<Depth> {
        match headers.typed_try_get::<Depth>() {
            Ok(Some(d)) => Ok(d),
            Ok(None) => Ok(default),
            Err(_) => Err(DavError::BadRequest("invalid Depth header".into())),
        }
    }

    /// Like `depth`, but only the values in `allowed` are accepted.
    pub fn depth_one_of(
        &self,
        headers: &HeaderMap,
        default: Depth,
        allowed: &[Depth],
    ) -> DavResult<Depth> {
        let d = self.depth(headers, default)?;
        if allowed.contains(&d) {
            Ok(d)
        } else {
            Err(DavError::BadRequest(format!("Depth {} not allowed", d)))
        }
    }

    /// The requested lock timeout, capped at `max_lock_timeout`.
    /// `None` is infinite.
    pub fn timeout(&self, headers: &HeaderMap) -> DavResult<Option<Duration>> {
        let requested = match headers.typed_try_get::<Timeout>() {
            Ok(Some(t)) => match t.0.first() {
                Some(DavTimeout::Seconds(n)) => Some(Duration::from_secs(*n as u64)),
                _ => None,
            },
            Ok(None) => None,
            Err(_) => return Err(DavError::BadRequest("invalid Timeout header".into())),
        };
        Ok(match (requested, self.max_lock_timeout) {
            (Some(r), Some(max)) => Some(r.min(max)),
            (None, Some(max)) => Some(max),
            (r, None) => r,
        })
    }

    //
    // Authorization.
    //

    /// The ACL that applies to a node: its own, else the nearest
    /// ancestor's (marked as inherited), else the configured default.
    pub fn effective_acl(&self, node: &DavNodeRef) -> Option<Acl> {
        if let Some(acl) = node.acl() {
            return Some(acl);
        }
        let mut path = node.path();
        while !path.is_root() {
            path = path.parent();
            if let Ok(n) = self.store.node(&path) {
                if let Some(acl) = n.acl() {
                    return Some(acl.inherited_from(&path));
                }
            }
        }
        self.default_acl.clone()
    }

    // ancestor the ACL was inherited from.
    fn inherited_from(&self, node: &DavNodeRef) -> Option<DavPath> {
        if node.acl().is_some() {
            return None;
        }
        let mut path = node.path();
        while !path.is_root() {
            path = path.parent();
            if let Ok(n) = self.store.node(&path) {
                if n.acl().is_some() {
                    return Some(path);
                }
            }
        }
        None
    }

    pub fn has_privileges(&self, node: &DavNodeRef, privileges: &[PropName]) -> bool {
        match self.effective_acl(node) {
            Some(acl) => acl.check(self.principal.as_ref(), privileges, Some(node), self),
            None => false,
        }
    }

    /// The authorization check point.
    pub fn acl(&self, node: &DavNodeRef, privileges: &[&str]) -> DavResult<()> {
        let privs: Vec<PropName> = privileges.iter().map(|p| PropName::dav(p)).collect();
        if self.has_privileges(node, &privs) {
            return Ok(());
        }
        debug!("need privileges {:?} on {}", privs, node.path());
        Err(DavError::NeedPrivileges {
            href: self.node_uri(node, true),
            privileges: privs,
        })
    }

    //
    // Capability negotiation.
    //

    pub fn supported_report_set(&self, node: &DavNodeRef) -> Vec<PropName> {
        let mut v: Vec<PropName> = self
            .reports
            .iter()
            .filter(|r| r.supports(node, self))
            .map(|r| r.name())
            .collect();
        for r in node.dav_reports() {
            if !v.contains(&r) {
                v.push(r);
            }
        }
        v
    }

    /// Compliance classes for the `DAV:` header.
    pub fn dav_features(&self, node: Option<&DavNodeRef>) -> Vec<String> {
        let mut v = vec!["1".to_string()];
        if self.ls.is_some() {
            v.push("2".to_string());
        }
        v.push("3".to_string());
        v.push("access-control".to_string());
        v.push("extended-mkcol".to_string());
        if let Some(node) = node {
            if node.is_addressbook() || node.as_card().is_some() || node.as_principal().is_some()
            {
                v.push("addressbook".to_string());
            }
            if node.is_calendar() {
                v.push("calendar-access".to_string());
            }
            if node.as_history().is_some() {
                v.push("sync-collection".to_string());
            }
            for f in node.dav_features() {
                if !v.contains(&f) {
                    v.push(f);
                }
            }
        }
        v
    }

    /// Methods for the `Allow` header.
    pub fn allowed_methods(&self, node: Option<&DavNodeRef>) -> Vec<DavMethod> {
        let mut v = vec![DavMethod::Options];
        match node {
            Some(node) => {
                v.extend([
                    DavMethod::PropFind,
                    DavMethod::PropPatch,
                    DavMethod::Delete,
                    DavMethod::Copy,
                    DavMethod::Move,
                    DavMethod::Report,
                    DavMethod::Acl,
                ]);
                if node.as_creator().is_some() {
                    v.push(DavMethod::MkCol);
                }
                if self.ls.is_some() {
                    v.extend([DavMethod::Lock, DavMethod::Unlock]);
                }
                for m in node.dav_methods() {
                    if !v.contains(&m) {
                        v.push(m);
                    }
                }
            }
            None => {
                v.push(DavMethod::MkCol);
                if self.ls.is_some() {
                    v.push(DavMethod::Lock);
                }
            }
        }
        if let Some(ref allow) = self.allow {
            v.retain(|m| allow.contains(*m));
        }
        v
    }

    pub(crate) fn allow_strings(&self, node: Option<&DavNodeRef>) -> Vec<String> {
        self.allowed_methods(node)
            .iter()
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Decode a `<D:prop>` container into values.
    pub fn parse_props(&self, prop: &Element) -> DavResult<PropMap> {
        parse_prop_values(prop, &self.type_map)
    }

    /// Decode a `<D:prop>` container into names.
    pub fn parse_propnames(&self, prop: &Element) -> Vec<PropName> {
        use crate::xmltree_ext::ElementExt;
        prop.elements().map(PropName::from_element).collect()
    }

    //
    // Property computation.
    //

    /// All resource type tags that apply to a node, in fixed order.
    pub fn resource_type(&self, node: &DavNodeRef) -> Vec<PropName> {
        let mut v = Vec::new();
        if node.is_collection() {
            v.push(PropName::dav("collection"));
        }
        if node.as_principal().is_some() {
            v.push(PropName::dav("principal"));
        }
        if node.is_calendar() {
            v.push(PropName::caldav("calendar"));
        }
        if node.is_addressbook() {
            v.push(PropName::carddav("addressbook"));
        }
        if node.is_directory() {
            v.push(PropName::carddav("directory"));
        }
        v
    }

    pub fn sync_token(&self, node: &DavNodeRef) -> Option<String> {
        node.as_history()
            .map(|h| format!("{}{}", self.sync_token_prefix, h.sync_token()))
    }

    /// Compute the properties of a node. Values the node provides itself
    /// are never overwritten by computed ones.
    pub fn props(&self, node: &DavNodeRef, wanted: &PropSet) -> ComputedProps {
        let mut values = node.dav_props(wanted);
        values.retain(|n| wanted.wants(n));
        let mut forbidden = Vec::new();
        let dav = PropName::dav;

        set_if_wanted(&mut values, wanted, dav("resourcetype"), || {
            Some(PropValue::ResourceType(self.resource_type(node)))
        });
        set_if_wanted(&mut values, wanted, dav("getetag"), || {
            node.etag().map(PropValue::Text)
        });
        set_if_wanted(&mut values, wanted, dav("getlastmodified"), || {
            node.modified().map(PropValue::HttpDate)
        });
        if let Some(ref ls) = self.ls {
            set_if_wanted(&mut values, wanted, dav("lockdiscovery"), || {
                Some(PropValue::LockDiscovery {
                    locks: ls.discover(&node.path(), false),
                    show_token: false,
                })
            });
            set_if_wanted(&mut values, wanted, dav("supportedlock"), || {
                Some(PropValue::SupportedLock)
            });
        }
        set_if_wanted(&mut values, wanted, dav("supported-report-set"), || {
            Some(PropValue::SupportedReportSet(self.supported_report_set(node)))
        });
        set_if_wanted(&mut values, wanted, dav("current-user-principal"), || {
            Some(match self.principal {
                Some(ref p) => PropValue::Href(Href::node(p.clone())),
                None => PropValue::Tag(dav("unauthenticated"), None),
            })
        });
        set_if_wanted(&mut values, wanted, dav("principal-collection-set"), || {
            Some(hrefs(self.principal_collections.clone()))
        });
        set_if_wanted(&mut values, wanted, dav("owner"), || {
            node.dav_owner().map(|p| PropValue::Href(Href::path(p)))
        });
        set_if_wanted(&mut values, wanted, dav("group"), || {
            node.dav_group().map(|p| PropValue::Href(Href::path(p)))
        });

        if let Some(p) = node.as_principal() {
            set_if_wanted(&mut values, wanted, dav("principal-URL"), || {
                Some(PropValue::Href(Href::node(node.clone())))
            });
            set_if_wanted(&mut values, wanted, dav("group-membership"), || {
                Some(hrefs(p.group_membership()))
            });
            set_if_wanted(&mut values, wanted, dav("group-member-set"), || {
                Some(hrefs(p.group_member_set()))
            });
            set_if_wanted(&mut values, wanted, dav("alternate-URI-set"), || {
                Some(PropValue::HrefList(
                    p.alternate_uri_set().into_iter().map(Href::uri).collect(),
                ))
            });
            set_if_wanted(&mut values, wanted, PropName::caldav("calendar-home-set"), || {
                Some(hrefs(p.calendar_home_set()))
            });
            set_if_wanted(
                &mut values,
                wanted,
                PropName::carddav("addressbook-home-set"),
                || Some(hrefs(p.addressbook_home_set())),
            );
            set_if_wanted(&mut values, wanted, PropName::carddav("directory-gateway"), || {
                Some(hrefs(p.directory_gateway()))
            });
        }

        // ACL properties need read-acl.
        let acl_props = [dav("acl"), dav("acl-restrictions"), dav("inherited-acl-set")];
        if acl_props.iter().any(|n| wanted.wants(n) && !values.contains(n)) {
            if self.has_privileges(node, &[dav("read-acl")]) {
                set_if_wanted(&mut values, wanted, dav("acl"), || {
                    self.effective_acl(node).map(PropValue::Acl)
                });
                set_if_wanted(&mut values, wanted, dav("acl-restrictions"), || {
                    Some(PropValue::AclRestrictions(node.acl_restrictions()))
                });
                set_if_wanted(&mut values, wanted, dav("inherited-acl-set"), || {
                    Some(hrefs(self.inherited_from(node).into_iter().collect()))
                });
            } else {
                for n in acl_props {
                    if wanted.wants(&n) && !values.contains(&n) {
                        forbidden.push(n);
                    }
                }
            }
        }
        let cups = dav("current-user-privilege-set");
        if wanted.wants(&cups) && !values.contains(&cups) {
            if self.has_privileges(node, &[dav("read-current-user-privilege-set")]) {
                let privs = self
                    .effective_acl(node)
                    .map(|acl| acl.all_privs(self.principal.as_ref(), Some(node), self))
                    .unwrap_or_default();
                values.insert(cups, Some(PropValue::PrivilegeList(privs.into_iter().collect())));
            } else {
                forbidden.push(cups);
            }
        }
        set_if_wanted(&mut values, wanted, dav("supported-privilege-set"), || {
            Some(PropValue::SupportedPrivilegeSet(DEFAULT_PRIVILEGES.clone()))
        });

        let collations = || {
            Some(PropValue::SupportedCollationSet(
                SUPPORTED_COLLATIONS.iter().map(|c| c.to_string()).collect(),
            ))
        };
        if node.is_calendar() {
            set_if_wanted(
                &mut values,
                wanted,
                PropName::new(NS_CALDAV_URI, "supported-collation-set"),
                collations,
            );
        }
        if node.is_addressbook() {
            set_if_wanted(
                &mut values,
                wanted,
                PropName::new(NS_CARDDAV_URI, "supported-collation-set"),
                collations,
            );
            set_if_wanted(
                &mut values,
                wanted,
                PropName::carddav("supported-address-data"),
                || Some(PropValue::SupportedAddressData),
            );
        }
        if let Some(card) = node.as_card() {
            set_if_wanted(&mut values, wanted, PropName::carddav("address-data"), || {
                Some(PropValue::AddressData(card.vcard()))
            });
        }
        set_if_wanted(&mut values, wanted, dav("sync-token"), || {
            self.sync_token(node).map(PropValue::Text)
        });

        ComputedProps { values, forbidden }
    }

    /// Properties of one node, grouped by status.
    ///
    /// For explicit names, anything not computed is 404, unless it was
    /// forbidden (403). `allprop` only ever reports 200.
    pub fn get_node_props(&self, node: &DavNodeRef, wanted: &PropSet) -> PropStats {
        let mut stats = PropStats::new();
        let names: Vec<PropName> = match wanted {
            PropSet::All(_) => {
                let computed = self.props(node, wanted);
                for (n, v) in computed.values {
                    add_propstat(&mut stats, StatusCode::OK, n, v);
                }
                return stats;
            }
            PropSet::Default => DEFAULT_PROPS.clone(),
            PropSet::Names(names) => names.clone(),
        };
        let mut computed = self.props(node, &PropSet::Names(names.clone()));
        for n in names {
            if let Some(v) = computed.values.remove(&n) {
                add_propstat(&mut stats, StatusCode::OK, n, v);
            } else if computed.forbidden.contains(&n) {
                add_propstat(&mut stats, StatusCode::FORBIDDEN, n, None);
            } else {
                add_propstat(&mut stats, StatusCode::NOT_FOUND, n, None);
            }
        }
        stats
    }

    /// `get_node_props` over a node and its descendants, depth first,
    /// node before children.
    pub fn get_path_props(
        &self,
        node: &DavNodeRef,
        wanted: &PropSet,
        depth: Depth,
    ) -> DavResult<Vec<(DavNodeRef, PropStats)>> {
        let mut out = Vec::new();
        self.get_path_props2(node, wanted, depth, &mut out)?;
        Ok(out)
    }

    fn get_path_props2(
        &self,
        node: &DavNodeRef,
        wanted: &PropSet,
        depth: Depth,
        out: &mut Vec<(DavNodeRef, PropStats)>,
    ) -> DavResult<()> {
        out.push((node.clone(), self.get_node_props(node, wanted)));
        let Some(next) = depth.decrement() else {
            return Ok(());
        };
        if !node.is_collection() && node.as_principal().is_none() {
            return Ok(());
        }
        let children = match self.store.children(node) {
            Ok(c) => c,
            Err(FsError::NotImplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for child in children {
            self.get_path_props2(&child, wanted, next, out)?;
        }
        Ok(())
    }

    /// Apply a PROPPATCH.
    ///
    /// Protected properties are 403 and dropped. The rest goes to the
    /// node's setter in one call, and is 200 or 403 as a whole.
    pub fn set_node_props(&self, node: &DavNodeRef, props: PropMap) -> PropStats {
        let mut stats = PropStats::new();
        let mut rest = PropMap::new();
        for (n, v) in props {
            if RO_PROPS.contains(&n) {
                add_propstat(&mut stats, StatusCode::FORBIDDEN, n, None);
            } else {
                rest.insert(n, v);
            }
        }
        if rest.is_empty() {
            return stats;
        }
        let status = match node.as_setter() {
            None => StatusCode::FORBIDDEN,
            Some(setter) => match setter.set_dav_props(&rest) {
                Ok(true) => StatusCode::OK,
                Ok(false) => StatusCode::FORBIDDEN,
                Err(e) => {
                    warn!("set_dav_props on {}: {}", node.path(), e);
                    StatusCode::FORBIDDEN
                }
            },
        };
        for n in rest.names() {
            add_propstat(&mut stats, status, n.clone(), None);
        }
        stats
    }

    /// Create a member through the parent's creation capability.
    pub fn make_collection(
        &self,
        parent: &DavNodeRef,
        name: &str,
        resource_type: &[PropName],
        props: &PropMap,
    ) -> DavResult<(DavNodeRef, PropStats)> {
        let creator = parent
            .as_creator()
            .ok_or_else(|| DavError::NotImplemented(Vec::new()))?;
        let node = creator.dav_create(name, resource_type, props)?;
        let mut names = vec![PropName::dav("resourcetype")];
        names.extend(props.names().cloned());
        let stats = self.get_node_props(&node, &PropSet::Names(names));
        Ok((node, stats))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::acl::{Ace, PrincipalMatcher};
    use crate::fs::{DavNode, DavPropSetter, FsResult};
    use crate::davhandler::DavConfig;
    use crate::memfs::{MemFs, NodeKind};

    /// Two users, one group with alice in it, and a small document tree.
    /// The root grants everything to everyone.
    pub(crate) fn test_fs() -> Box<MemFs> {
        let fs = MemFs::new();
        fs.set_acl("/", Acl(vec![Ace::grant(PrincipalMatcher::All, &["all"])]))
            .unwrap();
        fs.create("/principals/", NodeKind::Collection).unwrap();
        fs.create("/principals/users/", NodeKind::PrincipalCollection).unwrap();
        fs.create("/principals/groups/", NodeKind::PrincipalCollection).unwrap();
        fs.create("/principals/users/alice/", NodeKind::Principal).unwrap();
        fs.create("/principals/users/bob/", NodeKind::Principal).unwrap();
        fs.create("/principals/groups/staff/", NodeKind::Principal).unwrap();
        fs.add_member("/principals/groups/staff/", "/principals/users/alice/")
            .unwrap();
        fs.create("/docs/", NodeKind::Collection).unwrap();
        fs.create("/docs/a.txt", NodeKind::Resource).unwrap();
        fs
    }

    pub(crate) fn manager_for(fs: &MemFs, principal: Option<&str>) -> DavManager {
        let mut config = DavConfig::new()
            .store(Box::new(fs.clone()))
            .principal_collections(vec!["/principals/users/", "/principals/groups/"]);
        if let Some(p) = principal {
            config = config.principal(p);
        }
        config.build_manager(Some("localhost".to_string()))
    }

    pub(crate) fn test_manager(principal: Option<&str>) -> DavManager {
        manager_for(&test_fs(), principal)
    }

    fn p(name: &str) -> PropName {
        PropName::dav(name)
    }

    #[test]
    fn node_values_win() {
        let fs = test_fs();
        let mgr = manager_for(&fs, None);
        fs.set_owner("/docs/", "/principals/users/bob/").unwrap();
        fs.set_prop(
            "/docs/",
            p("owner"),
            PropValue::Href(Href::uri("/principals/users/alice/")),
        )
        .unwrap();
        let node = mgr.resolve_path(&DavPath::new("/docs/").unwrap(), true).unwrap();
        let computed = mgr.props(&node, &PropSet::Names(vec![p("owner")]));
        assert_eq!(
            computed.values.get(&p("owner")),
            Some(&Some(PropValue::Href(Href::uri("/principals/users/alice/"))))
        );
    }

    #[test]
    fn allprop_exempt() {
        let fs = test_fs();
        let mgr = manager_for(&fs, None);
        fs.set_prop("/docs/a.txt", p("displayname"), PropValue::text("x")).unwrap();
        fs.set_prop("/docs/a.txt", p("getetag"), PropValue::text("\"abc\"")).unwrap();
        fs.set_prop("/docs/a.txt", p("sync-token"), PropValue::text("urn:x:1")).unwrap();
        let node = mgr.resolve_path(&DavPath::new("/docs/a.txt").unwrap(), true).unwrap();

        let stats = mgr.get_node_props(&node, &PropSet::All(vec![]));
        assert_eq!(stats.len(), 1);
        let ok = &stats[&StatusCode::OK];
        assert!(ok.contains(&p("displayname")));
        assert_eq!(ok.get(&p("getetag")), Some(&Some(PropValue::text("\"abc\""))));
        assert!(!ok.contains(&p("sync-token")));

        let stats = mgr.get_node_props(&node, &PropSet::Names(vec![p("sync-token")]));
        assert!(stats[&StatusCode::OK].contains(&p("sync-token")));
    }

    #[test]
    fn buckets() {
        let fs = test_fs();
        let mgr = manager_for(&fs, Some("/principals/users/bob/"));
        fs.set_acl(
            "/docs/",
            Acl(vec![
                Ace::deny(PrincipalMatcher::All, &["read-acl"]),
                Ace::grant(PrincipalMatcher::All, &["read"]),
            ]),
        )
        .unwrap();
        let node = mgr.resolve_path(&DavPath::new("/docs/").unwrap(), true).unwrap();
        let stats = mgr.get_node_props(
            &node,
            &PropSet::Names(vec![p("resourcetype"), p("acl"), p("nonexistent")]),
        );
        assert!(stats[&StatusCode::OK].contains(&p("resourcetype")));
        assert!(stats[&StatusCode::FORBIDDEN].contains(&p("acl")));
        assert!(stats[&StatusCode::NOT_FOUND].contains(&p("nonexistent")));
    }

    #[test]
    fn proppatch_readonly() {
        let mgr = test_manager(None);
        let node = mgr.resolve_path(&DavPath::new("/docs/").unwrap(), true).unwrap();

        let mut m = PropMap::new();
        m.insert(p("getetag"), Some(PropValue::text("\"x\"")));
        let stats = mgr.set_node_props(&node, m);
        assert_eq!(stats.len(), 1);
        assert!(stats[&StatusCode::FORBIDDEN].contains(&p("getetag")));

        let mut m = PropMap::new();
        m.insert(p("getetag"), Some(PropValue::text("\"x\"")));
        m.insert(p("displayname"), Some(PropValue::text("Docs")));
        let stats = mgr.set_node_props(&node, m);
        assert!(stats[&StatusCode::FORBIDDEN].contains(&p("getetag")));
        assert!(!stats[&StatusCode::FORBIDDEN].contains(&p("displayname")));
        assert!(stats[&StatusCode::OK].contains(&p("displayname")));
        assert!(!stats.contains_key(&StatusCode::FAILED_DEPENDENCY));
        let computed = mgr.props(&node, &PropSet::Names(vec![p("displayname")]));
        assert_eq!(computed.values.len(), 1);
    }

    // a node whose property store always gives the same answer.
    #[derive(Debug)]
    struct FixedSetter(FsResult<bool>);

    impl DavNode for FixedSetter {
        fn path(&self) -> DavPath {
            DavPath::new("/fixed").unwrap()
        }

        fn as_setter(&self) -> Option<&dyn DavPropSetter> {
            Some(self)
        }
    }

    impl DavPropSetter for FixedSetter {
        fn set_dav_props(&self, _props: &PropMap) -> FsResult<bool> {
            self.0.clone()
        }
    }

    #[test]
    fn proppatch_setter_fails() {
        let mgr = test_manager(None);
        for result in [Ok(false), Err(FsError::Forbidden)] {
            let node: DavNodeRef = Arc::new(FixedSetter(result));
            let mut m = PropMap::new();
            m.insert(p("getetag"), Some(PropValue::text("\"x\"")));
            m.insert(p("displayname"), Some(PropValue::text("A")));
            m.insert(PropName::new("urn:example", "color"), None);
            let stats = mgr.set_node_props(&node, m);
            assert_eq!(stats.len(), 1);
            let forbidden = &stats[&StatusCode::FORBIDDEN];
            assert_eq!(forbidden.len(), 3);
            assert!(forbidden.contains(&p("displayname")));
            assert!(forbidden.contains(&PropName::new("urn:example", "color")));
        }

        let node: DavNodeRef = Arc::new(FixedSetter(Ok(true)));
        let mut m = PropMap::new();
        m.insert(p("displayname"), Some(PropValue::text("A")));
        m.insert(PropName::new("urn:example", "color"), None);
        let stats = mgr.set_node_props(&node, m);
        assert_eq!(stats[&StatusCode::OK].len(), 2);
    }

    #[test]
    fn depth_limits() {
        let mgr = test_manager(None);
        let root = mgr.resolve_path(&DavPath::root(), true).unwrap();
        let set = PropSet::Names(vec![p("resourcetype")]);
        assert_eq!(mgr.get_path_props(&root, &set, Depth::ZERO).unwrap().len(), 1);
        // the root has /principals/ and /docs/.
        assert_eq!(mgr.get_path_props(&root, &set, Depth::ONE).unwrap().len(), 3);
        let all = mgr.get_path_props(&root, &set, Depth::Infinity).unwrap();
        assert_eq!(all.len(), 9);
        assert!(all[0].0.path().is_root());
    }

    #[test]
    fn uris() {
        let mgr = test_manager(None);
        let docs = mgr.resolve_path(&DavPath::new("/docs").unwrap(), true).unwrap();
        assert_eq!(mgr.node_uri(&docs, true), "/docs/");
        assert_eq!(
            mgr.uri_to_path("/docs/a.txt"),
            Some(DavPath::new("/docs/a.txt").unwrap())
        );
        assert!(mgr.uri_to_path("http://elsewhere.example/docs/").is_none());
        assert!(mgr.resolve_uri("/docs/nope", true).is_err());
        assert_eq!(
            mgr.resolve_uri("/docs/nope/deeper", false).unwrap().path(),
            docs.path()
        );
    }

    #[test]
    fn acl_inheritance() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let node = mgr.resolve_path(&DavPath::new("/docs/a.txt").unwrap(), true).unwrap();
        let acl = mgr.effective_acl(&node).unwrap();
        assert!(acl.0.iter().all(|a| a.inherited == Some(DavPath::root())));
        assert!(mgr.acl(&node, &["read"]).is_ok());
        assert!(mgr.has_privileges(&node, &[p("write-acl")]));
    }
}
