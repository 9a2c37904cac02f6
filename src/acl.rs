//! Access control (RFC 3744).
//!
//! An `Acl` is an ordered list of `Ace`s. Two evaluation strategies exist
//! and they are intentionally different:
//!
//! - `Acl::check` is first-match-wins per privilege. The first ACE that
//!   matches the principal and says something about the privilege decides.
//! - `Acl::all_privs` folds over every matching ACE: the union of all grants
//!   minus the union of all denials.
use std::collections::BTreeSet;

use lazy_static::lazy_static;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::davprops::{NS_DAV_URI, PropName, PropSet};
use crate::davvalue::{Href, PropValue};
use crate::errors::{DavError, DavResult};
use crate::fs::DavNodeRef;
use crate::manager::DavManager;
use crate::xmltree_ext::ElementExt;

/// A node in the privilege tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivilegeDef {
    pub name: PropName,
    pub is_abstract: bool,
    pub description: Option<String>,
    pub aggregates: Vec<PrivilegeDef>,
}

fn privdef(name: &str, is_abstract: bool, desc: &str, aggregates: Vec<PrivilegeDef>) -> PrivilegeDef {
    PrivilegeDef {
        name: PropName::dav(name),
        is_abstract,
        description: Some(desc.to_string()),
        aggregates,
    }
}

lazy_static! {
    /// The supported privilege tree.
    pub static ref DEFAULT_PRIVILEGES: PrivilegeDef = privdef(
        "all",
        true,
        "Any operation",
        vec![
            privdef(
                "read",
                false,
                "Read any object",
                vec![
                    privdef("read-acl", false, "Read ACL", vec![]),
                    privdef(
                        "read-current-user-privilege-set",
                        false,
                        "Read current user privilege set property",
                        vec![]
                    ),
                ]
            ),
            privdef(
                "write",
                false,
                "Write any object",
                vec![
                    privdef("write-acl", false, "Write ACL", vec![]),
                    privdef("write-properties", false, "Write properties", vec![]),
                    privdef("write-content", false, "Write resource content", vec![]),
                    privdef("bind", false, "Add new files/folders", vec![]),
                    privdef("unbind", false, "Delete or move files/folders", vec![]),
                    privdef("unlock", false, "Unlock resource", vec![]),
                ]
            ),
        ]
    );
}

impl PrivilegeDef {
    pub fn find(&self, name: &PropName) -> Option<&PrivilegeDef> {
        if self.name == *name {
            return Some(self);
        }
        self.aggregates.iter().find_map(|p| p.find(name))
    }

    /// `outer` is `inner`, or aggregates it (transitively).
    pub fn aggregates(&self, outer: &PropName, inner: &PropName) -> bool {
        if outer == inner {
            return true;
        }
        match self.find(outer) {
            Some(def) => def.aggregates.iter().any(|a| a.find(inner).is_some()),
            None => false,
        }
    }

    /// The privilege plus everything it aggregates.
    pub fn expand(&self, name: &PropName) -> Vec<PropName> {
        match self.find(name) {
            Some(def) => {
                let mut v = Vec::new();
                def.collect(&mut v);
                v
            }
            None => vec![name.clone()],
        }
    }

    fn collect(&self, v: &mut Vec<PropName>) {
        v.push(self.name.clone());
        for a in &self.aggregates {
            a.collect(v);
        }
    }

    /// `<D:supported-privilege>`, recursively.
    pub fn render(&self) -> Element {
        let mut e = Element::new2("D:supported-privilege")
            .child(Element::new2("D:privilege").child(self.name.element()));
        if self.is_abstract {
            e.push_elem(Element::new2("D:abstract"));
        }
        if let Some(ref d) = self.description {
            let mut desc = Element::new_text("D:description", d.clone());
            desc.attributes.insert("xml:lang".to_string(), "en".to_string());
            e.push_elem(desc);
        }
        for a in &self.aggregates {
            e.push_elem(a.render());
        }
        e
    }
}

/// Who an ACE applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum PrincipalMatcher {
    Unauthenticated,
    Authenticated,
    Href(Href),
    All,
    SelfPrincipal,
    Property(PropName),
}

// is `principal` the principal at `target`, or a member of that group.
fn principal_is(principal: &DavNodeRef, target: &DavPath) -> bool {
    if principal.path() == *target {
        return true;
    }
    match principal.as_principal() {
        Some(p) => p.group_membership().iter().any(|g| g == target),
        None => false,
    }
}

pub(crate) fn principal_is_href(principal: &DavNodeRef, href: &Href, mgr: &DavManager) -> bool {
    if let Some(path) = href.get_path(mgr) {
        if principal_is(principal, &path) {
            return true;
        }
    }
    let uri = href.get_uri(mgr);
    match principal.as_principal() {
        Some(p) => p.alternate_uri_set().iter().any(|a| *a == uri),
        None => false,
    }
}

impl PrincipalMatcher {
    /// Does the requesting principal match, relative to the context node.
    pub fn matches(
        &self,
        principal: Option<&DavNodeRef>,
        ctx: Option<&DavNodeRef>,
        mgr: &DavManager,
    ) -> bool {
        match self {
            PrincipalMatcher::All => true,
            PrincipalMatcher::Authenticated => principal.is_some(),
            PrincipalMatcher::Unauthenticated => principal.is_none(),
            PrincipalMatcher::Href(href) => {
                principal.is_some_and(|p| principal_is_href(p, href, mgr))
            }
            PrincipalMatcher::SelfPrincipal => match (principal, ctx) {
                (Some(p), Some(c)) => c.as_principal().is_some() && principal_is(p, &c.path()),
                _ => false,
            },
            PrincipalMatcher::Property(name) => {
                let (Some(p), Some(c)) = (principal, ctx) else {
                    return false;
                };
                property_href(c, name).is_some_and(|href| principal_is_href(p, &href, mgr))
            }
        }
    }

    pub fn render(&self, mgr: &DavManager) -> Element {
        let mut e = Element::new2("D:principal");
        e.push_elem(match self {
            PrincipalMatcher::Unauthenticated => Element::new2("D:unauthenticated"),
            PrincipalMatcher::Authenticated => Element::new2("D:authenticated"),
            PrincipalMatcher::All => Element::new2("D:all"),
            PrincipalMatcher::SelfPrincipal => Element::new2("D:self"),
            PrincipalMatcher::Href(h) => Element::new_text("D:href", h.get_uri(mgr)),
            PrincipalMatcher::Property(p) => Element::new2("D:property").child(p.element()),
        });
        e
    }

    /// Parse the contents of a `<D:principal>` element.
    pub fn parse(elem: &Element) -> DavResult<PrincipalMatcher> {
        let first = elem
            .first_elem()
            .ok_or_else(|| DavError::BadRequest("empty principal".into()))?;
        if first.namespace.as_deref() != Some(NS_DAV_URI) {
            return Err(DavError::BadRequest("unknown principal".into()));
        }
        let p = match first.name.as_str() {
            "unauthenticated" => PrincipalMatcher::Unauthenticated,
            "authenticated" => PrincipalMatcher::Authenticated,
            "all" => PrincipalMatcher::All,
            "self" => PrincipalMatcher::SelfPrincipal,
            "href" => PrincipalMatcher::Href(Href::uri(first.text_content())),
            "property" => {
                let prop = first
                    .first_elem()
                    .ok_or_else(|| DavError::BadRequest("empty property principal".into()))?;
                PrincipalMatcher::Property(PropName::from_element(prop))
            }
            _ => return Err(DavError::BadRequest("unknown principal".into())),
        };
        Ok(p)
    }
}

// the value of an href-valued property, as the node declares it.
fn property_href(node: &DavNodeRef, name: &PropName) -> Option<Href> {
    if name.is_dav() {
        match name.name.as_str() {
            "owner" => return node.dav_owner().map(Href::path),
            "group" => return node.dav_group().map(Href::path),
            _ => {}
        }
    }
    let props = node.dav_props(&PropSet::Names(vec![name.clone()]));
    match props.get(name) {
        Some(Some(PropValue::Href(h))) => Some(h.clone()),
        _ => None,
    }
}

/// Access control entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Ace {
    pub principal: PrincipalMatcher,
    pub invert: bool,
    pub grant: Vec<PropName>,
    pub deny: Vec<PropName>,
    pub protected: bool,
    /// Set when the ACE was inherited from the ACL at this path.
    pub inherited: Option<DavPath>,
}

impl Ace {
    pub fn grant(principal: PrincipalMatcher, privileges: &[&str]) -> Ace {
        Ace {
            principal,
            invert: false,
            grant: privileges.iter().map(|p| PropName::dav(p)).collect(),
            deny: Vec::new(),
            protected: false,
            inherited: None,
        }
    }

    pub fn deny(principal: PrincipalMatcher, privileges: &[&str]) -> Ace {
        Ace {
            principal,
            invert: false,
            grant: Vec::new(),
            deny: privileges.iter().map(|p| PropName::dav(p)).collect(),
            protected: false,
            inherited: None,
        }
    }

    /// `Some(false)` if denied, `Some(true)` if granted, `None` if this
    /// ACE says nothing about the privilege.
    pub fn check(&self, privilege: &PropName, defs: &PrivilegeDef) -> Option<bool> {
        // denying part of an aggregate denies the aggregate.
        if self
            .deny
            .iter()
            .any(|d| defs.aggregates(d, privilege) || defs.aggregates(privilege, d))
        {
            return Some(false);
        }
        if self.grant.iter().any(|g| defs.aggregates(g, privilege)) {
            return Some(true);
        }
        None
    }

    pub fn matches(
        &self,
        principal: Option<&DavNodeRef>,
        ctx: Option<&DavNodeRef>,
        mgr: &DavManager,
    ) -> bool {
        self.principal.matches(principal, ctx, mgr) != self.invert
    }

    pub fn render(&self, mgr: &DavManager) -> Element {
        let mut e = Element::new2("D:ace");
        let p = self.principal.render(mgr);
        if self.invert {
            e.push_elem(Element::new2("D:invert").child(p));
        } else {
            e.push_elem(p);
        }
        for (tag, privs) in [("D:grant", &self.grant), ("D:deny", &self.deny)] {
            if privs.is_empty() {
                continue;
            }
            let mut g = Element::new2(tag);
            for p in privs {
                g.push_elem(Element::new2("D:privilege").child(p.element()));
            }
            e.push_elem(g);
        }
        if self.protected {
            e.push_elem(Element::new2("D:protected"));
        }
        if let Some(ref path) = self.inherited {
            e.push_elem(Element::new2("D:inherited").child(Element::new_text(
                "D:href",
                mgr.path_uri(path, true),
            )));
        }
        e
    }

    /// Parse a `<D:ace>` element.
    pub fn parse(elem: &Element) -> DavResult<Ace> {
        let mut principal = None;
        let mut invert = false;
        let mut grant = Vec::new();
        let mut deny = Vec::new();
        let mut protected = false;
        let mut inherited = None;

        for child in elem.elements() {
            if child.namespace.as_deref() != Some(NS_DAV_URI) {
                continue;
            }
            match child.name.as_str() {
                "principal" => principal = Some(PrincipalMatcher::parse(child)?),
                "invert" => {
                    let p = child
                        .find_elem(NS_DAV_URI, "principal")
                        .ok_or_else(|| DavError::BadRequest("invert without principal".into()))?;
                    principal = Some(PrincipalMatcher::parse(p)?);
                    invert = true;
                }
                "grant" => grant = parse_privileges(child)?,
                "deny" => deny = parse_privileges(child)?,
                "protected" => protected = true,
                "inherited" => {
                    inherited = child
                        .find_elem(NS_DAV_URI, "href")
                        .and_then(|h| DavPath::new(&h.text_content()).ok());
                }
                _ => {}
            }
        }

        let principal = principal.ok_or_else(|| DavError::BadRequest("ace without principal".into()))?;
        if !grant.is_empty() && !deny.is_empty() {
            return Err(DavError::BadRequest("ace with both grant and deny".into()));
        }
        Ok(Ace {
            principal,
            invert,
            grant,
            deny,
            protected,
            inherited,
        })
    }
}

fn parse_privileges(elem: &Element) -> DavResult<Vec<PropName>> {
    let mut v = Vec::new();
    for p in elem.elements().filter(|e| e.is_elem(NS_DAV_URI, "privilege")) {
        let name = p
            .first_elem()
            .ok_or_else(|| DavError::BadRequest("empty privilege".into()))?;
        v.push(PropName::from_element(name));
    }
    Ok(v)
}

/// Access control list. Order matters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acl(pub Vec<Ace>);

impl Acl {
    /// All of `privileges` must be granted.
    pub fn check(
        &self,
        principal: Option<&DavNodeRef>,
        privileges: &[PropName],
        ctx: Option<&DavNodeRef>,
        mgr: &DavManager,
    ) -> bool {
        privileges
            .iter()
            .all(|p| self.check_one(principal, p, ctx, mgr))
    }

    fn check_one(
        &self,
        principal: Option<&DavNodeRef>,
        privilege: &PropName,
        ctx: Option<&DavNodeRef>,
        mgr: &DavManager,
    ) -> bool {
        let defs = &*DEFAULT_PRIVILEGES;
        for ace in &self.0 {
            let Some(res) = ace.check(privilege, defs) else {
                continue;
            };
            if !ace.matches(principal, ctx, mgr) {
                continue;
            }
            trace!("acl: {} -> {} by {:?}", privilege, res, ace.principal);
            return res;
        }
        false
    }

    /// Every privilege granted, with aggregates expanded, minus every
    /// privilege denied.
    pub fn all_privs(
        &self,
        principal: Option<&DavNodeRef>,
        ctx: Option<&DavNodeRef>,
        mgr: &DavManager,
    ) -> BTreeSet<PropName> {
        let defs = &*DEFAULT_PRIVILEGES;
        let mut granted = BTreeSet::new();
        let mut denied = BTreeSet::new();
        for ace in self.0.iter().filter(|a| a.matches(principal, ctx, mgr)) {
            for g in &ace.grant {
                granted.extend(defs.expand(g));
            }
            for d in &ace.deny {
                denied.extend(defs.expand(d));
            }
        }
        granted.difference(&denied).cloned().collect()
    }

    /// Elements for the `<D:acl>` property.
    pub fn render(&self, mgr: &DavManager) -> Vec<Element> {
        self.0.iter().map(|a| a.render(mgr)).collect()
    }

    /// Parse the children of an `<D:acl>` element.
    pub fn parse(elem: &Element) -> DavResult<Acl> {
        let mut v = Vec::new();
        for e in elem.elements().filter(|e| e.is_elem(NS_DAV_URI, "ace")) {
            v.push(Ace::parse(e)?);
        }
        Ok(Acl(v))
    }

    /// Mark all ACEs as inherited from `path`.
    pub fn inherited_from(self, path: &DavPath) -> Acl {
        Acl(self
            .0
            .into_iter()
            .map(|mut a| {
                a.inherited.get_or_insert_with(|| path.clone());
                a
            })
            .collect())
    }

    /// Checks an ACL a client wants to store (ACL method).
    pub fn validate_update(&self, old: &Acl, restrictions: &AclRestrictions, mgr: &DavManager) -> DavResult<()> {
        restrictions.validate(self)?;

        let defs = &*DEFAULT_PRIVILEGES;
        for ace in &self.0 {
            for p in ace.grant.iter().chain(ace.deny.iter()) {
                match defs.find(p) {
                    None => return Err(DavError::UnsupportedPrivilege),
                    Some(def) if def.is_abstract => return Err(DavError::NoAbstractPrivilege),
                    Some(_) => {}
                }
            }
            if let PrincipalMatcher::Href(ref h) = ace.principal {
                let known = h
                    .get_node(mgr)
                    .is_some_and(|n| n.as_principal().is_some());
                if !known {
                    return Err(DavError::UnrecognizedPrincipal);
                }
            }
        }

        // protected ACEs must survive.
        for p in old.0.iter().filter(|a| a.protected && a.inherited.is_none()) {
            let kept = self.0.iter().any(|a| {
                a.principal == p.principal
                    && a.invert == p.invert
                    && a.grant == p.grant
                    && a.deny == p.deny
            });
            if !kept {
                return Err(DavError::AceConflict);
            }
        }
        Ok(())
    }
}

/// Constraints on what ACLs a node accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AclRestrictions {
    pub grant_only: bool,
    pub no_invert: bool,
    pub deny_before_grant: bool,
}

impl AclRestrictions {
    pub fn validate(&self, acl: &Acl) -> DavResult<()> {
        if self.grant_only && acl.0.iter().any(|a| !a.deny.is_empty()) {
            return Err(DavError::AclRestricted("grant-only"));
        }
        if self.no_invert && acl.0.iter().any(|a| a.invert) {
            return Err(DavError::AclRestricted("no-invert"));
        }
        if self.deny_before_grant {
            let mut seen_grant = false;
            for a in &acl.0 {
                if !a.grant.is_empty() {
                    seen_grant = true;
                } else if !a.deny.is_empty() && seen_grant {
                    return Err(DavError::AclRestricted("deny-before-grant"));
                }
            }
        }
        Ok(())
    }

    pub fn render(&self) -> Vec<Element> {
        let mut v = Vec::new();
        if self.grant_only {
            v.push(Element::new2("D:grant-only"));
        }
        if self.no_invert {
            v.push(Element::new2("D:no-invert"));
        }
        if self.deny_before_grant {
            v.push(Element::new2("D:deny-before-grant"));
        }
        v
    }

    pub fn parse(elem: &Element) -> AclRestrictions {
        AclRestrictions {
            grant_only: elem.find_elem(NS_DAV_URI, "grant-only").is_some(),
            no_invert: elem.find_elem(NS_DAV_URI, "no-invert").is_some(),
            deny_before_grant: elem.find_elem(NS_DAV_URI, "deny-before-grant").is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::test_manager;

    fn p(name: &str) -> PropName {
        PropName::dav(name)
    }

    #[test]
    fn authenticated_read() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let alice = mgr.principal().cloned();
        let acl = Acl(vec![Ace::grant(
            PrincipalMatcher::Authenticated,
            &["read", "read-acl"],
        )]);
        assert!(acl.check(alice.as_ref(), &[p("read")], None, &mgr));
        assert!(!acl.check(alice.as_ref(), &[p("write")], None, &mgr));
        assert!(!acl.check(None, &[p("read")], None, &mgr));
    }

    #[test]
    fn first_match_wins() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let alice = mgr.principal().cloned();
        let href = PrincipalMatcher::Href(Href::uri("/principals/users/alice/"));
        let deny = Ace::deny(href.clone(), &["write"]);
        let grant = Ace::grant(href, &["write"]);

        let acl = Acl(vec![deny.clone(), grant.clone()]);
        assert!(!acl.check(alice.as_ref(), &[p("write")], None, &mgr));

        let acl = Acl(vec![grant, deny]);
        assert!(acl.check(alice.as_ref(), &[p("write")], None, &mgr));
    }

    #[test]
    fn aggregation() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let alice = mgr.principal().cloned();
        let acl = Acl(vec![Ace::grant(PrincipalMatcher::All, &["all"])]);
        assert!(acl.check(alice.as_ref(), &[p("read-acl")], None, &mgr));
        assert!(acl.check(alice.as_ref(), &[p("read"), p("unbind")], None, &mgr));

        let privs = acl.all_privs(alice.as_ref(), None, &mgr);
        assert!(privs.contains(&p("write-content")));
        assert!(privs.contains(&p("read-current-user-privilege-set")));
    }

    #[test]
    fn all_privs_folds() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let alice = mgr.principal().cloned();
        let acl = Acl(vec![
            Ace::grant(PrincipalMatcher::Authenticated, &["read"]),
            Ace::deny(PrincipalMatcher::All, &["read-acl"]),
            Ace::grant(PrincipalMatcher::All, &["write"]),
        ]);
        let privs = acl.all_privs(alice.as_ref(), None, &mgr);
        assert!(privs.contains(&p("read")));
        assert!(!privs.contains(&p("read-acl")));
        assert!(privs.contains(&p("bind")));
    }

    #[test]
    fn invert_and_group() {
        let mgr = test_manager(Some("/principals/users/alice/"));
        let alice = mgr.principal().cloned();
        // alice is a member of the staff group.
        let group = PrincipalMatcher::Href(Href::uri("/principals/groups/staff/"));
        let acl = Acl(vec![Ace::grant(group.clone(), &["read"])]);
        assert!(acl.check(alice.as_ref(), &[p("read")], None, &mgr));

        let mut ace = Ace::grant(group, &["read"]);
        ace.invert = true;
        let acl = Acl(vec![ace]);
        assert!(!acl.check(alice.as_ref(), &[p("read")], None, &mgr));
        assert!(acl.check(None, &[p("read")], None, &mgr));
    }

    #[test]
    fn grant_and_deny_rejected() {
        let xml = br#"<D:ace xmlns:D="DAV:">
            <D:principal><D:all/></D:principal>
            <D:grant><D:privilege><D:read/></D:privilege></D:grant>
            <D:deny><D:privilege><D:write/></D:privilege></D:deny>
        </D:ace>"#;
        let e = Element::parse2(xml).unwrap();
        assert!(matches!(Ace::parse(&e), Err(DavError::BadRequest(_))));
    }

    #[test]
    fn restrictions() {
        let r = AclRestrictions {
            grant_only: false,
            no_invert: true,
            deny_before_grant: true,
        };
        let ok = Acl(vec![
            Ace::deny(PrincipalMatcher::Unauthenticated, &["all"]),
            Ace::grant(PrincipalMatcher::All, &["read"]),
        ]);
        assert!(r.validate(&ok).is_ok());
        let bad = Acl(vec![
            Ace::grant(PrincipalMatcher::All, &["read"]),
            Ace::deny(PrincipalMatcher::Unauthenticated, &["all"]),
        ]);
        assert!(matches!(
            r.validate(&bad),
            Err(DavError::AclRestricted("deny-before-grant"))
        ));
    }
}
