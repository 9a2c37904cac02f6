//! Simple in-memory node store.
//!
//! This implementation has state, so if you create a new instance for
//! every request, it will be empty every time.
//!
//! Create the instance once, using `MemFs::new`, keep it around and
//! clone() it every time you pass it to the `DavConfig`. As a `MemFs` is
//! just a handle, cloning is cheap.
//!
//! Every change draws a number from one store-wide sequence. That number
//! is the new etag of the node and the new sync token of its parent, so
//! tokens of different collections can be compared.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::acl::{Acl, AclRestrictions};
use crate::collation::{Collation, MatchType, match_text};
use crate::davpath::DavPath;
use crate::davprops::{PropMap, PropName, PropSet};
use crate::davvalue::PropValue;
use crate::fs::*;

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Collection,
    Resource,
    Principal,
    /// A collection of principals that can be searched.
    PrincipalCollection,
    AddressBook,
    Calendar,
    Directory,
    /// An address object. Its content is set with `MemFs::set_vcard`.
    Card,
}

impl NodeKind {
    fn is_collection(self) -> bool {
        matches!(
            self,
            NodeKind::Collection
                | NodeKind::PrincipalCollection
                | NodeKind::AddressBook
                | NodeKind::Calendar
                | NodeKind::Directory
        )
    }

    fn has_history(self) -> bool {
        self.is_collection() && self != NodeKind::PrincipalCollection
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: NodeKind,
    changed: u64,
    modified: DateTime<Utc>,
    props: PropMap,
    acl: Option<Acl>,
    acl_restrictions: AclRestrictions,
    owner: Option<DavPath>,
    members: Vec<DavPath>,
    memberships: Vec<DavPath>,
    vcard: String,
    // sync token and change log of a collection.
    token: u64,
    history: Vec<HistoryEntry>,
    children: BTreeMap<String, Entry>,
}

impl Entry {
    fn new(kind: NodeKind, seq: u64) -> Entry {
        Entry {
            kind,
            changed: seq,
            modified: Utc::now(),
            props: PropMap::new(),
            acl: None,
            acl_restrictions: AclRestrictions::default(),
            owner: None,
            members: Vec::new(),
            memberships: Vec::new(),
            vcard: String::new(),
            token: seq,
            history: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    // a copy with fresh sequence numbers and no history.
    fn copy(&self, seq: u64, recursive: bool) -> Entry {
        let mut e = self.clone();
        e.changed = seq;
        e.token = seq;
        e.modified = Utc::now();
        e.history.clear();
        e.children = if recursive {
            self.children
                .iter()
                .map(|(n, c)| (n.clone(), c.copy(seq, true)))
                .collect()
        } else {
            BTreeMap::new()
        };
        e
    }
}

#[derive(Debug)]
struct MemTree {
    seq: u64,
    root: Entry,
}

impl MemTree {
    fn get(&self, path: &DavPath) -> Option<&Entry> {
        let mut e = &self.root;
        for s in path.segments() {
            e = e.children.get(s)?;
        }
        Some(e)
    }

    fn get_mut(&mut self, path: &DavPath) -> Option<&mut Entry> {
        let mut e = &mut self.root;
        for s in path.segments() {
            e = e.children.get_mut(s)?;
        }
        Some(e)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // log a change of `path` in its parent and move the sync token of
    // every ancestor.
    fn record(&mut self, path: &DavPath, kind: HistoryKind, is_collection: bool, seq: u64) {
        let Some(name) = path.file_name().map(|s| s.to_string()) else {
            return;
        };
        let parent = path.parent();
        if let Some(p) = self.get_mut(&parent) {
            if p.kind.has_history() {
                p.history.push(HistoryEntry {
                    name,
                    token: seq,
                    kind,
                    is_collection,
                });
            }
        }
        let mut ancestor = parent;
        loop {
            if let Some(a) = self.get_mut(&ancestor) {
                if a.kind.has_history() {
                    a.token = seq;
                }
            }
            if ancestor.is_root() {
                break;
            }
            ancestor = ancestor.parent();
        }
    }

    // apply `f` to an existing entry and record the modification.
    fn modify(&mut self, path: &DavPath, f: impl FnOnce(&mut Entry)) -> FsResult<()> {
        let seq = self.next_seq();
        let e = self.get_mut(path).ok_or(FsError::NotFound)?;
        f(e);
        e.changed = seq;
        e.modified = Utc::now();
        let coll = e.kind.is_collection();
        self.record(path, HistoryKind::Modified, coll, seq);
        Ok(())
    }

    fn insert(&mut self, path: &DavPath, entry: Entry) -> FsResult<()> {
        let name = path.file_name().ok_or(FsError::Exists)?.to_string();
        let parent = self.get_mut(&path.parent()).ok_or(FsError::Conflict)?;
        if !parent.kind.is_collection() {
            return Err(FsError::Conflict);
        }
        if parent.children.contains_key(&name) {
            return Err(FsError::Exists);
        }
        let coll = entry.kind.is_collection();
        let seq = entry.changed;
        parent.children.insert(name, entry);
        self.record(path, HistoryKind::Created, coll, seq);
        Ok(())
    }

    fn remove(&mut self, path: &DavPath) -> FsResult<Entry> {
        let name = path.file_name().ok_or(FsError::Forbidden)?.to_string();
        let parent = self.get_mut(&path.parent()).ok_or(FsError::NotFound)?;
        let e = parent.children.remove(&name).ok_or(FsError::NotFound)?;
        let seq = self.next_seq();
        self.record(path, HistoryKind::Deleted, e.kind.is_collection(), seq);
        Ok(e)
    }
}

/// Ephemeral in-memory store.
#[derive(Clone)]
pub struct MemFs {
    tree: Arc<RwLock<MemTree>>,
}

impl std::fmt::Debug for MemFs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("MemFs")
    }
}

fn parse_path(path: &str) -> FsResult<DavPath> {
    DavPath::new(path).map_err(|_| FsError::NotFound)
}

impl MemFs {
    /// Create a new store with an empty root collection.
    pub fn new() -> Box<MemFs> {
        Box::new(MemFs {
            tree: Arc::new(RwLock::new(MemTree {
                seq: 1,
                root: Entry::new(NodeKind::Collection, 1),
            })),
        })
    }

    fn handle(&self, path: DavPath) -> DavNodeRef {
        Arc::new(MemNode {
            tree: self.tree.clone(),
            path,
        })
    }

    /// Create a node. The parent must exist.
    pub fn create(&self, path: &str, kind: NodeKind) -> FsResult<DavNodeRef> {
        let path = parse_path(path)?;
        let mut tree = self.tree.write();
        let seq = tree.next_seq();
        tree.insert(&path, Entry::new(kind, seq))?;
        drop(tree);
        Ok(self.handle(path))
    }

    /// Store a property value.
    pub fn set_prop(&self, path: &str, name: PropName, value: PropValue) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree
            .write()
            .modify(&path, |e| e.props.insert(name, Some(value)))
    }

    pub fn set_acl(&self, path: &str, acl: Acl) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree.write().modify(&path, |e| e.acl = Some(acl))
    }

    pub fn set_acl_restrictions(&self, path: &str, r: AclRestrictions) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree.write().modify(&path, |e| e.acl_restrictions = r)
    }

    pub fn set_owner(&self, path: &str, principal: &str) -> FsResult<()> {
        let path = parse_path(path)?;
        let owner = parse_path(principal)?;
        self.tree.write().modify(&path, |e| e.owner = Some(owner))
    }

    /// Make `member` a member of the group `group`.
    pub fn add_member(&self, group: &str, member: &str) -> FsResult<()> {
        let group = parse_path(group)?;
        let member = parse_path(member)?;
        let mut tree = self.tree.write();
        match tree.get(&member) {
            Some(e) if e.kind == NodeKind::Principal => {}
            Some(_) => return Err(FsError::Forbidden),
            None => return Err(FsError::NotFound),
        }
        let m = member.clone();
        tree.modify(&group, |e| {
            if !e.members.contains(&m) {
                e.members.push(m)
            }
        })?;
        tree.modify(&member, |e| {
            if !e.memberships.contains(&group) {
                e.memberships.push(group)
            }
        })
    }

    pub fn set_vcard(&self, path: &str, vcard: &str) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree.write().modify(&path, |e| e.vcard = vcard.to_string())
    }

    /// Mark a node as changed.
    pub fn modify(&self, path: &str) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree.write().modify(&path, |_| {})
    }

    /// Remove a node and everything below it.
    pub fn remove(&self, path: &str) -> FsResult<()> {
        let path = parse_path(path)?;
        self.tree.write().remove(&path).map(|_| ())
    }
}

impl DavStore for MemFs {
    fn lookup(&self, path: &DavPath) -> FsResult<(DavNodeRef, Vec<String>)> {
        let tree = self.tree.read();
        let mut e = &tree.root;
        let mut found = DavPath::root();
        let segs = path.segments();
        for (i, s) in segs.iter().enumerate() {
            match e.children.get(s) {
                Some(c) => {
                    e = c;
                    found.push_segment(s);
                }
                None => {
                    drop(tree);
                    return Ok((self.handle(found), segs[i..].to_vec()));
                }
            }
        }
        drop(tree);
        Ok((self.handle(found), Vec::new()))
    }

    fn children(&self, node: &DavNodeRef) -> FsResult<Vec<DavNodeRef>> {
        let path = node.path();
        let names: Vec<String> = {
            let tree = self.tree.read();
            let e = tree.get(&path).ok_or(FsError::NotFound)?;
            e.children.keys().cloned().collect()
        };
        Ok(names.iter().map(|n| self.handle(path.join(n))).collect())
    }

    fn delete(&self, node: &DavNodeRef, recursive: bool) -> FsResult<()> {
        let path = node.path();
        let mut tree = self.tree.write();
        let e = tree.get(&path).ok_or(FsError::NotFound)?;
        if !recursive && !e.children.is_empty() {
            return Err(FsError::Conflict);
        }
        trace!("memfs: delete {}", path);
        tree.remove(&path).map(|_| ())
    }

    fn clone_node(
        &self,
        node: &DavNodeRef,
        parent: &DavNodeRef,
        name: &str,
        recursive: bool,
    ) -> FsResult<DavNodeRef> {
        let src = node.path();
        let dst = parent.path().join(name);
        if src.is_ancestor_of(&dst) {
            return Err(FsError::Forbidden);
        }
        let mut tree = self.tree.write();
        let seq = tree.next_seq();
        let copy = tree.get(&src).ok_or(FsError::NotFound)?.copy(seq, recursive);
        tree.insert(&dst, copy)?;
        drop(tree);
        trace!("memfs: copied {} to {}", src, dst);
        Ok(self.handle(dst))
    }
}

/// A live handle on a node of a `MemFs`. If the node goes away, the
/// handle reports nothing.
pub struct MemNode {
    tree: Arc<RwLock<MemTree>>,
    path: DavPath,
}

impl std::fmt::Debug for MemNode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "MemNode({})", self.path)
    }
}

impl MemNode {
    fn with<T>(&self, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let tree = self.tree.read();
        tree.get(&self.path).map(f)
    }

    fn kind(&self) -> Option<NodeKind> {
        self.with(|e| e.kind)
    }

    fn handle(&self, path: DavPath) -> DavNodeRef {
        Arc::new(MemNode {
            tree: self.tree.clone(),
            path,
        })
    }

    // the principals below this node, depth first.
    fn principals(&self) -> Vec<(DavPath, Entry)> {
        fn walk(e: &Entry, path: &DavPath, out: &mut Vec<(DavPath, Entry)>) {
            for (name, c) in &e.children {
                let p = path.join(name);
                if c.kind == NodeKind::Principal {
                    out.push((p.clone(), c.clone()));
                }
                walk(c, &p, out);
            }
        }
        let mut out = Vec::new();
        let tree = self.tree.read();
        if let Some(e) = tree.get(&self.path) {
            walk(e, &self.path, &mut out);
        }
        out
    }
}

impl DavNode for MemNode {
    fn path(&self) -> DavPath {
        self.path.clone()
    }

    fn etag(&self) -> Option<String> {
        self.with(|e| format!("\"{:x}\"", e.changed))
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.with(|e| e.modified)
    }

    fn dav_props(&self, wanted: &PropSet) -> PropMap {
        self.with(|e| {
            let mut props = e.props.clone();
            props.retain(|n| wanted.wants(n));
            props
        })
        .unwrap_or_default()
    }

    fn is_collection(&self) -> bool {
        self.kind().is_some_and(|k| k.is_collection())
    }

    fn is_calendar(&self) -> bool {
        self.kind() == Some(NodeKind::Calendar)
    }

    fn is_addressbook(&self) -> bool {
        self.kind() == Some(NodeKind::AddressBook)
    }

    fn is_directory(&self) -> bool {
        self.kind() == Some(NodeKind::Directory)
    }

    fn as_principal(&self) -> Option<&dyn DavPrincipal> {
        match self.kind() {
            Some(NodeKind::Principal) => Some(self),
            _ => None,
        }
    }

    fn as_history(&self) -> Option<&dyn DavHistory> {
        match self.kind() {
            Some(k) if k.has_history() => Some(self),
            _ => None,
        }
    }

    fn as_search(&self) -> Option<&dyn DavSearch> {
        match self.kind() {
            Some(NodeKind::PrincipalCollection) => Some(self),
            _ => None,
        }
    }

    fn as_setter(&self) -> Option<&dyn DavPropSetter> {
        self.kind().map(|_| self as &dyn DavPropSetter)
    }

    fn as_creator(&self) -> Option<&dyn DavCreator> {
        match self.kind() {
            Some(k) if k.is_collection() => Some(self),
            _ => None,
        }
    }

    fn as_card(&self) -> Option<&dyn DavCard> {
        match self.kind() {
            Some(NodeKind::Card) => Some(self),
            _ => None,
        }
    }

    fn acl(&self) -> Option<Acl> {
        self.with(|e| e.acl.clone()).flatten()
    }

    fn acl_restrictions(&self) -> AclRestrictions {
        self.with(|e| e.acl_restrictions.clone()).unwrap_or_default()
    }

    fn set_acl(&self, acl: Acl) -> FsResult<()> {
        self.tree.write().modify(&self.path, |e| e.acl = Some(acl))
    }

    fn dav_owner(&self) -> Option<DavPath> {
        self.with(|e| e.owner.clone()).flatten()
    }
}

impl DavPrincipal for MemNode {
    fn group_membership(&self) -> Vec<DavPath> {
        self.with(|e| e.memberships.clone()).unwrap_or_default()
    }

    fn group_member_set(&self) -> Vec<DavPath> {
        self.with(|e| e.members.clone()).unwrap_or_default()
    }
}

impl DavHistory for MemNode {
    fn sync_token(&self) -> u64 {
        self.with(|e| e.token).unwrap_or(0)
    }

    fn get_history(&self, since: u64, until: u64) -> Vec<HistoryEntry> {
        self.with(|e| {
            e.history
                .iter()
                .filter(|h| h.token > since && h.token <= until)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}

impl DavSearch for MemNode {
    fn search_fields(&self) -> Vec<(PropName, String)> {
        vec![(PropName::dav("displayname"), "Display name".to_string())]
    }

    fn search_principals(
        &self,
        _store: &dyn DavStore,
        terms: &[(PropName, String)],
        anyof: bool,
    ) -> FsResult<Vec<DavNodeRef>> {
        let hit = |e: &Entry, (name, text): &(PropName, String)| {
            let value = e.props.get(name).and_then(|v| v.as_ref()).and_then(|v| v.as_text());
            value.is_some_and(|v| {
                match_text(v, text, Collation::UnicodeCasemap, MatchType::Contains)
            })
        };
        let found = self
            .principals()
            .into_iter()
            .filter(|(_, e)| {
                if anyof {
                    terms.iter().any(|t| hit(e, t))
                } else {
                    terms.iter().all(|t| hit(e, t))
                }
            })
            .map(|(p, _)| self.handle(p))
            .collect();
        Ok(found)
    }

    fn match_self(&self, _store: &dyn DavStore, principal: &DavPath) -> FsResult<Vec<DavNodeRef>> {
        let found = self
            .principals()
            .into_iter()
            .filter(|(p, e)| p == principal || e.members.contains(principal))
            .map(|(p, _)| self.handle(p))
            .collect();
        Ok(found)
    }
}

impl DavPropSetter for MemNode {
    fn set_dav_props(&self, props: &PropMap) -> FsResult<bool> {
        self.tree.write().modify(&self.path, |e| {
            for (n, v) in props.iter() {
                match v {
                    Some(v) => e.props.insert(n.clone(), Some(v.clone())),
                    None => {
                        e.props.remove(n);
                    }
                }
            }
        })?;
        Ok(true)
    }
}

impl DavCreator for MemNode {
    fn dav_create(
        &self,
        name: &str,
        resource_type: &[PropName],
        props: &PropMap,
    ) -> FsResult<DavNodeRef> {
        let kind = if resource_type.is_empty() {
            NodeKind::Resource
        } else if resource_type.contains(&PropName::carddav("addressbook")) {
            NodeKind::AddressBook
        } else if resource_type.contains(&PropName::caldav("calendar")) {
            NodeKind::Calendar
        } else if resource_type.contains(&PropName::carddav("directory")) {
            NodeKind::Directory
        } else if resource_type.contains(&PropName::dav("principal")) {
            NodeKind::Principal
        } else {
            NodeKind::Collection
        };
        let path = self.path.join(name);
        let mut tree = self.tree.write();
        let seq = tree.next_seq();
        let mut entry = Entry::new(kind, seq);
        for (n, v) in props.iter() {
            if let Some(v) = v {
                entry.props.insert(n.clone(), Some(v.clone()));
            }
        }
        tree.insert(&path, entry)?;
        drop(tree);
        debug!("memfs: created {:?} {}", kind, path);
        Ok(self.handle(path))
    }
}

impl DavCard for MemNode {
    fn vcard(&self) -> String {
        self.with(|e| e.vcard.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_partial() {
        let fs = MemFs::new();
        fs.create("/a/", NodeKind::Collection).unwrap();
        fs.create("/a/b", NodeKind::Resource).unwrap();
        let (n, rest) = fs.lookup(&DavPath::new("/a/x/y").unwrap()).unwrap();
        assert_eq!(n.path(), DavPath::new("/a").unwrap());
        assert_eq!(rest, vec!["x".to_string(), "y".to_string()]);
        assert!(fs.node(&DavPath::new("/a/b").unwrap()).is_ok());
        assert_eq!(fs.create("/a/b/c", NodeKind::Resource).err(), Some(FsError::Conflict));
        assert_eq!(fs.create("/a/b", NodeKind::Resource).err(), Some(FsError::Exists));
    }

    #[test]
    fn history_and_tokens() {
        let fs = MemFs::new();
        let coll = fs.create("/c/", NodeKind::AddressBook).unwrap();
        fs.create("/c/sub/", NodeKind::Collection).unwrap();
        let t0 = coll.as_history().unwrap().sync_token();
        fs.create("/c/sub/x", NodeKind::Card).unwrap();
        let t1 = coll.as_history().unwrap().sync_token();
        assert!(t1 > t0);
        // a change below a member moves the token, but is not a member change.
        assert!(coll.as_history().unwrap().get_history(t0, t1).is_empty());
        fs.remove("/c/sub/").unwrap();
        let h = coll.as_history().unwrap().get_history(t1, u64::MAX);
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].kind, HistoryKind::Deleted);
        assert!(h[0].is_collection);
    }

    #[test]
    fn etag_changes() {
        let fs = MemFs::new();
        let n = fs.create("/f", NodeKind::Resource).unwrap();
        let e1 = n.etag().unwrap();
        fs.modify("/f").unwrap();
        assert_ne!(n.etag().unwrap(), e1);
        assert!(!n.etag().unwrap().trim_matches('"').contains('"'));
    }

    #[test]
    fn copy_and_delete() {
        let fs = MemFs::new();
        let a = fs.create("/a/", NodeKind::Collection).unwrap();
        fs.create("/a/x", NodeKind::Resource).unwrap();
        let root = fs.node(&DavPath::root()).unwrap();
        let b = fs.clone_node(&a, &root, "b", true).unwrap();
        assert_eq!(fs.children(&b).unwrap().len(), 1);
        assert_eq!(fs.delete(&a, false).err(), Some(FsError::Conflict));
        fs.delete(&a, true).unwrap();
        assert!(fs.node(&DavPath::new("/a/").unwrap()).is_err());
        assert_eq!(fs.clone_node(&b, &b, "c", true).err(), Some(FsError::Forbidden));
    }
}
