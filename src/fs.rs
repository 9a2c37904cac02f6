//! Contains the structs and traits that define a node store.
//!
//! The engine never stores anything itself. It asks a `DavStore` for nodes,
//! and asks each node which capabilities it has: collection, principal,
//! calendar, address book, directory, change history, search, property
//! setter, creator and vCard. A missing capability means "fall back to
//! omission".
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dyn_clone::{DynClone, clone_trait_object};

use crate::acl::{Acl, AclRestrictions};
use crate::davpath::DavPath;
use crate::davprops::{PropMap, PropName, PropSet};
use crate::util::DavMethod;

/// Errors generated by a store backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsError {
    NotFound,
    Forbidden,
    Exists,
    Conflict,
    NotImplemented,
    GeneralFailure,
    InsufficientStorage,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

impl std::error::Error for FsError {}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type DavNodeRef = Arc<dyn DavNode>;

/// A node in the store.
///
/// Only `path` is mandatory, everything else defaults to "not supported".
pub trait DavNode: Debug + Send + Sync {
    /// Path relative to the DAV root.
    fn path(&self) -> DavPath;

    /// Full entity tag, including the quotes.
    fn etag(&self) -> Option<String> {
        None
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Properties the node provides itself. These always take
    /// precedence over properties computed by the engine.
    #[allow(unused_variables)]
    fn dav_props(&self, wanted: &PropSet) -> PropMap {
        PropMap::new()
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn is_calendar(&self) -> bool {
        false
    }

    fn is_addressbook(&self) -> bool {
        false
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn as_principal(&self) -> Option<&dyn DavPrincipal> {
        None
    }

    fn as_history(&self) -> Option<&dyn DavHistory> {
        None
    }

    fn as_search(&self) -> Option<&dyn DavSearch> {
        None
    }

    fn as_setter(&self) -> Option<&dyn DavPropSetter> {
        None
    }

    fn as_creator(&self) -> Option<&dyn DavCreator> {
        None
    }

    fn as_card(&self) -> Option<&dyn DavCard> {
        None
    }

    /// The node's own ACL. `None` means it inherits one.
    fn acl(&self) -> Option<Acl> {
        None
    }

    fn acl_restrictions(&self) -> AclRestrictions {
        AclRestrictions::default()
    }

    /// Replace the ACL (ACL method).
    #[allow(unused_variables)]
    fn set_acl(&self, acl: Acl) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn dav_owner(&self) -> Option<DavPath> {
        None
    }

    fn dav_group(&self) -> Option<DavPath> {
        None
    }

    /// Extra compliance classes for the `DAV:` header.
    fn dav_features(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra methods for the `Allow` header.
    fn dav_methods(&self) -> Vec<DavMethod> {
        Vec::new()
    }

    /// Extra report names for `supported-report-set`.
    fn dav_reports(&self) -> Vec<PropName> {
        Vec::new()
    }
}

/// A principal (user or group).
pub trait DavPrincipal {
    /// Groups this principal is a member of.
    fn group_membership(&self) -> Vec<DavPath> {
        Vec::new()
    }

    /// Members, if this is a group.
    fn group_member_set(&self) -> Vec<DavPath> {
        Vec::new()
    }

    /// Other URIs that identify this principal (e.g. `mailto:`).
    fn alternate_uri_set(&self) -> Vec<String> {
        Vec::new()
    }

    fn calendar_home_set(&self) -> Vec<DavPath> {
        Vec::new()
    }

    fn addressbook_home_set(&self) -> Vec<DavPath> {
        Vec::new()
    }

    fn directory_gateway(&self) -> Vec<DavPath> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Created,
    Modified,
    Deleted,
}

/// One entry in a collection's change history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Name of the member, relative to the collection.
    pub name: String,
    /// Token of the collection after this change.
    pub token: u64,
    pub kind: HistoryKind,
    pub is_collection: bool,
}

/// A collection that keeps a change history (sync-collection).
///
/// The token must increase on every change of the collection.
pub trait DavHistory {
    fn sync_token(&self) -> u64;

    /// Changes with `since < token <= until`, oldest first.
    fn get_history(&self, since: u64, until: u64) -> Vec<HistoryEntry>;
}

/// A principal collection that can be searched.
pub trait DavSearch {
    /// Searchable properties and their description.
    fn search_fields(&self) -> Vec<(PropName, String)>;

    /// Principals below this collection matching the (property, text) terms.
    fn search_principals(
        &self,
        store: &dyn DavStore,
        terms: &[(PropName, String)],
        anyof: bool,
    ) -> FsResult<Vec<DavNodeRef>>;

    /// Principals below this collection that are, or contain, `principal`.
    fn match_self(&self, store: &dyn DavStore, principal: &DavPath) -> FsResult<Vec<DavNodeRef>>;
}

/// A node that can store properties.
pub trait DavPropSetter {
    /// Store or (for `None` values) remove all properties at once.
    /// Returns `Ok(false)` if the node refused the update.
    fn set_dav_props(&self, props: &PropMap) -> FsResult<bool>;
}

/// A collection that can create members.
pub trait DavCreator {
    fn dav_create(
        &self,
        name: &str,
        resource_type: &[PropName],
        props: &PropMap,
    ) -> FsResult<DavNodeRef>;
}

/// An address object resource.
pub trait DavCard {
    fn vcard(&self) -> String;
}

/// The store itself.
pub trait DavStore: Debug + Send + Sync + DynClone {
    /// Walk the path as far as it exists. Returns the deepest node
    /// found and the segments that could not be resolved.
    fn lookup(&self, path: &DavPath) -> FsResult<(DavNodeRef, Vec<String>)>;

    fn children(&self, node: &DavNodeRef) -> FsResult<Vec<DavNodeRef>>;

    fn delete(&self, node: &DavNodeRef, recursive: bool) -> FsResult<()>;

    /// Copy `node` into `parent` under `name`.
    fn clone_node(
        &self,
        node: &DavNodeRef,
        parent: &DavNodeRef,
        name: &str,
        recursive: bool,
    ) -> FsResult<DavNodeRef>;

    /// Exact lookup.
    fn node(&self, path: &DavPath) -> FsResult<DavNodeRef> {
        let (node, rest) = self.lookup(path)?;
        if rest.is_empty() {
            Ok(node)
        } else {
            Err(FsError::NotFound)
        }
    }
}

clone_trait_object! {DavStore}

/// Collections are rendered with a trailing slash.
pub(crate) fn is_collection_like(node: &DavNodeRef) -> bool {
    node.is_collection() || node.as_principal().is_some()
}
