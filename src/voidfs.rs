//! Placeholder store. It has an empty root collection and refuses every
//! change with `FsError::NotImplemented`.
//!
//! Used when a handler was configured without a store.
use std::sync::Arc;

use crate::davpath::DavPath;
use crate::fs::*;

/// Placeholder store.
#[derive(Debug, Clone)]
pub struct VoidStore;

#[derive(Debug)]
struct VoidRoot;

impl VoidStore {
    pub fn new() -> Box<dyn DavStore> {
        Box::new(VoidStore)
    }
}

impl DavNode for VoidRoot {
    fn path(&self) -> DavPath {
        DavPath::root()
    }

    fn is_collection(&self) -> bool {
        true
    }
}

impl DavStore for VoidStore {
    fn lookup(&self, path: &DavPath) -> FsResult<(DavNodeRef, Vec<String>)> {
        Ok((Arc::new(VoidRoot), path.segments().to_vec()))
    }

    fn children(&self, _node: &DavNodeRef) -> FsResult<Vec<DavNodeRef>> {
        Ok(Vec::new())
    }

    fn delete(&self, _node: &DavNodeRef, _recursive: bool) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn clone_node(
        &self,
        _node: &DavNodeRef,
        _parent: &DavNodeRef,
        _name: &str,
        _recursive: bool,
    ) -> FsResult<DavNodeRef> {
        Err(FsError::NotImplemented)
    }
}
