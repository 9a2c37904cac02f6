//! The DAV:sync-collection report (RFC 6578).
//!
//! Tokens are `<prefix><n>`, where `n` is the collection's history
//! counter. Without a token the report lists all members, with a token
//! it lists the members that changed since then.
use http::StatusCode;

use crate::davheaders::Depth;
use crate::davprops::{NS_DAV_URI, PropName, PropSet};
use crate::errors::{DavError, DavResult};
use crate::fs::{DavNodeRef, FsError, HistoryKind};
use crate::manager::DavManager;
use crate::multistatus::{DavResponse, MultiStatus, ReportResult, ResponseTarget};
use crate::report::{DavReport, ReportRequest};
use crate::xmltree_ext::{ElementExt, elem_u64};

#[derive(Debug)]
pub struct SyncCollectionReport;

/// Parse a client supplied token. The empty token means "initial sync".
pub(crate) fn parse_sync_token(mgr: &DavManager, token: &str) -> DavResult<Option<u64>> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(None);
    }
    token
        .strip_prefix(mgr.sync_token_prefix.as_str())
        .and_then(|n| n.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| {
            debug!("invalid sync token {}", token);
            DavError::InvalidSyncToken
        })
}

struct SyncWalk<'a> {
    mgr: &'a DavManager,
    set: PropSet,
    responses: Vec<DavResponse>,
}

impl SyncWalk<'_> {
    fn readable(&self, node: &DavNodeRef) -> bool {
        self.mgr.has_privileges(node, &[PropName::dav("read")])
    }

    fn member(&mut self, node: &DavNodeRef) {
        if self.readable(node) {
            let stats = self.mgr.get_node_props(node, &self.set);
            self.responses.push(DavResponse::props(node.clone(), stats));
        }
    }

    // initial sync: every member, depth first. Like PROPFIND, but without
    // the collection itself, so depth 0 and 1 both list the members.
    fn full(&mut self, coll: &DavNodeRef, depth: Depth) -> DavResult<()> {
        let children = match self.mgr.store().children(coll) {
            Ok(c) => c,
            Err(FsError::NotImplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for child in children {
            self.member(&child);
            if child.is_collection() {
                match depth.decrement() {
                    None | Some(Depth::ZERO) => {}
                    Some(next) => self.full(&child, next)?,
                }
            }
        }
        Ok(())
    }

    // incremental sync: the history of this collection, then the child
    // collections that changed after `since`.
    fn changes(&mut self, coll: &DavNodeRef, since: u64, depth: Depth) -> DavResult<()> {
        let Some(history) = coll.as_history() else {
            return Ok(());
        };
        let mut entries = history.get_history(since, history.sync_token());
        // only the last change of each member counts.
        let mut seen = Vec::new();
        entries.reverse();
        entries.retain(|e| {
            if seen.contains(&e.name) {
                false
            } else {
                seen.push(e.name.clone());
                true
            }
        });
        entries.reverse();

        let base = coll.path();
        for entry in &entries {
            let path = base.join(&entry.name);
            if entry.kind == HistoryKind::Deleted {
                let uri = self.mgr.path_uri(&path, true);
                let uri = if entry.is_collection && !uri.ends_with('/') {
                    format!("{}/", uri)
                } else {
                    uri
                };
                self.responses
                    .push(DavResponse::status(ResponseTarget::Uri(uri), StatusCode::NOT_FOUND));
                continue;
            }
            match self.mgr.store().node(&path) {
                Ok(node) => self.member(&node),
                Err(_) => trace!("sync: {} vanished", path),
            }
        }

        let Some(next) = depth.decrement() else {
            return Ok(());
        };
        let children = match self.mgr.store().children(coll) {
            Ok(c) => c,
            Err(FsError::NotImplemented) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for child in children {
            let newer = child.as_history().is_some_and(|h| h.sync_token() > since);
            if newer {
                self.changes(&child, since, next)?;
            }
        }
        Ok(())
    }
}

impl DavReport for SyncCollectionReport {
    fn name(&self) -> PropName {
        PropName::dav("sync-collection")
    }

    fn supports(&self, node: &DavNodeRef, _mgr: &DavManager) -> bool {
        node.as_history().is_some()
    }

    fn invoke(&self, mgr: &DavManager, req: &ReportRequest) -> DavResult<ReportResult> {
        let history = req.node.as_history().ok_or(DavError::ReportNotSupported)?;
        let current = history.sync_token();
        let body = &req.body;

        let token = body
            .find_elem(NS_DAV_URI, "sync-token")
            .map(|e| e.text_content())
            .unwrap_or_default();
        let since = parse_sync_token(mgr, &token)?;
        if since.is_some_and(|s| s > current) {
            debug!("sync token {} is from the future", token);
            return Err(DavError::InvalidSyncToken);
        }

        // sync-level 1 is the members only, below that is recursion.
        let depth = match body.find_elem(NS_DAV_URI, "sync-level").map(|e| e.text_content()) {
            Some(l) if l == "1" => Depth::ZERO,
            Some(l) if l.eq_ignore_ascii_case("infinite") || l.eq_ignore_ascii_case("infinity") => {
                Depth::Infinity
            }
            Some(l) => return Err(DavError::BadRequest(format!("invalid sync-level {}", l))),
            None => req.depth,
        };
        let limit = body
            .find_elem(NS_DAV_URI, "limit")
            .and_then(|l| l.find_elem(NS_DAV_URI, "nresults"))
            .and_then(elem_u64);

        let names = body
            .find_elem(NS_DAV_URI, "prop")
            .map(|p| mgr.parse_propnames(p))
            .unwrap_or_else(|| vec![PropName::dav("getetag")]);

        let mut walk = SyncWalk {
            mgr,
            set: PropSet::Names(names),
            responses: Vec::new(),
        };
        match since {
            None => walk.full(&req.node, depth)?,
            Some(since) => walk.changes(&req.node, since, depth)?,
        }

        if limit.is_some_and(|l| walk.responses.len() as u64 > l) {
            debug!("sync-collection: {} results over the limit", walk.responses.len());
            return Err(DavError::TooManyMatches);
        }

        let mut ms = MultiStatus::new();
        ms.responses = walk.responses;
        ms.sync_token = mgr.sync_token(&req.node);
        Ok(ReportResult::MultiStatus(ms))
    }
}
