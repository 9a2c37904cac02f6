//! WebDAV (RFC 4918) is HTTP plus a bunch of extra methods, and a lot of
//! XML. This crate is the protocol engine for it.
//!
//! It takes an `http::Request<Bytes>` and produces an `http::Response<Bytes>`.
//! In between it does property negotiation (PROPFIND / PROPPATCH),
//! access control (RFC 3744), locking with conditional requests, and the
//! REPORT method with the RFC 3253 / 3744 / 6578 / 6352 reports:
//!
//! - `expand-property`
//! - `principal-property-search`, `principal-search-property-set`,
//!   `acl-principal-prop-set` and `principal-match`
//! - `sync-collection`
//! - CardDAV `addressbook-query` and `addressbook-multiget`
//!
//! Content transfer (GET / HEAD / PUT / PATCH) is up to the host; the
//! engine answers those with `501 Not Implemented` and an `Allow` header.
//!
//! Storage is pluggable: you supply a [`DavStore`](fs::DavStore) that hands
//! out nodes, and each node tells the engine what it is (collection,
//! principal, address book, ...) through capability methods. Locks live in
//! a [`DavLockSystem`](ls::DavLockSystem).
//!
//! Included are:
//!
//! - memfs: ephemeral in-memory store, with ACLs, principals, vCards and
//!   change history.
//! - memls: ephemeral in-memory locksystem.
//!
//! Example:
//!
//! ```
//! use bytes::Bytes;
//! use dav_engine::acl::{Ace, Acl, PrincipalMatcher};
//! use dav_engine::{DavHandler, memfs::MemFs, memls::MemLs};
//!
//! let dav = DavHandler::builder()
//!     .store(MemFs::new())
//!     .locksystem(MemLs::new())
//!     .default_acl(Acl(vec![Ace::grant(PrincipalMatcher::All, &["all"])]))
//!     .build_handler();
//!
//! let req = http::Request::builder()
//!     .method("PROPFIND")
//!     .uri("/")
//!     .header("Depth", "0")
//!     .body(Bytes::new())
//!     .unwrap();
//! let resp = dav.handle(req);
//! assert_eq!(resp.status(), 207);
//! ```
#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod errors;
mod handle_acl;
mod handle_carddav;
mod handle_copymove;
mod handle_delete;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod report_expand;
mod report_principal;
mod report_sync;
mod util;
mod xmltree_ext;

pub mod acl;
pub mod carddav;
pub mod collation;
pub mod dav_filters;
pub mod davheaders;
pub mod davpath;
pub mod davprops;
pub mod davrequest;
pub mod davvalue;
pub mod fs;
pub mod ls;
pub mod manager;
pub mod memfs;
pub mod memls;
pub mod multistatus;
pub mod report;
pub mod voidfs;

pub use crate::davhandler::{
    DEFAULT_EXPAND_PROPERTY_DEPTH, DEFAULT_SYNC_TOKEN_PREFIX, DavConfig, DavHandler,
};
pub use crate::errors::{DavError, DavResult};
pub use crate::handle_carddav::{AddressbookMultigetReport, AddressbookQueryReport};
pub use crate::report_expand::ExpandPropertyReport;
pub use crate::report_principal::{
    AclPrincipalPropSetReport, PrincipalMatchReport, PrincipalPropertySearchReport,
    PrincipalSearchPropertySetReport,
};
pub use crate::report_sync::SyncCollectionReport;
pub use crate::util::{DavMethod, DavMethodSet};
