//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};

use crate::acl::Acl;
use crate::davpath::DavPath;
use crate::davprops::PropName;
use crate::davvalue::{TypeMap, ValueKind};
use crate::errors::DavError;
use crate::fs::DavStore;
use crate::ls::DavLockSystem;
use crate::manager::DavManager;
use crate::report::{DavReport, ReportRegistry};
use crate::util::{DavMethod, DavMethodSet, dav_method};
use crate::voidfs::VoidStore;
use crate::DavResult;

/// Prefix of the sync tokens, unless configured otherwise.
pub const DEFAULT_SYNC_TOKEN_PREFIX: &str = "urn:x-dav-engine:sync:";

/// Nesting limit of expand-property requests, unless configured otherwise.
pub const DEFAULT_EXPAND_PROPERTY_DEPTH: u32 = 8;

/// WebDAV request handler.
///
/// The [`new`](Self::new) and [`builder`](Self::builder) methods are used to instantiate a handler.
///
/// The [`handle`](Self::handle) and [`handle_with`](Self::handle_with) methods do the actual work.
#[derive(Clone, Default)]
pub struct DavHandler {
    pub(crate) config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Clone, Default)]
pub struct DavConfig {
    // Prefix to be stripped off when handling request.
    pub(crate) prefix: Option<String>,
    // Store backend.
    pub(crate) store: Option<Box<dyn DavStore>>,
    // Locksystem backend.
    pub(crate) ls: Option<Box<dyn DavLockSystem>>,
    // Set of allowed methods (None means "all methods")
    pub(crate) allow: Option<DavMethodSet>,
    // Path of the principal making the request.
    pub(crate) principal: Option<String>,
    // Scheme and authority for absolute URIs.
    pub(crate) base_url: Option<url::Url>,
    // Where principal-property-search looks by default.
    pub(crate) principal_collections: Option<Vec<DavPath>>,
    pub(crate) sync_token_prefix: Option<String>,
    pub(crate) expand_property_depth: Option<u32>,
    pub(crate) max_lock_timeout: Option<Duration>,
    // PROPFIND with Depth: infinity. `None` maps to `false`.
    pub(crate) infinite_depth: Option<bool>,
    pub(crate) max_search_results: Option<usize>,
    // ACL for nodes without an ACL of their own, or of an ancestor.
    pub(crate) default_acl: Option<Acl>,
    // Extra entries for the PROPPATCH / MKCOL value type map.
    pub(crate) type_map: Option<TypeMap>,
    // Extra reports.
    pub(crate) reports: Vec<Arc<dyn DavReport>>,
}

impl std::fmt::Debug for DavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DavConfig")
            .field("prefix", &self.prefix)
            .field("principal", &self.principal)
            .field("allow", &self.allow)
            .finish_non_exhaustive()
    }
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the configuration that was built to generate a [`DavHandler`].
    pub fn build_handler(self) -> DavHandler {
        DavHandler {
            config: Arc::new(self),
        }
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a node path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = Some(prefix.into());
        this
    }

    /// Set the store to use.
    pub fn store(self, store: Box<dyn DavStore>) -> Self {
        let mut this = self;
        this.store = Some(store);
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: Box<dyn DavLockSystem>) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = Some(allow);
        this
    }

    /// Path of the principal ("user") making the request. Usually set per
    /// request with [`DavHandler::handle_with`].
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Make hrefs absolute, using the scheme and authority of `url`.
    pub fn base_url(self, url: url::Url) -> Self {
        let mut this = self;
        this.base_url = Some(url);
        this
    }

    /// Collections that hold principals. Default is `/principals/users/`
    /// and `/principals/groups/`.
    pub fn principal_collections(self, paths: Vec<&str>) -> Self {
        let mut this = self;
        let paths = paths
            .into_iter()
            .filter_map(|p| match DavPath::new(p) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("principal collection {}: {}", p, e);
                    None
                }
            })
            .collect();
        this.principal_collections = Some(paths);
        this
    }

    pub fn sync_token_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.sync_token_prefix = Some(prefix.into());
        this
    }

    /// How deep expand-property requests may nest (default 8).
    pub fn expand_property_depth(self, depth: u32) -> Self {
        let mut this = self;
        this.expand_property_depth = Some(depth);
        this
    }

    /// Upper limit for lock timeouts. Without it, infinite locks can be
    /// requested.
    pub fn max_lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.max_lock_timeout = Some(timeout);
        this
    }

    /// Allow PROPFIND with `Depth: infinity` (default false).
    pub fn infinite_depth(self, allow: bool) -> Self {
        let mut this = self;
        this.infinite_depth = Some(allow);
        this
    }

    /// Limit the number of principal-property-search results.
    pub fn max_search_results(self, max: usize) -> Self {
        let mut this = self;
        this.max_search_results = Some(max);
        this
    }

    pub fn default_acl(self, acl: Acl) -> Self {
        let mut this = self;
        this.default_acl = Some(acl);
        this
    }

    /// How values of a property are parsed in PROPPATCH and MKCOL.
    /// Properties without an entry are kept as XML.
    pub fn property_type(self, name: PropName, kind: ValueKind) -> Self {
        let mut this = self;
        this.type_map
            .get_or_insert_with(TypeMap::empty)
            .insert(name, kind);
        this
    }

    /// Add a report, or replace a builtin one with the same name.
    pub fn report(self, report: Arc<dyn DavReport>) -> Self {
        let mut this = self;
        this.reports.push(report);
        this
    }

    fn merge(&self, new: Self) -> Self {
        let mut reports = self.reports.clone();
        reports.extend(new.reports);
        let type_map = match (&self.type_map, new.type_map) {
            (Some(old), Some(new)) => {
                let mut m = old.clone();
                m.merge(&new);
                Some(m)
            }
            (old, new) => new.or_else(|| old.clone()),
        };
        Self {
            prefix: new.prefix.or_else(|| self.prefix.clone()),
            store: new.store.or_else(|| self.store.clone()),
            ls: new.ls.or_else(|| self.ls.clone()),
            allow: new.allow.or(self.allow),
            principal: new.principal.or_else(|| self.principal.clone()),
            base_url: new.base_url.or_else(|| self.base_url.clone()),
            principal_collections: new
                .principal_collections
                .or_else(|| self.principal_collections.clone()),
            sync_token_prefix: new
                .sync_token_prefix
                .or_else(|| self.sync_token_prefix.clone()),
            expand_property_depth: new.expand_property_depth.or(self.expand_property_depth),
            max_lock_timeout: new.max_lock_timeout.or(self.max_lock_timeout),
            infinite_depth: new.infinite_depth.or(self.infinite_depth),
            max_search_results: new.max_search_results.or(self.max_search_results),
            default_acl: new.default_acl.or_else(|| self.default_acl.clone()),
            type_map,
            reports,
        }
    }

    /// Turn the configuration into a manager for one request.
    pub(crate) fn build_manager(&self, host: Option<String>) -> DavManager {
        let store = self.store.clone().unwrap_or_else(VoidStore::new);
        let principal = self.principal.as_ref().and_then(|p| {
            match DavPath::new(p).ok().and_then(|p| store.node(&p).ok()) {
                Some(node) => Some(node),
                None => {
                    warn!("principal {} does not exist", p);
                    None
                }
            }
        });
        let principal_collections = self.principal_collections.clone().unwrap_or_else(|| {
            ["/principals/users/", "/principals/groups/"]
                .iter()
                .filter_map(|p| DavPath::new(p).ok())
                .collect()
        });
        let mut type_map = TypeMap::default();
        if let Some(ref m) = self.type_map {
            type_map.merge(m);
        }
        let mut reports = ReportRegistry::default();
        for r in &self.reports {
            reports.register(r.clone());
        }
        DavManager {
            prefix: self.prefix.clone().unwrap_or_default(),
            base_url: self.base_url.clone(),
            host,
            store,
            ls: self.ls.clone(),
            allow: self.allow,
            principal,
            principal_collections,
            sync_token_prefix: self
                .sync_token_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_SYNC_TOKEN_PREFIX.to_string()),
            expand_property_depth: self
                .expand_property_depth
                .unwrap_or(DEFAULT_EXPAND_PROPERTY_DEPTH),
            max_lock_timeout: self.max_lock_timeout,
            infinite_depth: self.infinite_depth.unwrap_or(false),
            max_search_results: self.max_search_results,
            default_acl: self.default_acl.clone(),
            type_map,
            reports,
        }
    }
}

// host the request was sent to, from the URI or the Host header.
fn request_host(req: &Request<Bytes>) -> Option<String> {
    req.uri().host().map(|h| h.to_string()).or_else(|| {
        req.headers()
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.to_string())
    })
}

impl DavHandler {
    /// Create a new `DavHandler`.
    ///
    /// This returns a DavHandler with an empty configuration. That's only
    /// useful if you use the `handle_with` method instead of `handle`.
    /// Normally you should create a new `DavHandler` using `DavHandler::builder`
    /// and configure at least the store, and probably the strip_prefix.
    pub fn new() -> Self {
        Self {
            config: Default::default(),
        }
    }

    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Process a WebDAV request.
    pub fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let mgr = self.config.build_manager(request_host(&req));
        mgr.handle(req)
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    pub fn handle_with(&self, config: DavConfig, req: Request<Bytes>) -> Response<Bytes> {
        let mgr = self.config.merge(config).build_manager(request_host(&req));
        mgr.handle(req)
    }
}

impl DavManager {
    // helper.
    pub(crate) fn path(&self, req: &Request<Bytes>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri(req.uri(), &self.prefix)?)
    }

    // internal dispatcher.
    fn handle(self, req: Request<Bytes>) -> Response<Bytes> {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(&req) {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                err.to_response(&self.prefix)
            }
        }
    }

    // internal dispatcher part 2.
    fn handle2(&self, req: &Request<Bytes>) -> DavResult<Response<Bytes>> {
        let path = self.path(req)?;
        let node = self.store().node(&path).ok();

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(_) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(DavError::NotImplemented(self.allow_strings(node.as_ref())));
            }
        };

        // content transfer is up to the host.
        if matches!(
            method,
            DavMethod::Get | DavMethod::Head | DavMethod::Put | DavMethod::Patch
        ) {
            debug!("{} is not handled here", method.as_str());
            return Err(DavError::NotImplemented(self.allow_strings(node.as_ref())));
        }

        // see if method is allowed.
        if let Some(ref a) = self.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::MethodNotAllowed(self.allow_strings(node.as_ref())));
            }
        }

        // Not all methods accept a body, and some need one.
        let body = req.body();
        match method {
            DavMethod::PropPatch | DavMethod::Report | DavMethod::Acl => {
                if body.is_empty() && !req.headers().contains_key(http::header::CONTENT_LENGTH) {
                    return Err(DavError::LengthRequired);
                }
            }
            DavMethod::PropFind | DavMethod::MkCol | DavMethod::Lock => {}
            _ => {
                if !body.is_empty() {
                    return Err(DavError::UnsupportedMediaType);
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => self.handle_options(req),
            DavMethod::PropFind => self.handle_propfind(req),
            DavMethod::PropPatch => self.handle_proppatch(req),
            DavMethod::MkCol => self.handle_mkcol(req),
            DavMethod::Delete => self.handle_delete(req),
            DavMethod::Lock => self.handle_lock(req),
            DavMethod::Unlock => self.handle_unlock(req),
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(req, method),
            DavMethod::Report => self.handle_report(req),
            DavMethod::Acl => self.handle_acl(req),
            DavMethod::Get | DavMethod::Head | DavMethod::Put | DavMethod::Patch => {
                Err(DavError::NotImplemented(self.allow_strings(node.as_ref())))
            }
        }
    }
}
