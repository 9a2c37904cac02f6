use std::error::Error;

use bytes::Bytes;
use http::{Response, StatusCode};
use xmltree::Element;

use crate::davprops::PropName;
use crate::fs::FsError;
use crate::ls::DavLock;
use crate::xmltree_ext::{ElementExt, dav_root};

/// Everything that can abort a request.
///
/// Each variant maps to one status code, and most of the 403/409/412/423
/// ones render a DAV precondition element inside `<D:error>`.
#[derive(Debug)]
pub enum DavError {
    BadRequest(String),
    NotAuthenticated,
    Forbidden,
    InvalidResourceType,
    ReportNotSupported,
    NeedPrivileges {
        href: String,
        privileges: Vec<PropName>,
    },
    TooManyMatches,
    InvalidSyncToken,
    PropfindFiniteDepth,
    AclRestricted(&'static str),
    NotFound,
    MethodNotAllowed(Vec<String>),
    Conflict,
    LockTokenMismatch,
    AceConflict,
    LengthRequired,
    PreconditionFailed(&'static str),
    NoAbstractPrivilege,
    UnrecognizedPrincipal,
    UnsupportedPrivilege,
    UnsupportedMediaType,
    UnsatisfiableRange,
    Locked(Option<DavLock>),
    ConflictingLock(DavLock),
    NotImplemented(Vec<String>),
    InsufficientStorage,
    XmlReadError,
    XmlWriteError,
    Status(StatusCode),
    FsError(FsError),
}

pub type DavResult<T> = Result<T, DavError>;

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::FsError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::BadRequest(s) => write!(f, "bad request: {}", s),
            DavError::XmlReadError => write!(f, "XML parse error"),
            DavError::XmlWriteError => write!(f, "XML generate error"),
            DavError::FsError(e) => write!(f, "store error: {}", e),
            DavError::PreconditionFailed(h) => write!(f, "precondition failed: {}", h),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::Conflict => StatusCode::CONFLICT,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            DavError::Forbidden
            | DavError::InvalidResourceType
            | DavError::ReportNotSupported
            | DavError::NeedPrivileges { .. }
            | DavError::TooManyMatches
            | DavError::InvalidSyncToken
            | DavError::PropfindFiniteDepth
            | DavError::AclRestricted(_) => StatusCode::FORBIDDEN,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Conflict | DavError::LockTokenMismatch | DavError::AceConflict => {
                StatusCode::CONFLICT
            }
            DavError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            DavError::PreconditionFailed(_)
            | DavError::NoAbstractPrivilege
            | DavError::UnrecognizedPrincipal
            | DavError::UnsupportedPrivilege => StatusCode::PRECONDITION_FAILED,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::UnsatisfiableRange => StatusCode::RANGE_NOT_SATISFIABLE,
            DavError::Locked(_) | DavError::ConflictingLock(_) => StatusCode::LOCKED,
            DavError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            DavError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Status(s) => *s,
            DavError::FsError(e) => fserror_to_status(e),
        }
    }

    /// The precondition/postcondition element that goes inside `<D:error>`.
    pub fn condition(&self, prefix: &str) -> Option<Element> {
        let e = match self {
            DavError::InvalidResourceType => Element::new2("D:valid-resourcetype"),
            DavError::ReportNotSupported => Element::new2("D:supported-report"),
            DavError::NeedPrivileges { href, privileges } => {
                let mut e = Element::new2("D:need-privileges");
                for p in privileges {
                    let res = Element::new2("D:resource")
                        .child(Element::new_text("D:href", href.clone()))
                        .child(Element::new2("D:privilege").child(p.element()));
                    e.push_elem(res);
                }
                e
            }
            DavError::TooManyMatches => Element::new2("D:number-of-matches-within-limits"),
            DavError::InvalidSyncToken => Element::new2("D:valid-sync-token"),
            DavError::PropfindFiniteDepth => Element::new2("D:propfind-finite-depth"),
            DavError::AclRestricted(name) => Element::new2(&format!("D:{}", name)),
            DavError::LockTokenMismatch => Element::new2("D:lock-token-matches-request-uri"),
            DavError::AceConflict => Element::new2("D:no-ace-conflict"),
            DavError::NoAbstractPrivilege => Element::new2("D:no-abstract"),
            DavError::UnrecognizedPrincipal => Element::new2("D:recognized-principal"),
            DavError::UnsupportedPrivilege => Element::new2("D:not-supported-privilege"),
            DavError::Locked(lock) => {
                let mut e = Element::new2("D:lock-token-submitted");
                if let Some(lock) = lock {
                    e.push_elem(Element::new_text(
                        "D:href",
                        format!("{}{}", prefix, lock.path.as_url_string(false)),
                    ));
                }
                e
            }
            DavError::ConflictingLock(lock) => Element::new2("D:no-conflicting-lock").child(
                Element::new_text(
                    "D:href",
                    format!("{}{}", prefix, lock.path.as_url_string(false)),
                ),
            ),
            _ => return None,
        };
        Some(e)
    }

    /// Methods for the `Allow` header of a 405 or 501.
    pub fn allow(&self) -> Option<&[String]> {
        match self {
            DavError::MethodNotAllowed(m) | DavError::NotImplemented(m) => Some(m),
            _ => None,
        }
    }

    /// Render into a complete response. `prefix` is prepended to paths in
    /// condition elements.
    pub fn to_response(&self, prefix: &str) -> Response<Bytes> {
        let status = self.statuscode();
        let mut resp = Response::builder().status(status);
        if let Some(methods) = self.allow().filter(|m| !m.is_empty()) {
            resp = resp.header("Allow", methods.join(", "));
        }
        let body = match self.condition(prefix) {
            Some(cond) => {
                let doc = dav_root("D:error").child(cond);
                match doc.to_xml(true) {
                    Ok(b) => {
                        resp = resp.header("Content-Type", "application/xml; charset=utf-8");
                        Bytes::from(b)
                    }
                    Err(_) => Bytes::new(),
                }
            }
            None => Bytes::new(),
        };
        resp = resp.header("Content-Length", body.len().to_string());
        resp.body(body).unwrap_or_else(|_| {
            let mut r = Response::new(Bytes::new());
            *r.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            r
        })
    }
}
