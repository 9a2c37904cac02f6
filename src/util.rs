use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use headers::Header;
use http::method::InvalidMethod;

use crate::errors::DavError;
use crate::DavResult;

/// HTTP Methods supported by DavHandler.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum DavMethod {
    Head      = 0x0001,
    Get       = 0x0002,
    Put       = 0x0004,
    Patch     = 0x0008,
    Options   = 0x0010,
    PropFind  = 0x0020,
    PropPatch = 0x0040,
    MkCol     = 0x0080,
    Copy      = 0x0100,
    Move      = 0x0200,
    Delete    = 0x0400,
    Lock      = 0x0800,
    Unlock    = 0x1000,
    Report    = 0x2000,
    Acl       = 0x4000,
}

const ALL_METHODS: &[DavMethod] = &[
    DavMethod::Options,
    DavMethod::Get,
    DavMethod::Head,
    DavMethod::Put,
    DavMethod::Patch,
    DavMethod::Delete,
    DavMethod::PropFind,
    DavMethod::PropPatch,
    DavMethod::MkCol,
    DavMethod::Copy,
    DavMethod::Move,
    DavMethod::Lock,
    DavMethod::Unlock,
    DavMethod::Report,
    DavMethod::Acl,
];

impl DavMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Head => "HEAD",
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Patch => "PATCH",
            DavMethod::Options => "OPTIONS",
            DavMethod::PropFind => "PROPFIND",
            DavMethod::PropPatch => "PROPPATCH",
            DavMethod::MkCol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Delete => "DELETE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
            DavMethod::Report => "REPORT",
            DavMethod::Acl => "ACL",
        }
    }

    /// Methods that change state, and so go through `conditional_request`.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            DavMethod::Put
                | DavMethod::Patch
                | DavMethod::PropPatch
                | DavMethod::MkCol
                | DavMethod::Copy
                | DavMethod::Move
                | DavMethod::Delete
        )
    }
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::PATCH => DavMethod::Patch,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            "REPORT" => DavMethod::Report,
            "ACL" => DavMethod::Acl,
            _ => {
                return Err(DavError::NotImplemented(Vec::new()));
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| invalid_method())
    }
}

// A trick to get at the value of http::method::InvalidMethod.
fn invalid_method() -> InvalidMethod {
    match http::method::Method::from_bytes(b"") {
        Err(e) => e,
        Ok(_) => unreachable!(),
    }
}

/// A set of allowed [`DavMethod`]s.
///
/// [`DavMethod`]: enum.DavMethod.html
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DavMethodSet(u32);

impl DavMethodSet {
    pub const HTTP_RO: DavMethodSet = DavMethodSet(
        DavMethod::Get as u32 | DavMethod::Head as u32 | DavMethod::Options as u32,
    );
    pub const HTTP_RW: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::Put as u32);
    pub const WEBDAV_RO: DavMethodSet = DavMethodSet(
        Self::HTTP_RO.0 | DavMethod::PropFind as u32 | DavMethod::Report as u32,
    );
    pub const WEBDAV_RW: DavMethodSet = DavMethodSet(0xffffffff);

    /// New set, all methods allowed.
    pub fn all() -> DavMethodSet {
        DavMethodSet(0xffffffff)
    }

    /// New empty set.
    pub fn none() -> DavMethodSet {
        DavMethodSet(0)
    }

    /// Add a method.
    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m as u32;
        self
    }

    /// Remove a method.
    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0 &= !(m as u32);
        self
    }

    /// Check if a method is in the set.
    pub fn contains(&self, m: DavMethod) -> bool {
        self.0 & (m as u32) > 0
    }

    /// The methods in the set, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = DavMethod> + '_ {
        ALL_METHODS.iter().copied().filter(|m| self.contains(*m))
    }

    /// Generate an DavMethodSet from a list of words.
    pub fn from_vec(v: Vec<impl AsRef<str>>) -> Result<DavMethodSet, InvalidMethod> {
        let mut m: u32 = 0;
        for w in &v {
            m |= match w.as_ref().to_lowercase().as_str() {
                "head" => DavMethod::Head as u32,
                "get" => DavMethod::Get as u32,
                "put" => DavMethod::Put as u32,
                "patch" => DavMethod::Patch as u32,
                "delete" => DavMethod::Delete as u32,
                "options" => DavMethod::Options as u32,
                "propfind" => DavMethod::PropFind as u32,
                "proppatch" => DavMethod::PropPatch as u32,
                "mkcol" => DavMethod::MkCol as u32,
                "copy" => DavMethod::Copy as u32,
                "move" => DavMethod::Move as u32,
                "lock" => DavMethod::Lock as u32,
                "unlock" => DavMethod::Unlock as u32,
                "report" => DavMethod::Report as u32,
                "acl" => DavMethod::Acl as u32,
                "http-ro" => Self::HTTP_RO.0,
                "http-rw" => Self::HTTP_RW.0,
                "webdav-ro" => Self::WEBDAV_RO.0,
                "webdav-rw" => Self::WEBDAV_RW.0,
                _ => return Err(invalid_method()),
            };
        }
        Ok(DavMethodSet(m))
    }
}

pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .unwrap_or_default()
}

/// `getlastmodified` format.
pub(crate) fn httpdate(t: &DateTime<Utc>) -> String {
    systemtime_to_httpdate(SystemTime::from(*t))
}

/// `creationdate` format.
pub(crate) fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_httpdate(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
