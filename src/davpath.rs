//! Utility module to handle the path part of an URL as a list of segments.
//!
use std::error::Error;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::DavError;

// Encode all non-unreserved characters. See RFC3986.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Path of a node, relative to the configured prefix.
///
/// Stored as decoded segments. Whether the path denotes a collection is a
/// property of the node, not of the path, so `/foo` and `/foo/` compare equal.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DavPath {
    segments: Vec<String>,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    IllegalPath,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::BadRequest("invalid path".into()),
            ParseError::IllegalPath => DavError::BadRequest("path outside of prefix".into()),
            ParseError::ForbiddenPath => DavError::Forbidden,
        }
    }
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_url_string(false))
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string(false))
    }
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rawpath: &str) -> Result<Vec<String>, ParseError> {
    if rawpath.bytes().any(|x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rawpath;
    if let Some(pos) = rawpath.find(['?', '#']) {
        if rawpath[pos..].starts_with('#') {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    if !rawpath.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }

    let mut v: Vec<String> = Vec::new();
    for segment in rawpath.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                if v.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => {
                let decoded = percent_decode_str(s)
                    .decode_utf8()
                    .map_err(|_| ParseError::InvalidPath)?;
                if decoded.contains(['\0', '/']) {
                    return Err(ParseError::InvalidPath);
                }
                v.push(decoded.into_owned());
            }
        }
    }
    Ok(v)
}

impl DavPath {
    /// The root path, `/`.
    pub fn root() -> DavPath {
        DavPath::default()
    }

    /// From an URL encoded, absolute path.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        Ok(DavPath {
            segments: normalize_path(src)?,
        })
    }

    /// From an URL encoded path, stripping the (not URL encoded) prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let full = normalize_path(src)?;
        let prefix = normalize_path(if prefix.is_empty() { "/" } else { prefix })?;
        if full.len() < prefix.len() || full[..prefix.len()] != prefix[..] {
            return Err(ParseError::IllegalPath);
        }
        Ok(DavPath {
            segments: full[prefix.len()..].to_vec(),
        })
    }

    /// From request.uri
    pub fn from_uri(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// From url::Url and (not-url-encoded) prefix string.
    pub fn from_url(url: &url::Url, prefix: &str) -> Result<Self, ParseError> {
        DavPath::from_str_and_prefix(url.path(), prefix)
    }

    /// Decoded segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// As URL encoded string. A trailing slash is added for collections.
    pub fn as_url_string(&self, collection: bool) -> String {
        let mut s = String::new();
        for seg in &self.segments {
            s.push('/');
            s.extend(utf8_percent_encode(seg, SEGMENT_ENCODE_SET));
        }
        if collection || s.is_empty() {
            s.push('/');
        }
        s
    }

    /// Parent path. The parent of the root is the root itself.
    pub fn parent(&self) -> DavPath {
        let mut segments = self.segments.clone();
        segments.pop();
        DavPath { segments }
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// New path with one more segment.
    pub fn join(&self, segment: &str) -> DavPath {
        let mut p = self.clone();
        p.push_segment(segment);
        p
    }

    pub fn push_segment(&mut self, segment: &str) {
        self.segments.push(segment.to_string());
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// true if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Segments of `self` below `ancestor`, or None if it isn't one.
    pub fn strip_ancestor(&self, ancestor: &DavPath) -> Option<&[String]> {
        if ancestor.is_ancestor_of(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }
}
