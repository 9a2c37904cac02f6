use std::convert::TryFrom;
use std::fmt::Display;
use std::str::FromStr;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_URL: Regex = Regex::new(r"https?://[^/]*([^#?]+).*$").unwrap();
    pub static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    pub static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    pub static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    pub static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    pub static ref ETAG: HeaderName = HeaderName::from_static("etag");
    pub static ref IF_MATCH: HeaderName = HeaderName::from_static("if-match");
    pub static ref IF_NONE_MATCH: HeaderName = HeaderName::from_static("if-none-match");
    pub static ref IF: HeaderName = HeaderName::from_static("if");
}

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

// helper
fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// helper
fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

// helper
fn put_str<E>(values: &mut E, s: &str)
where
    E: Extend<HeaderValue>,
{
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

macro_rules! header {
    ($tname:ident, $hname:ident, $sname:expr) => {
        lazy_static! {
            pub static ref $hname: HeaderName = HeaderName::from_static($sname);
        }

        #[derive(Debug, Clone, PartialEq)]
        pub struct $tname(pub String);

        impl Header for $tname {
            fn name() -> &'static HeaderName {
                &$hname
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                one(values)?
                    .to_str()
                    .map(|x| $tname(x.to_owned()))
                    .map_err(map_invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                put_str(values, &self.0)
            }
        }
    };
}

header!(ContentType, CONTENT_TYPE, "content-type");
header!(LockToken, LOCK_TOKEN, "lock-token");

impl ContentType {
    /// `application/xml` or `text/xml`, parameters ignored.
    pub fn is_xml(&self) -> bool {
        let mime = self.0.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        mime == "application/xml" || mime == "text/xml"
    }
}

impl LockToken {
    /// The token without the angle brackets.
    pub fn token(&self) -> &str {
        let t = self.0.trim();
        t.strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(t)
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Finite(u32),
    Infinity,
}

impl Depth {
    pub const ZERO: Depth = Depth::Finite(0);
    pub const ONE: Depth = Depth::Finite(1);

    /// One level down. `None` when there is nothing left.
    pub fn decrement(self) -> Option<Depth> {
        match self {
            Depth::Infinity => Some(Depth::Infinity),
            Depth::Finite(0) => None,
            Depth::Finite(n) => Some(Depth::Finite(n - 1)),
        }
    }
}

impl Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Depth::Finite(n) => write!(f, "{}", n),
            Depth::Infinity => write!(f, "infinity"),
        }
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(map_invalid)?.trim();
        if value.eq_ignore_ascii_case("infinity") {
            return Ok(Depth::Infinity);
        }
        value.parse::<u32>().map(Depth::Finite).map_err(map_invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        put_str(values, &self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        let mut v = Vec::new();
        let words = value.to_str().map_err(map_invalid)?.split(',');
        for word in words {
            let word = word.trim();
            let lower = word.to_ascii_lowercase();
            let w = match lower.as_str() {
                "infinite" => DavTimeout::Infinite,
                _ if lower.starts_with("second-") => match word[7..].parse::<u32>() {
                    Err(_) => return Err(invalid()),
                    Ok(n) => DavTimeout::Seconds(n),
                },
                _ => return Err(invalid()),
            };
            v.push(w);
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|s| match *s {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        put_str(values, &value)
    }
}

/// Destination: header. Only the path part is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?;
        if s.starts_with('/') {
            return Ok(Destination(s.to_string()));
        }
        if let Some(caps) = RE_URL.captures(s) {
            if let Some(path) = caps.get(1) {
                return Ok(Destination(path.as_str().to_string()));
            }
        }
        Err(invalid())
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        put_str(values, &self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" | b"f" => Ok(Overwrite(false)),
            b"T" | b"t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match self.0 {
            true => "T",
            false => "F",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

#[derive(Debug, Clone)]
pub struct ETag {
    tag: String,
    weak: bool,
}

impl ETag {
    /// From a full tag as a node reports it (`"abc"` or `W/"abc"`).
    pub fn from_node_tag(t: &str) -> Option<ETag> {
        ETag::from_str(t).ok()
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn as_str(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ETag {
    type Err = headers::Error;

    fn from_str(t: &str) -> Result<Self, Self::Err> {
        let (weak, s) = if let Some(t) = t.strip_prefix("W/") {
            (true, t)
        } else {
            (false, t)
        };
        if s.len() >= 2 && s.starts_with('\"') && s.ends_with('\"') && !s[1..s.len() - 1].contains('\"')
        {
            Ok(ETag {
                tag: t.to_owned(),
                weak,
            })
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<&HeaderValue> for ETag {
    type Error = headers::Error;

    fn try_from(value: &HeaderValue) -> Result<Self, Self::Error> {
        let s = value.to_str().map_err(map_invalid)?;
        ETag::from_str(s)
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag)
    }
}

// strong comparison.
impl PartialEq for ETag {
    fn eq(&self, other: &Self) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }
}

impl Header for ETag {
    fn name() -> &'static HeaderName {
        &ETAG
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        ETag::try_from(value)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        put_str(values, &self.tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ETagList {
    Tags(Vec<ETag>),
    Star,
}

impl ETagList {
    /// Is the (existing) entity tag a member of this list.
    pub fn matches(&self, tag: Option<&ETag>) -> bool {
        match self {
            ETagList::Star => tag.is_some(),
            ETagList::Tags(tags) => tag.is_some_and(|t| tags.iter().any(|x| x == t)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfMatch(pub ETagList);

#[derive(Debug, Clone, PartialEq)]
pub struct IfNoneMatch(pub ETagList);

// Decode a list of etags. This is not entirely correct, we should
// actually use a real parser. E.g. we don't handle comma's in
// etags correctly - but we never generated those anyway.
fn decode_etaglist<'i, I>(values: &mut I) -> Result<ETagList, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let mut v = Vec::new();
    let mut count = 0usize;
    for value in values {
        let s = value.to_str().map_err(map_invalid)?;
        if s.trim() == "*" {
            return Ok(ETagList::Star);
        }
        for t in s.split(',') {
            // Simply skip misformed etags, they will never match.
            if let Ok(t) = ETag::from_str(t.trim()) {
                v.push(t);
            }
        }
        count += 1;
    }
    if count != 0 {
        Ok(ETagList::Tags(v))
    } else {
        Err(invalid())
    }
}

fn encode_etaglist<E>(m: &ETagList, values: &mut E)
where
    E: Extend<HeaderValue>,
{
    let value = match *m {
        ETagList::Star => "*".to_string(),
        ETagList::Tags(ref t) => t
            .iter()
            .map(|t| t.tag.as_str())
            .collect::<Vec<&str>>()
            .join(", "),
    };
    put_str(values, &value)
}

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfNoneMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

/// The "If" header: a list of groups, each optionally tagged with
/// the resource it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct If(pub Vec<IfList>);

/// One parenthesized group. It holds if any of its terms holds.
#[derive(Debug, Clone, PartialEq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub terms: Vec<IfTerm>,
}

/// `[Not] <state-token> [etag]`, `[Not] [etag]`, or `[Not] <state-token>`.
#[derive(Debug, Clone, PartialEq)]
pub struct IfTerm {
    pub negated: bool,
    pub token: Option<String>,
    pub etag: Option<ETag>,
}

// helpers.
impl IfList {
    fn new() -> IfList {
        IfList {
            resource_tag: None,
            terms: Vec::new(),
        }
    }

    fn add_token(&mut self, negated: bool, token: String) {
        self.terms.push(IfTerm {
            negated,
            token: Some(token),
            etag: None,
        });
    }

    fn add_etag(&mut self, negated: bool, etag: ETag) {
        // an etag right after a token belongs to that token.
        if !negated {
            if let Some(last) = self.terms.last_mut() {
                if last.token.is_some() && last.etag.is_none() {
                    last.etag = Some(etag);
                    return;
                }
            }
        }
        self.terms.push(IfTerm {
            negated,
            token: None,
            etag: Some(etag),
        });
    }
}

// Recursive descent over the header value (RFC 4918 10.4.2):
//
//   If = 1*( [ "<" Resource-Tag ">" ] "(" 1*Condition ")" )
//   Condition = [ "Not" ] ( "<" State-token ">" / "[" entity-tag "]" )
struct IfParser<'a> {
    rest: &'a str,
}

impl<'a> IfParser<'a> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', '\t', '\r', '\n']);
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.rest = &self.rest[c.len_utf8()..];
            true
        } else {
            false
        }
    }

    // everything up to `close`, which is consumed. No whitespace allowed
    // outside of quotes.
    fn delimited(&mut self, close: char) -> Result<&'a str, headers::Error> {
        let mut quoted = false;
        for (i, c) in self.rest.char_indices() {
            match c {
                '"' => quoted = !quoted,
                c if c == close && !quoted => {
                    let inner = &self.rest[..i];
                    self.rest = &self.rest[i + 1..];
                    return Ok(inner);
                }
                c if c.is_ascii_whitespace() => return Err(invalid()),
                _ => {}
            }
        }
        Err(invalid())
    }

    // a bare word, as some clients send state tokens without brackets.
    fn word(&mut self) -> Result<&'a str, headers::Error> {
        let end = self
            .rest
            .find(|c: char| c.is_ascii_whitespace() || "<>()[]".contains(c) || c.is_control())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(invalid());
        }
        let w = &self.rest[..end];
        self.rest = &self.rest[end..];
        Ok(w)
    }

    fn not(&mut self) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix("Not") {
            Some(r) => {
                self.rest = r;
                true
            }
            None => false,
        }
    }

    fn list(&mut self, resource_tag: Option<String>) -> Result<IfList, headers::Error> {
        let mut list = IfList::new();
        list.resource_tag = resource_tag;
        loop {
            if self.eat(')') {
                break;
            }
            let negated = self.not();
            match self.peek() {
                Some('<') => {
                    self.eat('<');
                    let token = self.delimited('>')?;
                    // no URI parser, but a state token is an absolute URI.
                    if !token.contains(':') {
                        return Err(invalid());
                    }
                    list.add_token(negated, token.to_string());
                }
                Some('[') => {
                    self.eat('[');
                    let etag = ETag::from_str(self.delimited(']')?)?;
                    list.add_etag(negated, etag);
                }
                Some(')') | None => return Err(invalid()),
                Some(_) => {
                    let token = self.word()?;
                    if !token.contains(':') {
                        return Err(invalid());
                    }
                    list.add_token(negated, token.to_string());
                }
            }
        }
        if list.terms.is_empty() {
            return Err(invalid());
        }
        Ok(list)
    }

    fn parse(mut self) -> Result<If, headers::Error> {
        let mut lists = Vec::new();
        // a resource tag applies to all groups that follow it.
        let mut tag: Option<String> = None;
        while let Some(c) = self.peek() {
            if c == '<' {
                self.eat('<');
                tag = Some(self.delimited('>')?.to_string());
            }
            if !self.eat('(') {
                return Err(invalid());
            }
            lists.push(self.list(tag.clone())?);
        }
        if lists.is_empty() {
            return Err(invalid());
        }
        Ok(If(lists))
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(map_invalid)?;
        IfParser { rest: value }.parse()
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut value = String::new();
        for list in &self.0 {
            if let Some(ref tag) = list.resource_tag {
                value.push_str(&format!("<{}> ", tag));
            }
            value.push('(');
            for (i, t) in list.terms.iter().enumerate() {
                if i > 0 {
                    value.push(' ');
                }
                if t.negated {
                    value.push_str("Not ");
                }
                if let Some(ref tok) = t.token {
                    value.push_str(&format!("<{}>", tok));
                }
                if let Some(ref etag) = t.etag {
                    value.push_str(&format!("[{}]", etag));
                }
            }
            value.push_str(") ");
        }
        put_str(values, value.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<H: Header>(s: &'static str) -> Result<H, headers::Error> {
        let hdrval = HeaderValue::from_static(s);
        let mut iter = std::iter::once(&hdrval);
        H::decode(&mut iter)
    }

    #[test]
    fn if_header() {
        let val = r#"  <http://x.yz/> ([W/"etag"] Not <DAV:nope> ) (Not<urn:x>[W/"bla"] plain:word:123) "#;
        let hdr: If = decode(val).unwrap();
        assert_eq!(hdr.0.len(), 2);
        assert_eq!(hdr.0[0].resource_tag.as_deref(), Some("http://x.yz/"));
        // the tag carries over to the second group.
        assert_eq!(hdr.0[1].resource_tag.as_deref(), Some("http://x.yz/"));
        assert_eq!(hdr.0[0].terms.len(), 2);
        assert!(hdr.0[0].terms[1].negated);
        assert_eq!(hdr.0[0].terms[1].token.as_deref(), Some("DAV:nope"));
    }

    #[test]
    fn if_header_token_with_etag() {
        let hdr: If = decode(r#"(<opaquelocktoken:abc> ["123"])"#).unwrap();
        assert_eq!(hdr.0.len(), 1);
        let terms = &hdr.0[0].terms;
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].token.as_deref(), Some("opaquelocktoken:abc"));
        assert_eq!(terms[0].etag.as_ref().map(|e| e.as_str()), Some("\"123\""));
    }

    #[test]
    fn if_header_bad() {
        assert!(decode::<If>("").is_err());
        assert!(decode::<If>("(").is_err());
        assert!(decode::<If>("()").is_err());
        assert!(decode::<If>("(<nocolon>)").is_err());
        assert!(decode::<If>("(Not)").is_err());
    }

    #[test]
    fn etag_header() {
        let t1 = ETag::from_str(r#"W/"12345""#).unwrap();
        let t2 = ETag::from_str(r#"W/"12345""#).unwrap();
        let t3 = ETag::from_str(r#""12346""#).unwrap();
        let t4 = ETag::from_str(r#""12346""#).unwrap();
        assert!(t1 != t2);
        assert!(t2 != t3);
        assert!(t3 == t4);
        assert!(ETag::from_str("\"").is_err());
    }

    #[test]
    fn depth_header() {
        assert_eq!(decode::<Depth>("0").unwrap(), Depth::ZERO);
        assert_eq!(decode::<Depth>("1").unwrap(), Depth::ONE);
        assert_eq!(decode::<Depth>("5").unwrap(), Depth::Finite(5));
        assert_eq!(decode::<Depth>("Infinity").unwrap(), Depth::Infinity);
        assert_eq!(decode::<Depth>("infinity").unwrap(), Depth::Infinity);
        assert!(decode::<Depth>("-1").is_err());
        assert!(decode::<Depth>("deep").is_err());
    }

    #[test]
    fn timeout_header() {
        let t: Timeout = decode("Second-600, Infinite").unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(600), DavTimeout::Infinite]);
        let t: Timeout = decode("infinite").unwrap();
        assert_eq!(t.0, vec![DavTimeout::Infinite]);
        assert!(decode::<Timeout>("Minute-5").is_err());
    }

    #[test]
    fn lock_token() {
        let t: LockToken = decode("<opaquelocktoken:1234>").unwrap();
        assert_eq!(t.token(), "opaquelocktoken:1234");
    }
}
