//! Text matching for `text-match` filters and principal searches
//! (RFC 4790 collations).
use unicode_normalization::UnicodeNormalization;

use crate::errors::{DavError, DavResult};

pub const DEFAULT_COLLATION: &str = "i;unicode-casemap";

/// Collations we can advertise in `supported-collation-set`.
pub const SUPPORTED_COLLATIONS: &[&str] = &["i;ascii-casemap", "i;octet", "i;unicode-casemap"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    AsciiCasemap,
    UnicodeCasemap,
    Octet,
}

impl Collation {
    pub fn from_name(name: &str) -> DavResult<Collation> {
        match name {
            "i;ascii-casemap" => Ok(Collation::AsciiCasemap),
            "i;unicode-casemap" | "default" => Ok(Collation::UnicodeCasemap),
            "i;octet" => Ok(Collation::Octet),
            _ => Err(DavError::BadRequest(format!("unsupported collation {}", name))),
        }
    }

    fn fold(&self, s: &str) -> String {
        match self {
            Collation::AsciiCasemap => s.to_ascii_lowercase(),
            Collation::UnicodeCasemap => s.nfkd().collect::<String>().to_lowercase(),
            Collation::Octet => s.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
}

impl MatchType {
    pub fn from_name(name: &str) -> DavResult<MatchType> {
        match name {
            "contains" | "substring" => Ok(MatchType::Contains),
            "equals" => Ok(MatchType::Equals),
            "starts-with" => Ok(MatchType::StartsWith),
            "ends-with" => Ok(MatchType::EndsWith),
            _ => Err(DavError::BadRequest(format!("unsupported match-type {}", name))),
        }
    }
}

/// Does `value` match `needle` under the collation and match type.
pub fn match_text(value: &str, needle: &str, collation: Collation, match_type: MatchType) -> bool {
    let value = collation.fold(value);
    let needle = collation.fold(needle);
    match match_type {
        MatchType::Contains => value.contains(&needle),
        MatchType::Equals => value == needle,
        MatchType::StartsWith => value.starts_with(&needle),
        MatchType::EndsWith => value.ends_with(&needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casemaps() {
        assert!(match_text("Hello World", "WORLD", Collation::AsciiCasemap, MatchType::Contains));
        assert!(!match_text("Hello World", "WORLD", Collation::Octet, MatchType::Contains));
        assert!(match_text("Ärger", "ä", Collation::UnicodeCasemap, MatchType::StartsWith));
        assert!(!match_text("Straße", "STRASSE", Collation::UnicodeCasemap, MatchType::Equals));
        assert!(match_text("ﬁle", "fi", Collation::UnicodeCasemap, MatchType::StartsWith));
        assert!(match_text("abc", "BC", Collation::AsciiCasemap, MatchType::EndsWith));
    }

    #[test]
    fn unknown_names() {
        assert!(matches!(
            Collation::from_name("i;klingon"),
            Err(DavError::BadRequest(_))
        ));
        assert!(matches!(
            MatchType::from_name("sounds-like"),
            Err(DavError::BadRequest(_))
        ));
        assert_eq!(Collation::from_name("default").unwrap(), Collation::UnicodeCasemap);
        assert_eq!(MatchType::from_name("substring").unwrap(), MatchType::Contains);
    }
}
