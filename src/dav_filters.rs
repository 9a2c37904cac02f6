//! The `<CARD:filter>` tree of an addressbook-query (RFC 6352, 10.5).
//!
//! Every level combines its tests with `anyof` or `allof`. The default is
//! `anyof`, both for the filter itself and for a `prop-filter`.
use xmltree::Element;

use crate::carddav::{VCard, VProperty};
use crate::collation::{Collation, DEFAULT_COLLATION, MatchType, match_text};
use crate::davprops::NS_CARDDAV_URI;
use crate::errors::{DavError, DavResult};
use crate::xmltree_ext::ElementExt;

/// Text matching filter for property and parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub text: String,
    pub collation: Collation,
    pub negate_condition: bool,
    pub match_type: MatchType,
}

impl TextMatch {
    // unknown collation or match-type names fail here, before any card is seen.
    fn parse(elem: &Element) -> DavResult<TextMatch> {
        let collation = elem
            .attributes
            .get("collation")
            .map_or(DEFAULT_COLLATION, |c| c.as_str());
        let match_type = elem
            .attributes
            .get("match-type")
            .map_or("contains", |m| m.as_str());
        Ok(TextMatch {
            text: elem.text_content(),
            collation: Collation::from_name(collation)?,
            negate_condition: elem
                .attributes
                .get("negate-condition")
                .is_some_and(|v| v == "yes"),
            match_type: MatchType::from_name(match_type)?,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match_text(value, &self.text, self.collation, self.match_type) != self.negate_condition
    }
}

/// Parameter filter, e.g. TYPE=HOME on a TEL property.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFilter {
    pub name: String,
    /// The parameter must NOT be defined.
    pub is_not_defined: bool,
    pub text_match: Option<TextMatch>,
}

impl ParameterFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_not_defined: false,
            text_match: None,
        }
    }

    fn parse(elem: &Element) -> DavResult<ParameterFilter> {
        let mut filter = ParameterFilter::new(required_name(elem, "param-filter")?);
        for child in elem
            .elements()
            .filter(|e| e.namespace.as_deref() == Some(NS_CARDDAV_URI))
        {
            match child.name.as_str() {
                "is-not-defined" => filter.is_not_defined = true,
                "text-match" => filter.text_match = Some(TextMatch::parse(child)?),
                _ => {}
            }
        }
        Ok(filter)
    }

    pub fn matches(&self, prop: &VProperty) -> bool {
        match (prop.param(&self.name), &self.text_match) {
            (values, _) if self.is_not_defined => values.is_none(),
            (None, _) => false,
            (Some(_), None) => true,
            (Some(values), Some(tm)) => values.iter().any(|v| tm.matches(v)),
        }
    }
}

/// Property filter, e.g. "EMAIL contains example.com".
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub name: String,
    pub is_not_defined: bool,
    pub allof: bool,
    pub text_matches: Vec<TextMatch>,
    pub param_filters: Vec<ParameterFilter>,
}

impl PropertyFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_not_defined: false,
            allof: false,
            text_matches: Vec::new(),
            param_filters: Vec::new(),
        }
    }

    fn parse(elem: &Element) -> DavResult<PropertyFilter> {
        let mut filter = PropertyFilter::new(required_name(elem, "prop-filter")?);
        filter.allof = parse_test(elem)?;
        for child in elem
            .elements()
            .filter(|e| e.namespace.as_deref() == Some(NS_CARDDAV_URI))
        {
            match child.name.as_str() {
                "is-not-defined" => filter.is_not_defined = true,
                "text-match" => filter.text_matches.push(TextMatch::parse(child)?),
                "param-filter" => filter.param_filters.push(ParameterFilter::parse(child)?),
                _ => {}
            }
        }
        Ok(filter)
    }

    // one instance of the property.
    fn instance_matches(&self, prop: &VProperty) -> bool {
        if self.text_matches.is_empty() && self.param_filters.is_empty() {
            return true;
        }
        let results = self
            .text_matches
            .iter()
            .map(|tm| tm.matches(&prop.value))
            .chain(self.param_filters.iter().map(|pf| pf.matches(prop)))
            .collect();
        combine(self.allof, results)
    }

    pub fn matches(&self, card: &VCard) -> bool {
        let mut instances = card.get(&self.name).peekable();
        if self.is_not_defined {
            return instances.peek().is_none();
        }
        instances.any(|prop| self.instance_matches(prop))
    }
}

/// The whole `<CARD:filter>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub allof: bool,
    pub props: Vec<PropertyFilter>,
}

impl Filter {
    pub fn parse(elem: &Element) -> DavResult<Filter> {
        let props = elem
            .elements()
            .filter(|e| e.is_elem(NS_CARDDAV_URI, "prop-filter"))
            .map(PropertyFilter::parse)
            .collect::<DavResult<Vec<_>>>()?;
        Ok(Filter {
            allof: parse_test(elem)?,
            props,
        })
    }

    /// An empty filter matches every card.
    pub fn matches(&self, card: &VCard) -> bool {
        if self.props.is_empty() {
            return true;
        }
        combine(self.allof, self.props.iter().map(|pf| pf.matches(card)).collect())
    }
}

fn combine(allof: bool, results: Vec<bool>) -> bool {
    if allof {
        results.into_iter().all(|r| r)
    } else {
        results.into_iter().any(|r| r)
    }
}

fn parse_test(elem: &Element) -> DavResult<bool> {
    match elem.attributes.get("test").map(|s| s.as_str()) {
        None | Some("anyof") => Ok(false),
        Some("allof") => Ok(true),
        Some(t) => Err(DavError::BadRequest(format!("invalid test {}", t))),
    }
}

fn required_name(elem: &Element, what: &str) -> DavResult<String> {
    elem.attributes
        .get("name")
        .cloned()
        .ok_or_else(|| DavError::BadRequest(format!("{} without name", what)))
}
