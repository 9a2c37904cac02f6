//! CardDAV (vCard Extensions to WebDAV) support
//!
//! The engine does not validate vCard content. It only needs the structure:
//! content lines with an optional group, a name, parameters and a value.
//! That is enough to run `addressbook-query` filters against a card and
//! to build the partial cards that `<CARD:address-data>` projections ask
//! for.
use xmltree::Element;

use crate::davprops::NS_CARDDAV_URI;
use crate::errors::{DavError, DavResult};
use crate::xmltree_ext::ElementExt;

/// Check if content appears to be vCard data
pub fn is_vcard_data(content: &[u8]) -> bool {
    let content = content.trim_ascii();
    content.len() >= 20
        && content[..11].eq_ignore_ascii_case(b"BEGIN:VCARD")
        && content[content.len() - 9..].eq_ignore_ascii_case(b"END:VCARD")
}

/// One content line.
#[derive(Debug, Clone, PartialEq)]
pub struct VProperty {
    pub group: Option<String>,
    /// Upper-cased.
    pub name: String,
    /// Parameter names are upper-cased, values are unquoted.
    pub params: Vec<(String, Vec<String>)>,
    pub value: String,
}

impl VProperty {
    pub fn param(&self, name: &str) -> Option<&[String]> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    fn write(&self, out: &mut String) {
        if let Some(ref g) = self.group {
            out.push_str(g);
            out.push('.');
        }
        out.push_str(&self.name);
        for (n, values) in &self.params {
            out.push(';');
            out.push_str(n);
            if values.is_empty() {
                continue;
            }
            out.push('=');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if v.contains([':', ';', ',']) {
                    out.push('"');
                    out.push_str(v);
                    out.push('"');
                } else {
                    out.push_str(v);
                }
            }
        }
        out.push(':');
        out.push_str(&self.value);
        out.push_str("\r\n");
    }
}

/// A parsed vCard, without the BEGIN and END lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VCard {
    pub props: Vec<VProperty>,
}

// undo line folding (RFC 6350, 3.2).
fn unfold(data: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in data.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match raw.chars().next() {
            Some(' ') | Some('\t') if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(&raw[1..]);
                }
            }
            _ if raw.is_empty() => {}
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

// split on `sep` outside of double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            quoted = !quoted;
        } else if c == sep && !quoted {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_line(line: &str) -> DavResult<VProperty> {
    let bad = || DavError::BadRequest(format!("invalid vCard line: {}", line));

    // the first colon outside quotes ends the name and parameters.
    let mut quoted = false;
    let colon = line
        .char_indices()
        .find(|&(_, c)| {
            if c == '"' {
                quoted = !quoted;
            }
            c == ':' && !quoted
        })
        .map(|(i, _)| i)
        .ok_or_else(bad)?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(bad)?;
    let (group, name) = match name.split_once('.') {
        Some((g, n)) => (Some(g.to_string()), n),
        None => (None, name),
    };
    let mut params = Vec::new();
    for p in parts {
        let (pname, pvalue) = p.split_once('=').unwrap_or((p, ""));
        let values = if pvalue.is_empty() {
            Vec::new()
        } else {
            split_unquoted(pvalue, ',')
                .into_iter()
                .map(|v| v.trim_matches('"').to_string())
                .collect()
        };
        params.push((pname.to_ascii_uppercase(), values));
    }
    Ok(VProperty {
        group,
        name: name.to_ascii_uppercase(),
        params,
        value: value.to_string(),
    })
}

impl VCard {
    pub fn parse(data: &str) -> DavResult<VCard> {
        let lines = unfold(data);
        let mut it = lines.iter();
        match it.next() {
            Some(l) if l.eq_ignore_ascii_case("BEGIN:VCARD") => {}
            _ => return Err(DavError::BadRequest("not a vCard".into())),
        }
        let mut props = Vec::new();
        for line in it {
            if line.eq_ignore_ascii_case("END:VCARD") {
                return Ok(VCard { props });
            }
            props.push(parse_line(line)?);
        }
        Err(DavError::BadRequest("vCard without END".into()))
    }

    /// All instances of a property.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VProperty> + 'a {
        self.props
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// A card with only the requested properties. VERSION and UID are
    /// always kept.
    pub fn project(&self, wanted: &[AddressDataProp]) -> VCard {
        let props = self
            .props
            .iter()
            .filter_map(|p| {
                if p.name == "VERSION" || p.name == "UID" {
                    return Some(p.clone());
                }
                let w = wanted.iter().find(|w| w.name.eq_ignore_ascii_case(&p.name))?;
                let mut p = p.clone();
                if w.novalue {
                    p.value.clear();
                }
                Some(p)
            })
            .collect();
        VCard { props }
    }
}

impl std::fmt::Display for VCard {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut out = String::from("BEGIN:VCARD\r\n");
        for p in &self.props {
            p.write(&mut out);
        }
        out.push_str("END:VCARD\r\n");
        f.write_str(&out)
    }
}

/// A `<CARD:prop name="..."/>` inside `<CARD:address-data>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressDataProp {
    pub name: String,
    pub novalue: bool,
}

/// Parse an `<CARD:address-data>` request element. `None` means the whole
/// card.
pub fn parse_address_data(elem: &Element) -> Option<Vec<AddressDataProp>> {
    if elem.find_elem(NS_CARDDAV_URI, "allprop").is_some() {
        return None;
    }
    let props: Vec<AddressDataProp> = elem
        .elements()
        .filter(|e| e.is_elem(NS_CARDDAV_URI, "prop"))
        .filter_map(|e| {
            let name = e.attributes.get("name")?;
            Some(AddressDataProp {
                name: name.clone(),
                novalue: e.attributes.get("novalue").is_some_and(|v| v == "yes"),
            })
        })
        .collect();
    if props.is_empty() { None } else { Some(props) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:abc-1\r\nFN:Jane Doe\r\n\
        item1.EMAIL;TYPE=work,pref:jane@example.com\r\nTEL;TYPE=\"home,voice\":+1 555\r\n\
        NOTE:a long \r\n note\r\nEND:VCARD\r\n";

    #[test]
    fn parse_structure() {
        assert!(is_vcard_data(CARD.as_bytes()));
        assert!(!is_vcard_data(b"hello"));
        let card = VCard::parse(CARD).unwrap();
        assert_eq!(card.props.len(), 6);
        let email = card.get("email").next().unwrap();
        assert_eq!(email.group.as_deref(), Some("item1"));
        assert_eq!(email.param("type").unwrap(), ["work", "pref"]);
        let tel = card.get("TEL").next().unwrap();
        assert_eq!(tel.param("TYPE").unwrap(), ["home,voice"]);
        assert_eq!(card.get("NOTE").next().unwrap().value, "a long note");
    }

    #[test]
    fn projection() {
        let card = VCard::parse(CARD).unwrap();
        let p = card.project(&[
            AddressDataProp {
                name: "FN".into(),
                novalue: false,
            },
            AddressDataProp {
                name: "EMAIL".into(),
                novalue: true,
            },
        ]);
        let s = p.to_string();
        assert!(s.starts_with("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:abc-1\r\nFN:Jane Doe\r\n"));
        assert!(s.contains("item1.EMAIL;TYPE=work,pref:\r\n"));
        assert!(!s.contains("TEL"));
        assert_eq!(VCard::parse(&s).unwrap(), p);
    }

    #[test]
    fn broken() {
        assert!(VCard::parse("BEGIN:VCARD\r\nFN:x\r\n").is_err());
        assert!(VCard::parse("BEGIN:VCARD\r\nnocolon\r\nEND:VCARD").is_err());
    }
}
