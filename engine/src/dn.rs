//! Distinguished names: parsing, normalization, and ancestor tests.
//!
//! A [`Dn`] is an ordered sequence of RDNs, most-specific (leaf) first, matching
//! conventional LDAP string representation (`cn=foo,ou=people,dc=example,dc=com`).
//! Each RDN can itself carry more than one type=value assertion, separated by `+`.

use crate::error::{DirectoryError, DirectoryErrorKind};
use crate::schema::SchemaManager;
use smallvec::SmallVec;
use std::fmt;

/// A single type=value assertion within an RDN.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Atv {
    pub attribute_type: String,
    pub value: String,
    normalized_value: String,
}

impl Atv {
    fn new(attribute_type: String, value: String) -> Self {
        let normalized_value = value.clone();
        Self {
            attribute_type,
            value,
            normalized_value,
        }
    }

    /// The value after attribute-type specific normalization, or the user-provided
    /// value if the assertion has not yet passed through the schema stage.
    pub fn normalized_value(&self) -> &str {
        &self.normalized_value
    }
}

/// A relative distinguished name: an unordered set of [`Atv`]s.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rdn {
    atvs: SmallVec<[Atv; 1]>,
}

impl Rdn {
    pub fn atvs(&self) -> &[Atv] {
        &self.atvs
    }

    /// Multi-valued RDNs compare equal regardless of the order their assertions were
    /// written in, so we sort on the normalized form before comparing.
    fn normalized_sorted(&self) -> Vec<(&str, &str)> {
        let mut v: Vec<(&str, &str)> = self
            .atvs
            .iter()
            .map(|a| (a.attribute_type.as_str(), a.normalized_value()))
            .collect();
        v.sort_unstable();
        v
    }

    fn eq_normalized(&self, other: &Rdn) -> bool {
        self.normalized_sorted() == other.normalized_sorted()
    }

    fn to_user_string(&self) -> String {
        self.atvs
            .iter()
            .map(|a| format!("{}={}", a.attribute_type, escape_value(&a.value)))
            .collect::<Vec<_>>()
            .join("+")
    }

    fn to_normalized_string(&self) -> String {
        let mut parts: Vec<String> = self
            .atvs
            .iter()
            .map(|a| format!("{}={}", a.attribute_type, a.normalized_value()))
            .collect();
        parts.sort_unstable();
        parts.join("+")
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// An ordered sequence of RDNs. The empty DN denotes the root DSE.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The root DSE: the empty DN.
    pub fn root_dse() -> Self {
        Self { rdns: Vec::new() }
    }

    pub fn is_root_dse(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Builds a DN directly from an ordered, leaf-first RDN sequence, for
    /// callers that already hold parsed/normalized RDNs (rename, move).
    pub(crate) fn from_rdns(rdns: Vec<Rdn>) -> Dn {
        Dn { rdns }
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The leaf (most specific) RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// The DN with its leaf RDN removed, or `None` for the root DSE.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// Parses an LDAP DN string into user-provided form. Values are not yet
    /// normalized; call [`Dn::normalize`] before comparing DNs that have passed
    /// the schema stage.
    pub fn parse(text: &str) -> Result<Dn, DirectoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Dn::root_dse());
        }
        let mut rdns = Vec::new();
        for rdn_text in split_unescaped(text, ',') {
            let mut atvs = SmallVec::new();
            for atv_text in split_unescaped(&rdn_text, '+') {
                let (ty, val) = atv_text.split_once('=').ok_or_else(|| {
                    DirectoryError::new(
                        DirectoryErrorKind::NamingViolation,
                        format!("malformed RDN assertion: {atv_text}"),
                    )
                })?;
                let ty = ty.trim();
                if ty.is_empty() {
                    return Err(DirectoryError::new(
                        DirectoryErrorKind::NamingViolation,
                        format!("empty attribute type in RDN: {rdn_text}"),
                    ));
                }
                atvs.push(Atv::new(ty.to_string(), unescape_value(val.trim())));
            }
            if atvs.is_empty() {
                return Err(DirectoryError::new(
                    DirectoryErrorKind::NamingViolation,
                    "empty RDN".to_string(),
                ));
            }
            rdns.push(Rdn { atvs });
        }
        Ok(Dn { rdns })
    }

    /// Produces a new DN with every assertion's value run through the schema
    /// manager's attribute-type specific normalizer. Idempotent: normalizing an
    /// already-normalized DN is a no-op.
    pub fn normalize(&self, schema: &dyn SchemaManager) -> Dn {
        let rdns = self
            .rdns
            .iter()
            .map(|rdn| {
                let atvs = rdn
                    .atvs
                    .iter()
                    .map(|atv| {
                        let normalized_value =
                            schema.normalize_value(&atv.attribute_type, &atv.value);
                        Atv {
                            attribute_type: atv.attribute_type.to_ascii_lowercase(),
                            value: atv.value.clone(),
                            normalized_value,
                        }
                    })
                    .collect();
                Rdn { atvs }
            })
            .collect();
        Dn { rdns }
    }

    /// Byte-equal comparison of normalized forms, per the spec's DN equality rule.
    pub fn eq_normalized(&self, other: &Dn) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(other.rdns.iter())
                .all(|(a, b)| a.eq_normalized(b))
    }

    /// True iff `self` is a proper ancestor of `other` (i.e. `other`'s DN, with
    /// its leading RDNs stripped down to `self`'s length, equals `self`, and
    /// `other` has strictly more RDNs).
    pub fn is_proper_ancestor_of(&self, other: &Dn) -> bool {
        if self.rdns.len() >= other.rdns.len() {
            return false;
        }
        self.is_same_or_ancestor_of(other)
    }

    /// True iff `self` equals `other`, or is a proper ancestor of `other`.
    pub fn is_same_or_ancestor_of(&self, other: &Dn) -> bool {
        if self.rdns.len() > other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        self.rdns
            .iter()
            .zip(other.rdns[offset..].iter())
            .all(|(a, b)| a.eq_normalized(b))
    }

    /// Returns the relative DN obtained by stripping `suffix` from the end of
    /// `self`, or `None` if `suffix` is not a same-or-ancestor of `self`.
    pub fn strip_suffix(&self, suffix: &Dn) -> Option<Dn> {
        if !suffix.is_same_or_ancestor_of(self) {
            return None;
        }
        let keep = self.rdns.len() - suffix.rdns.len();
        Some(Dn {
            rdns: self.rdns[..keep].to_vec(),
        })
    }

    /// Returns a new DN formed by prepending `self`'s RDNs onto `base` (used to
    /// translate a relative DN into another partition's or referral's namespace).
    pub fn prepend_to(&self, base: &Dn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns.extend(base.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn to_user_string(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::to_user_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_normalized_string(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::to_normalized_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

fn split_unescaped(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
