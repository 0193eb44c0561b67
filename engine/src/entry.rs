//! The entry model: case-insensitive attribute lookup and multi-value
//! handling over a cloned, pipeline-owned view of partition data.

use crate::dn::Dn;
use crate::schema::SchemaManager;
use std::collections::BTreeMap;

/// One attribute's value set. Values keep their user-provided form; equality
/// for add/remove/contains is decided through the schema manager's
/// normalizer, so `cn: Foo` and a `delete cn: foo` modification match.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attribute {
    values: Vec<String>,
}

impl Attribute {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn normalized_contains(&self, schema: &dyn SchemaManager, attribute_type: &str, value: &str) -> bool {
        let needle = schema.normalize_value(attribute_type, value);
        self.values
            .iter()
            .any(|v| schema.normalize_value(attribute_type, v) == needle)
    }

    /// Adds a value if not already present (under the matching rule). Returns
    /// `true` if the value was newly added.
    pub fn add_value(&mut self, schema: &dyn SchemaManager, attribute_type: &str, value: String) -> bool {
        if self.normalized_contains(schema, attribute_type, &value) {
            false
        } else {
            self.values.push(value);
            true
        }
    }

    /// Removes a value matching under the matching rule. Returns `true` if a
    /// value was removed.
    pub fn remove_value(&mut self, schema: &dyn SchemaManager, attribute_type: &str, value: &str) -> bool {
        let needle = schema.normalize_value(attribute_type, value);
        let before = self.values.len();
        self.values
            .retain(|v| schema.normalize_value(attribute_type, v) != needle);
        self.values.len() != before
    }
}

/// A directory entry: a DN plus a case-insensitive map from attribute type to
/// attribute. Entries crossing into the pipeline are cloned views — mutating
/// one never reaches back into the partition that owns the original.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    dn: Dn,
    attributes: BTreeMap<String, Attribute>,
}

pub const OBJECT_CLASS: &str = "objectclass";
pub const REF: &str = "ref";
pub const REFERRAL_OBJECT_CLASS: &str = "referral";

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    fn key(attribute_type: &str) -> String {
        attribute_type.to_ascii_lowercase()
    }

    /// Case-insensitive attribute lookup.
    pub fn get(&self, attribute_type: &str) -> Option<&Attribute> {
        self.attributes.get(&Self::key(attribute_type))
    }

    pub fn set(&mut self, attribute_type: &str, values: Vec<String>) {
        if values.is_empty() {
            self.attributes.remove(&Self::key(attribute_type));
        } else {
            self.attributes
                .insert(Self::key(attribute_type), Attribute::new(values));
        }
    }

    pub fn remove(&mut self, attribute_type: &str) -> Option<Attribute> {
        self.attributes.remove(&Self::key(attribute_type))
    }

    /// Returns `true` if the value was newly added (not already present under
    /// the matching rule).
    pub fn add_value(&mut self, schema: &dyn SchemaManager, attribute_type: &str, value: String) -> bool {
        self.attributes
            .entry(Self::key(attribute_type))
            .or_default()
            .add_value(schema, attribute_type, value)
    }

    pub fn remove_value(&mut self, schema: &dyn SchemaManager, attribute_type: &str, value: &str) {
        let key = Self::key(attribute_type);
        let mut drop_attr = false;
        if let Some(attr) = self.attributes.get_mut(&key) {
            attr.remove_value(schema, attribute_type, value);
            drop_attr = attr.is_empty();
        }
        if drop_attr {
            self.attributes.remove(&key);
        }
    }

    pub fn attribute_types(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn object_classes(&self) -> Vec<&str> {
        self.get(OBJECT_CLASS)
            .map(|a| a.values().iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_object_class(&self, name: &str) -> bool {
        self.object_classes()
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(name))
    }

    /// An entry is a referral iff its `objectClass` contains `referral`.
    pub fn is_referral(&self) -> bool {
        self.has_object_class(REFERRAL_OBJECT_CLASS)
    }

    pub fn ref_values(&self) -> Vec<&str> {
        self.get(REF)
            .map(|a| a.values().iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns a view of this entry carrying only the requested attribute
    /// types, case-insensitively, plus `objectClass` (always present, so a
    /// projected entry is still recognizable as the kind of thing it is).
    /// `None` returns the entry unchanged — a client that didn't ask for a
    /// subset gets everything.
    pub fn project(&self, attributes: Option<&[String]>) -> Entry {
        let Some(wanted) = attributes else {
            return self.clone();
        };
        let mut keys: Vec<String> = wanted.iter().map(|a| Self::key(a)).collect();
        keys.push(Self::key(OBJECT_CLASS));
        let mut projected = Entry::new(self.dn.clone());
        for key in keys {
            if let Some(attr) = self.attributes.get(&key) {
                projected.attributes.insert(key, attr.clone());
            }
        }
        projected
    }
}

/// A single attribute-level modification, as carried by a `modify` operation
/// context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Modification {
    Add {
        attribute_type: String,
        values: Vec<String>,
    },
    Delete {
        attribute_type: String,
        /// `None` deletes the whole attribute; `Some` deletes only the listed
        /// values.
        values: Option<Vec<String>>,
    },
    Replace {
        attribute_type: String,
        values: Vec<String>,
    },
}

impl Entry {
    /// Applies a list of modifications in order, as `modify` would. Returns
    /// the inverse modification list (in reverse application order) so the
    /// change-log can record a reverse-op.
    pub fn apply_modifications(
        &mut self,
        schema: &dyn SchemaManager,
        mods: &[Modification],
    ) -> Vec<Modification> {
        let mut inverse = Vec::with_capacity(mods.len());
        for m in mods {
            match m {
                Modification::Add {
                    attribute_type,
                    values,
                } => {
                    let mut added = Vec::with_capacity(values.len());
                    for v in values {
                        if self.add_value(schema, attribute_type, v.clone()) {
                            added.push(v.clone());
                        }
                    }
                    if !added.is_empty() {
                        inverse.push(Modification::Delete {
                            attribute_type: attribute_type.clone(),
                            values: Some(added),
                        });
                    }
                }
                Modification::Delete {
                    attribute_type,
                    values,
                } => {
                    let previous = self
                        .get(attribute_type)
                        .map(|a| a.values().to_vec())
                        .unwrap_or_default();
                    match values {
                        Some(vs) => {
                            for v in vs {
                                self.remove_value(schema, attribute_type, v);
                            }
                        }
                        None => {
                            self.remove(attribute_type);
                        }
                    }
                    if !previous.is_empty() {
                        inverse.push(Modification::Add {
                            attribute_type: attribute_type.clone(),
                            values: previous,
                        });
                    }
                }
                Modification::Replace {
                    attribute_type,
                    values,
                } => {
                    let previous = self
                        .get(attribute_type)
                        .map(|a| a.values().to_vec())
                        .unwrap_or_default();
                    self.set(attribute_type, values.clone());
                    inverse.push(Modification::Replace {
                        attribute_type: attribute_type.clone(),
                        values: previous,
                    });
                }
            }
        }
        inverse.reverse();
        inverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CaseFoldSchema;

    fn entry() -> Entry {
        let dn = Dn::parse("cn=Foo,ou=people").unwrap();
        let mut e = Entry::new(dn);
        e.set(OBJECT_CLASS, vec!["top".into(), "person".into()]);
        e.set("cn", vec!["Foo".into()]);
        e
    }

    #[test]
    fn case_insensitive_lookup() {
        let e = entry();
        assert_eq!(e.get("CN").unwrap().values(), &["Foo".to_string()]);
    }

    #[test]
    fn dedup_under_matching_rule() {
        let schema = CaseFoldSchema;
        let mut e = entry();
        e.add_value(&schema, "cn", "FOO".into());
        assert_eq!(e.get("cn").unwrap().values().len(), 1);
        e.add_value(&schema, "cn", "Bar".into());
        assert_eq!(e.get("cn").unwrap().values().len(), 2);
    }

    #[test]
    fn referral_detection() {
        let mut e = entry();
        assert!(!e.is_referral());
        e.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        e.set(REF, vec!["ldap://host/dc=example".into()]);
        assert!(e.is_referral());
        assert_eq!(e.ref_values(), vec!["ldap://host/dc=example"]);
    }

    #[test]
    fn project_keeps_only_requested_attributes_plus_object_class() {
        let mut e = entry();
        e.set("sn", vec!["Bar".into()]);
        let projected = e.project(Some(&["sn".to_string()]));
        assert!(projected.get("sn").is_some());
        assert!(projected.get("cn").is_none());
        assert!(projected.get(OBJECT_CLASS).is_some());
    }

    #[test]
    fn project_none_returns_everything() {
        let e = entry();
        let projected = e.project(None);
        assert_eq!(projected, e);
    }

    #[test]
    fn modify_add_delete_replace_inverse() {
        let schema = CaseFoldSchema;
        let mut e = entry();
        let mods = vec![
            Modification::Add {
                attribute_type: "sn".into(),
                values: vec!["Bar".into()],
            },
            Modification::Replace {
                attribute_type: "cn".into(),
                values: vec!["Baz".into()],
            },
        ];
        let inverse = e.apply_modifications(&schema, &mods);
        assert_eq!(e.get("sn").unwrap().values(), &["Bar".to_string()]);
        assert_eq!(e.get("cn").unwrap().values(), &["Baz".to_string()]);

        // applying the inverse restores the original state
        e.apply_modifications(&schema, &inverse);
        assert_eq!(e.get("cn").unwrap().values(), &["Foo".to_string()]);
        assert!(e.get("sn").is_none());
    }

    #[test]
    fn add_of_an_already_present_value_is_a_revert_no_op() {
        let schema = CaseFoldSchema;
        let mut e = entry();
        let mods = vec![Modification::Add {
            attribute_type: "cn".into(),
            values: vec!["foo".into(), "Bar".into()],
        }];
        let inverse = e.apply_modifications(&schema, &mods);
        assert_eq!(e.get("cn").unwrap().values(), &["Foo".to_string(), "Bar".to_string()]);

        // the inverse only undoes the value that was actually newly added;
        // "foo" was already present under the matching rule, so reverting
        // must leave it in place rather than deleting the pre-existing "Foo"
        e.apply_modifications(&schema, &inverse);
        assert_eq!(e.get("cn").unwrap().values(), &["Foo".to_string()]);
    }
}
