//! A minimal search filter AST, just expressive enough to drive the cursor
//! composition rules in §4.4 (equality, presence, prefix substrings, and the
//! boolean combinators).

use crate::entry::Entry;
use crate::schema::SchemaManager;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Filter {
    Present(String),
    Equality { attribute_type: String, value: String },
    /// A `attr=prefix*` substring filter. Only the leading-substring case is
    /// modeled; it is the only shape exercised by the spec's seed scenarios.
    SubstringStartsWith { attribute_type: String, prefix: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(&self, schema: &dyn SchemaManager, entry: &Entry) -> bool {
        match self {
            Filter::Present(attribute_type) => entry.get(attribute_type).is_some(),
            Filter::Equality {
                attribute_type,
                value,
            } => {
                let needle = schema.normalize_value(attribute_type, value);
                entry
                    .get(attribute_type)
                    .map(|a| {
                        a.values()
                            .iter()
                            .any(|v| schema.normalize_value(attribute_type, v) == needle)
                    })
                    .unwrap_or(false)
            }
            Filter::SubstringStartsWith {
                attribute_type,
                prefix,
            } => {
                let needle = schema.normalize_value(attribute_type, prefix);
                entry
                    .get(attribute_type)
                    .map(|a| {
                        a.values().iter().any(|v| {
                            schema
                                .normalize_value(attribute_type, v)
                                .starts_with(&needle)
                        })
                    })
                    .unwrap_or(false)
            }
            Filter::And(subs) => subs.iter().all(|f| f.matches(schema, entry)),
            Filter::Or(subs) => subs.iter().any(|f| f.matches(schema, entry)),
            Filter::Not(inner) => !inner.matches(schema, entry),
        }
    }
}
