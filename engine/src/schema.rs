//! The schema manager interface. A concrete schema manager (attribute-type
//! registry, object-class hierarchy, matching rules) is an external
//! collaborator out of scope for this crate; only the interface the pipeline
//! consumes is specified here, plus a minimal case-folding implementation
//! used by the engine's own tests.

/// Attribute-type metadata the pipeline needs: its canonical name/OID and
/// whether its value set deduplicates under the attribute's equality
/// matching rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeType {
    pub oid: String,
    pub name: String,
    pub single_valued: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectClass {
    pub name: String,
}

/// The interface the pipeline consumes from the schema subsystem.
pub trait SchemaManager: Send + Sync {
    /// Normalizes a single attribute value according to the attribute type's
    /// equality matching rule (e.g. case-fold + whitespace-collapse for
    /// directory string syntaxes).
    fn normalize_value(&self, attribute_type: &str, value: &str) -> String;

    /// Resolves an attribute type by name or OID.
    fn attribute_type(&self, name_or_oid: &str) -> AttributeType;

    /// Resolves an object class by name.
    fn object_class(&self, name: &str) -> ObjectClass;
}

/// A minimal schema manager that case-folds and whitespace-collapses every
/// attribute value, as if every attribute type used `caseIgnoreMatch`. Good
/// enough for engine-level tests; a real deployment supplies its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseFoldSchema;

impl SchemaManager for CaseFoldSchema {
    fn normalize_value(&self, _attribute_type: &str, value: &str) -> String {
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.to_ascii_lowercase()
    }

    fn attribute_type(&self, name_or_oid: &str) -> AttributeType {
        AttributeType {
            oid: name_or_oid.to_ascii_lowercase(),
            name: name_or_oid.to_ascii_lowercase(),
            single_valued: false,
        }
    }

    fn object_class(&self, name: &str) -> ObjectClass {
        ObjectClass {
            name: name.to_ascii_lowercase(),
        }
    }
}

/// The chain stage that normalizes every DN a request carries before it
/// reaches authorization, operational stamping, or the nexus — access
/// checks and storage keys are both decided on normalized form.
pub struct SchemaInterceptor {
    schema: std::sync::Arc<dyn SchemaManager>,
}

impl SchemaInterceptor {
    pub const NAME: &'static str = "schema";

    pub fn new(schema: std::sync::Arc<dyn SchemaManager>) -> Self {
        Self { schema }
    }

    fn normalized(&self, ctx: &crate::context::OperationContext) -> crate::context::OperationContext {
        let mut normalized = ctx.clone();
        normalized.target = ctx.target.normalize(self.schema.as_ref());
        normalized.session.bound_dn = ctx.session.bound_dn.normalize(self.schema.as_ref());
        normalized.payload = match ctx.payload.clone() {
            crate::context::OperationPayload::Add { mut entry } => {
                entry.set_dn(entry.dn().normalize(self.schema.as_ref()));
                crate::context::OperationPayload::Add { entry }
            }
            crate::context::OperationPayload::Move { new_superior } => {
                crate::context::OperationPayload::Move {
                    new_superior: new_superior.normalize(self.schema.as_ref()),
                }
            }
            crate::context::OperationPayload::MoveAndRename {
                new_superior,
                new_rdn,
                delete_old_rdn,
            } => crate::context::OperationPayload::MoveAndRename {
                new_superior: new_superior.normalize(self.schema.as_ref()),
                new_rdn,
                delete_old_rdn,
            },
            other => other,
        };
        normalized
    }
}

macro_rules! normalize_and_forward {
    ($self:ident, $ctx:ident, $next:ident, $method:ident) => {
        $next.$method(&$self.normalized($ctx))
    };
}

impl crate::interceptor::Interceptor for SchemaInterceptor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn add(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        normalize_and_forward!(self, ctx, next, add)
    }
    fn delete(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        normalize_and_forward!(self, ctx, next, delete)
    }
    fn modify(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        normalize_and_forward!(self, ctx, next, modify)
    }
    fn lookup(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<crate::entry::Entry> {
        normalize_and_forward!(self, ctx, next, lookup)
    }
    fn search(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<crate::interceptor::SearchOutcome> {
        normalize_and_forward!(self, ctx, next, search)
    }
    fn rename(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<crate::dn::Dn> {
        normalize_and_forward!(self, ctx, next, rename)
    }
    fn move_entry(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<crate::dn::Dn> {
        normalize_and_forward!(self, ctx, next, move_entry)
    }
    fn bind(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        normalize_and_forward!(self, ctx, next, bind)
    }
    fn compare(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<bool> {
        normalize_and_forward!(self, ctx, next, compare)
    }
    fn has_entry(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<bool> {
        normalize_and_forward!(self, ctx, next, has_entry)
    }
}

#[cfg(test)]
mod interceptor_tests {
    use super::*;
    use crate::context::{OperationContext, OperationPayload, Session};
    use crate::dn::Dn;
    use crate::entry::Entry;
    use crate::error::Outcome;
    use crate::interceptor::{Interceptor, InterceptorChain, Terminal};
    use std::sync::Arc;

    struct CapturingTerminal {
        seen_target: parking_lot::Mutex<Option<Dn>>,
    }

    impl Terminal for CapturingTerminal {
        fn add(&self, ctx: &OperationContext) -> Outcome<()> {
            *self.seen_target.lock() = Some(ctx.target.clone());
            Outcome::Ok(())
        }
        fn delete(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn modify(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn lookup(&self, _ctx: &OperationContext) -> Outcome<Entry> {
            Outcome::Err(crate::error::DirectoryError::no_such_object("unused"))
        }
        fn search(&self, _ctx: &OperationContext) -> Outcome<crate::interceptor::SearchOutcome> {
            Outcome::Ok(crate::interceptor::SearchOutcome::default())
        }
        fn rename(&self, _ctx: &OperationContext) -> Outcome<Dn> {
            Outcome::Ok(Dn::root_dse())
        }
        fn move_entry(&self, _ctx: &OperationContext) -> Outcome<Dn> {
            Outcome::Ok(Dn::root_dse())
        }
        fn bind(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn compare(&self, _ctx: &OperationContext) -> Outcome<bool> {
            Outcome::Ok(false)
        }
        fn has_entry(&self, _ctx: &OperationContext) -> Outcome<bool> {
            Outcome::Ok(false)
        }
    }

    #[test]
    fn add_target_reaches_the_terminal_normalized() {
        let schema: Arc<dyn SchemaManager> = Arc::new(CaseFoldSchema);
        let stage: Arc<dyn Interceptor> = Arc::new(SchemaInterceptor::new(schema));
        let terminal = Arc::new(CapturingTerminal {
            seen_target: parking_lot::Mutex::new(None),
        });
        let chain = InterceptorChain::new(vec![stage], terminal.clone());
        let entry = Entry::new(Dn::parse("CN=Foo Bar,OU=People").unwrap());
        let ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("CN=Foo Bar,OU=People").unwrap(),
            OperationPayload::Add { entry },
        );
        chain.execute(&ctx);
        let seen = terminal.seen_target.lock().clone().unwrap();
        assert_eq!(seen.to_normalized_string(), "cn=foo bar,ou=people");
    }
}
