//! The authorization stage: the policy-evaluation hook named by the default
//! assembly but deliberately left pluggable — access-control policy itself is
//! an external collaborator, same as the schema manager.

use crate::context::OperationContext;
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirectoryError, DirectoryErrorKind, Outcome};
use crate::interceptor::{Interceptor, Invocation, SearchOutcome};
use std::sync::Arc;

/// The decision an access controller renders for one session against one
/// target DN and operation name.
pub trait AccessController: Send + Sync {
    fn check(&self, session_dn: &Dn, target: &Dn, operation: &'static str) -> DirResult;
}

type DirResult = Result<(), DirectoryError>;

/// Grants every request. The only policy this crate ships; a real deployment
/// supplies its own `AccessController` (ACI evaluation, RBAC, ...).
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAllAccessController;

impl AccessController for AllowAllAccessController {
    fn check(&self, _session_dn: &Dn, _target: &Dn, _operation: &'static str) -> DirResult {
        Ok(())
    }
}

/// The chain stage occupying the conventional slot for policy extensions
/// between `schema` and `operational`.
pub struct AuthorizationInterceptor {
    controller: Arc<dyn AccessController>,
}

impl AuthorizationInterceptor {
    pub const NAME: &'static str = "authorization";

    pub fn new(controller: Arc<dyn AccessController>) -> Self {
        Self { controller }
    }

    fn guard<T>(&self, ctx: &OperationContext, operation: &'static str) -> Option<Outcome<T>> {
        match self.controller.check(&ctx.session.bound_dn, &ctx.target, operation) {
            Ok(()) => None,
            Err(e) => Some(Outcome::Err(e)),
        }
    }
}

macro_rules! guarded {
    ($self:ident, $ctx:ident, $next:ident, $method:ident, $op:literal) => {
        match $self.guard($ctx, $op) {
            Some(outcome) => outcome,
            None => $next.$method($ctx),
        }
    };
}

impl Interceptor for AuthorizationInterceptor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn add(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        guarded!(self, ctx, next, add, "add")
    }
    fn delete(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        guarded!(self, ctx, next, delete, "delete")
    }
    fn modify(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        guarded!(self, ctx, next, modify, "modify")
    }
    fn lookup(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Entry> {
        guarded!(self, ctx, next, lookup, "lookup")
    }
    fn search(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<SearchOutcome> {
        guarded!(self, ctx, next, search, "search")
    }
    fn rename(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        guarded!(self, ctx, next, rename, "rename")
    }
    fn move_entry(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        guarded!(self, ctx, next, move_entry, "move")
    }
    fn compare(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<bool> {
        guarded!(self, ctx, next, compare, "compare")
    }
    // bind and has_entry are left as default-forwarding: a bind must reach
    // the nexus to learn whether the bound DN even exists, and has_entry is
    // consulted internally by stages that need a yes/no answer, not by a
    // client directly.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OperationPayload, Session};
    use crate::entry::OBJECT_CLASS;
    use crate::interceptor::{InterceptorChain, OperationResult, Terminal};

    struct DenyNonAdmin;

    impl AccessController for DenyNonAdmin {
        fn check(&self, session_dn: &Dn, _target: &Dn, _operation: &'static str) -> DirResult {
            if session_dn.to_normalized_string() == "cn=admin" {
                Ok(())
            } else {
                Err(DirectoryError::new(
                    DirectoryErrorKind::InsufficientAccessRights,
                    "not admin",
                ))
            }
        }
    }

    struct OkTerminal;

    impl Terminal for OkTerminal {
        fn add(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn delete(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn modify(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn lookup(&self, _ctx: &OperationContext) -> Outcome<Entry> {
            Outcome::Err(DirectoryError::no_such_object("unused"))
        }
        fn search(&self, _ctx: &OperationContext) -> Outcome<SearchOutcome> {
            Outcome::Ok(SearchOutcome::default())
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

    fn add_ctx(session_dn: &str) -> OperationContext {
        let dn = Dn::parse("cn=x").unwrap();
        OperationContext::new(
            Session::bound_as(Dn::parse(session_dn).unwrap()),
            dn.clone(),
            OperationPayload::Add {
                entry: {
                    let mut e = Entry::new(dn);
                    e.set(OBJECT_CLASS, vec!["top".into()]);
                    e
                },
            },
        )
    }

    #[test]
    fn allow_all_forwards_every_operation() {
        let stage: Arc<dyn Interceptor> =
            Arc::new(AuthorizationInterceptor::new(Arc::new(AllowAllAccessController)));
        let chain = InterceptorChain::new(vec![stage], Arc::new(OkTerminal));
        let outcome = chain.execute(&add_ctx("cn=anyone"));
        assert!(matches!(outcome, Outcome::Ok(OperationResult::Unit)));
    }

    #[test]
    fn denying_controller_short_circuits_before_the_terminal() {
        let stage: Arc<dyn Interceptor> = Arc::new(AuthorizationInterceptor::new(Arc::new(DenyNonAdmin)));
        let chain = InterceptorChain::new(vec![stage], Arc::new(OkTerminal));
        let outcome = chain.execute(&add_ctx("cn=someone-else"));
        match outcome {
            Outcome::Err(e) => assert_eq!(e.kind, DirectoryErrorKind::InsufficientAccessRights),
            _ => panic!("expected insufficient-access-rights"),
        }
    }

    #[test]
    fn denying_controller_admits_the_bound_admin() {
        let stage: Arc<dyn Interceptor> = Arc::new(AuthorizationInterceptor::new(Arc::new(DenyNonAdmin)));
        let chain = InterceptorChain::new(vec![stage], Arc::new(OkTerminal));
        let outcome = chain.execute(&add_ctx("cn=admin"));
        assert!(outcome.is_ok());
    }
}
