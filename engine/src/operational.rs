//! The operational-attributes stage: stamps `entryUUID`/`createTimestamp` on
//! a successful add and `modifyTimestamp`/`modifiersName` on every later
//! mutation, and refuses a client that tries to forge the create-time
//! attributes itself.
//!
//! Sits between authorization and the nexus in the default assembly, so
//! every mutation that reaches it has already cleared access control.

use crate::context::{OperationContext, OperationPayload};
use crate::entry::Entry;
use crate::error::Outcome;
use crate::interceptor::{unwilling, Interceptor, Invocation, SearchOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ENTRY_UUID: &str = "entryuuid";
pub const CREATE_TIMESTAMP: &str = "createtimestamp";
pub const CREATORS_NAME: &str = "creatorsname";
pub const MODIFY_TIMESTAMP: &str = "modifytimestamp";
pub const MODIFIERS_NAME: &str = "modifiersname";

const CLIENT_SUPPLIED_ON_ADD: &[&str] = &[CREATE_TIMESTAMP, CREATORS_NAME, ENTRY_UUID, MODIFY_TIMESTAMP, MODIFIERS_NAME];

/// Supplies opaque, monotonically increasing identifiers for `entryUUID`.
/// Not a real RFC 4122 UUID generator — the pipeline only needs the values
/// to be unique and stable, which a counter guarantees more cheaply than
/// pulling in a dependency for it.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Default)]
pub struct CounterIdGenerator {
    next: AtomicU64,
}

impl IdGenerator for CounterIdGenerator {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{n:032x}")
    }
}

/// Supplies the generalized-time string stamped into timestamp attributes.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

/// Wall-clock generalized-time source that also guarantees each value it
/// hands out is strictly greater than the last: two stamps issued within the
/// same wall-clock second would otherwise tie, and `modifyTimestamp` must
/// strictly advance on every accepted mutation.
#[derive(Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl Clock for SystemClock {
    fn now(&self) -> String {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = wall.max(prev + 1);
            match self.last.compare_exchange_weak(prev, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return format!("{candidate}Z"),
                Err(observed) => prev = observed,
            }
        }
    }
}

pub struct OperationalAttributesInterceptor {
    ids: Box<dyn IdGenerator>,
    clock: Box<dyn Clock>,
}

impl OperationalAttributesInterceptor {
    pub fn new(ids: Box<dyn IdGenerator>, clock: Box<dyn Clock>) -> Self {
        Self { ids, clock }
    }

    pub const NAME: &'static str = "operational";

    fn actor(ctx: &OperationContext) -> String {
        ctx.session.bound_dn.to_normalized_string()
    }

    fn stamp_create(&self, entry: &mut Entry, ctx: &OperationContext) {
        entry.set(ENTRY_UUID, vec![self.ids.next_id()]);
        entry.set(CREATE_TIMESTAMP, vec![self.clock.now()]);
        entry.set(CREATORS_NAME, vec![Self::actor(ctx)]);
    }

}

impl Interceptor for OperationalAttributesInterceptor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn add(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        let OperationPayload::Add { entry } = &ctx.payload else {
            return next.add(ctx);
        };
        for forged in CLIENT_SUPPLIED_ON_ADD {
            if entry.get(forged).is_some() {
                return Outcome::Err(unwilling(format!(
                    "{forged} is a server-assigned operational attribute"
                )));
            }
        }
        let mut stamped = entry.clone();
        self.stamp_create(&mut stamped, ctx);
        let mut rewritten = ctx.clone();
        rewritten.payload = OperationPayload::Add { entry: stamped };
        next.add(&rewritten)
    }

    fn modify(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        let outcome = next.modify(ctx);
        if outcome.is_ok() {
            self.touch_up(ctx, &ctx.target, next);
        }
        outcome
    }

    fn rename(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<crate::dn::Dn> {
        let outcome = next.rename(ctx);
        if let Outcome::Ok(new_dn) = &outcome {
            self.touch_up(ctx, new_dn, next);
        }
        outcome
    }

    fn move_entry(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<crate::dn::Dn> {
        let outcome = next.move_entry(ctx);
        if let Outcome::Ok(new_dn) = &outcome {
            self.touch_up(ctx, new_dn, next);
        }
        outcome
    }
}

impl OperationalAttributesInterceptor {
    /// Stamps `modifyTimestamp`/`modifiersName` on the entry's post-relocation
    /// DN, re-entering the chain the same way `modify` itself does — §4.6
    /// wants this touch-up on every nexus-accepted `modify`, `rename`, *and*
    /// `move`.
    fn touch_up(&self, ctx: &OperationContext, new_dn: &crate::dn::Dn, next: &Invocation<'_>) {
        let touch_up = OperationContext::new(
            ctx.session.clone(),
            new_dn.clone(),
            OperationPayload::Modify {
                modifications: vec![
                    crate::entry::Modification::Replace {
                        attribute_type: MODIFY_TIMESTAMP.into(),
                        values: vec![self.clock.now()],
                    },
                    crate::entry::Modification::Replace {
                        attribute_type: MODIFIERS_NAME.into(),
                        values: vec![Self::actor(ctx)],
                    },
                ],
            },
        );
        let _ = next.modify(&touch_up);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;
    use crate::dn::Dn;
    use crate::entry::{Modification, OBJECT_CLASS};
    use crate::interceptor::{InterceptorChain, OperationResult, Terminal};
    use std::sync::Arc;

    struct MemoryTerminal {
        entry: parking_lot::Mutex<Option<Entry>>,
    }

    impl Terminal for MemoryTerminal {
        fn add(&self, ctx: &OperationContext) -> Outcome<()> {
            if let OperationPayload::Add { entry } = &ctx.payload {
                *self.entry.lock() = Some(entry.clone());
                Outcome::Ok(())
            } else {
                unreachable!()
            }
        }
        fn delete(&self, _ctx: &OperationContext) -> Outcome<()> {
            Outcome::Ok(())
        }
        fn modify(&self, ctx: &OperationContext) -> Outcome<()> {
            if let OperationPayload::Modify { modifications } = &ctx.payload {
                let schema = crate::schema::CaseFoldSchema;
                let mut guard = self.entry.lock();
                if let Some(entry) = guard.as_mut() {
                    entry.apply_modifications(&schema, modifications);
                }
                Outcome::Ok(())
            } else {
                unreachable!()
            }
        }
        fn lookup(&self, _ctx: &OperationContext) -> Outcome<Entry> {
            Outcome::Ok(self.entry.lock().clone().unwrap())
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

    fn chain() -> (InterceptorChain, Arc<MemoryTerminal>) {
        let terminal = Arc::new(MemoryTerminal {
            entry: parking_lot::Mutex::new(None),
        });
        let stage = Arc::new(OperationalAttributesInterceptor::new(
            Box::<CounterIdGenerator>::default(),
            Box::<SystemClock>::default(),
        ));
        (InterceptorChain::new(vec![stage], terminal.clone()), terminal)
    }

    #[test]
    fn forged_create_timestamp_on_add_is_rejected() {
        let (chain, _terminal) = chain();
        let mut entry = Entry::new(Dn::parse("cn=x").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        entry.set(CREATE_TIMESTAMP, vec!["19700101000000Z".into()]);
        let ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x").unwrap(),
            OperationPayload::Add { entry },
        );
        let outcome = chain.execute(&ctx);
        match outcome {
            Outcome::Err(e) => assert_eq!(e.kind, crate::error::DirectoryErrorKind::UnwillingToPerform),
            _ => panic!("expected unwilling-to-perform"),
        }
    }

    #[test]
    fn successful_add_stamps_entry_uuid_and_create_timestamp() {
        let (chain, terminal) = chain();
        let mut entry = Entry::new(Dn::parse("cn=x").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        let ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x").unwrap(),
            OperationPayload::Add { entry },
        );
        let outcome = chain.execute(&ctx);
        assert!(outcome.is_ok());
        let stored = terminal.entry.lock().clone().unwrap();
        assert!(stored.get(ENTRY_UUID).is_some());
        assert!(stored.get(CREATE_TIMESTAMP).is_some());
    }

    #[test]
    fn modify_advances_modify_timestamp_but_keeps_entry_uuid_stable() {
        let (chain, terminal) = chain();
        let mut entry = Entry::new(Dn::parse("cn=x").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        let add_ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x").unwrap(),
            OperationPayload::Add { entry },
        );
        chain.execute(&add_ctx);
        let uuid_after_add = terminal.entry.lock().clone().unwrap().get(ENTRY_UUID).unwrap().values().to_vec();

        let modify_ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x").unwrap(),
            OperationPayload::Modify {
                modifications: vec![Modification::Replace {
                    attribute_type: "description".into(),
                    values: vec!["updated".into()],
                }],
            },
        );
        let result = chain.execute(&modify_ctx);
        assert!(matches!(result, Outcome::Ok(OperationResult::Unit)));
        let after = terminal.entry.lock().clone().unwrap();
        assert_eq!(after.get(ENTRY_UUID).unwrap().values().to_vec(), uuid_after_add);
        assert!(after.get(MODIFY_TIMESTAMP).is_some());
    }

    #[test]
    fn move_also_stamps_modify_timestamp() {
        let (chain, terminal) = chain();
        let mut entry = Entry::new(Dn::parse("cn=x,ou=people").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        let add_ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x,ou=people").unwrap(),
            OperationPayload::Add { entry },
        );
        chain.execute(&add_ctx);
        assert!(terminal.entry.lock().clone().unwrap().get(MODIFY_TIMESTAMP).is_none());

        let move_ctx = OperationContext::new(
            Session::anonymous(),
            Dn::parse("cn=x,ou=people").unwrap(),
            OperationPayload::Move {
                new_superior: Dn::parse("ou=staff").unwrap(),
            },
        );
        let result = chain.execute(&move_ctx);
        assert!(result.is_ok());
        assert!(terminal.entry.lock().clone().unwrap().get(MODIFY_TIMESTAMP).is_some());
    }
}
