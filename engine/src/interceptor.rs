//! The interceptor chain: an ordered pipeline of stages sharing one fixed
//! capability set, each free to inspect, rewrite, short-circuit, or forward
//! an [`OperationContext`] to the next stage.

use crate::context::{OperationContext, OperationPayload};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirectoryError, DirectoryErrorKind, Outcome, ReferralUrl};
use std::sync::Arc;

/// The result of a `search`: ordinary entries plus, per RFC 3296, a
/// continuation reference for every descendant referral the traversal
/// crossed (each already rewritten into the requester's DN namespace, same
/// as a top-level `referral` redirect). A client without `ManageDsaIT` set
/// is expected to chase each of these separately; one never appears as a
/// plain entry.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub entries: Vec<Entry>,
    pub continuations: Vec<Vec<ReferralUrl>>,
}

/// What a completed operation produced, erased to one shape so the chain can
/// be driven generically from a single `payload` match instead of one
/// `execute_*` entry point per operation kind.
#[derive(Debug)]
pub enum OperationResult {
    Unit,
    Entry(Entry),
    Entries(SearchOutcome),
    Dn(Dn),
    Bool(bool),
}

/// The fixed set of capabilities every stage and the terminal share. A stage
/// that has no opinion on an operation simply forwards to `next`/`self` —
/// the default bodies below do exactly that.
pub trait Interceptor: Send + Sync {
    /// Stable name this stage is addressed by in a [`crate::context::BypassSet`].
    fn name(&self) -> &'static str;

    fn add(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        next.add(ctx)
    }
    fn delete(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        next.delete(ctx)
    }
    fn modify(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        next.modify(ctx)
    }
    fn lookup(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Entry> {
        next.lookup(ctx)
    }
    fn search(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<SearchOutcome> {
        next.search(ctx)
    }
    fn rename(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        next.rename(ctx)
    }
    fn move_entry(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        next.move_entry(ctx)
    }
    fn bind(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        next.bind(ctx)
    }
    fn compare(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<bool> {
        next.compare(ctx)
    }
    fn has_entry(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<bool> {
        next.has_entry(ctx)
    }
}

/// The chain's terminus: the partition nexus. Same capability set, no
/// `next` — there is nowhere further to forward to.
pub trait Terminal: Send + Sync {
    fn add(&self, ctx: &OperationContext) -> Outcome<()>;
    fn delete(&self, ctx: &OperationContext) -> Outcome<()>;
    fn modify(&self, ctx: &OperationContext) -> Outcome<()>;
    fn lookup(&self, ctx: &OperationContext) -> Outcome<Entry>;
    fn search(&self, ctx: &OperationContext) -> Outcome<SearchOutcome>;
    fn rename(&self, ctx: &OperationContext) -> Outcome<Dn>;
    fn move_entry(&self, ctx: &OperationContext) -> Outcome<Dn>;
    fn bind(&self, ctx: &OperationContext) -> Outcome<()>;
    fn compare(&self, ctx: &OperationContext) -> Outcome<bool>;
    fn has_entry(&self, ctx: &OperationContext) -> Outcome<bool>;
}

/// A view of "the rest of the chain" from some stage's perspective. Bypassed
/// stages are skipped transparently — `next` always lands on the next
/// non-bypassed stage or the terminal.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn Terminal,
}

macro_rules! dispatch {
    ($self:ident, $ctx:ident, $method:ident) => {{
        let mut stages = $self.stages;
        loop {
            match stages.split_first() {
                Some((stage, rest)) => {
                    if $ctx.is_bypassed(stage.name()) {
                        tracing::debug!("stage {} bypassed", stage.name());
                        stages = rest;
                        continue;
                    }
                    tracing::trace!("descending into stage {}", stage.name());
                    let rest_invocation = Invocation {
                        stages: rest,
                        terminal: $self.terminal,
                    };
                    break stage.$method($ctx, &rest_invocation);
                }
                None => {
                    tracing::trace!("descending into the partition nexus");
                    break $self.terminal.$method($ctx);
                }
            }
        }
    }};
}

impl<'a> Invocation<'a> {
    pub fn add(&self, ctx: &OperationContext) -> Outcome<()> {
        dispatch!(self, ctx, add)
    }
    pub fn delete(&self, ctx: &OperationContext) -> Outcome<()> {
        dispatch!(self, ctx, delete)
    }
    pub fn modify(&self, ctx: &OperationContext) -> Outcome<()> {
        dispatch!(self, ctx, modify)
    }
    pub fn lookup(&self, ctx: &OperationContext) -> Outcome<Entry> {
        dispatch!(self, ctx, lookup)
    }
    pub fn search(&self, ctx: &OperationContext) -> Outcome<SearchOutcome> {
        dispatch!(self, ctx, search)
    }
    pub fn rename(&self, ctx: &OperationContext) -> Outcome<Dn> {
        dispatch!(self, ctx, rename)
    }
    pub fn move_entry(&self, ctx: &OperationContext) -> Outcome<Dn> {
        dispatch!(self, ctx, move_entry)
    }
    pub fn bind(&self, ctx: &OperationContext) -> Outcome<()> {
        dispatch!(self, ctx, bind)
    }
    pub fn compare(&self, ctx: &OperationContext) -> Outcome<bool> {
        dispatch!(self, ctx, compare)
    }
    pub fn has_entry(&self, ctx: &OperationContext) -> Outcome<bool> {
        dispatch!(self, ctx, has_entry)
    }
}

/// The assembled, ordered pipeline. Built once at startup (see
/// `InterceptorChain::default_assembly` in the root facade) and shared
/// across every request.
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
    terminal: Arc<dyn Terminal>,
}

impl InterceptorChain {
    pub fn new(stages: Vec<Arc<dyn Interceptor>>, terminal: Arc<dyn Terminal>) -> Self {
        Self { stages, terminal }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    fn entry(&self) -> Invocation<'_> {
        Invocation {
            stages: &self.stages,
            terminal: self.terminal.as_ref(),
        }
    }

    /// Routes `ctx` to the right capability based on its payload, erasing the
    /// result to [`OperationResult`].
    pub fn execute(&self, ctx: &OperationContext) -> Outcome<OperationResult> {
        let span = tracing::debug_span!(
            "operation",
            operation = ctx.payload.name(),
            target = %ctx.target,
            message_id = ?ctx.message_id,
        );
        let _guard = span.enter();
        let entry = self.entry();
        match &ctx.payload {
            OperationPayload::Add { .. } => entry.add(ctx).map(|_| OperationResult::Unit),
            OperationPayload::Delete => entry.delete(ctx).map(|_| OperationResult::Unit),
            OperationPayload::Modify { .. } => entry.modify(ctx).map(|_| OperationResult::Unit),
            OperationPayload::Lookup { .. } => entry.lookup(ctx).map(OperationResult::Entry),
            OperationPayload::Search { .. } => entry.search(ctx).map(OperationResult::Entries),
            OperationPayload::Rename { .. } => entry.rename(ctx).map(OperationResult::Dn),
            OperationPayload::Move { .. } | OperationPayload::MoveAndRename { .. } => {
                entry.move_entry(ctx).map(OperationResult::Dn)
            }
            OperationPayload::HasEntry => entry.has_entry(ctx).map(OperationResult::Bool),
            OperationPayload::Bind => entry.bind(ctx).map(|_| OperationResult::Unit),
            OperationPayload::Compare { .. } => entry.compare(ctx).map(OperationResult::Bool),
        }
    }
}

pub(crate) fn unwilling(message: impl Into<String>) -> DirectoryError {
    DirectoryError::new(DirectoryErrorKind::UnwillingToPerform, message)
}
