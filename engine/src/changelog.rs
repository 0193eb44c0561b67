//! The change-log: a monotonic, append-only record of every mutation that
//! reached the nexus, each carrying enough information to be undone, and the
//! chain stage that populates it.

use crate::context::{OperationContext, OperationPayload};
use crate::dn::Dn;
use crate::entry::{Entry, Modification};
use crate::error::{DirResult, DirectoryError, DirectoryErrorKind, Outcome};
use crate::interceptor::{Interceptor, Invocation};
use crate::schema::SchemaManager;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What changed, stripped down to the reverse operation needed to undo it.
#[derive(Clone, Debug)]
pub enum ReverseOp {
    /// Undo an add: delete the entry.
    Delete,
    /// Undo a delete: re-add the entry as it was.
    Add { entry: crate::entry::Entry },
    /// Undo a modify: replay the inverse modification list.
    Modify { modifications: Vec<Modification> },
    /// Undo a rename: rename back to the original RDN.
    Rename { old_rdn: String },
    /// Undo a move: move back to the original superior.
    Move { old_superior: crate::dn::Dn },
}

#[derive(Clone, Debug)]
pub struct ChangeRecord {
    pub revision: u64,
    pub target: crate::dn::Dn,
    pub operation: &'static str,
    pub reverse: ReverseOp,
}

/// Monotonically numbered, in-memory change-log. Revision numbers start at 1
/// and never repeat for the lifetime of the log, even across reverts.
pub struct ChangeLog {
    next_revision: Mutex<u64>,
    records: Mutex<Vec<ChangeRecord>>,
    enabled: AtomicBool,
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog {
    pub fn new() -> Self {
        Self {
            next_revision: Mutex::new(1),
            records: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn current_revision(&self) -> u64 {
        self.next_revision.lock().saturating_sub(1)
    }

    /// Appends a record for a mutation that just committed, assigning it the
    /// next revision number.
    pub fn append(&self, target: crate::dn::Dn, operation: &'static str, reverse: ReverseOp) -> u64 {
        let mut next = self.next_revision.lock();
        let revision = *next;
        *next += 1;
        tracing::trace!("recording revision {} for {} {}", revision, operation, target);
        self.records.lock().push(ChangeRecord {
            revision,
            target,
            operation,
            reverse,
        });
        revision
    }

    /// Builds the reverse operation a successful commit should record, from
    /// the context that produced it and whatever state the partition returned.
    pub fn reverse_for(ctx: &OperationContext, before: Option<crate::entry::Entry>) -> DirResult<ReverseOp> {
        match &ctx.payload {
            OperationPayload::Add { .. } => Ok(ReverseOp::Delete),
            OperationPayload::Delete => before
                .map(|entry| ReverseOp::Add { entry })
                .ok_or_else(|| {
                    DirectoryError::new(
                        DirectoryErrorKind::Unrevertable,
                        "delete did not report the deleted entry",
                    )
                }),
            OperationPayload::Modify { .. } => Err(DirectoryError::new(
                DirectoryErrorKind::Unrevertable,
                "modify reverse-ops must be built from the partition's inverse list",
            )),
            OperationPayload::Rename { .. } => ctx
                .target
                .rdn()
                .map(|r| ReverseOp::Rename {
                    old_rdn: r.to_user_string(),
                })
                .ok_or_else(|| {
                    DirectoryError::new(DirectoryErrorKind::Unrevertable, "cannot rename the root DSE")
                }),
            OperationPayload::Move { .. } => ctx
                .target
                .parent()
                .map(|p| ReverseOp::Move { old_superior: p })
                .ok_or_else(|| {
                    DirectoryError::new(DirectoryErrorKind::Unrevertable, "cannot move the root DSE")
                }),
            other => Err(DirectoryError::new(
                DirectoryErrorKind::Unrevertable,
                format!("{} is not a revertible operation", other.name()),
            )),
        }
    }

    /// Returns the records that must be undone, newest-first, to revert the
    /// log back to `to_revision` (exclusive: records at or below `to_revision`
    /// are kept).
    pub fn records_to_revert(&self, to_revision: u64) -> Vec<ChangeRecord> {
        let mut records: Vec<ChangeRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.revision > to_revision)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.revision.cmp(&a.revision));
        records
    }

    /// Drops records above `to_revision`, as if they had never been appended.
    /// Called once every reverse-op in the batch has been replayed
    /// successfully.
    pub fn truncate(&self, to_revision: u64) {
        self.records.lock().retain(|r| r.revision <= to_revision);
    }

    /// Tags the current revision, for callers that want to remember a point
    /// to revert back to later (e.g. a failed multi-step client transaction).
    pub fn tag(&self) -> u64 {
        self.current_revision()
    }

    /// Replays the reverse-ops needed to bring the log back to `to_revision`,
    /// newest first, re-entering `chain` with `BYPASS_ALL` so the replay
    /// itself is not change-logged. Stops and returns the first failure
    /// without truncating, leaving the log consistent with whatever state
    /// was actually reached.
    pub fn revert(&self, chain: &crate::interceptor::InterceptorChain, to_revision: u64) -> DirResult<()> {
        for record in self.records_to_revert(to_revision) {
            let payload = match record.reverse {
                ReverseOp::Delete => OperationPayload::Delete,
                ReverseOp::Add { entry } => OperationPayload::Add { entry },
                ReverseOp::Modify { modifications } => OperationPayload::Modify { modifications },
                ReverseOp::Rename { old_rdn } => OperationPayload::Rename {
                    new_rdn: old_rdn,
                    delete_old_rdn: true,
                },
                ReverseOp::Move { old_superior } => OperationPayload::Move {
                    new_superior: old_superior,
                },
            };
            let ctx = OperationContext::new(crate::context::Session::anonymous(), record.target, payload)
                .bypassing_all();
            chain.execute(&ctx).into_result().map_err(|e| {
                tracing::error!(
                    "revert of revision {} aborted: reverse-op failed with {}",
                    record.revision,
                    e
                );
                DirectoryError::new(
                    DirectoryErrorKind::Unrevertable,
                    format!("revert of revision {} failed", record.revision),
                )
            })?;
        }
        self.truncate(to_revision);
        Ok(())
    }
}

/// The chain stage that records a reverse-op for every mutation the rest of
/// the chain commits. Sits just above the nexus in the default assembly, so
/// the operational stage's timestamp touch-ups are logged the same as any
/// other mutation.
pub struct ChangeLogInterceptor {
    log: Arc<ChangeLog>,
    schema: Arc<dyn SchemaManager>,
}

impl ChangeLogInterceptor {
    pub const NAME: &'static str = "changelog";

    pub fn new(log: Arc<ChangeLog>, schema: Arc<dyn SchemaManager>) -> Self {
        Self { log, schema }
    }

    fn lookup(&self, ctx: &OperationContext, next: &Invocation<'_>, target: &Dn) -> Option<Entry> {
        let lookup_ctx = OperationContext::new(
            ctx.session.clone(),
            target.clone(),
            OperationPayload::Lookup { attributes: None },
        )
        .with_bypass(ctx.bypass.clone());
        match next.lookup(&lookup_ctx) {
            Outcome::Ok(entry) => Some(entry),
            _ => None,
        }
    }
}

impl Interceptor for ChangeLogInterceptor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn add(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        let outcome = next.add(ctx);
        if self.log.is_enabled() && outcome.is_ok() {
            self.log.append(ctx.target.clone(), "add", ReverseOp::Delete);
        }
        outcome
    }

    fn delete(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        let before = self.lookup(ctx, next, &ctx.target);
        let outcome = next.delete(ctx);
        if self.log.is_enabled() && outcome.is_ok() {
            if let Some(entry) = before {
                self.log.append(ctx.target.clone(), "delete", ReverseOp::Add { entry });
            }
        }
        outcome
    }

    fn modify(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<()> {
        let OperationPayload::Modify { modifications } = &ctx.payload else {
            return next.modify(ctx);
        };
        let before = self.lookup(ctx, next, &ctx.target);
        let outcome = next.modify(ctx);
        if self.log.is_enabled() && outcome.is_ok() {
            if let Some(mut scratch) = before {
                let inverse = scratch.apply_modifications(self.schema.as_ref(), modifications);
                self.log.append(ctx.target.clone(), "modify", ReverseOp::Modify { modifications: inverse });
            }
        }
        outcome
    }

    fn rename(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        let old_rdn = ctx.target.rdn().map(|r| r.to_user_string());
        let outcome = next.rename(ctx);
        if self.log.is_enabled() {
            if let (Outcome::Ok(new_dn), Some(old_rdn)) = (&outcome, old_rdn) {
                self.log.append(new_dn.clone(), "rename", ReverseOp::Rename { old_rdn });
            }
        }
        outcome
    }

    fn move_entry(&self, ctx: &OperationContext, next: &Invocation<'_>) -> Outcome<Dn> {
        let old_superior = ctx.target.parent();
        let outcome = next.move_entry(ctx);
        if self.log.is_enabled() {
            if let (Outcome::Ok(new_dn), Some(old_superior)) = (&outcome, old_superior) {
                self.log.append(new_dn.clone(), "move", ReverseOp::Move { old_superior });
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;

    #[test]
    fn revisions_are_monotonic_and_never_repeat() {
        let log = ChangeLog::new();
        let a = log.append(Dn::parse("cn=a").unwrap(), "add", ReverseOp::Delete);
        let b = log.append(Dn::parse("cn=b").unwrap(), "add", ReverseOp::Delete);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(log.current_revision(), 2);
    }

    #[test]
    fn records_to_revert_are_newest_first_and_tag_excludes_kept() {
        let log = ChangeLog::new();
        log.append(Dn::parse("cn=a").unwrap(), "add", ReverseOp::Delete);
        let tag = log.tag();
        log.append(Dn::parse("cn=b").unwrap(), "add", ReverseOp::Delete);
        log.append(Dn::parse("cn=c").unwrap(), "add", ReverseOp::Delete);
        let to_revert = log.records_to_revert(tag);
        assert_eq!(to_revert.len(), 2);
        assert_eq!(to_revert[0].revision, 3);
        assert_eq!(to_revert[1].revision, 2);
        log.truncate(tag);
        assert_eq!(log.current_revision(), tag);
    }
}
