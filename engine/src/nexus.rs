//! The partition nexus: the chain's terminal stage. Routes a request to the
//! partition whose suffix is the longest same-or-ancestor match for the
//! target DN, synthesizes the root DSE, and keeps the referral manager's
//! registry in step with entries that are added, modified, or removed as
//! referral objects. The actual cross-a-referral short-circuit lives in
//! [`crate::referral::ReferralInterceptor`], further up the chain.

use crate::context::{OperationContext, OperationPayload, Scope};
use crate::cursor::Cursor;
use crate::dn::Dn;
use crate::entry::{Entry, OBJECT_CLASS};
use crate::error::{DirResult, DirectoryError, DirectoryErrorKind, Outcome};
use crate::filter::Filter;
use crate::interceptor::{SearchOutcome, Terminal};
use crate::partition::Partition;
use crate::referral::ReferralManager;
use crate::schema::SchemaManager;
use std::sync::Arc;

pub const NAMING_CONTEXTS: &str = "namingcontexts";

/// Installs every already-stored referral entry under `partition`'s suffix
/// into `referrals`, so a registry built against a pre-populated partition
/// (restored from disk, or seeded in a test) knows about referrals that
/// predate this process rather than waiting for the next write to one.
/// Entries that fail validation are logged and skipped rather than aborting
/// the whole scan — partition registration has no caller to report the
/// failure back to.
fn populate_referrals_from(partition: &dyn Partition, referrals: &ReferralManager, schema: &dyn SchemaManager) {
    let filter = Filter::Equality {
        attribute_type: crate::entry::OBJECT_CLASS.to_string(),
        value: crate::entry::REFERRAL_OBJECT_CLASS.to_string(),
    };
    let mut cursor = match partition.search(partition.suffix(), Scope::Subtree, &filter, schema) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("could not scan {} for referral entries at startup: {}", partition.suffix(), e);
            return;
        }
    };
    if cursor.before_first().is_err() {
        return;
    }
    loop {
        match cursor.next() {
            Ok(true) => match cursor.get() {
                Ok(entry) => {
                    if let Err(e) = referrals.reconcile(entry) {
                        tracing::warn!("referral entry {} found at startup is invalid: {}", entry.dn(), e);
                    }
                }
                Err(_) => break,
            },
            _ => break,
        }
    }
}

pub struct PartitionNexus {
    partitions: Vec<Arc<dyn Partition>>,
    referrals: Arc<ReferralManager>,
    schema: Arc<dyn SchemaManager>,
}

impl PartitionNexus {
    pub fn new(
        partitions: Vec<Arc<dyn Partition>>,
        referrals: Arc<ReferralManager>,
        schema: Arc<dyn SchemaManager>,
    ) -> Self {
        for partition in &partitions {
            populate_referrals_from(partition.as_ref(), &referrals, schema.as_ref());
        }
        Self {
            partitions,
            referrals,
            schema,
        }
    }

    pub fn register_partition(&mut self, partition: Arc<dyn Partition>) {
        populate_referrals_from(partition.as_ref(), &self.referrals, self.schema.as_ref());
        self.partitions.push(partition);
    }

    fn root_dse(&self) -> Entry {
        let mut dse = Entry::new(Dn::root_dse());
        dse.set(OBJECT_CLASS, vec!["top".into()]);
        dse.set(
            NAMING_CONTEXTS,
            self.partitions.iter().map(|p| p.suffix().to_user_string()).collect(),
        );
        dse
    }

    /// The partition whose suffix is the longest same-or-ancestor match for
    /// `dn`, i.e. the partition that owns `dn`.
    fn find_partition(&self, dn: &Dn) -> Option<&Arc<dyn Partition>> {
        self.partitions
            .iter()
            .filter(|p| p.suffix().is_same_or_ancestor_of(dn))
            .max_by_key(|p| p.suffix().len())
    }

    fn require_partition(&self, dn: &Dn) -> DirResult<&Arc<dyn Partition>> {
        self.find_partition(dn)
            .ok_or_else(|| DirectoryError::no_such_object(dn))
    }

    /// After a rename or move commits, removes the old DN from the referral
    /// registry and, if the entry is still a referral at its new DN,
    /// re-registers it there — §4.3's "remove old DN, insert new DN if still
    /// a referral". Looked up fresh from `partition` rather than threaded
    /// through the caller, since the partition is the only party that knows
    /// the post-relocation attribute state.
    fn reconcile_after_relocation(&self, partition: &Arc<dyn Partition>, old_dn: &Dn, new_dn: &Dn) {
        self.referrals.unregister(old_dn);
        match partition.lookup(new_dn) {
            Ok(entry) => {
                if let Err(e) = self.referrals.reconcile(&entry) {
                    tracing::warn!("relocated entry {} is an invalid referral, leaving it unregistered: {}", new_dn, e);
                }
            }
            Err(e) => {
                tracing::warn!("could not re-read relocated entry {} for referral reconciliation: {}", new_dn, e);
            }
        }
    }
}

impl Terminal for PartitionNexus {
    fn add(&self, ctx: &OperationContext) -> Outcome<()> {
        let OperationPayload::Add { entry } = &ctx.payload else {
            return Outcome::Err(DirectoryError::new(DirectoryErrorKind::Other, "add() called without an Add payload"));
        };
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        if let Err(e) = ReferralManager::precheck(entry) {
            return Outcome::Err(e);
        }
        if let Err(e) = partition.add(entry.clone()) {
            return Outcome::Err(e);
        }
        match self.referrals.reconcile(entry) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => {
                tracing::warn!("entry {} committed but referral registry update failed: {}", entry.dn(), e);
                Outcome::Ok(())
            }
        }
    }

    fn delete(&self, ctx: &OperationContext) -> Outcome<()> {
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        match partition.delete(&ctx.target) {
            Ok(_) => {
                self.referrals.unregister(&ctx.target);
                Outcome::Ok(())
            }
            Err(e) => Outcome::Err(e),
        }
    }

    fn modify(&self, ctx: &OperationContext) -> Outcome<()> {
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        match partition.modify(self.schema.as_ref(), ctx) {
            Ok((_before, after)) => {
                // The modify already committed; an entry left as an invalid
                // referral by it is logged and left unregistered rather than
                // rolled back — modify has no rollback path of its own.
                if let Err(e) = self.referrals.reconcile(&after) {
                    tracing::warn!("modified entry {} is an invalid referral, leaving it unregistered: {}", after.dn(), e);
                }
                Outcome::Ok(())
            }
            Err(e) => Outcome::Err(e),
        }
    }

    fn lookup(&self, ctx: &OperationContext) -> Outcome<Entry> {
        let attributes = match &ctx.payload {
            OperationPayload::Lookup { attributes } => attributes.as_deref(),
            _ => None,
        };
        if ctx.target.is_root_dse() {
            return Outcome::Ok(self.root_dse().project(attributes));
        }
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        match partition.lookup(&ctx.target) {
            Ok(e) => Outcome::Ok(e.project(attributes)),
            Err(e) => Outcome::Err(e),
        }
    }

    fn search(&self, ctx: &OperationContext) -> Outcome<SearchOutcome> {
        let (scope, filter, attributes) = match &ctx.payload {
            OperationPayload::Search { scope, filter, attributes } => (*scope, filter, attributes.as_deref()),
            _ => {
                return Outcome::Err(DirectoryError::new(
                    DirectoryErrorKind::Other,
                    "search() called without a Search payload",
                ))
            }
        };
        if ctx.target.is_root_dse() {
            return match scope {
                Scope::Base => Outcome::Ok(SearchOutcome {
                    entries: vec![self.root_dse().project(attributes)],
                    continuations: Vec::new(),
                }),
                _ => Outcome::Err(DirectoryError::new(
                    DirectoryErrorKind::UnsupportedOperation,
                    "only base-scoped search is supported against the root DSE",
                )),
            };
        }
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        let mut cursor = match partition.search(&ctx.target, scope, filter, self.schema.as_ref()) {
            Ok(c) => c,
            Err(e) => return Outcome::Err(e),
        };
        let mut entries = Vec::new();
        let mut continuations = Vec::new();
        if cursor.before_first().is_err() {
            return Outcome::Err(DirectoryError::new(DirectoryErrorKind::Other, "cursor reset failed"));
        }
        loop {
            match cursor.next() {
                Ok(true) => match cursor.get() {
                    // A descendant referral encountered mid-traversal is never
                    // handed back as ordinary entry data (outside ManageDsaIT):
                    // RFC 3296 wants a continuation reference for it instead,
                    // same URL list a direct request against that DN would get.
                    Ok(entry) if !ctx.manage_dsa_it && self.referrals.is_referral(entry.dn()) => {
                        match self.referrals.continuation_for(entry.dn(), false) {
                            Ok(Some(urls)) => {
                                tracing::debug!("{} is a descendant referral, emitting a continuation reference", entry.dn());
                                continuations.push(urls);
                            }
                            Ok(None) => entries.push(entry.project(attributes)),
                            Err(e) => return Outcome::Err(e),
                        }
                    }
                    Ok(entry) => entries.push(entry.project(attributes)),
                    Err(e) => return Outcome::Err(e),
                },
                Ok(false) => break,
                Err(e) => return Outcome::Err(e),
            }
        }
        Outcome::Ok(SearchOutcome { entries, continuations })
    }

    fn rename(&self, ctx: &OperationContext) -> Outcome<Dn> {
        let (new_rdn, delete_old_rdn) = match &ctx.payload {
            OperationPayload::Rename { new_rdn, delete_old_rdn } => (new_rdn.as_str(), *delete_old_rdn),
            _ => {
                return Outcome::Err(DirectoryError::new(
                    DirectoryErrorKind::Other,
                    "rename() called without a Rename payload",
                ))
            }
        };
        let partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        match partition.rename(&ctx.target, new_rdn, delete_old_rdn) {
            Ok(new_dn) => {
                self.reconcile_after_relocation(partition, &ctx.target, &new_dn);
                Outcome::Ok(new_dn)
            }
            Err(e) => Outcome::Err(e),
        }
    }

    fn move_entry(&self, ctx: &OperationContext) -> Outcome<Dn> {
        let new_superior = match &ctx.payload {
            OperationPayload::Move { new_superior } => new_superior,
            OperationPayload::MoveAndRename { new_superior, .. } => new_superior,
            _ => {
                return Outcome::Err(DirectoryError::new(
                    DirectoryErrorKind::Other,
                    "move_entry() called without a Move payload",
                ))
            }
        };
        let source_partition = match self.require_partition(&ctx.target) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        let destination_partition = match self.require_partition(new_superior) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(e),
        };
        if !Arc::ptr_eq(source_partition, destination_partition) {
            return Outcome::Err(DirectoryError::new(
                DirectoryErrorKind::AffectsMultipleDsas,
                "move across partitions is not supported",
            ));
        }
        match source_partition.r#move(&ctx.target, new_superior) {
            Ok(moved_dn) => {
                if let OperationPayload::MoveAndRename { new_rdn, delete_old_rdn, .. } = &ctx.payload {
                    match source_partition.rename(&moved_dn, new_rdn, *delete_old_rdn) {
                        Ok(final_dn) => {
                            self.reconcile_after_relocation(source_partition, &ctx.target, &final_dn);
                            Outcome::Ok(final_dn)
                        }
                        Err(e) => Outcome::Err(e),
                    }
                } else {
                    self.reconcile_after_relocation(source_partition, &ctx.target, &moved_dn);
                    Outcome::Ok(moved_dn)
                }
            }
            Err(e) => Outcome::Err(e),
        }
    }

    fn bind(&self, ctx: &OperationContext) -> Outcome<()> {
        if ctx.session.bound_dn.is_root_dse() {
            return Outcome::Ok(());
        }
        match self.require_partition(&ctx.session.bound_dn).and_then(|p| p.has_entry(&ctx.session.bound_dn)) {
            Ok(true) => Outcome::Ok(()),
            Ok(false) => Outcome::Err(DirectoryError::no_such_object(&ctx.session.bound_dn)),
            Err(e) => Outcome::Err(e),
        }
    }

    fn compare(&self, ctx: &OperationContext) -> Outcome<bool> {
        let (attribute_type, value) = match &ctx.payload {
            OperationPayload::Compare { attribute_type, value } => (attribute_type, value),
            _ => {
                return Outcome::Err(DirectoryError::new(
                    DirectoryErrorKind::Other,
                    "compare() called without a Compare payload",
                ))
            }
        };
        let filter = Filter::Equality {
            attribute_type: attribute_type.clone(),
            value: value.clone(),
        };
        let lookup_ctx = OperationContext::new(
            ctx.session.clone(),
            ctx.target.clone(),
            OperationPayload::Lookup { attributes: None },
        )
        .with_manage_dsa_it(ctx.manage_dsa_it);
        match self.lookup(&lookup_ctx) {
            Outcome::Ok(entry) => Outcome::Ok(filter.matches(self.schema.as_ref(), &entry)),
            Outcome::Referral(urls) => Outcome::Referral(urls),
            Outcome::Err(e) => Outcome::Err(e),
        }
    }

    fn has_entry(&self, ctx: &OperationContext) -> Outcome<bool> {
        if ctx.target.is_root_dse() {
            return Outcome::Ok(true);
        }
        match self.require_partition(&ctx.target) {
            Ok(p) => match p.has_entry(&ctx.target) {
                Ok(v) => Outcome::Ok(v),
                Err(e) => Outcome::Err(e),
            },
            Err(_) => Outcome::Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;
    use crate::entry::OBJECT_CLASS;
    use crate::interceptor::OperationResult;
    use crate::partition::MemoryPartition;
    use crate::schema::CaseFoldSchema;

    fn nexus() -> PartitionNexus {
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        let mut root = Entry::new(suffix);
        root.set(OBJECT_CLASS, vec!["top".into(), "domain".into()]);
        partition.add(root).unwrap();
        PartitionNexus::new(
            vec![partition],
            Arc::new(ReferralManager::new()),
            Arc::new(CaseFoldSchema),
        )
    }

    fn ctx(target: &str, payload: OperationPayload) -> OperationContext {
        OperationContext::new(Session::anonymous(), Dn::parse(target).unwrap(), payload)
    }

    #[test]
    fn root_dse_lookup_lists_naming_contexts() {
        let nexus = nexus();
        let outcome = nexus.lookup(&ctx("", OperationPayload::Lookup { attributes: None }));
        match outcome {
            Outcome::Ok(entry) => {
                assert_eq!(entry.get(NAMING_CONTEXTS).unwrap().values(), &["dc=example".to_string()]);
            }
            _ => panic!("expected root DSE"),
        }
    }

    #[test]
    fn add_then_lookup_through_the_owning_partition() {
        let nexus = nexus();
        let mut entry = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        let add_outcome = nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry }));
        assert!(add_outcome.is_ok());
        let outcome = nexus.lookup(&ctx("ou=people,dc=example", OperationPayload::Lookup { attributes: None }));
        assert!(outcome.is_ok());
    }

    #[test]
    fn add_under_unknown_suffix_is_no_such_object() {
        let nexus = nexus();
        let mut entry = Entry::new(Dn::parse("dc=other").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        let outcome = nexus.add(&ctx("dc=other", OperationPayload::Add { entry }));
        match outcome {
            Outcome::Err(e) => assert_eq!(e.kind, DirectoryErrorKind::NoSuchObject),
            _ => panic!("expected no-such-object"),
        }
    }

    /// The referral manager registers the object when it is added directly
    /// through the nexus (as production code does via the chain's `add`
    /// dispatch); the short-circuit itself is the
    /// [`crate::referral::ReferralInterceptor`]'s job, exercised here by
    /// wrapping the nexus in a one-stage chain the way the default assembly
    /// would.
    fn chain_with_referral(referrals: Arc<ReferralManager>, nexus: PartitionNexus) -> crate::interceptor::InterceptorChain {
        crate::interceptor::InterceptorChain::new(
            vec![Arc::new(crate::referral::ReferralInterceptor::new(
                referrals,
                Arc::new(CaseFoldSchema),
            ))],
            Arc::new(nexus),
        )
    }

    #[test]
    fn adding_a_referral_entry_redirects_subordinate_lookups() {
        let referrals = Arc::new(ReferralManager::new());
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix)).unwrap();
        let nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry: referral }));

        let chain = chain_with_referral(referrals, nexus);
        let outcome = chain.execute(&ctx(
            "cn=joe,ou=people,dc=example",
            OperationPayload::Lookup { attributes: None },
        ));
        match outcome {
            Outcome::Referral(urls) => {
                assert_eq!(urls[0].0, "ldap://remote.example/cn=joe,ou=staff");
            }
            _ => panic!("expected a referral"),
        }
    }

    #[test]
    fn referral_lookup_matches_a_differently_cased_and_spaced_target_dn() {
        let referrals = Arc::new(ReferralManager::new());
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix)).unwrap();
        let nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry: referral }));

        let chain = chain_with_referral(referrals, nexus);
        let outcome = chain.execute(&ctx(
            "CN=Joe, OU=People,DC=Example",
            OperationPayload::Lookup { attributes: None },
        ));
        match outcome {
            Outcome::Referral(urls) => {
                assert_eq!(urls[0].0, "ldap://remote.example/cn=joe,ou=staff");
            }
            _ => panic!("expected a referral despite the un-normalized request DN"),
        }
    }

    #[test]
    fn registering_a_prepopulated_partition_installs_its_referrals() {
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix.clone())).unwrap();
        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        partition.add(referral).unwrap();

        let referrals = Arc::new(ReferralManager::new());
        let _nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        assert!(referrals.is_referral(&Dn::parse("ou=people,dc=example").unwrap()));
    }

    #[test]
    fn adding_a_referral_with_no_valid_ref_url_is_rejected_before_commit() {
        let nexus = nexus();
        let mut referral = Entry::new(Dn::parse("ou=broken,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["not a url".into()]);
        let outcome = nexus.add(&ctx("ou=broken,dc=example", OperationPayload::Add { entry: referral }));
        match outcome {
            Outcome::Err(e) => assert_eq!(e.kind, DirectoryErrorKind::UnwillingToPerform),
            _ => panic!("expected unwilling-to-perform"),
        }
        // rejected before it ever reached the partition
        let lookup = nexus.lookup(&ctx("ou=broken,dc=example", OperationPayload::Lookup { attributes: None }));
        match lookup {
            Outcome::Err(e) => assert_eq!(e.kind, DirectoryErrorKind::NoSuchObject),
            _ => panic!("expected the rejected entry to never have been committed"),
        }
    }

    #[test]
    fn lookup_projects_to_the_requested_attributes() {
        let nexus = nexus();
        let mut entry = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        entry.set(OBJECT_CLASS, vec!["top".into()]);
        entry.set("description", vec!["staff".into()]);
        nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry }));

        let outcome = nexus.lookup(&ctx(
            "ou=people,dc=example",
            OperationPayload::Lookup {
                attributes: Some(vec!["description".to_string()]),
            },
        ));
        match outcome {
            Outcome::Ok(entry) => {
                assert!(entry.get("description").is_some());
                assert!(entry.get(OBJECT_CLASS).is_some());
            }
            _ => panic!("expected the projected entry"),
        }
    }

    #[test]
    fn rename_moves_the_referral_registration_to_the_new_dn() {
        let referrals = Arc::new(ReferralManager::new());
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix)).unwrap();
        let nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        assert!(nexus
            .add(&ctx("ou=people,dc=example", OperationPayload::Add { entry: referral }))
            .is_ok());
        assert!(referrals.is_referral(&Dn::parse("ou=people,dc=example").unwrap()));

        let rename_ctx = ctx(
            "ou=people,dc=example",
            OperationPayload::Rename {
                new_rdn: "ou=staff".to_string(),
                delete_old_rdn: true,
            },
        );
        assert!(nexus.rename(&rename_ctx).is_ok());

        assert!(!referrals.is_referral(&Dn::parse("ou=people,dc=example").unwrap()));
        assert!(referrals.is_referral(&Dn::parse("ou=staff,dc=example").unwrap()));
    }

    #[test]
    fn manage_dsa_it_reads_the_referral_entry_itself() {
        let referrals = Arc::new(ReferralManager::new());
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix)).unwrap();
        let nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry: referral }));

        let chain = chain_with_referral(referrals, nexus);
        let lookup_ctx = ctx("ou=people,dc=example", OperationPayload::Lookup { attributes: None })
            .with_manage_dsa_it(true);
        let outcome = chain.execute(&lookup_ctx);
        match outcome {
            Outcome::Ok(OperationResult::Entry(entry)) => assert!(entry.is_referral()),
            _ => panic!("expected the referral entry itself under ManageDsaIT"),
        }
    }

    #[test]
    fn subtree_search_emits_a_continuation_reference_for_a_descendant_referral() {
        let referrals = Arc::new(ReferralManager::new());
        let suffix = Dn::parse("dc=example").unwrap();
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        partition.add(Entry::new(suffix)).unwrap();
        let nexus = PartitionNexus::new(vec![partition], referrals.clone(), Arc::new(CaseFoldSchema));

        let mut referral = Entry::new(Dn::parse("ou=people,dc=example").unwrap());
        referral.set(OBJECT_CLASS, vec!["top".into(), "referral".into()]);
        referral.set("ref", vec!["ldap://remote.example/ou=staff".into()]);
        nexus.add(&ctx("ou=people,dc=example", OperationPayload::Add { entry: referral }));

        let search_ctx = ctx(
            "dc=example",
            OperationPayload::Search {
                scope: Scope::Subtree,
                filter: Filter::Present(OBJECT_CLASS.into()),
                attributes: None,
            },
        );
        match nexus.search(&search_ctx) {
            Outcome::Ok(outcome) => {
                assert!(outcome.entries.iter().all(|e| !e.dn().eq_normalized(&Dn::parse("ou=people,dc=example").unwrap())));
                assert_eq!(outcome.continuations.len(), 1);
                assert_eq!(outcome.continuations[0][0].0, "ldap://remote.example/ou=staff");
            }
            other => panic!("expected a search outcome carrying one continuation reference, got {other:?}"),
        }
    }
}
