//! `directory-core`: the embeddable facade that assembles the default
//! interceptor chain (`referral -> schema -> authorization -> operational ->
//! changelog -> nexus`) and exposes it as one `DirectoryService`.
//!
//! Wire-protocol and network concerns are out of scope here, same as in
//! `directory-engine` — a caller builds an `OperationContext`, hands it to
//! `DirectoryService::execute`, and interprets the `Outcome`. Everything this
//! crate adds on top of the engine is assembly: wiring collaborators
//! together, picking sane defaults, and initializing logging once at
//! startup.

use directory_engine::authorization::{AccessController, AllowAllAccessController, AuthorizationInterceptor};
use directory_engine::changelog::{ChangeLog, ChangeLogInterceptor};
use directory_engine::context::{BypassSet, OperationContext, OperationPayload, Session};
use directory_engine::dn::Dn;
use directory_engine::entry::{Entry, OBJECT_CLASS};
use directory_engine::error::{DirResult, DirectoryError, Outcome};
use directory_engine::interceptor::{Interceptor, InterceptorChain, OperationResult};
use directory_engine::nexus::PartitionNexus;
use directory_engine::operational::{Clock, CounterIdGenerator, IdGenerator, OperationalAttributesInterceptor, SystemClock};
use directory_engine::partition::{MemoryPartition, Partition};
use directory_engine::referral::{ReferralInterceptor, ReferralManager};
use directory_engine::schema::{CaseFoldSchema, SchemaInterceptor, SchemaManager};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// One already-parsed operation submitted to [`DirectoryService::apply_batch`],
/// carrying a label used only to annotate a failure with which operation in
/// the batch it came from.
pub struct BatchOperation {
    pub label: String,
    pub session: Session,
    pub target: Dn,
    pub payload: OperationPayload,
}

impl BatchOperation {
    pub fn new(label: impl Into<String>, session: Session, target: Dn, payload: OperationPayload) -> Self {
        Self {
            label: label.into(),
            session,
            target,
            payload,
        }
    }
}

/// Builds a [`DirectoryService`] from its collaborators, one call per stage's
/// dependency, defaulting every collaborator an embedder hasn't opted to
/// replace. `new()` also performs the process's one-time logging setup,
/// mirroring how this crate's sibling SDK wires `tracing` before handing
/// control to the caller.
pub struct DirectoryServiceBuilder {
    partitions: Vec<Arc<dyn Partition>>,
    schema: Arc<dyn SchemaManager>,
    access_controller: Arc<dyn AccessController>,
    referrals: Arc<ReferralManager>,
    ids: Box<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    changelog: Arc<ChangeLog>,
}

impl Default for DirectoryServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryServiceBuilder {
    pub fn new() -> Self {
        tracing_log::LogTracer::init().ok();
        let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new(env))
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        log_panics::init();

        Self {
            partitions: Vec::new(),
            schema: Arc::new(CaseFoldSchema),
            access_controller: Arc::new(AllowAllAccessController),
            referrals: Arc::new(ReferralManager::new()),
            ids: Box::<CounterIdGenerator>::default(),
            clock: Box::<SystemClock>::default(),
            changelog: Arc::new(ChangeLog::new()),
        }
    }

    pub fn with_partition(mut self, partition: Arc<dyn Partition>) -> Self {
        self.partitions.push(partition);
        self
    }

    /// Registers a naming context backed by the engine's in-memory partition,
    /// seeding it with its own suffix entry so the nexus can route into it
    /// immediately after `build()`.
    pub fn with_memory_naming_context(self, suffix: Dn) -> DirResult<Self> {
        let partition = Arc::new(MemoryPartition::new(suffix.clone()));
        let mut root = Entry::new(suffix);
        root.set(OBJECT_CLASS, vec!["top".into(), "domain".into()]);
        partition.add(root)?;
        Ok(self.with_partition(partition))
    }

    pub fn with_schema(mut self, schema: Arc<dyn SchemaManager>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_access_controller(mut self, access_controller: Arc<dyn AccessController>) -> Self {
        self.access_controller = access_controller;
        self
    }

    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The referral manager this builder will wire into the chain, exposed so
    /// an embedder can register referral objects before the first request
    /// ever reaches the assembled service.
    pub fn referrals(&self) -> Arc<ReferralManager> {
        self.referrals.clone()
    }

    pub fn build(self) -> DirectoryService {
        let nexus = Arc::new(PartitionNexus::new(
            self.partitions,
            self.referrals.clone(),
            self.schema.clone(),
        ));
        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(ReferralInterceptor::new(self.referrals, self.schema.clone())),
            Arc::new(SchemaInterceptor::new(self.schema.clone())),
            Arc::new(AuthorizationInterceptor::new(self.access_controller)),
            Arc::new(OperationalAttributesInterceptor::new(self.ids, self.clock)),
            Arc::new(ChangeLogInterceptor::new(self.changelog.clone(), self.schema)),
        ];
        DirectoryService {
            chain: InterceptorChain::new(stages, nexus),
            changelog: self.changelog,
        }
    }
}

/// The assembled, request-ready pipeline plus the change-log it feeds. Build
/// one with [`DirectoryServiceBuilder`] and share it across every request —
/// it holds no per-request state of its own.
pub struct DirectoryService {
    chain: InterceptorChain,
    changelog: Arc<ChangeLog>,
}

impl DirectoryService {
    pub fn builder() -> DirectoryServiceBuilder {
        DirectoryServiceBuilder::new()
    }

    pub fn changelog(&self) -> &Arc<ChangeLog> {
        &self.changelog
    }

    /// Tags the current revision, for a caller that wants to undo everything
    /// from this point forward with a later [`DirectoryService::revert`].
    pub fn tag(&self) -> u64 {
        self.changelog.tag()
    }

    /// Reverts every mutation recorded since `to_revision`, newest first, by
    /// replaying reverse-ops back through the chain with every stage but
    /// schema bypassed.
    pub fn revert(&self, to_revision: u64) -> DirResult<()> {
        self.changelog.revert(&self.chain, to_revision)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.stage_names()
    }

    /// Drives one already-built operation context through the full chain.
    /// Every other method on this type is a thin convenience wrapper around
    /// this one.
    pub fn execute(&self, ctx: &OperationContext) -> Outcome<OperationResult> {
        self.chain.execute(ctx)
    }

    pub fn bind(&self, session: Session) -> Outcome<()> {
        let target = session.bound_dn.clone();
        self.chain
            .execute(&OperationContext::new(session, target, OperationPayload::Bind))
            .map(|_| ())
    }

    pub fn lookup(&self, session: &Session, target: Dn) -> Outcome<Entry> {
        match self.chain.execute(&OperationContext::new(
            session.clone(),
            target,
            OperationPayload::Lookup { attributes: None },
        )) {
            Outcome::Ok(OperationResult::Entry(entry)) => Outcome::Ok(entry),
            Outcome::Referral(urls) => Outcome::Referral(urls),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Ok(_) => unreachable!("lookup always resolves to OperationResult::Entry"),
        }
    }

    /// Applies a batch of already-parsed operations programmatically,
    /// bypassing every stage but `schema` — this is the administrative
    /// bulk-load path (test fixtures, an LDIF-adjacent loader upstream of
    /// this crate), not client-facing traffic, so referral redirection,
    /// access control, operational stamping, and change-logging are all
    /// skipped. Stops at the first failure, annotating it with the failing
    /// operation's label.
    pub fn apply_batch(&self, operations: Vec<BatchOperation>) -> DirResult<()> {
        let bypass = BypassSet::names(["referral", "authorization", "operational", "changelog"]);
        for op in operations {
            let BatchOperation {
                label,
                session,
                target,
                payload,
            } = op;
            let ctx = OperationContext::new(session, target, payload).with_bypass(bypass.clone());
            self.chain
                .execute(&ctx)
                .into_result()
                .map_err(|e| DirectoryError::new(e.kind, format!("{label}: {}", e.message)))?;
        }
        Ok(())
    }
}
