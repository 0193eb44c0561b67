//! The referral manager: tracks which entries are referral objects (RFC
//! 3296) and, for operations that cross one, builds the rewritten
//! continuation references the chain returns instead of descending further.

use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirResult, DirectoryError, DirectoryErrorKind, ReferralUrl};
use crate::interceptor::unwilling;
use parking_lot::RwLock;

/// Holds the registered referral DNs and their `ref` URLs. Lookup is a
/// linear scan for the closest same-or-ancestor match; the namespace of
/// referral objects in a typical deployment is small enough that this beats
/// maintaining a second ordered index in lock-step with partition data.
pub struct ReferralManager {
    referrals: RwLock<Vec<(Dn, Vec<ReferralUrl>)>>,
}

impl Default for ReferralManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferralManager {
    pub fn new() -> Self {
        Self {
            referrals: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, dn: Dn, urls: Vec<ReferralUrl>) {
        let mut guard = self.referrals.write();
        guard.retain(|(existing, _)| !existing.eq_normalized(&dn));
        guard.push((dn, urls));
    }

    pub fn unregister(&self, dn: &Dn) -> bool {
        let mut guard = self.referrals.write();
        let before = guard.len();
        guard.retain(|(existing, _)| !existing.eq_normalized(dn));
        guard.len() != before
    }

    /// Checks `entry` would be acceptable to [`ReferralManager::reconcile`]
    /// without touching the registry — the pre-commit half of §4.3's "reject
    /// before ever touching the partition" requirement, so a caller can
    /// refuse an invalid referral declaration before the underlying mutation
    /// is applied.
    pub fn precheck(entry: &Entry) -> DirResult<()> {
        validated_referral_urls(entry).map(|_| ())
    }

    /// Reconciles the registry with `entry`'s current referral-ness, per
    /// §4.3's mutation table: a non-referral entry is (no-op or) removed from
    /// the registry; a referral entry with at least one valid `ref` URL is
    /// (re-)registered. Fails with `unwilling-to-perform` only when `entry`
    /// declares itself a referral (`objectClass: referral`) but none of its
    /// `ref` values survive validation — a referral with zero valid URLs is
    /// invalid data, not a registry-bookkeeping question. Callers that must
    /// not commit an invalid referral should call
    /// [`ReferralManager::precheck`] before the mutation and `reconcile`
    /// after it commits.
    pub fn reconcile(&self, entry: &Entry) -> DirResult<()> {
        match validated_referral_urls(entry)? {
            Some(valid) => self.register(entry.dn().clone(), valid),
            None => {
                self.unregister(entry.dn());
            }
        }
        Ok(())
    }

    pub fn is_referral(&self, dn: &Dn) -> bool {
        self.referrals.read().iter().any(|(d, _)| d.eq_normalized(dn))
    }

    /// The closest registered referral that is `target` itself or a proper
    /// ancestor of it, if any.
    fn nearest_ancestor(&self, target: &Dn) -> Option<(Dn, Vec<ReferralUrl>)> {
        self.referrals
            .read()
            .iter()
            .filter(|(dn, _)| dn.is_same_or_ancestor_of(target))
            .max_by_key(|(dn, _)| dn.len())
            .cloned()
    }

    /// Returns the continuation references an operation against `target`
    /// should follow, or `None` if it should proceed locally. A
    /// `manage_dsa_it` request never triggers a referral — the client asked
    /// to see referral objects as plain entries along the whole path.
    pub fn continuation_for(&self, target: &Dn, manage_dsa_it: bool) -> DirResult<Option<Vec<ReferralUrl>>> {
        if manage_dsa_it {
            return Ok(None);
        }
        let Some((referral_dn, urls)) = self.nearest_ancestor(target) else {
            return Ok(None);
        };
        let relative = target
            .strip_suffix(&referral_dn)
            .unwrap_or_else(Dn::root_dse);
        let rewritten = urls
            .iter()
            .map(|u| rewrite_referral_url(u, &relative))
            .collect::<DirResult<Vec<_>>>()?;
        Ok(Some(rewritten))
    }
}

/// Prepends `relative`'s RDNs onto the DN carried in an LDAP URL's path,
/// producing the continuation reference RFC 3296 describes. A URL whose
/// path is empty is treated as carrying the root DSE.
fn rewrite_referral_url(referral_url: &ReferralUrl, relative: &Dn) -> DirResult<ReferralUrl> {
    let mut parsed = url::Url::parse(&referral_url.0).map_err(|e| {
        DirectoryError::new(
            DirectoryErrorKind::Other,
            format!("malformed referral URL {}: {e}", referral_url.0),
        )
    })?;
    let path_dn_text = parsed.path().trim_start_matches('/');
    let base_dn = if path_dn_text.is_empty() {
        Dn::root_dse()
    } else {
        Dn::parse(&percent_decode(path_dn_text))?
    };
    let new_dn = relative.prepend_to(&base_dn);
    parsed.set_path(&format!("/{}", new_dn.to_user_string()));
    Ok(ReferralUrl(parsed.to_string()))
}

/// Parses and validates one `ref` value against §3's invariants: a
/// non-empty DN, and no scope/filter/attribute-list/extensions component
/// (an LDAP URL packs these after the DN as `?attrs?scope?filter?ext`, so a
/// generic URI parser sees them folded into one `query()` string — split on
/// `?` to recover the individual components). Returns the reason a URL was
/// rejected, for the caller to log.
fn validate_referral_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| e.to_string())?;
    if parsed.scheme() != "ldap" && parsed.scheme() != "ldaps" {
        return Err(format!("unsupported scheme: {}", parsed.scheme()));
    }
    let dn_text = percent_decode(parsed.path().trim_start_matches('/'));
    if dn_text.is_empty() {
        return Err("referral URL must carry a non-empty DN".to_string());
    }
    Dn::parse(&dn_text).map_err(|e| e.message)?;
    if let Some(query) = parsed.query() {
        for (index, component) in query.split('?').enumerate() {
            if component.is_empty() {
                continue;
            }
            match index {
                0 => return Err("referral URL must not carry an attribute list".to_string()),
                1 if component.eq_ignore_ascii_case("base") => {}
                1 => return Err(format!("referral URL scope must be base, got {component}")),
                2 => return Err("referral URL must not carry a filter".to_string()),
                3 => return Err("referral URL must not carry extensions".to_string()),
                _ => return Err("referral URL has more components than RFC 3296 allows".to_string()),
            }
        }
    }
    Ok(())
}

/// `None` when `entry` isn't a referral; `Some(valid urls)` when it is and at
/// least one `ref` value validates; an `unwilling-to-perform` error when it
/// declares itself a referral but every `ref` value is invalid.
fn validated_referral_urls(entry: &Entry) -> DirResult<Option<Vec<ReferralUrl>>> {
    if !entry.is_referral() {
        return Ok(None);
    }
    let valid = valid_referral_urls(entry.ref_values());
    if valid.is_empty() {
        return Err(unwilling(format!(
            "referral entry {} has no valid ref URL",
            entry.dn()
        )));
    }
    Ok(Some(valid))
}

/// Filters a referral entry's raw `ref` values down to the ones that parse
/// and validate; unparseable or invalid values are logged and dropped, never
/// propagated as an error on their own (only the all-invalid case is, via
/// [`ReferralManager::reconcile`]).
fn valid_referral_urls(raw_values: Vec<&str>) -> Vec<ReferralUrl> {
    raw_values
        .into_iter()
        .filter_map(|raw| match validate_referral_url(raw) {
            Ok(()) => Some(ReferralUrl(raw.to_string())),
            Err(reason) => {
                tracing::warn!("skipping invalid referral URL {}: {}", raw, reason);
                None
            }
        })
        .collect()
}

fn percent_decode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next();
            let lo = bytes.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{}{}", hi as char, lo as char), 16) {
                    out.push(byte as char);
                    continue;
                }
            }
        } else {
            out.push(b as char);
        }
    }
    out
}

/// The chain stage that places the manager ahead of schema/authorization/
/// operational processing: a request whose target lies behind a referral
/// (and that hasn't set `ManageDsaIT`) never reaches the stages behind it.
pub struct ReferralInterceptor {
    manager: std::sync::Arc<ReferralManager>,
    schema: std::sync::Arc<dyn crate::schema::SchemaManager>,
}

impl ReferralInterceptor {
    pub const NAME: &'static str = "referral";

    pub fn new(manager: std::sync::Arc<ReferralManager>, schema: std::sync::Arc<dyn crate::schema::SchemaManager>) -> Self {
        Self { manager, schema }
    }

    fn short_circuit<T>(&self, ctx: &crate::context::OperationContext) -> Option<crate::error::Outcome<T>> {
        // This stage runs ahead of `schema` in the default assembly, so
        // `ctx.target` hasn't been normalized yet; the registry holds
        // normalized DNs (entries are normalized at `reconcile` time), so an
        // ancestor/exact match here has to normalize first or a differently
        // cased/spaced request silently bypasses the referral entirely.
        let target = ctx.target.normalize(self.schema.as_ref());
        match self.manager.continuation_for(&target, ctx.manage_dsa_it) {
            Ok(Some(urls)) => {
                tracing::debug!("{} redirected by a referral to {} URL(s)", target, urls.len());
                Some(crate::error::Outcome::Referral(urls))
            }
            Ok(None) => {
                tracing::debug!("{} has no governing referral, proceeding locally", target);
                None
            }
            Err(e) => Some(crate::error::Outcome::Err(e)),
        }
    }
}

macro_rules! guarded {
    ($self:ident, $ctx:ident, $next:ident, $method:ident) => {
        match $self.short_circuit($ctx) {
            Some(outcome) => outcome,
            None => $next.$method($ctx),
        }
    };
}

impl crate::interceptor::Interceptor for ReferralInterceptor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn add(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        guarded!(self, ctx, next, add)
    }
    fn delete(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        guarded!(self, ctx, next, delete)
    }
    fn modify(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<()> {
        guarded!(self, ctx, next, modify)
    }
    fn lookup(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<Entry> {
        guarded!(self, ctx, next, lookup)
    }
    fn search(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<crate::interceptor::SearchOutcome> {
        guarded!(self, ctx, next, search)
    }
    fn rename(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<Dn> {
        guarded!(self, ctx, next, rename)
    }
    fn move_entry(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<Dn> {
        guarded!(self, ctx, next, move_entry)
    }
    fn compare(&self, ctx: &crate::context::OperationContext, next: &crate::interceptor::Invocation<'_>) -> crate::error::Outcome<bool> {
        guarded!(self, ctx, next, compare)
    }
}
