//! The closed error taxonomy raised by the interceptor chain, and the
//! `Outcome` type that keeps "real error" distinct from "referral redirect".

use std::fmt;

/// The kind of failure a stage raised. Mirrors the taxonomy in the design
/// notes: a closed set, not a generic string bag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DirectoryErrorKind {
    #[error("no such object")]
    NoSuchObject,
    #[error("entry already exists")]
    EntryAlreadyExists,
    #[error("invalid attribute syntax")]
    InvalidAttributeSyntax,
    #[error("naming violation")]
    NamingViolation,
    #[error("insufficient access rights")]
    InsufficientAccessRights,
    #[error("unwilling to perform")]
    UnwillingToPerform,
    #[error("operation affects multiple DSAs")]
    AffectsMultipleDsas,
    #[error("mutation could not be reverted")]
    Unrevertable,
    #[error("invalid cursor position")]
    InvalidCursorPosition,
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("cursor closed")]
    Closed,
    #[error("other")]
    Other,
}

/// An error raised by a pipeline stage. Carries a kind (§7's taxonomy) and a
/// human-readable message; never widened to `Other` by an intermediate stage.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DirectoryError {
    pub kind: DirectoryErrorKind,
    pub message: String,
}

impl DirectoryError {
    pub fn new(kind: DirectoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_such_object(target: impl fmt::Display) -> Self {
        Self::new(
            DirectoryErrorKind::NoSuchObject,
            format!("no such object: {target}"),
        )
    }

    pub fn entry_already_exists(target: impl fmt::Display) -> Self {
        Self::new(
            DirectoryErrorKind::EntryAlreadyExists,
            format!("entry already exists: {target}"),
        )
    }
}

/// A single LDAP URL carried by a `referral` result, already rewritten into
/// the requester's DN namespace per §4.3.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferralUrl(pub String);

impl fmt::Display for ReferralUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The result of any operation that can additionally be redirected by a
/// referral. Keeping this as a third arm (rather than encoding referrals as
/// errors, as the source does) removes the ambiguity between failures and
/// protocol-defined redirections.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Referral(Vec<ReferralUrl>),
    Err(DirectoryError),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Referral(urls) => Outcome::Referral(urls),
            Outcome::Err(e) => Outcome::Err(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// Collapses the referral/error arms into a single `Result`, for callers
    /// that don't distinguish them (e.g. ManageDsaIT-aware test assertions).
    pub fn into_result(self) -> Result<T, DirectoryError> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Referral(urls) => Err(DirectoryError::new(
                DirectoryErrorKind::Other,
                format!(
                    "referral: {}",
                    urls.iter()
                        .map(|u| u.0.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
            Outcome::Err(e) => Err(e),
        }
    }
}

/// Plain result type for stages and components that never produce a referral
/// (schema normalization, cursor navigation, change-log revert, ...).
pub type DirResult<T> = Result<T, DirectoryError>;
