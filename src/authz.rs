//! Access decisions for HTTP Basic credentials.
//!
//! The policy itself lives elsewhere: a [`PolicyEnforcer`] answers whether a
//! subject may perform a method on a path. This module combines its answers
//! for the caller's identity and for [`ANONYMOUS_SUBJECT`] with the result of
//! checking the credentials against the store.

use crate::store::CredentialStore;
use tracing::debug;

/// Subject used to ask the policy about unauthenticated access.
pub const ANONYMOUS_SUBJECT: &str = "nobody";

/// "May `subject` perform `method` on `path`?"
pub trait PolicyEnforcer: Send + Sync {
    fn enforce(&self, subject: &str, path: &str, method: &str) -> bool;
}

impl<F> PolicyEnforcer for F
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    fn enforce(&self, subject: &str, path: &str, method: &str) -> bool {
        self(subject, path, method)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// The caller should retry with (valid) credentials.
    Authenticate,
    Deny,
}

impl Decision {
    /// HTTP status code for the decision.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Allow => 200,
            Self::Authenticate => 401,
            Self::Deny => 403,
        }
    }
}

/// Value of the `WWW-Authenticate` header sent with [`Decision::Authenticate`].
#[must_use]
pub fn challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm.replace('"', "\\\""))
}

/// Decide whether a request may proceed.
///
/// Supplied credentials are always checked, even where anonymous access
/// would be enough, so bad credentials never fall back to anonymous. Whether
/// the user is unknown or the password is wrong is not distinguished.
pub async fn check_permission<E>(
    store: &CredentialStore,
    enforcer: &E,
    credentials: Option<(&str, &str)>,
    path: &str,
    method: &str,
) -> Decision
where
    E: PolicyEnforcer + ?Sized,
{
    let anonymous = enforcer.enforce(ANONYMOUS_SUBJECT, path, method);

    let Some((username, password)) = credentials else {
        return if anonymous {
            Decision::Allow
        } else {
            Decision::Authenticate
        };
    };

    if !anonymous && !enforcer.enforce(username, path, method) {
        return Decision::Deny;
    }

    match store.authenticate(username, password).await {
        Ok(()) => Decision::Allow,
        Err(err) => {
            debug!(username, path, method, "credentials rejected: {err}");
            Decision::Authenticate
        }
    }
}
