//! Explicit session context.
//!
//! Who is signed in lives in a [`SessionContext`] owned by the application and
//! passed to whatever needs it. Nothing reads identity from ambient storage.

use crate::core::retry::{RetryPolicy, retry};
use crate::errors::{Error, Result};
use crate::gateway::AuthProvider;
use reqwest::Url;
use tracing::{info, instrument, warn};

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Stable account id issued by the auth provider
    pub account_id: String,
    /// Email from the auth provider
    pub email: String,
    /// Bearer token for gateway calls
    pub access_token: String,
}

/// Holds the current session, if any.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: Option<Session>,
}

impl SessionContext {
    /// Signed-out context.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Replaces the current session.
    pub fn sign_in(&mut self, session: Session) {
        info!("Signed in as {}", session.account_id);
        self.current = Some(session);
    }

    /// Clears the session and returns what was there.
    pub fn sign_out(&mut self) -> Option<Session> {
        let previous = self.current.take();
        if let Some(session) = &previous {
            info!("Signed out {}", session.account_id);
        }
        previous
    }

    /// The current session, if signed in.
    #[must_use]
    pub const fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// The current session, or `NotAuthenticated`.
    pub fn require(&self) -> Result<&Session> {
        self.current.as_ref().ok_or(Error::NotAuthenticated)
    }
}

/// Pulls `access_token` out of an OAuth callback URL.
///
/// Providers put it in the fragment (`#access_token=...`); some use the query.
fn access_token_from_callback(callback_url: &str) -> Option<String> {
    let url = Url::parse(callback_url).ok()?;
    let find_token = |url: &Url| {
        url.query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    };

    let from_fragment = url.fragment().and_then(|fragment| {
        let mut as_query = url.clone();
        as_query.set_query(Some(fragment));
        find_token(&as_query)
    });
    from_fragment.or_else(|| find_token(&url))
}

/// Finishes an OAuth sign-in.
///
/// Reads the access token from `callback_url`, then asks the auth provider for
/// the matching session. The provider may not have it ready immediately after
/// the redirect, so an empty answer is retried under `policy` like any other
/// transient failure. On success the session is signed in to `ctx`.
///
/// # Errors
/// `NotAuthenticated` if the URL carries no token or no session appears
/// within the retry budget.
#[instrument(skip_all)]
pub async fn complete_oauth_callback(
    ctx: &mut SessionContext,
    auth: &dyn AuthProvider,
    callback_url: &str,
    policy: &RetryPolicy,
) -> Result<Session> {
    let token = access_token_from_callback(callback_url).ok_or(Error::NotAuthenticated)?;

    let lookup = retry(policy, "session lookup", || {
        let token = token.as_str();
        async move {
            auth.get_session(token).await?.ok_or_else(|| Error::Transient {
                message: "session not available yet".to_string(),
            })
        }
    })
    .await;

    match lookup {
        Ok(session) => {
            ctx.sign_in(session.clone());
            Ok(session)
        }
        Err(e) => {
            warn!("OAuth callback did not produce a session: {e}");
            Err(Error::NotAuthenticated)
        }
    }
}
