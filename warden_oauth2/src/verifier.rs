//! Resource-server token verification

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use warden_clock::{Clock, UnixTime};

use crate::{
    AccessTokenRef, ClientId, ClientRegistrationError, ClientRegistry, OAuth2AccessToken,
    OAuth2Authentication, TokenStore, TokenStoreError,
};

/// The maximum clock skew tolerated by default
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// A presented access token was not accepted
#[derive(Debug, Error)]
pub enum InvalidTokenError {
    /// The store does not know the token
    #[error("invalid access token")]
    NotFound,
    /// The token expired, even allowing for clock skew
    #[error("access token expired")]
    Expired,
    /// The token was found, but its authentication disappeared before it
    /// could be read
    #[error("invalid access token (race condition)")]
    RaceLost,
    /// The client the token was issued to is no longer valid
    #[error("client not valid: {client_id}")]
    ClientInvalid {
        /// The token's client ID
        client_id: ClientId,
        /// Why the registry rejected the client
        #[source]
        source: ClientRegistrationError,
    },
    /// The token could not be read
    #[error("invalid access token")]
    Unreadable(#[source] TokenStoreError),
}

/// Resolves a bearer token value to the authentication it stands for
#[async_trait]
pub trait AuthenticationLoader: Send + Sync {
    /// Loads the authentication for `value`
    async fn load_authentication(
        &self,
        value: &AccessTokenRef,
    ) -> Result<OAuth2Authentication, InvalidTokenError>;
}

#[async_trait]
impl<L: AuthenticationLoader + ?Sized> AuthenticationLoader for Arc<L> {
    async fn load_authentication(
        &self,
        value: &AccessTokenRef,
    ) -> Result<OAuth2Authentication, InvalidTokenError> {
        (**self).load_authentication(value).await
    }
}

/// Deployable verifier settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    /// Tolerance for clock differences between issuer and verifier,
    /// in milliseconds
    pub max_clock_skew_ms: u64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            max_clock_skew_ms: 60_000,
        }
    }
}

/// Verifies access tokens against a store, tolerating clock skew
///
/// A token is expired only once its expiration plus the maximum clock skew
/// is strictly before the current time. A token with no expiration never
/// expires. Expired tokens are removed from the store when encountered.
pub struct ClockSkewTokenVerifier<S, C> {
    store: S,
    clock: C,
    max_clock_skew: Duration,
    clients: Option<Arc<dyn ClientRegistry>>,
}

impl<S: fmt::Debug, C: fmt::Debug> fmt::Debug for ClockSkewTokenVerifier<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClockSkewTokenVerifier")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("max_clock_skew", &self.max_clock_skew)
            .field("checks_clients", &self.clients.is_some())
            .finish()
    }
}

impl<S, C> ClockSkewTokenVerifier<S, C>
where
    S: TokenStore,
    C: Clock + Send + Sync,
{
    /// Constructs a verifier with the default clock skew
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            clients: None,
        }
    }

    /// Applies deployable settings
    pub fn with_settings(self, settings: &VerifierSettings) -> Self {
        self.with_max_clock_skew(Duration::from_millis(settings.max_clock_skew_ms))
    }

    /// Sets the maximum tolerated clock skew
    pub fn with_max_clock_skew(self, max_clock_skew: Duration) -> Self {
        Self {
            max_clock_skew,
            ..self
        }
    }

    /// Checks each token's client against a registry
    pub fn with_client_registry(self, clients: Arc<dyn ClientRegistry>) -> Self {
        Self {
            clients: Some(clients),
            ..self
        }
    }

    /// The underlying token store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads the token with the given value without checking expiration
    pub async fn read_access_token(
        &self,
        value: &AccessTokenRef,
    ) -> Result<Option<OAuth2AccessToken>, TokenStoreError> {
        self.store.read_access_token(value).await
    }

    fn is_expired(&self, token: &OAuth2AccessToken, now: UnixTime) -> bool {
        token
            .expiration
            .map_or(false, |exp| exp + self.max_clock_skew < now)
    }

    /// Loads the authentication for a presented token
    #[tracing::instrument(skip_all)]
    pub async fn load_authentication(
        &self,
        value: &AccessTokenRef,
    ) -> Result<OAuth2Authentication, InvalidTokenError> {
        let token = match self.store.read_access_token(value).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("access token not found");
                return Err(InvalidTokenError::NotFound);
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(error, "access token unreadable");
                return Err(InvalidTokenError::Unreadable(err));
            }
        };

        let now = self.clock.now();
        if self.is_expired(&token, now) {
            tracing::debug!(
                token.expiration = ?token.expiration,
                %now,
                "access token expired"
            );
            self.store.remove_access_token(value).await;
            return Err(InvalidTokenError::Expired);
        }

        let authentication = match self.store.read_authentication(&token).await {
            Ok(Some(authentication)) => authentication,
            Ok(None) => {
                tracing::debug!("authentication removed after token was read");
                return Err(InvalidTokenError::RaceLost);
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(error, "authentication unreadable");
                return Err(InvalidTokenError::Unreadable(err));
            }
        };

        if let (Some(clients), Some(client_id)) = (&self.clients, &authentication.client_id) {
            if let Err(source) = clients.load_client(client_id).await {
                tracing::debug!(%client_id, "client no longer valid");
                return Err(InvalidTokenError::ClientInvalid {
                    client_id: client_id.clone(),
                    source,
                });
            }
        }

        tracing::trace!(principal = authentication.name(), "access token accepted");
        Ok(authentication)
    }
}

#[async_trait]
impl<S, C> AuthenticationLoader for ClockSkewTokenVerifier<S, C>
where
    S: TokenStore,
    C: Clock + Send + Sync,
{
    async fn load_authentication(
        &self,
        value: &AccessTokenRef,
    ) -> Result<OAuth2Authentication, InvalidTokenError> {
        ClockSkewTokenVerifier::load_authentication(self, value).await
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use tracing_test::traced_test;
    use warden_clock::TestClock;

    use super::*;
    use crate::{
        AccessToken, ClientDetails, InMemoryClientRegistry, InMemoryTokenStore, Principal,
    };

    const NOW: UnixTime = UnixTime(1_700_000_000_000);

    fn stored(store: &InMemoryTokenStore, value: &'static str, expiration: Option<UnixTime>) {
        let mut token = OAuth2AccessToken::new(AccessToken::from_static(value));
        token.expiration = expiration;
        let authentication = OAuth2Authentication::new(Principal::new("u-1", "alice"))
            .with_client_id(ClientId::from_static("web"));
        store.store_access_token(token, Some(authentication));
    }

    fn verifier() -> ClockSkewTokenVerifier<InMemoryTokenStore, TestClock> {
        ClockSkewTokenVerifier::new(InMemoryTokenStore::new(), TestClock::new(NOW))
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let result = verifier()
            .load_authentication(AccessTokenRef::from_static("nope"))
            .await;
        assert!(matches!(result, Err(InvalidTokenError::NotFound)));
    }

    #[tokio::test]
    async fn skew_boundary() -> Result<()> {
        let verifier = verifier();
        stored(verifier.store(), "recent", Some(NOW - Duration::from_secs(59)));
        stored(verifier.store(), "stale", Some(NOW - Duration::from_secs(61)));

        let recent = verifier
            .load_authentication(AccessTokenRef::from_static("recent"))
            .await?;
        assert_eq!(recent.name(), "alice");

        let stale = verifier
            .load_authentication(AccessTokenRef::from_static("stale"))
            .await;
        assert!(matches!(stale, Err(InvalidTokenError::Expired)));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_strict() -> Result<()> {
        let verifier = verifier();
        stored(verifier.store(), "edge", Some(NOW - DEFAULT_MAX_CLOCK_SKEW));
        verifier
            .load_authentication(AccessTokenRef::from_static("edge"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn expired_tokens_are_evicted() {
        let verifier = verifier();
        stored(verifier.store(), "old", Some(NOW - Duration::from_secs(3600)));

        let result = verifier
            .load_authentication(AccessTokenRef::from_static("old"))
            .await;
        assert!(matches!(result, Err(InvalidTokenError::Expired)));
        assert!(verifier.store().is_empty());
        assert!(logs_contain("access token expired"));

        let again = verifier
            .load_authentication(AccessTokenRef::from_static("old"))
            .await;
        assert!(matches!(again, Err(InvalidTokenError::NotFound)));
    }

    #[tokio::test]
    async fn missing_expiration_never_expires() -> Result<()> {
        let verifier = verifier();
        stored(verifier.store(), "forever", None);
        verifier
            .load_authentication(AccessTokenRef::from_static("forever"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn custom_skew_applies() {
        let verifier = verifier().with_settings(&VerifierSettings {
            max_clock_skew_ms: 0,
        });
        stored(verifier.store(), "just-past", Some(NOW - Duration::from_millis(1)));
        let result = verifier
            .load_authentication(AccessTokenRef::from_static("just-past"))
            .await;
        assert!(matches!(result, Err(InvalidTokenError::Expired)));
    }

    #[tokio::test]
    async fn vanished_authentication_is_race_lost() {
        let verifier = verifier();
        verifier.store().store_access_token(
            OAuth2AccessToken::new(AccessToken::from_static("orphan")),
            None,
        );
        let result = verifier
            .load_authentication(AccessTokenRef::from_static("orphan"))
            .await;
        assert!(matches!(result, Err(InvalidTokenError::RaceLost)));
        assert_eq!(
            result.map(|_| ()).unwrap_err().to_string(),
            "invalid access token (race condition)"
        );
    }

    #[tokio::test]
    async fn unregistered_client_is_invalid() -> Result<()> {
        let registry = Arc::new(InMemoryClientRegistry::new());
        let verifier = verifier().with_client_registry(registry.clone());
        stored(verifier.store(), "t", None);

        let result = verifier
            .load_authentication(AccessTokenRef::from_static("t"))
            .await;
        match result {
            Err(err @ InvalidTokenError::ClientInvalid { .. }) => {
                assert_eq!(err.to_string(), "client not valid: web")
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.principal)),
        }

        registry.register(ClientDetails::new(ClientId::from_static("web")));
        verifier
            .load_authentication(AccessTokenRef::from_static("t"))
            .await?;
        Ok(())
    }
}
