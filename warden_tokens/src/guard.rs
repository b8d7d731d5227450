//! Keeps a client session's authentication in step with its access token
//!
//! The authorization server may issue a new access token to a client at any
//! time, such as after a refresh. The new token's claims can carry updated
//! user details, so before a session is used the guard compares the token
//! the session was built from with the token the client currently holds, and
//! reloads the session's authentication if they differ.

use std::{fmt, sync::Arc};

use thiserror::Error;
use warden_clock::System;
use warden_oauth2::{
    AuthenticationLoader, ClaimsCodec, ClockSkewTokenVerifier, InvalidTokenError, JwtTokenStore,
    PrincipalSource, TokenDetails, TrustedKeys, UserDirectory,
};

use crate::{
    AuthenticationEvent, AuthenticationEvents, NoEvents, SecurityContext, TokenAcquisitionError,
    TokenProvider,
};

/// The session's authentication could not be brought up to date
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// The client could not obtain an access token
    #[error("could not obtain access token")]
    AccessTokenUnavailable(#[source] TokenAcquisitionError),
    /// The current access token could not be resolved to an authentication
    #[error("could not obtain user details from token")]
    UserDetailsUnavailable(#[source] InvalidTokenError),
}

/// Where the client reconstructs user details from when its token changes
#[derive(Clone, Default)]
pub enum Resolution {
    /// Look the user up in a directory shared with the authorization
    /// server, ignoring the details embedded in the token
    TrustDirectory(Arc<dyn UserDirectory>),
    /// Use the user details embedded in the token as issued
    #[default]
    TrustClaims,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TrustDirectory(_) => f.write_str("TrustDirectory"),
            Self::TrustClaims => f.write_str("TrustClaims"),
        }
    }
}

impl From<Resolution> for PrincipalSource {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::TrustDirectory(directory) => PrincipalSource::Directory(directory),
            Resolution::TrustClaims => PrincipalSource::Claims,
        }
    }
}

/// Configuration of how a client resolves a changed token
#[derive(Clone, Debug, Default)]
pub struct RefreshGuardConfig {
    resolution: Resolution,
}

impl RefreshGuardConfig {
    /// Resolves changed tokens as configured by `resolution`
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    /// The configured resolution
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// A claims codec that decodes principals as configured
    pub fn claims_codec(&self) -> ClaimsCodec {
        ClaimsCodec::new().with_source(self.resolution.clone().into())
    }
}

/// Replaces a session's authentication when the client's access token
/// changes
pub struct ClientTokenRefreshGuard<P, L> {
    provider: P,
    loader: L,
    events: Arc<dyn AuthenticationEvents>,
}

impl<P: fmt::Debug, L: fmt::Debug> fmt::Debug for ClientTokenRefreshGuard<P, L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientTokenRefreshGuard")
            .field("provider", &self.provider)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl<P> ClientTokenRefreshGuard<P, ClockSkewTokenVerifier<JwtTokenStore, System>>
where
    P: TokenProvider,
{
    /// A guard that verifies tokens against `keys` and decodes user details
    /// as configured
    pub fn for_jwt(provider: P, keys: TrustedKeys, config: &RefreshGuardConfig) -> Self {
        let store = JwtTokenStore::new(keys, config.claims_codec());
        Self::new(provider, ClockSkewTokenVerifier::new(store, System))
    }
}

impl<P, L> ClientTokenRefreshGuard<P, L>
where
    P: TokenProvider,
    L: AuthenticationLoader,
{
    /// A guard that obtains tokens from `provider` and resolves them with
    /// `loader`, publishing no events
    pub fn new(provider: P, loader: L) -> Self {
        Self {
            provider,
            loader,
            events: Arc::new(NoEvents),
        }
    }

    /// Publishes outcomes to `events`
    pub fn with_events(self, events: impl AuthenticationEvents + 'static) -> Self {
        Self {
            events: Arc::new(events),
            ..self
        }
    }

    fn fail(&self, principal: &str, err: CredentialsError) -> CredentialsError {
        let error: &dyn std::error::Error = &err;
        tracing::debug!(error, "session authentication could not be refreshed");
        self.events.publish(AuthenticationEvent::Failure {
            principal: principal.to_owned(),
            reason: err.to_string(),
        });
        err
    }

    /// Brings the session's authentication up to date with the client's
    /// current access token
    ///
    /// Sessions that are unauthenticated, anonymous, or not backed by an
    /// access token are left alone. If the token is unchanged, nothing is
    /// loaded or stored. On failure the session keeps its previous
    /// authentication.
    #[tracing::instrument(skip_all)]
    pub async fn check(&self, context: &SecurityContext) -> Result<(), CredentialsError> {
        let current = match context.authentication() {
            Some(current) if !current.is_anonymous() => current,
            _ => return Ok(()),
        };
        let details = match &current.details {
            Some(details) => details,
            None => return Ok(()),
        };

        let token = match self.provider.access_token().await {
            Ok(token) => token,
            Err(err) => {
                return Err(self.fail(
                    current.name(),
                    CredentialsError::AccessTokenUnavailable(err),
                ))
            }
        };

        if token.access_token() == &*details.token_value {
            tracing::trace!("access token unchanged");
            return Ok(());
        }

        tracing::debug!("access token changed; reloading authentication");
        let authentication = match self.loader.load_authentication(token.access_token()).await {
            Ok(authentication) => authentication,
            Err(err) => {
                return Err(self.fail(
                    current.name(),
                    CredentialsError::UserDetailsUnavailable(err),
                ))
            }
        };

        let authentication = Arc::new(authentication.with_details(TokenDetails {
            token_value: token.access_token().to_owned(),
            token_type: token.token_type().to_owned(),
        }));
        context.set_authentication(Arc::clone(&authentication));
        self.events
            .publish(AuthenticationEvent::Success { authentication });

        Ok(())
    }
}
