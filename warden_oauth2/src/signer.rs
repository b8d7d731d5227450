//! Authorization-server token issuance

use std::{fmt, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use warden::{
    error::{JwtSigningError, KeyRejected},
    jwa::{Algorithm, Usage},
    jwk::{KeyId, KeyIdRef, SigningKey},
    jwt::Headers,
    Jwk, Jwks, Jwt, JwtRef,
};
use warden_clock::{Clock, UnixTime};

use crate::{
    claims::{malformed, registered, USERNAME},
    directory::{DirectoryError, UserDirectory},
    keys::KeyError,
    store::{client_id_claim, scope_claim, time_claim},
    AccessToken, AccountStatusError, ClaimsCodec, ClaimsError, ClaimsMap, ClientDetails,
    ClientId, OAuth2AccessToken, Principal, RefreshToken, RefreshTokenRef, Scope, TrustedKeys,
};

/// The default lifetime of an access token
pub const DEFAULT_ACCESS_TOKEN_VALIDITY: Duration = Duration::from_secs(12 * 60 * 60);

/// The default lifetime of a refresh token
pub const DEFAULT_REFRESH_TOKEN_VALIDITY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// An error while issuing a token
#[derive(Debug, Error)]
pub enum SigningError {
    /// The token could not be encoded or signed
    #[error("unable to sign token")]
    Jwt(#[from] JwtSigningError),
}

/// An error while exchanging a refresh token
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The refresh token's signature could not be verified
    #[error("invalid refresh token")]
    InvalidToken(#[from] KeyError),
    /// The presented token is an access token
    #[error("encoded token is not a refresh token")]
    NotARefreshToken,
    /// The refresh token has expired
    #[error("invalid refresh token (expired)")]
    Expired,
    /// The refresh token was issued to a different client
    #[error("wrong client for this refresh token: {client_id}")]
    WrongClient {
        /// The client the refresh token was issued to
        client_id: ClientId,
    },
    /// The refresh token's claims were unusable
    #[error(transparent)]
    Claims(#[from] ClaimsError),
    /// The account may no longer obtain tokens
    #[error(transparent)]
    AccountStatus(#[from] AccountStatusError),
    /// The replacement tokens could not be issued
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// The client and scope a token is being issued for
#[derive(Clone, Debug)]
pub struct GrantContext {
    client_id: ClientId,
    scope: Scope,
    issue_refresh_token: bool,
    access_token_validity: Option<Duration>,
    refresh_token_validity: Option<Duration>,
}

impl GrantContext {
    /// A grant to `client_id` for `scope` with no refresh token
    pub fn new(client_id: ClientId, scope: Scope) -> Self {
        Self {
            client_id,
            scope,
            issue_refresh_token: false,
            access_token_validity: None,
            refresh_token_validity: None,
        }
    }

    /// A grant for `scope` honoring the client's registration
    ///
    /// A refresh token is issued if the client may use the `refresh_token`
    /// grant, and the client's validity overrides are applied.
    pub fn for_client(client: &ClientDetails, scope: Scope) -> Self {
        Self {
            issue_refresh_token: client.allows_grant("refresh_token"),
            access_token_validity: client.access_token_validity(),
            refresh_token_validity: client.refresh_token_validity(),
            ..Self::new(client.client_id.clone(), scope)
        }
    }

    /// Also issues a refresh token
    pub fn with_refresh_token(self) -> Self {
        Self {
            issue_refresh_token: true,
            ..self
        }
    }

    /// The client the token is issued to
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The granted scope
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Deployable signer settings
///
/// The private key itself is supplied separately.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SignerSettings {
    /// The `iss` claim, if any
    pub issuer: Option<String>,
    /// The `kid` header identifying the signing key
    pub key_id: String,
    /// The signing algorithm
    pub algorithm: Algorithm,
    /// Access token lifetime, in seconds
    pub access_token_validity_secs: u64,
    /// Refresh token lifetime, in seconds
    pub refresh_token_validity_secs: u64,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            key_id: "default".to_owned(),
            algorithm: Algorithm::default(),
            access_token_validity_secs: DEFAULT_ACCESS_TOKEN_VALIDITY.as_secs(),
            refresh_token_validity_secs: DEFAULT_REFRESH_TOKEN_VALIDITY.as_secs(),
        }
    }
}

/// Issues signed JWT access and refresh tokens carrying principal claims
pub struct JwtTokenSigner<C> {
    key: SigningKey,
    key_id: KeyId,
    algorithm: Algorithm,
    issuer: Option<String>,
    access_token_validity: Duration,
    refresh_token_validity: Duration,
    codec: ClaimsCodec,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for JwtTokenSigner<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JwtTokenSigner")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("access_token_validity", &self.access_token_validity)
            .field("refresh_token_validity", &self.refresh_token_validity)
            .field("codec", &self.codec)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> JwtTokenSigner<C> {
    /// A signer using `key` under `key_id`, with default lifetimes
    pub fn new(key: SigningKey, key_id: KeyId, codec: ClaimsCodec, clock: C) -> Self {
        Self {
            key,
            key_id,
            algorithm: Algorithm::default(),
            issuer: None,
            access_token_validity: DEFAULT_ACCESS_TOKEN_VALIDITY,
            refresh_token_validity: DEFAULT_REFRESH_TOKEN_VALIDITY,
            codec,
            clock,
        }
    }

    /// A signer configured from deployable settings and a PEM private key
    pub fn from_settings(
        settings: &SignerSettings,
        private_key_pem: &str,
        codec: ClaimsCodec,
        clock: C,
    ) -> Result<Self, KeyRejected> {
        let key = SigningKey::from_pem(private_key_pem)?;
        let mut signer = Self::new(key, KeyId::new(settings.key_id.clone()), codec, clock)
            .with_algorithm(settings.algorithm)
            .with_access_token_validity(Duration::from_secs(settings.access_token_validity_secs))
            .with_refresh_token_validity(Duration::from_secs(
                settings.refresh_token_validity_secs,
            ));
        signer.issuer = settings.issuer.clone();
        Ok(signer)
    }

    /// Sets the signing algorithm
    pub fn with_algorithm(self, algorithm: Algorithm) -> Self {
        Self { algorithm, ..self }
    }

    /// Sets the `iss` claim
    pub fn with_issuer(self, issuer: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    /// Sets the default access token lifetime
    pub fn with_access_token_validity(self, validity: Duration) -> Self {
        Self {
            access_token_validity: validity,
            ..self
        }
    }

    /// Sets the default refresh token lifetime
    pub fn with_refresh_token_validity(self, validity: Duration) -> Self {
        Self {
            refresh_token_validity: validity,
            ..self
        }
    }

    /// The ID of the signing key
    pub fn key_id(&self) -> &KeyIdRef {
        &self.key_id
    }

    /// The verification key set to publish to resource servers
    pub fn jwks(&self) -> Jwks {
        let jwk = Jwk::from(self.key.public_key().clone())
            .with_key_id(self.key_id.clone())
            .with_usage(Usage::Signing)
            .with_algorithm(self.algorithm);
        std::iter::once(jwk).collect()
    }

    fn token_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn sign(&self, claims: &ClaimsMap) -> Result<Jwt, SigningError> {
        let headers = Headers::new(self.algorithm).with_key_id(self.key_id.clone());
        Ok(Jwt::sign(&headers, claims, &self.key)?)
    }

    /// Issues an access token for `principal`, and a refresh token if the
    /// grant allows one
    #[tracing::instrument(skip_all, fields(client_id = %grant.client_id, principal = principal.name()))]
    pub fn issue(
        &self,
        principal: &Principal,
        grant: &GrantContext,
    ) -> Result<OAuth2AccessToken, SigningError> {
        let now = self.clock.now();
        let access_validity = grant
            .access_token_validity
            .unwrap_or(self.access_token_validity);
        let expiration = UnixTime::from_secs((now + access_validity).as_secs());
        let jti = Self::token_id();

        let mut claims = self.codec.encode(principal);
        claims.insert(
            registered::CLIENT_ID.to_owned(),
            Value::String(grant.client_id.as_str().to_owned()),
        );
        claims.insert(
            registered::SCOPE.to_owned(),
            Value::Array(
                grant
                    .scope
                    .iter()
                    .map(|t| Value::String(t.as_str().to_owned()))
                    .collect(),
            ),
        );
        claims.insert(registered::JTI.to_owned(), Value::String(jti.clone()));
        claims.insert(registered::IAT.to_owned(), now.as_secs().into());
        claims.insert(registered::EXP.to_owned(), expiration.as_secs().into());
        if let Some(issuer) = &self.issuer {
            claims.insert(registered::ISS.to_owned(), Value::String(issuer.clone()));
        }

        let value = self.sign(&claims)?;

        let refresh_token = if grant.issue_refresh_token {
            let refresh_validity = grant
                .refresh_token_validity
                .unwrap_or(self.refresh_token_validity);
            let mut refresh_claims = claims.clone();
            refresh_claims.insert(registered::JTI.to_owned(), Value::String(Self::token_id()));
            refresh_claims.insert(registered::ATI.to_owned(), Value::String(jti));
            refresh_claims.insert(
                registered::EXP.to_owned(),
                (now + refresh_validity).as_secs().into(),
            );
            let refresh = self.sign(&refresh_claims)?;
            Some(RefreshToken::new(refresh.as_str().to_owned()))
        } else {
            None
        };

        for name in [registered::EXP, registered::CLIENT_ID, registered::SCOPE] {
            claims.remove(name);
        }

        tracing::debug!(
            token.expiration = %expiration,
            token.refreshable = refresh_token.is_some(),
            "access token issued"
        );

        Ok(OAuth2AccessToken {
            value: AccessToken::new(value.as_str().to_owned()),
            token_type: crate::token::BEARER.to_owned(),
            issued_at: Some(now),
            expiration: Some(expiration),
            refresh_token,
            scope: grant.scope.clone(),
            additional_information: claims,
        })
    }

    /// Exchanges a refresh token for a new token pair
    ///
    /// The user is re-read from the directory, so changes to the account
    /// since the original grant, such as locking it, take effect here.
    /// Only the client the refresh token was issued to may present it, and
    /// that client's registered token lifetimes apply to the new pair.
    #[tracing::instrument(skip_all, fields(client_id = %client.client_id))]
    pub async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
        client: &ClientDetails,
        keys: &TrustedKeys,
        directory: &dyn UserDirectory,
    ) -> Result<OAuth2AccessToken, RefreshError> {
        let claims = keys.verify(JwtRef::from_str(refresh_token.as_str()))?;

        if !claims.contains_key(registered::ATI) {
            tracing::debug!("access token presented as refresh token");
            return Err(RefreshError::NotARefreshToken);
        }

        let now = self.clock.now();
        if time_claim(&claims, registered::EXP).map_or(false, |exp| exp < now) {
            tracing::debug!("refresh token expired");
            return Err(RefreshError::Expired);
        }

        let username = claims
            .get(USERNAME)
            .and_then(Value::as_str)
            .ok_or_else(|| ClaimsError::from(malformed("missing username")))?;
        let client_id = client_id_claim(&claims)
            .ok_or_else(|| ClaimsError::from(malformed("missing client_id")))?;
        if client_id != client.client_id {
            tracing::debug!(token.client_id = %client_id, "refresh token presented by another client");
            return Err(RefreshError::WrongClient { client_id });
        }

        let mut principal = match directory.find_by_username(username).await {
            Ok(principal) => principal,
            Err(DirectoryError::NotFound) => return Err(ClaimsError::UnknownUser.into()),
            Err(err) => return Err(ClaimsError::Directory(err).into()),
        };
        if let Some(authorization) = &principal.authorization {
            authorization.check_account_status()?;
        }
        principal.erase_credentials();

        let grant = GrantContext::for_client(client, scope_claim(&claims));
        Ok(self.issue(&principal, &grant)?)
    }
}
