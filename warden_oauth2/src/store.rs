//! Token stores
//!
//! A store resolves a presented token string to the token's metadata and to
//! the authentication it was issued for.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use warden::JwtRef;
use warden_clock::UnixTime;

use crate::{
    claims::registered, keys::KeyError, AccessToken, AccessTokenRef, ClaimsCodec, ClaimsError,
    ClaimsMap, ClientId, OAuth2AccessToken, OAuth2Authentication, Scope, TrustedKeys,
};

/// An error while reading from a token store
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// The token's signature could not be verified
    #[error("cannot verify token")]
    Key(#[from] KeyError),
    /// The token's claims could not be converted to an authentication
    #[error("cannot convert token claims")]
    Claims(#[from] ClaimsError),
    /// A refresh token was presented where an access token was expected
    #[error("encoded token is a refresh token")]
    RefreshTokenPresented,
    /// The backing store failed
    #[error("token store unavailable")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Storage of issued access tokens and their authentications
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Reads the token with the given value, if the store knows of it
    async fn read_access_token(
        &self,
        value: &AccessTokenRef,
    ) -> Result<Option<OAuth2AccessToken>, TokenStoreError>;

    /// Reads the authentication the token was issued for
    ///
    /// Returns `None` if the authentication is no longer present, such as
    /// when the token was removed after it was read.
    async fn read_authentication(
        &self,
        token: &OAuth2AccessToken,
    ) -> Result<Option<OAuth2Authentication>, TokenStoreError>;

    /// Removes the token, if present
    ///
    /// Removing an absent token is not an error.
    async fn remove_access_token(&self, value: &AccessTokenRef);
}

#[derive(Debug)]
struct Entry {
    token: OAuth2AccessToken,
    authentication: Option<OAuth2Authentication>,
}

/// An opaque token store held in memory
///
/// Each token value maps to exactly one entry.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    entries: RwLock<HashMap<AccessToken, Entry>>,
}

impl InMemoryTokenStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a token along with the authentication it was issued for
    ///
    /// Storing a token with the same value replaces the previous entry.
    pub fn store_access_token(
        &self,
        token: OAuth2AccessToken,
        authentication: Option<OAuth2Authentication>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            token.value.clone(),
            Entry {
                token,
                authentication,
            },
        );
    }

    /// The number of stored tokens
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store holds no tokens
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn read_access_token(
        &self,
        value: &AccessTokenRef,
    ) -> Result<Option<OAuth2AccessToken>, TokenStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(value).map(|e| e.token.clone()))
    }

    async fn read_authentication(
        &self,
        token: &OAuth2AccessToken,
    ) -> Result<Option<OAuth2Authentication>, TokenStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&*token.value)
            .and_then(|e| e.authentication.clone()))
    }

    async fn remove_access_token(&self, value: &AccessTokenRef) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(value).is_some() {
            tracing::trace!("access token removed");
        }
    }
}

/// A stateless store that reads everything from the signed token itself
///
/// Nothing is ever persisted, so removal has no effect and an expired token
/// is simply refused on every presentation.
#[derive(Clone, Debug)]
pub struct JwtTokenStore {
    keys: TrustedKeys,
    codec: ClaimsCodec,
}

impl JwtTokenStore {
    /// Verifies tokens against `keys` and decodes principals with `codec`
    pub fn new(keys: TrustedKeys, codec: ClaimsCodec) -> Self {
        Self { keys, codec }
    }

    /// The trusted key set, which may be updated to rotate keys
    pub fn keys(&self) -> &TrustedKeys {
        &self.keys
    }

    fn verified_claims(&self, value: &AccessTokenRef) -> Result<ClaimsMap, TokenStoreError> {
        let claims = self.keys.verify(JwtRef::from_str(value.as_str()))?;
        if claims.contains_key(registered::ATI) {
            return Err(TokenStoreError::RefreshTokenPresented);
        }
        Ok(claims)
    }
}

pub(crate) fn time_claim(claims: &ClaimsMap, name: &str) -> Option<UnixTime> {
    claims.get(name).and_then(Value::as_u64).map(UnixTime::from_secs)
}

pub(crate) fn scope_claim(claims: &ClaimsMap) -> Scope {
    claims
        .get(registered::SCOPE)
        .cloned()
        .and_then(|s| serde_json::from_value(s).ok())
        .unwrap_or_default()
}

pub(crate) fn client_id_claim(claims: &ClaimsMap) -> Option<ClientId> {
    claims
        .get(registered::CLIENT_ID)
        .and_then(Value::as_str)
        .map(|c| ClientId::new(c.to_owned()))
}

#[async_trait]
impl TokenStore for JwtTokenStore {
    async fn read_access_token(
        &self,
        value: &AccessTokenRef,
    ) -> Result<Option<OAuth2AccessToken>, TokenStoreError> {
        let mut claims = self.verified_claims(value)?;

        let mut token = OAuth2AccessToken::new(value.to_owned()).with_scope(scope_claim(&claims));
        token.expiration = time_claim(&claims, registered::EXP);
        token.issued_at = time_claim(&claims, registered::IAT);

        for name in [
            registered::EXP,
            registered::AUD,
            registered::CLIENT_ID,
            registered::SCOPE,
        ] {
            claims.remove(name);
        }
        token.additional_information = claims;

        Ok(Some(token))
    }

    async fn read_authentication(
        &self,
        token: &OAuth2AccessToken,
    ) -> Result<Option<OAuth2Authentication>, TokenStoreError> {
        let claims = self.verified_claims(&token.value)?;
        let principal = self.codec.decode(&claims).await?;

        let mut authentication =
            OAuth2Authentication::new(principal).with_scope(scope_claim(&claims));
        authentication.client_id = client_id_claim(&claims);

        Ok(Some(authentication))
    }

    async fn remove_access_token(&self, _value: &AccessTokenRef) {}
}
