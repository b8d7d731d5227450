//! Issued access tokens and the authentications they stand for

use serde::{Deserialize, Serialize};
use warden_clock::UnixTime;

use crate::{AccessToken, ClaimsMap, ClientId, Principal, RefreshToken, Scope};

/// The default `token_type` of issued tokens
pub const BEARER: &str = "bearer";

fn bearer() -> String {
    BEARER.to_owned()
}

/// An issued access token and its metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuth2AccessToken {
    /// The token string presented by the bearer
    pub value: AccessToken,
    /// The token type, normally `bearer`
    #[serde(default = "bearer")]
    pub token_type: String,
    /// When the token was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<UnixTime>,
    /// When the token stops being valid; `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<UnixTime>,
    /// A refresh token that can be exchanged for a replacement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// The scope granted to the token
    #[serde(default)]
    pub scope: Scope,
    /// Claims beyond the registered ones, such as the embedded principal
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional_information: ClaimsMap,
}

impl OAuth2AccessToken {
    /// A bearer token with no expiration, scope, or extra claims
    pub fn new(value: AccessToken) -> Self {
        Self {
            value,
            token_type: bearer(),
            issued_at: None,
            expiration: None,
            refresh_token: None,
            scope: Scope::empty(),
            additional_information: ClaimsMap::new(),
        }
    }

    /// Sets the expiration
    pub fn with_expiration(self, expiration: UnixTime) -> Self {
        Self {
            expiration: Some(expiration),
            ..self
        }
    }

    /// Sets the scope
    pub fn with_scope(self, scope: Scope) -> Self {
        Self { scope, ..self }
    }

    /// Attaches a refresh token
    pub fn with_refresh_token(self, refresh_token: RefreshToken) -> Self {
        Self {
            refresh_token: Some(refresh_token),
            ..self
        }
    }
}

/// The token an authentication was loaded from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenDetails {
    /// The token string
    pub token_value: AccessToken,
    /// The token type, such as `bearer`
    pub token_type: String,
}

/// The username given to unauthenticated principals
pub const ANONYMOUS_USER: &str = "anonymousUser";

/// A principal as authenticated by an OAuth2 access token
#[derive(Clone, Debug)]
pub struct OAuth2Authentication {
    /// The authenticated user
    pub principal: Principal,
    /// The client the token was issued to
    pub client_id: Option<ClientId>,
    /// The scope granted to the token
    pub scope: Scope,
    /// The token the authentication came from, once attached
    pub details: Option<TokenDetails>,
}

impl OAuth2Authentication {
    /// An authentication for `principal` with no client, scope, or details
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            client_id: None,
            scope: Scope::empty(),
            details: None,
        }
    }

    /// An unauthenticated placeholder
    pub fn anonymous() -> Self {
        Self::new(Principal::new(String::new(), ANONYMOUS_USER))
    }

    /// Sets the client ID
    pub fn with_client_id(self, client_id: ClientId) -> Self {
        Self {
            client_id: Some(client_id),
            ..self
        }
    }

    /// Sets the scope
    pub fn with_scope(self, scope: Scope) -> Self {
        Self { scope, ..self }
    }

    /// Attaches the token the authentication was loaded from
    pub fn with_details(self, details: TokenDetails) -> Self {
        Self {
            details: Some(details),
            ..self
        }
    }

    /// The principal's name
    #[inline]
    pub fn name(&self) -> &str {
        self.principal.name()
    }

    /// Whether this is the unauthenticated placeholder
    pub fn is_anonymous(&self) -> bool {
        self.principal.user_id.is_empty() && self.principal.username == ANONYMOUS_USER
    }

    /// Whether the token this authentication came from is attached
    #[inline]
    pub fn has_oauth2_details(&self) -> bool {
        self.details.is_some()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    #[test]
    fn anonymous_has_no_details() {
        let anon = OAuth2Authentication::anonymous();
        assert!(anon.is_anonymous());
        assert!(!anon.has_oauth2_details());
        assert!(!OAuth2Authentication::new(Principal::new("u-1", "alice")).is_anonymous());
    }

    #[test]
    fn token_deserializes_with_defaults() -> Result<()> {
        let token: OAuth2AccessToken = serde_json::from_value(json!({
            "value": "abc",
            "expiration": 1_000,
        }))?;
        assert_eq!(token.token_type, BEARER);
        assert_eq!(token.expiration, Some(UnixTime(1_000)));
        assert!(token.scope.is_empty());
        assert!(token.additional_information.is_empty());
        Ok(())
    }
}
