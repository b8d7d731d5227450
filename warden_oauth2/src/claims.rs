//! Conversion between principals and token claims
//!
//! The principal is embedded in full so that resource servers can make
//! access decisions without a directory round-trip. Only `username` is
//! required when decoding; every other attribute is optional.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    directory::{DirectoryError, UserDirectory},
    AuthorizationState, Authorities, GrantedAuthority, Principal,
};

/// An ordered, string-keyed map of claims, as carried in a token payload
pub type ClaimsMap = serde_json::Map<String, Value>;

/// The reserved claim holding the principal's login name
pub const USERNAME: &str = "username";

/// The reserved claim holding the principal's granted authorities
pub const AUTHORITIES: &str = "authorities";

/// Registered claim names carried alongside the principal
pub mod registered {
    /// Expiration, in seconds since the epoch
    pub const EXP: &str = "exp";
    /// Issue time, in seconds since the epoch
    pub const IAT: &str = "iat";
    /// Unique token identifier
    pub const JTI: &str = "jti";
    /// On a refresh token, the `jti` of the access token it was issued with
    pub const ATI: &str = "ati";
    /// Issuer
    pub const ISS: &str = "iss";
    /// Audience
    pub const AUD: &str = "aud";
    /// The client the token was issued to
    pub const CLIENT_ID: &str = "client_id";
    /// Granted scope
    pub const SCOPE: &str = "scope";
}

/// The claims payload did not have the expected shape
#[derive(Debug, Error)]
#[error("malformed claims: {reason}")]
pub struct MalformedClaims {
    reason: String,
}

pub(crate) fn malformed(reason: impl fmt::Display) -> MalformedClaims {
    MalformedClaims {
        reason: reason.to_string(),
    }
}

/// The `authorities` claim was neither a string nor a list of strings
#[derive(Debug, Error)]
#[error("authorities must be either a string or a list of strings, found {found}")]
pub struct InvalidAuthorityFormat {
    found: &'static str,
}

/// An error while reconstructing a principal from claims
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// The claims lacked a username or could not be read
    #[error(transparent)]
    Malformed(#[from] MalformedClaims),
    /// The `authorities` claim had an unusable type
    #[error(transparent)]
    InvalidAuthorityFormat(#[from] InvalidAuthorityFormat),
    /// The directory has no user with the token's username
    #[error("user named in token not found in directory")]
    UnknownUser,
    /// The directory lookup failed
    #[error("user directory lookup failed")]
    Directory(#[source] DirectoryError),
}

/// Where a decoded principal's identity and authorities come from
#[derive(Clone, Default)]
pub enum PrincipalSource {
    /// Trust the claims as issued
    #[default]
    Claims,
    /// Discard the claimed identity and fetch the current one from a
    /// directory by username
    ///
    /// Authorities and account flags then reflect the directory's present
    /// state, but claims the directory does not know about are lost.
    Directory(Arc<dyn UserDirectory>),
}

impl fmt::Debug for PrincipalSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Claims => f.write_str("Claims"),
            Self::Directory(_) => f.write_str("Directory"),
        }
    }
}

/// Converts principals to and from token claims
#[derive(Clone, Debug, Default)]
pub struct ClaimsCodec {
    default_authorities: Authorities,
    source: PrincipalSource,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrincipalClaims {
    #[serde(default)]
    user_id: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    realname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    portrait: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gender: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_non_expired: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_non_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials_non_expired: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

impl ClaimsCodec {
    /// A codec that trusts claims and has no default authorities
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorities granted when a token carries no `authorities` claim
    pub fn with_default_authorities(self, default_authorities: Authorities) -> Self {
        Self {
            default_authorities,
            ..self
        }
    }

    /// Sets where decoded principals come from
    pub fn with_source(self, source: PrincipalSource) -> Self {
        Self { source, ..self }
    }

    /// Reconstructs principals from the directory instead of the claims
    pub fn with_directory(self, directory: Arc<dyn UserDirectory>) -> Self {
        self.with_source(PrincipalSource::Directory(directory))
    }

    /// The configured principal source
    pub fn source(&self) -> &PrincipalSource {
        &self.source
    }

    /// Projects a principal into claims
    ///
    /// The password is never included. Authorities are included only when
    /// the principal holds at least one.
    pub fn encode(&self, principal: &Principal) -> ClaimsMap {
        let authorization = principal.authorization.as_ref();
        let dto = PrincipalClaims {
            user_id: principal.user_id.clone(),
            username: principal.username.clone(),
            user_no: principal.user_no.clone(),
            nickname: principal.nickname.clone(),
            realname: principal.realname.clone(),
            portrait: principal.portrait.clone(),
            gender: principal.gender,
            email: principal.email.clone(),
            mobile: principal.mobile.clone(),
            account_non_expired: authorization.map(|a| a.account_non_expired),
            account_non_locked: authorization.map(|a| a.account_non_locked),
            credentials_non_expired: authorization.map(|a| a.credentials_non_expired),
            enabled: authorization.map(|a| a.enabled),
        };

        let mut claims = match serde_json::to_value(dto) {
            Ok(Value::Object(map)) => map,
            _ => ClaimsMap::new(),
        };

        let authorities = principal.authorities();
        if !authorities.is_empty() {
            let names = authorities
                .names()
                .map(|n| n.map_or(Value::Null, |n| Value::String(n.to_owned())))
                .collect();
            claims.insert(AUTHORITIES.to_owned(), Value::Array(names));
        }

        claims
    }

    /// Reconstructs an authorized principal from claims
    ///
    /// # Errors
    ///
    /// * [`ClaimsError::Malformed`] if `username` is missing or a field has
    ///   the wrong type
    /// * [`ClaimsError::InvalidAuthorityFormat`] if `authorities` is neither
    ///   a string nor a list
    /// * [`ClaimsError::UnknownUser`] if reconstructing from a directory
    ///   that does not know the user
    pub async fn decode(&self, claims: &ClaimsMap) -> Result<Principal, ClaimsError> {
        let username = match claims.get(USERNAME) {
            Some(Value::String(username)) => username,
            Some(_) => return Err(malformed("username must be a string").into()),
            None => return Err(malformed("missing username").into()),
        };

        let authorities = self.authorities(claims.get(AUTHORITIES))?;

        match &self.source {
            PrincipalSource::Directory(directory) => {
                let mut principal = match directory.find_by_username(username).await {
                    Ok(principal) => principal,
                    Err(DirectoryError::NotFound) => {
                        tracing::debug!(%username, "token names a user unknown to the directory");
                        return Err(ClaimsError::UnknownUser);
                    }
                    Err(err) => return Err(ClaimsError::Directory(err)),
                };
                principal.erase_credentials();
                Ok(principal)
            }
            PrincipalSource::Claims => {
                let dto: PrincipalClaims = serde_json::from_value(Value::Object(claims.clone()))
                    .map_err(malformed)?;

                Ok(Principal {
                    user_id: dto.user_id,
                    username: dto.username,
                    user_no: dto.user_no,
                    nickname: dto.nickname,
                    password: None,
                    realname: dto.realname,
                    portrait: dto.portrait,
                    gender: dto.gender,
                    email: dto.email,
                    mobile: dto.mobile,
                    authorization: Some(AuthorizationState {
                        authorities,
                        account_non_expired: dto.account_non_expired.unwrap_or(true),
                        account_non_locked: dto.account_non_locked.unwrap_or(true),
                        credentials_non_expired: dto.credentials_non_expired.unwrap_or(true),
                        enabled: dto.enabled.unwrap_or(true),
                    }),
                })
            }
        }
    }

    fn authorities(&self, value: Option<&Value>) -> Result<Authorities, InvalidAuthorityFormat> {
        match value {
            None | Some(Value::Null) => Ok(self.default_authorities.clone()),
            Some(Value::String(s)) => Ok(Authorities::from_comma_separated(s)),
            Some(Value::Array(items)) => {
                let mut authorities = Authorities::empty();
                for item in items {
                    match item {
                        Value::String(s) => authorities.extend(Authorities::from_comma_separated(s)),
                        Value::Null => authorities.insert(GrantedAuthority::unresolved()),
                        other => {
                            return Err(InvalidAuthorityFormat {
                                found: type_name(other),
                            })
                        }
                    }
                }
                Ok(authorities)
            }
            Some(other) => Err(InvalidAuthorityFormat {
                found: type_name(other),
            }),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
