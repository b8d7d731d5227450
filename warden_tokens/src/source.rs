//! Refresh token exchange with an OAuth2 authorization server

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use warden_clock::Clock;
use warden_oauth2::{AccessToken, ClientId, ClientSecret, RefreshToken, RefreshTokenRef};

use crate::{ClientToken, TokenLifetimeConfig};

/// Exchanges a refresh token for a new client token
#[async_trait]
pub trait RefreshSource: Send + Sync {
    /// The error type returned in the event that the exchange fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Requests a new token using `refresh_token`
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<ClientToken, Self::Error>;
}

/// Client credentials presented to the token endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,
    /// The client secret, if required
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
}

/// Deployable client settings
#[derive(Clone, Debug, Deserialize)]
pub struct ClientSettings {
    /// The authorization server's token endpoint
    pub token_url: url::Url,
    /// The client's credentials
    #[serde(flatten)]
    pub credentials: ClientCredentials,
}

struct RefreshRequest<'a> {
    credentials: &'a ClientCredentials,
    refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshRequest", 4)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        if let Some(secret) = &self.credentials.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: AccessToken,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    expires_in: u64,
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

/// Exchanges refresh tokens at an authorization server's token endpoint
///
/// Credentials are sent as URL-encoded form data. If the authority rotates
/// the refresh token, the new one is kept; otherwise the presented refresh
/// token is carried forward.
#[derive(Debug)]
pub struct RefreshTokenSource<C> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: ClientCredentials,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl<C> RefreshTokenSource<C> {
    /// Constructs a new refresh token source
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: ClientCredentials,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            lifetime_config,
        }
    }

    /// Constructs a refresh token source from deployable settings
    pub fn from_settings(settings: ClientSettings, lifetime_config: TokenLifetimeConfig<C>) -> Self {
        Self::new(
            reqwest::Client::new(),
            settings.token_url,
            settings.credentials,
            lifetime_config,
        )
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> RefreshSource for RefreshTokenSource<C> {
    type Error = TokenRequestError;

    #[tracing::instrument(
        err,
        skip_all,
        fields(
            token_url = %self.token_url,
            credentials.client_id = %self.credentials.client_id,
        ),
    )]
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<ClientToken, Self::Error> {
        tracing::trace!("requesting token from authority");

        let request = RefreshRequest {
            credentials: &self.credentials,
            refresh_token,
        };
        let resp = self
            .client
            .post(self.token_url.clone())
            .form(&request)
            .send()
            .await
            .map_err(TokenRequestError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from issuing authority"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp
                .text()
                .await
                .map_err(TokenRequestError::BodyReadError)?;
            return Err(TokenRequestError::ErrorWithBody {
                source: error,
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        let resp: TokenResponse = serde_json::from_slice(&body)?;

        let rotated = resp.refresh_token.is_some();
        let refresh_token = resp
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_owned());
        let mut token = self.lifetime_config.create_token(
            resp.access_token,
            Some(refresh_token),
            Duration::from_secs(resp.expires_in),
        );
        if let Some(token_type) = resp.token_type {
            token = token.with_token_type(token_type);
        }

        tracing::info!(
            refresh_token.rotated = rotated,
            lifetime = token.lifetime().as_secs(),
            stale = token.stale().0,
            expiry = token.expiry().0,
            "received new tokens"
        );

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use warden_clock::{TestClock, UnixTime};
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000_000);

    fn source(server: &MockServer) -> Result<RefreshTokenSource<TestClock>> {
        Ok(RefreshTokenSource::new(
            reqwest::Client::new(),
            reqwest::Url::parse(&format!("{}/oauth/token", server.uri()))?,
            ClientCredentials {
                client_id: ClientId::from_static("web"),
                client_secret: Some(ClientSecret::from_static("s3cret")),
            },
            TokenLifetimeConfig::default().with_clock(TestClock::new(NOW)),
        ))
    }

    #[tokio::test]
    async fn exchanges_refresh_token_with_form_credentials() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=web"))
            .and(body_string_contains("client_secret=s3cret"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "token_type": "bearer",
                "refresh_token": "r2",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = source(&server)?
            .refresh(RefreshTokenRef::from_static("r1"))
            .await?;

        assert_eq!(token.access_token().as_str(), "a2");
        assert_eq!(token.token_type(), "bearer");
        assert_eq!(token.refresh_token().map(|r| r.as_str()), Some("r2"));
        assert_eq!(token.expiry(), NOW + Duration::from_secs(3600));
        Ok(())
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_not_rotated() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "expires_in": 60,
            })))
            .mount(&server)
            .await;

        let token = source(&server)?
            .refresh(RefreshTokenRef::from_static("r1"))
            .await?;
        assert_eq!(token.refresh_token().map(|r| r.as_str()), Some("r1"));
        assert_eq!(token.token_type(), warden_oauth2::BEARER);
        Ok(())
    }

    #[tokio::test]
    async fn keeps_token_type_reported_by_authority() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "token_type": "mac",
                "expires_in": 60,
            })))
            .mount(&server)
            .await;

        let token = source(&server)?
            .refresh(RefreshTokenRef::from_static("r1"))
            .await?;
        assert_eq!(token.token_type(), "mac");
        Ok(())
    }

    #[test]
    fn settings_flatten_credentials() -> Result<()> {
        let settings: ClientSettings = serde_json::from_value(json!({
            "token_url": "https://auth.example.com/oauth/token",
            "client_id": "web",
        }))?;
        assert_eq!(settings.token_url.path(), "/oauth/token");
        assert_eq!(settings.credentials.client_id.as_str(), "web");
        assert!(settings.credentials.client_secret.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn error_body_is_preserved() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#,
            ))
            .mount(&server)
            .await;

        let result = source(&server)?
            .refresh(RefreshTokenRef::from_static("r1"))
            .await;
        match result {
            Err(TokenRequestError::ErrorWithBody { body, .. }) => {
                assert!(body.contains("invalid_grant"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }
}
