//! Registered OAuth2 clients

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::{Authorities, ClientId, ClientIdRef, ClientSecret, Scope};

/// An error while loading a client registration
#[derive(Debug, Error)]
pub enum ClientRegistrationError {
    /// No client is registered under the requested ID
    #[error("no client with requested id: {client_id}")]
    NoSuchClient {
        /// The requested client ID
        client_id: ClientId,
    },
    /// The registry could not be reached or answered unexpectedly
    #[error("client registry unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// The registration of an OAuth2 client with the authorization server
#[derive(Clone, Debug, Deserialize)]
pub struct ClientDetails {
    /// The client's identifier
    pub client_id: ClientId,
    /// The client's secret, absent for public clients
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
    /// Scopes the client may request
    #[serde(default)]
    pub scope: Scope,
    /// Authorities granted to the client itself
    #[serde(default = "default_client_authorities", with = "comma_separated")]
    pub authorities: Authorities,
    /// Grant types the client may use, such as `authorization_code`
    #[serde(default)]
    pub authorized_grant_types: Vec<String>,
    /// Redirect URIs registered for the authorization code flow
    #[serde(default)]
    pub registered_redirect_uris: Vec<String>,
    /// Overrides the signer's access token validity, in seconds
    #[serde(default)]
    pub access_token_validity_secs: Option<u64>,
    /// Overrides the signer's refresh token validity, in seconds
    #[serde(default)]
    pub refresh_token_validity_secs: Option<u64>,
}

fn default_client_authorities() -> Authorities {
    Authorities::from_comma_separated("ROLE_USER")
}

mod comma_separated {
    use serde::{Deserialize, Deserializer};

    use crate::Authorities;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Authorities, D::Error> {
        let s = String::deserialize(d)?;
        Ok(Authorities::from_comma_separated(&s))
    }
}

impl ClientDetails {
    /// A confidential client with default authorities and no grants
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            client_secret: None,
            scope: Scope::empty(),
            authorities: default_client_authorities(),
            authorized_grant_types: Vec::new(),
            registered_redirect_uris: Vec::new(),
            access_token_validity_secs: None,
            refresh_token_validity_secs: None,
        }
    }

    /// Sets the client secret
    pub fn with_secret(self, secret: ClientSecret) -> Self {
        Self {
            client_secret: Some(secret),
            ..self
        }
    }

    /// Sets the scopes the client may request
    pub fn with_scope(self, scope: Scope) -> Self {
        Self { scope, ..self }
    }

    /// Adds an allowed grant type
    pub fn with_grant_type(mut self, grant_type: impl Into<String>) -> Self {
        self.authorized_grant_types.push(grant_type.into());
        self
    }

    /// Overrides the access token validity for this client
    pub fn with_access_token_validity(self, validity: Duration) -> Self {
        Self {
            access_token_validity_secs: Some(validity.as_secs()),
            ..self
        }
    }

    /// Whether the client may use the given grant type
    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.authorized_grant_types.iter().any(|g| g == grant_type)
    }

    /// The client's access token validity, if overridden
    pub fn access_token_validity(&self) -> Option<Duration> {
        self.access_token_validity_secs.map(Duration::from_secs)
    }

    /// The client's refresh token validity, if overridden
    pub fn refresh_token_validity(&self) -> Option<Duration> {
        self.refresh_token_validity_secs.map(Duration::from_secs)
    }
}

/// A source of client registrations
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Loads the registration for `client_id`
    async fn load_client(
        &self,
        client_id: &ClientIdRef,
    ) -> Result<ClientDetails, ClientRegistrationError>;
}

/// A client registry held in memory
#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientDetails>>,
}

impl InMemoryClientRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client, replacing any previous registration
    pub fn register(&self, details: ClientDetails) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(details.client_id.clone(), details);
    }

    /// Removes a registration, returning whether one was present
    pub fn unregister(&self, client_id: &ClientIdRef) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.remove(client_id).is_some()
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn load_client(
        &self,
        client_id: &ClientIdRef,
    ) -> Result<ClientDetails, ClientRegistrationError> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| ClientRegistrationError::NoSuchClient {
                client_id: client_id.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[tokio::test]
    async fn unknown_clients_are_rejected() {
        let registry = InMemoryClientRegistry::new();
        let result = registry.load_client(ClientIdRef::from_static("nobody")).await;
        assert!(matches!(
            result,
            Err(ClientRegistrationError::NoSuchClient { .. })
        ));
    }

    #[tokio::test]
    async fn registered_clients_default_to_role_user() -> Result<()> {
        let registry = InMemoryClientRegistry::new();
        registry.register(
            ClientDetails::new(ClientId::from_static("web"))
                .with_grant_type("authorization_code")
                .with_grant_type("refresh_token"),
        );

        let details = registry.load_client(ClientIdRef::from_static("web")).await?;
        assert!(details.authorities.contains("ROLE_USER"));
        assert!(details.allows_grant("refresh_token"));
        assert!(!details.allows_grant("password"));

        assert!(registry.unregister(ClientIdRef::from_static("web")));
        assert!(registry.load_client(ClientIdRef::from_static("web")).await.is_err());
        Ok(())
    }

    #[test]
    fn deserializes_with_defaults() -> Result<()> {
        let details: ClientDetails = serde_json::from_str(
            r#"{
                "client_id": "web",
                "scope": "USER read",
                "authorities": "ROLE_CLIENT, ROLE_TRUSTED",
                "access_token_validity_secs": 600
            }"#,
        )?;
        assert!(details.scope.contains("read"));
        assert!(details.authorities.contains("ROLE_TRUSTED"));
        assert!(!details.authorities.contains("ROLE_USER"));
        assert_eq!(details.access_token_validity(), Some(Duration::from_secs(600)));
        assert_eq!(details.refresh_token_validity(), None);
        Ok(())
    }
}
