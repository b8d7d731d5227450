//! User directories and password authentication

use std::{collections::HashMap, fmt, sync::RwLock};

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{AccountStatusError, Password, PasswordRef, Principal, RoleHierarchy};

/// An error while looking up a user
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No user has the requested username
    #[error("user not found")]
    NotFound,
    /// The directory could not be reached or answered unexpectedly
    #[error("user directory unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl DirectoryError {
    /// Wraps a backend failure
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Box::new(err))
    }
}

/// A source of user records keyed by username
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetches the current record for `username`
    ///
    /// The returned principal carries its authorization state and, if the
    /// directory stores one, the encoded password.
    async fn find_by_username(&self, username: &str) -> Result<Principal, DirectoryError>;
}

#[async_trait]
impl<D: UserDirectory + ?Sized> UserDirectory for std::sync::Arc<D> {
    async fn find_by_username(&self, username: &str) -> Result<Principal, DirectoryError> {
        (**self).find_by_username(username).await
    }
}

/// A directory held in memory
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, Principal>>,
}

impl InMemoryUserDirectory {
    /// An empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the record for the principal's username
    pub fn insert(&self, principal: Principal) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.insert(principal.username.clone(), principal);
    }

    /// Removes a user, returning whether one was present
    pub fn remove(&self, username: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.remove(username).is_some()
    }
}

impl FromIterator<Principal> for InMemoryUserDirectory {
    fn from_iter<I: IntoIterator<Item = Principal>>(iter: I) -> Self {
        let directory = Self::new();
        for p in iter {
            directory.insert(p);
        }
        directory
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Principal, DirectoryError> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(username).cloned().ok_or(DirectoryError::NotFound)
    }
}

/// Checks a presented password against a directory's stored encoding
pub trait PasswordVerifier: Send + Sync {
    /// Whether `presented` matches the stored `encoded` password
    fn matches(&self, presented: &str, encoded: &PasswordRef) -> bool;
}

/// Compares passwords stored without hashing, optionally tagged `{noop}`
///
/// Intended for tests and local development only.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextPasswords;

impl PasswordVerifier for PlainTextPasswords {
    fn matches(&self, presented: &str, encoded: &PasswordRef) -> bool {
        let stored = encoded.as_str();
        let stored = stored.strip_prefix("{noop}").unwrap_or(stored);
        presented.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// A username and password authentication failure
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The username is unknown or the password did not match
    #[error("bad credentials")]
    BadCredentials,
    /// The account may not authenticate
    #[error(transparent)]
    AccountStatus(#[from] AccountStatusError),
    /// The directory lookup failed
    #[error("user directory lookup failed")]
    Directory(#[source] DirectoryError),
}

/// Authenticates users by username and password against a directory
///
/// A successful authentication yields a principal with its password erased
/// and its authorities expanded through the role hierarchy.
pub struct CredentialsAuthenticator<D, V> {
    directory: D,
    verifier: V,
    hierarchy: RoleHierarchy,
}

impl<D, V> fmt::Debug for CredentialsAuthenticator<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialsAuthenticator")
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

impl<D, V> CredentialsAuthenticator<D, V>
where
    D: UserDirectory,
    V: PasswordVerifier,
{
    /// Constructs an authenticator with a flat role hierarchy
    pub fn new(directory: D, verifier: V) -> Self {
        Self {
            directory,
            verifier,
            hierarchy: RoleHierarchy::default(),
        }
    }

    /// Expands granted roles through `hierarchy`
    pub fn with_role_hierarchy(self, hierarchy: RoleHierarchy) -> Self {
        Self { hierarchy, ..self }
    }

    /// Authenticates `username` with `password`
    ///
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    #[tracing::instrument(skip_all, fields(%username))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Principal, AuthenticationError> {
        let mut principal = match self.directory.find_by_username(username).await {
            Ok(p) => p,
            Err(DirectoryError::NotFound) => {
                tracing::debug!("unknown user");
                return Err(AuthenticationError::BadCredentials);
            }
            Err(err) => return Err(AuthenticationError::Directory(err)),
        };

        let matched = principal
            .password
            .as_deref()
            .map_or(false, |stored| self.verifier.matches(password.as_str(), stored));
        if !matched {
            tracing::debug!("password mismatch");
            return Err(AuthenticationError::BadCredentials);
        }

        if let Some(authorization) = principal.authorization.as_mut() {
            authorization.check_account_status()?;
            authorization.authorities = self.hierarchy.reachable(&authorization.authorities);
        }

        principal.erase_credentials();
        tracing::debug!("user authenticated");
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::{AuthorizationState, Authorities};

    fn directory() -> InMemoryUserDirectory {
        let mut alice = Principal::new("u-1", "alice").with_authorization(AuthorizationState::new(
            Authorities::from_comma_separated("ROLE_ADMIN"),
        ));
        alice.password = Some(Password::from_static("{noop}wonderland"));

        let mut mallory = Principal::new("u-2", "mallory")
            .with_authorization(AuthorizationState::from_status(Authorities::empty(), 1));
        mallory.password = Some(Password::from_static("{noop}secret"));

        vec![alice, mallory].into_iter().collect()
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let result = directory().find_by_username("ghost").await;
        assert!(matches!(result, Err(DirectoryError::NotFound)));
    }

    #[test]
    fn plain_text_strips_noop_tag() {
        let stored = Password::from_static("{noop}pw");
        assert!(PlainTextPasswords.matches("pw", &stored));
        assert!(!PlainTextPasswords.matches("{noop}pw", &stored));
        assert!(PlainTextPasswords.matches("pw", &Password::from_static("pw")));
    }

    #[test]
    fn plain_text_rejects_prefixes_and_extensions() {
        let stored = Password::from_static("{noop}secret");
        assert!(!PlainTextPasswords.matches("secre", &stored));
        assert!(!PlainTextPasswords.matches("secrets", &stored));
        assert!(!PlainTextPasswords.matches("", &stored));
        assert!(!PlainTextPasswords.matches("Secret", &stored));
    }

    #[tokio::test]
    async fn authenticate_erases_password_and_expands_roles() -> Result<()> {
        let authenticator = CredentialsAuthenticator::new(directory(), PlainTextPasswords)
            .with_role_hierarchy("ROLE_ADMIN > ROLE_USER".parse()?);

        let principal = authenticator
            .authenticate("alice", &Password::from_static("wonderland"))
            .await?;

        assert!(principal.password.is_none());
        assert!(principal.authorities().contains("ROLE_USER"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_alike() {
        let authenticator = CredentialsAuthenticator::new(directory(), PlainTextPasswords);

        let wrong = authenticator
            .authenticate("alice", &Password::from_static("looking-glass"))
            .await;
        let unknown = authenticator
            .authenticate("ghost", &Password::from_static("wonderland"))
            .await;

        assert!(matches!(wrong, Err(AuthenticationError::BadCredentials)));
        assert!(matches!(unknown, Err(AuthenticationError::BadCredentials)));
    }

    #[tokio::test]
    async fn locked_accounts_are_refused() {
        let authenticator = CredentialsAuthenticator::new(directory(), PlainTextPasswords);
        let result = authenticator
            .authenticate("mallory", &Password::from_static("secret"))
            .await;
        assert!(matches!(
            result,
            Err(AuthenticationError::AccountStatus(AccountStatusError::Locked))
        ));
    }
}
