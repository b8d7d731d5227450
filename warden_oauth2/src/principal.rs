//! The authenticated user record

use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::{Authorities, Password};

/// An authenticated user
///
/// Identity is determined solely by the `user_id` and `username` pair: two
/// principals with equal identity compare equal even when their profile
/// fields or authorities differ.
///
/// A principal produced by authentication carries an [`AuthorizationState`],
/// which holds the roles and account flags used in access decisions.
#[derive(Clone, Debug, Default)]
pub struct Principal {
    /// Stable identity of the user
    pub user_id: String,
    /// Unique login name, used as the OAuth2 name and as the directory key
    pub username: String,
    /// Organization-assigned user number
    pub user_no: Option<String>,
    /// Display nickname
    pub nickname: Option<String>,
    /// Present only while credentials are being verified
    pub password: Option<Password>,
    /// Legal name
    pub realname: Option<String>,
    /// Avatar location
    pub portrait: Option<String>,
    /// Gender code
    pub gender: Option<i32>,
    /// Email address
    pub email: Option<String>,
    /// Mobile phone number
    pub mobile: Option<String>,
    /// Roles and account status, when the principal has been authorized
    pub authorization: Option<AuthorizationState>,
}

impl Principal {
    /// A principal with the given identity and no other attributes
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    /// Attaches an authorization state
    pub fn with_authorization(self, authorization: AuthorizationState) -> Self {
        Self {
            authorization: Some(authorization),
            ..self
        }
    }

    /// The OAuth2 name of the principal
    #[inline]
    pub fn name(&self) -> &str {
        &self.username
    }

    /// Whether this principal carries roles and account flags
    #[inline]
    pub fn has_authorization_state(&self) -> bool {
        self.authorization.is_some()
    }

    /// The principal's authorities, or none if it has not been authorized
    pub fn authorities(&self) -> &Authorities {
        static NONE: Authorities = Authorities::empty();
        self.authorization
            .as_ref()
            .map_or(&NONE, |a| &a.authorities)
    }

    /// Drops the password so it cannot outlive credential verification
    #[inline]
    pub fn erase_credentials(&mut self) {
        self.password = None;
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.username == other.username
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.username.hash(state);
    }
}

/// Roles and account status attached to an authorized principal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationState {
    /// Granted roles and authorities
    pub authorities: Authorities,
    /// `false` once the account has passed its expiry
    pub account_non_expired: bool,
    /// `false` while the account is locked
    pub account_non_locked: bool,
    /// `false` once the password must be changed
    pub credentials_non_expired: bool,
    /// `false` while the account is disabled
    pub enabled: bool,
}

impl AuthorizationState {
    /// An active account holding `authorities`
    pub fn new(authorities: Authorities) -> Self {
        Self {
            authorities,
            account_non_expired: true,
            account_non_locked: true,
            credentials_non_expired: true,
            enabled: true,
        }
    }

    /// Derives account flags from a directory status code
    ///
    /// Status `1` marks a locked account and `2` a disabled one; any other
    /// value is an active account.
    pub fn from_status(authorities: Authorities, status: i32) -> Self {
        Self {
            account_non_locked: status != 1,
            enabled: status != 2,
            ..Self::new(authorities)
        }
    }

    /// Fails if any account flag forbids authentication
    pub fn check_account_status(&self) -> Result<(), AccountStatusError> {
        if !self.account_non_locked {
            Err(AccountStatusError::Locked)
        } else if !self.enabled {
            Err(AccountStatusError::Disabled)
        } else if !self.account_non_expired {
            Err(AccountStatusError::Expired)
        } else if !self.credentials_non_expired {
            Err(AccountStatusError::CredentialsExpired)
        } else {
            Ok(())
        }
    }
}

/// The account may not be used to authenticate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AccountStatusError {
    /// The account is locked
    #[error("user account is locked")]
    Locked,
    /// The account is disabled
    #[error("user is disabled")]
    Disabled,
    /// The account has expired
    #[error("user account has expired")]
    Expired,
    /// The credentials have expired
    #[error("user credentials have expired")]
    CredentialsExpired,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identity_is_user_id_and_username() {
        let mut a = Principal::new("u-1", "alice");
        a.nickname = Some("Al".to_owned());
        let b = Principal::new("u-1", "alice").with_authorization(AuthorizationState::new(
            Authorities::from_comma_separated("ROLE_USER"),
        ));
        assert_eq!(a, b);

        let set: HashSet<_> = vec![a, b].into_iter().collect();
        assert_eq!(set.len(), 1);

        assert_ne!(Principal::new("u-1", "alice"), Principal::new("u-2", "alice"));
        assert_ne!(Principal::new("u-1", "alice"), Principal::new("u-1", "bob"));
    }

    #[test]
    fn capability_check() {
        let p = Principal::new("u-1", "alice");
        assert!(!p.has_authorization_state());
        assert!(p.authorities().is_empty());

        let p = p.with_authorization(AuthorizationState::new(
            Authorities::from_comma_separated("ROLE_USER"),
        ));
        assert!(p.has_authorization_state());
        assert!(p.authorities().contains("ROLE_USER"));
    }

    #[test]
    fn erasing_drops_password() {
        let mut p = Principal::new("u-1", "alice");
        p.password = Some(Password::from_static("secret"));
        p.erase_credentials();
        assert!(p.password.is_none());
    }

    #[test]
    fn status_codes_map_to_flags() {
        let locked = AuthorizationState::from_status(Authorities::empty(), 1);
        assert_eq!(locked.check_account_status(), Err(AccountStatusError::Locked));

        let disabled = AuthorizationState::from_status(Authorities::empty(), 2);
        assert_eq!(disabled.check_account_status(), Err(AccountStatusError::Disabled));

        let active = AuthorizationState::from_status(Authorities::empty(), 0);
        assert_eq!(active.check_account_status(), Ok(()));
    }
}
