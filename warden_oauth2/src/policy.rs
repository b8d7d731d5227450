//! Access policies evaluated by resource servers

use thiserror::Error;

use crate::{Authorities, Scope};

/// An access policy that either admits or denies a request
pub trait Policy {
    /// The held permissions a request is evaluated against
    type Request: ?Sized;
    /// The reason given when access is denied
    type Denial;

    /// Evaluates the request against the policy
    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial>;
}

/// Indicates the requester held insufficient scope to be granted access
/// to a controlled resource
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("insufficient scope")]
pub struct InsufficientScope;

/// Indicates the requester did not hold any of the authorities required
/// to access a controlled resource
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("access is denied")]
pub struct AccessDenied;

/// An access policy based on OAuth2 scopes
///
/// The policy is a list of alternatives. A request is allowed if its scope
/// contains every token of any one alternative. A policy with no
/// alternatives denies every request.
///
/// ```
/// use warden_oauth2::{Policy, Scope, ScopePolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = ScopePolicy::allow_one("USER".parse()?).or_allow("admin".parse()?);
///
/// assert!(policy.evaluate(&"USER read".parse()?).is_ok());
/// assert!(policy.evaluate(&"read".parse()?).is_err());
/// assert!(ScopePolicy::deny_all().evaluate(&Scope::empty()).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct ScopePolicy {
    alternatives: Vec<Scope>,
}

impl ScopePolicy {
    /// Constructs a policy that has no permissible alternatives
    #[inline]
    pub const fn deny_all() -> Self {
        Self {
            alternatives: Vec::new(),
        }
    }

    /// Constructs a policy that does not require any scopes
    #[inline]
    pub fn allow_any() -> Self {
        Self::allow_one(Scope::empty())
    }

    /// Constructs a policy that requires this set of scopes
    #[inline]
    pub fn allow_one(scope: Scope) -> Self {
        Self {
            alternatives: vec![scope],
        }
    }

    /// Adds an alternate allowable scope
    #[inline]
    pub fn or_allow(mut self, scope: Scope) -> Self {
        self.alternatives.push(scope);
        self
    }
}

impl<'a> IntoIterator for &'a ScopePolicy {
    type Item = &'a Scope;
    type IntoIter = std::slice::Iter<'a, Scope>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.alternatives.iter()
    }
}

impl Policy for ScopePolicy {
    type Request = Scope;
    type Denial = InsufficientScope;

    fn evaluate(&self, held: &Scope) -> Result<(), InsufficientScope> {
        if self.alternatives.iter().any(|req| held.contains_all(req)) {
            Ok(())
        } else {
            Err(InsufficientScope)
        }
    }
}

/// An access policy requiring any one of a set of authorities
///
/// A policy with no required authorities denies every request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct AuthorityPolicy {
    any_of: Vec<String>,
}

impl AuthorityPolicy {
    /// Requires the named authority
    pub fn require(authority: impl Into<String>) -> Self {
        Self {
            any_of: vec![authority.into()],
        }
    }

    /// Also admits holders of the named authority
    pub fn or_require(mut self, authority: impl Into<String>) -> Self {
        self.any_of.push(authority.into());
        self
    }
}

impl Policy for AuthorityPolicy {
    type Request = Authorities;
    type Denial = AccessDenied;

    fn evaluate(&self, held: &Authorities) -> Result<(), AccessDenied> {
        if self.any_of.iter().any(|a| held.contains(a)) {
            Ok(())
        } else {
            Err(AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn allow_any_admits_empty_scope() {
        assert!(ScopePolicy::allow_any().evaluate(&Scope::empty()).is_ok());
    }

    #[test]
    fn every_token_of_an_alternative_is_required() -> Result<()> {
        let policy = ScopePolicy::allow_one("read write".parse()?);
        assert_eq!(policy.evaluate(&"read".parse()?), Err(InsufficientScope));
        assert!(policy.evaluate(&"write read admin".parse()?).is_ok());
        Ok(())
    }

    #[test]
    fn authority_policy_is_any_of() {
        let policy = AuthorityPolicy::require("ROLE_ADMIN").or_require("ROLE_USER");
        assert!(policy
            .evaluate(&Authorities::from_comma_separated("ROLE_USER"))
            .is_ok());
        assert_eq!(
            policy.evaluate(&Authorities::from_comma_separated("ROLE_GUEST")),
            Err(AccessDenied)
        );
        assert!(AuthorityPolicy::default()
            .evaluate(&Authorities::from_comma_separated("ROLE_USER"))
            .is_err());
    }
}
