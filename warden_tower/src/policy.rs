use std::{fmt, marker::PhantomData, sync::Arc};

use http::{Request, Response};
use tower_http::validate_request::ValidateRequest;
use warden_oauth2::{AuthorityPolicy, OAuth2Authentication, Policy, ScopePolicy};

use crate::util::{forbidden, unauthorized};

/// Authorizer that checks the scope granted to an authenticated request
/// against a scope policy
///
/// The authentication is expected to have already been added to the
/// request extensions, such as by the [`BearerAuthorizer`](crate::BearerAuthorizer).
pub struct RequireScope<ResBody> {
    policy: ScopePolicy,
    _body: PhantomData<fn() -> ResBody>,
}

impl<ResBody> Clone for RequireScope<ResBody> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            _body: PhantomData,
        }
    }
}

impl<ResBody> fmt::Debug for RequireScope<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequireScope")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<ResBody> RequireScope<ResBody> {
    /// Requires the request's scope to satisfy `policy`
    #[inline]
    pub fn new(policy: ScopePolicy) -> Self {
        Self {
            policy,
            _body: PhantomData,
        }
    }
}

impl<ReqBody, ResBody: Default> ValidateRequest<ReqBody> for RequireScope<ResBody> {
    type ResponseBody = ResBody;

    fn validate(&mut self, request: &mut Request<ReqBody>) -> Result<(), Response<ResBody>> {
        let authentication = request
            .extensions()
            .get::<Arc<OAuth2Authentication>>()
            .ok_or_else(|| unauthorized(""))?;

        tracing::trace!(scope = %authentication.scope, policy = ?self.policy, "evaluating scope policy");

        self.policy
            .evaluate(&authentication.scope)
            .map_err(|err| forbidden(&err.to_string(), Some(&self.policy)))
    }
}

/// Authorizer that requires an authenticated principal to hold one of a
/// set of authorities
pub struct RequireAuthority<ResBody> {
    policy: AuthorityPolicy,
    _body: PhantomData<fn() -> ResBody>,
}

impl<ResBody> Clone for RequireAuthority<ResBody> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            _body: PhantomData,
        }
    }
}

impl<ResBody> fmt::Debug for RequireAuthority<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequireAuthority")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<ResBody> RequireAuthority<ResBody> {
    /// Requires the principal's authorities to satisfy `policy`
    #[inline]
    pub fn new(policy: AuthorityPolicy) -> Self {
        Self {
            policy,
            _body: PhantomData,
        }
    }
}

impl<ReqBody, ResBody: Default> ValidateRequest<ReqBody> for RequireAuthority<ResBody> {
    type ResponseBody = ResBody;

    fn validate(&mut self, request: &mut Request<ReqBody>) -> Result<(), Response<ResBody>> {
        let authentication = request
            .extensions()
            .get::<Arc<OAuth2Authentication>>()
            .filter(|a| !a.is_anonymous())
            .ok_or_else(|| unauthorized(""))?;

        self.policy
            .evaluate(authentication.principal.authorities())
            .map_err(|err| forbidden(&err.to_string(), None))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use http::{header, StatusCode};
    use warden_oauth2::{AuthorizationState, Authorities, Principal};

    use super::*;

    fn authenticated(scope: &str, authorities: &str) -> Result<Request<()>> {
        let principal = Principal::new("u-1", "alice").with_authorization(
            AuthorizationState::new(Authorities::from_comma_separated(authorities)),
        );
        let authentication = OAuth2Authentication::new(principal).with_scope(scope.parse()?);

        let mut request = Request::new(());
        request.extensions_mut().insert(Arc::new(authentication));
        Ok(request)
    }

    #[test]
    fn scope_policy_admits_matching_scope() -> Result<()> {
        let mut require = RequireScope::<()>::new(ScopePolicy::allow_one("read".parse()?));
        assert!(require.validate(&mut authenticated("read write", "")?).is_ok());
        Ok(())
    }

    #[test]
    fn insufficient_scope_is_forbidden_with_challenge() -> Result<()> {
        let mut require = RequireScope::<()>::new(ScopePolicy::allow_one("admin".parse()?));

        let resp = match require.validate(&mut authenticated("read", "")?) {
            Ok(()) => panic!("admitted insufficient scope"),
            Err(resp) => resp,
        };
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok()),
            Some(r#"Bearer error="insufficient_scope" error_description="insufficient scope" scope="admin""#)
        );
        Ok(())
    }

    #[test]
    fn unauthenticated_requests_are_unauthorized() -> Result<()> {
        let mut scope = RequireScope::<()>::new(ScopePolicy::allow_any());
        let mut authority = RequireAuthority::<()>::new(AuthorityPolicy::require("ROLE_USER"));

        let scope_resp = scope.validate(&mut Request::new(())).err();
        let authority_resp = authority.validate(&mut Request::new(())).err();

        assert_eq!(scope_resp.map(|r| r.status()), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(
            authority_resp.map(|r| r.status()),
            Some(StatusCode::UNAUTHORIZED)
        );
        Ok(())
    }

    #[test]
    fn authority_policy_is_any_of() -> Result<()> {
        let mut require = RequireAuthority::<()>::new(
            AuthorityPolicy::require("ROLE_ADMIN").or_require("ROLE_OPS"),
        );

        assert!(require
            .validate(&mut authenticated("", "ROLE_USER,ROLE_OPS")?)
            .is_ok());

        let denied = require.validate(&mut authenticated("", "ROLE_USER")?).err();
        assert_eq!(denied.map(|r| r.status()), Some(StatusCode::FORBIDDEN));
        Ok(())
    }

    #[test]
    fn anonymous_principal_is_not_authorized() {
        let mut require = RequireAuthority::<()>::new(AuthorityPolicy::require("ROLE_USER"));

        let mut request = Request::new(());
        request
            .extensions_mut()
            .insert(Arc::new(OAuth2Authentication::anonymous()));

        let resp = require.validate(&mut request).err();
        assert_eq!(resp.map(|r| r.status()), Some(StatusCode::UNAUTHORIZED));
    }
}
