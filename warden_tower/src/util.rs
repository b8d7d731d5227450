//! Utilities for generating HTTP responses on authorization failures

use http::{header, HeaderValue, Response, StatusCode};
use warden_oauth2::{Scope, ScopePolicy};

/// Build a `401 Unauthorized` response with the appropriate `www-authenticate`
/// header
///
/// The description provided will be automatically escaped to make sure it
/// is header-friendly.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn unauthorized<Body: Default>(description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        challenge("invalid_token", description, None),
    );
    resp
}

/// Build a `403 Forbidden` response with the appropriate `www-authenticate` header(s)
///
/// If a `policy` is given, a `www-authenticate` header is added for each
/// scope alternative the policy allows:
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}" scope="read write"
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}" scope="admin"
/// ```
///
/// Without a policy, or with one that denies everything, a single header
/// without `scope` is sent. `error_description` is omitted if `description`
/// is empty.
pub fn forbidden<Body: Default>(description: &str, policy: Option<&ScopePolicy>) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::FORBIDDEN;

    match policy {
        Some(policy) if policy != &ScopePolicy::deny_all() => {
            for scope in policy {
                resp.headers_mut().append(
                    header::WWW_AUTHENTICATE,
                    challenge("insufficient_scope", description, Some(scope)),
                );
            }
        }
        _ => {
            resp.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                challenge("insufficient_scope", description, None),
            );
        }
    }

    resp
}

// Scope tokens are printable ASCII without `\` or `"`, so `scope` never
// needs escaping.
fn challenge(error: &'static str, description: &str, scope: Option<&Scope>) -> HeaderValue {
    let mut value = format!(r#"Bearer error="{error}""#);
    if !description.is_empty() {
        value.push_str(&format!(
            r#" error_description="{}""#,
            description.escape_default()
        ));
    }
    if let Some(scope) = scope {
        value.push_str(&format!(r#" scope="{scope}""#));
    }

    HeaderValue::try_from(value).unwrap_or_else(|_| match error {
        "invalid_token" => HeaderValue::from_static(r#"Bearer error="invalid_token""#),
        _ => HeaderValue::from_static(r#"Bearer error="insufficient_scope""#),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use color_eyre::Result;

    use super::*;

    fn www_authenticate<B>(resp: &Response<B>) -> BTreeSet<&str> {
        resp.headers()
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    #[test]
    fn unauthorized_escapes_non_printing_description() {
        let resp = unauthorized::<()>("\0\n\"token\" expired™");

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            www_authenticate(&resp),
            BTreeSet::from([
                r#"Bearer error="invalid_token" error_description="\u{0}\n\"token\" expired\u{2122}""#
            ])
        );
    }

    #[test]
    fn unauthorized_with_empty_description_omits_it() {
        let resp = unauthorized::<()>("");
        assert_eq!(
            www_authenticate(&resp),
            BTreeSet::from([r#"Bearer error="invalid_token""#])
        );
    }

    #[test]
    fn forbidden_lists_each_alternative() -> Result<()> {
        let policy = ScopePolicy::allow_one("write read".parse()?).or_allow("admin".parse()?);
        let resp = forbidden::<()>("insufficient scope", Some(&policy));

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            www_authenticate(&resp),
            BTreeSet::from([
                r#"Bearer error="insufficient_scope" error_description="insufficient scope" scope="read write""#,
                r#"Bearer error="insufficient_scope" error_description="insufficient scope" scope="admin""#,
            ])
        );
        Ok(())
    }

    #[test]
    fn forbidden_with_deny_all_omits_scope() {
        let resp = forbidden::<()>("", Some(&ScopePolicy::deny_all()));
        assert_eq!(
            www_authenticate(&resp),
            BTreeSet::from([r#"Bearer error="insufficient_scope""#])
        );
    }

    #[test]
    fn forbidden_without_policy_omits_scope() {
        let resp = forbidden::<()>("access is denied", None);
        assert_eq!(
            www_authenticate(&resp),
            BTreeSet::from([r#"Bearer error="insufficient_scope" error_description="access is denied""#])
        );
    }
}
