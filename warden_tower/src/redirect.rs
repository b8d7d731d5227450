//! Redirects into the authorization flow that remember where the user was
//! headed

use std::{collections::HashMap, sync::RwLock};

use aliri_braid::braid;
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use thiserror::Error;

/// Identifies the user session a request belongs to
///
/// A session layer ahead of the redirect is expected to place this in the
/// request extensions.
#[braid]
pub struct SessionId;

/// The parts of a request needed to replay it after authorization
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedRequest {
    method: Method,
    uri: Uri,
}

impl SavedRequest {
    /// Captures the method and URI of `request`
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
        }
    }

    /// The saved method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The saved URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

/// Remembers a request per session
pub trait RequestCache: Send + Sync {
    /// The request saved for the session of `request`, if any
    fn saved_request<B>(&self, request: &Request<B>) -> Option<SavedRequest>;

    /// Saves `request` for its session, replacing any saved request
    fn save_request<B>(&self, request: &Request<B>);
}

/// A request cache keyed by the [`SessionId`] in the request extensions
///
/// Requests without a session ID are never saved.
#[derive(Debug, Default)]
pub struct SessionRequestCache {
    saved: RwLock<HashMap<SessionId, SavedRequest>>,
}

impl SessionRequestCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the request saved for `session`
    pub fn take_request(&self, session: &SessionIdRef) -> Option<SavedRequest> {
        self.saved
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session)
    }
}

impl RequestCache for SessionRequestCache {
    fn saved_request<B>(&self, request: &Request<B>) -> Option<SavedRequest> {
        let session = request.extensions().get::<SessionId>()?;
        self.saved
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session)
            .cloned()
    }

    fn save_request<B>(&self, request: &Request<B>) {
        let Some(session) = request.extensions().get::<SessionId>() else {
            tracing::trace!("request has no session; not saving");
            return;
        };

        self.saved
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.clone(), SavedRequest::from_request(request));
    }
}

/// The redirect location is not a valid header value
#[derive(Debug, Error)]
#[error("invalid redirect location")]
pub struct InvalidLocation(#[from] header::InvalidHeaderValue);

/// Sends the user agent elsewhere
pub trait RedirectStrategy {
    /// Builds a redirect from `request` to `location`
    fn send_redirect<B, ResBody: Default>(
        &self,
        request: &Request<B>,
        location: &str,
    ) -> Result<Response<ResBody>, InvalidLocation>;
}

/// Redirects with `302 Found`
#[derive(Clone, Copy, Debug, Default)]
pub struct FoundRedirect;

impl RedirectStrategy for FoundRedirect {
    fn send_redirect<B, ResBody: Default>(
        &self,
        _request: &Request<B>,
        location: &str,
    ) -> Result<Response<ResBody>, InvalidLocation> {
        let location = HeaderValue::try_from(location)?;

        let mut resp = Response::new(ResBody::default());
        *resp.status_mut() = StatusCode::FOUND;
        resp.headers_mut().insert(header::LOCATION, location);
        Ok(resp)
    }
}

/// Saves the current request before redirecting, unless the session
/// already has one saved
///
/// Keeping the first saved request means a user bounced through several
/// redirects returns to where they originally started.
#[derive(Clone, Debug)]
pub struct SavingRedirect<R, S = FoundRedirect> {
    cache: R,
    inner: S,
}

impl<R: RequestCache> SavingRedirect<R, FoundRedirect> {
    /// Saves into `cache` and redirects with `302 Found`
    pub fn new(cache: R) -> Self {
        Self::wrap(cache, FoundRedirect)
    }
}

impl<R: RequestCache, S: RedirectStrategy> SavingRedirect<R, S> {
    /// Saves into `cache` and redirects with `inner`
    pub fn wrap(cache: R, inner: S) -> Self {
        Self { cache, inner }
    }

    /// The request cache
    pub fn cache(&self) -> &R {
        &self.cache
    }
}

impl<R: RequestCache, S: RedirectStrategy> RedirectStrategy for SavingRedirect<R, S> {
    fn send_redirect<B, ResBody: Default>(
        &self,
        request: &Request<B>,
        location: &str,
    ) -> Result<Response<ResBody>, InvalidLocation> {
        if self.cache.saved_request(request).is_none() {
            tracing::debug!(uri = %request.uri(), "saving request before redirect");
            self.cache.save_request(request);
        }

        self.inner.send_redirect(request, location)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    fn in_session(uri: &'static str) -> Result<Request<()>> {
        let mut request = Request::get(uri).body(())?;
        request
            .extensions_mut()
            .insert(SessionId::from_static("s-1"));
        Ok(request)
    }

    #[test]
    fn redirects_with_found() -> Result<()> {
        let redirect = SavingRedirect::new(SessionRequestCache::new());

        let resp: Response<()> =
            redirect.send_redirect(&in_session("/orders")?, "https://auth.example.com/oauth/authorize")?;

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("https://auth.example.com/oauth/authorize")
        );
        Ok(())
    }

    #[test]
    fn first_saved_request_is_kept() -> Result<()> {
        let redirect = SavingRedirect::new(SessionRequestCache::new());

        let _: Response<()> = redirect.send_redirect(&in_session("/orders/7")?, "/login")?;
        let _: Response<()> = redirect.send_redirect(&in_session("/favicon.ico")?, "/login")?;

        let saved = redirect.cache().take_request(SessionIdRef::from_static("s-1"));
        assert_eq!(
            saved.map(|s| s.uri().to_string()),
            Some("/orders/7".to_owned())
        );
        Ok(())
    }

    #[test]
    fn requests_without_a_session_are_not_saved() -> Result<()> {
        let cache = SessionRequestCache::new();
        let request = Request::get("/orders").body(())?;

        cache.save_request(&request);

        assert!(cache.saved_request(&request).is_none());
        assert!(cache.saved.read().map(|m| m.is_empty()).unwrap_or(false));
        Ok(())
    }

    #[test]
    fn invalid_location_is_an_error() -> Result<()> {
        let redirect = SavingRedirect::new(SessionRequestCache::new());
        let result: Result<Response<()>, _> =
            redirect.send_redirect(&in_session("/orders")?, "/login\nSet-Cookie: x");
        assert!(result.is_err());
        Ok(())
    }
}
