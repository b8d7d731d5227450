use std::{fmt, future::Future, marker::PhantomData, pin::Pin, sync::Arc};

use http::{Request, Response};
use tower_http::auth::AsyncAuthorizeRequest;
use warden_oauth2::{AccessToken, AuthenticationLoader, OAuth2Authentication, TokenDetails, BEARER};

use crate::util::unauthorized;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Authenticates requests bearing an OAuth2 access token
///
/// The token is read from the `Authorization: Bearer` header and resolved
/// by the loader. On success, the resulting `Arc<OAuth2Authentication>` is
/// made available through [`Request::extensions`]. Requests without a
/// usable token are rejected with `401 Unauthorized`.
pub struct BearerAuthorizer<L, ResBody> {
    loader: Arc<L>,
    _body: PhantomData<fn() -> ResBody>,
}

impl<L, ResBody> Clone for BearerAuthorizer<L, ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            _body: PhantomData,
        }
    }
}

impl<L: fmt::Debug, ResBody> fmt::Debug for BearerAuthorizer<L, ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BearerAuthorizer")
            .field("loader", &self.loader)
            .finish()
    }
}

impl<L, ResBody> BearerAuthorizer<L, ResBody> {
    /// Authenticates tokens with `loader`
    #[inline]
    pub fn new(loader: L) -> Self {
        Self::from_shared(Arc::new(loader))
    }

    /// Authenticates tokens with a loader shared with other components
    #[inline]
    pub fn from_shared(loader: Arc<L>) -> Self {
        Self {
            loader,
            _body: PhantomData,
        }
    }
}

impl<L, ReqBody, ResBody> AsyncAuthorizeRequest<ReqBody> for BearerAuthorizer<L, ResBody>
where
    L: AuthenticationLoader + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = ResBody;
    type Future = BoxFuture<Result<Request<ReqBody>, Response<ResBody>>>;

    fn authorize(&mut self, request: Request<ReqBody>) -> Self::Future {
        Box::pin(authenticate(Arc::clone(&self.loader), request))
    }
}

async fn authenticate<L, ReqBody, ResBody>(
    loader: Arc<L>,
    mut request: Request<ReqBody>,
) -> Result<Request<ReqBody>, Response<ResBody>>
where
    L: AuthenticationLoader,
    ResBody: Default,
{
    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .ok_or_else(|| {
            tracing::debug!("bearer token is missing or malformed");
            unauthorized("authorization token is missing or malformed")
        })?;

    let authentication = match loader.load_authentication(&token).await {
        Ok(authentication) => authentication,
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::debug!(error, "bearer token rejected");
            return Err(unauthorized(&err.to_string()));
        }
    };

    tracing::trace!(principal = authentication.name(), "bearer token accepted");
    let authentication: Arc<OAuth2Authentication> =
        Arc::new(authentication.with_details(TokenDetails {
            token_value: token,
            token_type: BEARER.to_owned(),
        }));
    request.extensions_mut().insert(authentication);

    Ok(request)
}

fn extract_bearer(auth: &str) -> Option<AccessToken> {
    if auth.len() <= 7 || !auth.is_char_boundary(7) || !auth[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = auth[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(AccessToken::from(token))
    }
}
