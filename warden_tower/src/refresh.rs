use std::{fmt, marker::PhantomData, sync::Arc};

use http::{header, Request, Response};
use tower_http::auth::AsyncAuthorizeRequest;
use warden_oauth2::AuthenticationLoader;
use warden_tokens::{ClientTokenRefreshGuard, SecurityContext, TokenProvider};

use crate::{
    bearer::BoxFuture, util::unauthorized, ExceptionTranslator, HttpResponseWriter, MessageSource,
    StaticMessageSource,
};

/// Keeps the session's authentication in step with the client's access
/// token before the request is handled
///
/// The session is the `Arc<SecurityContext>` found in the request
/// extensions; requests without one pass through untouched. When the
/// authentication cannot be refreshed, the request is rejected with a
/// response produced by the [`ExceptionTranslator`].
pub struct RefreshGuardAuthorizer<P, L, ResBody, M = StaticMessageSource> {
    guard: Arc<ClientTokenRefreshGuard<P, L>>,
    translator: Arc<ExceptionTranslator<M>>,
    _body: PhantomData<fn() -> ResBody>,
}

impl<P, L, ResBody, M> Clone for RefreshGuardAuthorizer<P, L, ResBody, M> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
            translator: Arc::clone(&self.translator),
            _body: PhantomData,
        }
    }
}

impl<P, L, ResBody, M> fmt::Debug for RefreshGuardAuthorizer<P, L, ResBody, M>
where
    P: fmt::Debug,
    L: fmt::Debug,
    M: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshGuardAuthorizer")
            .field("guard", &self.guard)
            .field("translator", &self.translator)
            .finish()
    }
}

impl<P, L, ResBody> RefreshGuardAuthorizer<P, L, ResBody, StaticMessageSource> {
    /// Runs `guard` ahead of each request, writing failures as-is
    pub fn new(guard: ClientTokenRefreshGuard<P, L>) -> Self {
        Self::with_translator(guard, ExceptionTranslator::new())
    }
}

impl<P, L, ResBody, M> RefreshGuardAuthorizer<P, L, ResBody, M> {
    /// Runs `guard` ahead of each request, writing failures through
    /// `translator`
    pub fn with_translator(
        guard: ClientTokenRefreshGuard<P, L>,
        translator: ExceptionTranslator<M>,
    ) -> Self {
        Self {
            guard: Arc::new(guard),
            translator: Arc::new(translator),
            _body: PhantomData,
        }
    }
}

impl<P, L, ReqBody, ResBody, M> AsyncAuthorizeRequest<ReqBody>
    for RefreshGuardAuthorizer<P, L, ResBody, M>
where
    P: TokenProvider + 'static,
    L: AuthenticationLoader + 'static,
    M: MessageSource + Send + Sync + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + From<String> + Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = ResBody;
    type Future = BoxFuture<Result<Request<ReqBody>, Response<ResBody>>>;

    fn authorize(&mut self, request: Request<ReqBody>) -> Self::Future {
        Box::pin(refresh(
            Arc::clone(&self.guard),
            Arc::clone(&self.translator),
            request,
        ))
    }
}

async fn refresh<P, L, M, ReqBody, ResBody>(
    guard: Arc<ClientTokenRefreshGuard<P, L>>,
    translator: Arc<ExceptionTranslator<M>>,
    request: Request<ReqBody>,
) -> Result<Request<ReqBody>, Response<ResBody>>
where
    P: TokenProvider,
    L: AuthenticationLoader,
    M: MessageSource,
    ResBody: Default + From<String>,
{
    let Some(context) = request.extensions().get::<Arc<SecurityContext>>().cloned() else {
        return Ok(request);
    };

    if let Err(err) = guard.check(&context).await {
        let mut writer = HttpResponseWriter::new();
        translator.resolve(&err, preferred_locale(&request), &mut writer);
        return Err(writer
            .into_response()
            .unwrap_or_else(|| unauthorized(&err.to_string())));
    }

    Ok(request)
}

/// The first language tag of `Accept-Language`
fn preferred_locale<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use color_eyre::Result;
    use http::StatusCode;
    use warden_oauth2::{
        AccessToken, AccessTokenRef, InvalidTokenError, OAuth2Authentication, Principal,
        TokenDetails, BEARER,
    };
    use warden_tokens::{ClientToken, TokenAcquisitionError, TokenLifetimeConfig};

    use super::*;

    #[derive(Debug)]
    struct Rotated;

    #[async_trait]
    impl TokenProvider for Rotated {
        async fn access_token(&self) -> Result<Arc<ClientToken>, TokenAcquisitionError> {
            let token = TokenLifetimeConfig::default().create_token(
                AccessToken::from_static("t2"),
                None,
                Duration::from_secs(3600),
            );
            Ok(Arc::new(token))
        }
    }

    #[derive(Debug)]
    struct Revoked;

    #[async_trait]
    impl AuthenticationLoader for Revoked {
        async fn load_authentication(
            &self,
            _: &AccessTokenRef,
        ) -> Result<OAuth2Authentication, InvalidTokenError> {
            Err(InvalidTokenError::NotFound)
        }
    }

    fn session() -> Arc<SecurityContext> {
        Arc::new(SecurityContext::with_authentication(
            OAuth2Authentication::new(Principal::new("u-1", "alice")).with_details(TokenDetails {
                token_value: AccessToken::from_static("t1"),
                token_type: BEARER.to_owned(),
            }),
        ))
    }

    #[tokio::test]
    async fn requests_without_a_session_pass() -> Result<()> {
        let mut authorizer =
            RefreshGuardAuthorizer::<_, _, String>::new(ClientTokenRefreshGuard::new(Rotated, Revoked));

        assert!(authorizer.authorize(Request::new(())).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_is_translated() -> Result<()> {
        let translator = ExceptionTranslator::with_message_source(
            StaticMessageSource::new().with_message(
                Some("fr"),
                "could not obtain user details from token",
                "impossible de charger l'utilisateur",
            ),
        );
        let mut authorizer = RefreshGuardAuthorizer::<_, _, String, _>::with_translator(
            ClientTokenRefreshGuard::new(Rotated, Revoked),
            translator,
        );

        let context = session();
        let mut request = Request::builder()
            .header(header::ACCEPT_LANGUAGE, "fr, en;q=0.5")
            .body(())?;
        request.extensions_mut().insert(Arc::clone(&context));

        let resp = match authorizer.authorize(request).await {
            Ok(_) => panic!("request admitted with stale session"),
            Err(resp) => resp,
        };

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body(), "impossible de charger l'utilisateur");
        let token = context
            .authentication()
            .and_then(|a| a.details.as_ref().map(|d| d.token_value.clone()));
        assert_eq!(token, Some(AccessToken::from_static("t1")));
        Ok(())
    }

    #[test]
    fn locale_is_first_language_tag() -> Result<()> {
        let request = Request::builder()
            .header(header::ACCEPT_LANGUAGE, "fr;q=0.9, en")
            .body(())?;
        assert_eq!(preferred_locale(&request), Some("fr"));

        let request = Request::builder()
            .header(header::ACCEPT_LANGUAGE, "*")
            .body(())?;
        assert_eq!(preferred_locale(&request), None);
        Ok(())
    }
}
