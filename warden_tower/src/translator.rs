//! Translation of authorization failures into HTTP error responses

use std::{borrow::Cow, collections::HashMap, fmt};

use http::{header, HeaderValue, Response, StatusCode};
use thiserror::Error;
use warden_oauth2::{
    directory::AuthenticationError, AccessDenied, ClaimsError, InsufficientScope,
    InvalidTokenError, RefreshError,
};
use warden_tokens::{CredentialsError, TokenAcquisitionError};

/// An error that carries an OAuth2 error code and an HTTP status
pub trait OAuth2Error: std::error::Error {
    /// The HTTP status to respond with, if the error has one
    ///
    /// Errors without a status are left to the hosting application.
    fn http_error_code(&self) -> Option<StatusCode>;

    /// The OAuth2 `error` code
    fn oauth2_error_code(&self) -> &'static str;
}

impl OAuth2Error for InvalidTokenError {
    fn http_error_code(&self) -> Option<StatusCode> {
        Some(StatusCode::UNAUTHORIZED)
    }

    fn oauth2_error_code(&self) -> &'static str {
        "invalid_token"
    }
}

impl OAuth2Error for ClaimsError {
    fn http_error_code(&self) -> Option<StatusCode> {
        Some(StatusCode::UNAUTHORIZED)
    }

    fn oauth2_error_code(&self) -> &'static str {
        "invalid_token"
    }
}

impl OAuth2Error for CredentialsError {
    fn http_error_code(&self) -> Option<StatusCode> {
        Some(StatusCode::UNAUTHORIZED)
    }

    fn oauth2_error_code(&self) -> &'static str {
        "unauthorized"
    }
}

impl OAuth2Error for InsufficientScope {
    fn http_error_code(&self) -> Option<StatusCode> {
        Some(StatusCode::FORBIDDEN)
    }

    fn oauth2_error_code(&self) -> &'static str {
        "insufficient_scope"
    }
}

impl OAuth2Error for AccessDenied {
    fn http_error_code(&self) -> Option<StatusCode> {
        Some(StatusCode::FORBIDDEN)
    }

    fn oauth2_error_code(&self) -> &'static str {
        "access_denied"
    }
}

/// A pending redirect is not an error response
impl OAuth2Error for TokenAcquisitionError {
    fn http_error_code(&self) -> Option<StatusCode> {
        match self {
            Self::UserRedirectRequired => None,
            Self::Refresh(_) => Some(StatusCode::UNAUTHORIZED),
        }
    }

    fn oauth2_error_code(&self) -> &'static str {
        "unauthorized"
    }
}

impl OAuth2Error for RefreshError {
    fn http_error_code(&self) -> Option<StatusCode> {
        match self {
            Self::Signing(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }

    fn oauth2_error_code(&self) -> &'static str {
        match self {
            Self::Signing(_) => "server_error",
            _ => "invalid_grant",
        }
    }
}

impl OAuth2Error for AuthenticationError {
    fn http_error_code(&self) -> Option<StatusCode> {
        match self {
            Self::Directory(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }

    fn oauth2_error_code(&self) -> &'static str {
        match self {
            Self::Directory(_) => "server_error",
            _ => "invalid_grant",
        }
    }
}

/// Localizes error messages
pub trait MessageSource {
    /// The message for `code` in `locale`, if one is known
    fn message(&self, code: &str, locale: Option<&str>) -> Option<Cow<'_, str>>;
}

/// A fixed table of localized messages
///
/// Lookups try the requested locale first, then the entry registered
/// without a locale.
#[derive(Clone, Debug, Default)]
pub struct StaticMessageSource {
    messages: HashMap<(Option<String>, String), String>,
}

impl StaticMessageSource {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message for `code`, in `locale` or for any locale
    pub fn with_message(
        mut self,
        locale: Option<&str>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.messages
            .insert((locale.map(str::to_owned), code.into()), message.into());
        self
    }
}

impl MessageSource for StaticMessageSource {
    fn message(&self, code: &str, locale: Option<&str>) -> Option<Cow<'_, str>> {
        let lookup = |locale: Option<&str>| {
            self.messages
                .get(&(locale.map(str::to_owned), code.to_owned()))
                .map(|m| Cow::Borrowed(m.as_str()))
        };

        locale.and_then(|l| lookup(Some(l))).or_else(|| lookup(None))
    }
}

/// The error response could not be written
#[derive(Debug, Error)]
pub enum WriteError {
    /// A response has already been written
    #[error("response already committed")]
    ResponseCommitted,
    /// The response could not be constructed
    #[error("unable to build error response")]
    InvalidResponse(#[from] http::Error),
}

/// A sink for a single error response
pub trait ErrorResponseWriter {
    /// Writes an error status with an optional message body
    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<(), WriteError>;
}

/// Builds an [`http::Response`] from the first error written to it
pub struct HttpResponseWriter<B = String> {
    response: Option<Response<B>>,
}

impl<B> fmt::Debug for HttpResponseWriter<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HttpResponseWriter")
            .field("status", &self.response.as_ref().map(|r| r.status()))
            .finish()
    }
}

impl<B> Default for HttpResponseWriter<B> {
    fn default() -> Self {
        Self { response: None }
    }
}

impl<B> HttpResponseWriter<B> {
    /// A writer that has not yet been written to
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a response has been written
    pub fn is_committed(&self) -> bool {
        self.response.is_some()
    }

    /// The written response, if any
    pub fn into_response(self) -> Option<Response<B>> {
        self.response
    }
}

impl<B: Default + From<String>> ErrorResponseWriter for HttpResponseWriter<B> {
    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<(), WriteError> {
        if self.is_committed() {
            return Err(WriteError::ResponseCommitted);
        }

        let builder = Response::builder().status(status);
        let response = match message {
            Some(message) => builder
                .header(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )
                .body(B::from(message.to_owned()))?,
            None => builder.body(B::default())?,
        };

        self.response = Some(response);
        Ok(())
    }
}

/// Whether the translator produced a response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// An error response was written
    Handled,
    /// The error was left for the hosting application to handle
    Unhandled,
}

/// Writes OAuth2 errors as HTTP error responses
///
/// Messages are localized through the message source when one is
/// configured, keyed by the error's message and falling back to that
/// message as-is. Failures while writing the response are logged and the
/// error is reported as unhandled, so translation never replaces the
/// original error.
#[derive(Clone, Debug)]
pub struct ExceptionTranslator<M = StaticMessageSource> {
    messages: Option<M>,
}

impl Default for ExceptionTranslator<StaticMessageSource> {
    fn default() -> Self {
        Self { messages: None }
    }
}

impl ExceptionTranslator<StaticMessageSource> {
    /// A translator that writes messages as-is
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M: MessageSource> ExceptionTranslator<M> {
    /// A translator that localizes messages through `messages`
    pub fn with_message_source(messages: M) -> Self {
        Self {
            messages: Some(messages),
        }
    }

    fn localize<'a>(&'a self, message: &'a str, locale: Option<&str>) -> Cow<'a, str> {
        self.messages
            .as_ref()
            .and_then(|m| m.message(message, locale))
            .unwrap_or(Cow::Borrowed(message))
    }

    /// Writes `error` to `writer` if it carries an HTTP status
    pub fn resolve<E, W>(&self, error: &E, locale: Option<&str>, writer: &mut W) -> Resolution
    where
        E: OAuth2Error + ?Sized,
        W: ErrorResponseWriter + ?Sized,
    {
        let Some(status) = error.http_error_code() else {
            tracing::trace!(
                error.code = error.oauth2_error_code(),
                "error has no status; leaving it unhandled"
            );
            return Resolution::Unhandled;
        };

        let message = error.to_string();
        let result = if message.is_empty() {
            writer.send_error(status, None)
        } else {
            writer.send_error(status, Some(self.localize(&message, locale).as_ref()))
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    response.status = status.as_u16(),
                    error.code = error.oauth2_error_code(),
                    "resolved authorization failure"
                );
                Resolution::Handled
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "failure while trying to resolve exception");
                Resolution::Unhandled
            }
        }
    }
}
