//! HTTP integration for `warden` resource servers and client applications,
//! built on `tower_http`
//!
//! Resource servers authenticate bearer tokens with [`BearerAuthorizer`] and
//! then authorize with [`RequireScope`] or [`RequireAuthority`]:
//!
//! ```
//! use tower_http::{auth::AsyncRequireAuthorizationLayer, validate_request::ValidateRequestHeaderLayer};
//! use warden_clock::System;
//! use warden_oauth2::{ClaimsCodec, ClockSkewTokenVerifier, JwtTokenStore, ScopePolicy, TrustedKeys};
//! use warden_tower::{BearerAuthorizer, RequireScope};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = JwtTokenStore::new(TrustedKeys::default(), ClaimsCodec::new());
//! let verifier = ClockSkewTokenVerifier::new(store, System);
//!
//! let authenticate = AsyncRequireAuthorizationLayer::new(
//!     BearerAuthorizer::<_, String>::new(verifier),
//! );
//! let require_read = ValidateRequestHeaderLayer::custom(
//!     RequireScope::<String>::new(ScopePolicy::allow_one("read".parse()?)),
//! );
//! # let _ = (authenticate, require_read);
//! # Ok(())
//! # }
//! ```
//!
//! Failures raised elsewhere in the request pipeline can be written as
//! HTTP errors with the [`ExceptionTranslator`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod bearer;
mod policy;
pub mod redirect;
mod refresh;
mod translator;
pub mod util;

pub use bearer::BearerAuthorizer;
pub use policy::{RequireAuthority, RequireScope};
pub use redirect::{RedirectStrategy, RequestCache, SavingRedirect, SessionRequestCache};
pub use refresh::RefreshGuardAuthorizer;
pub use translator::{
    ErrorResponseWriter, ExceptionTranslator, HttpResponseWriter, MessageSource, OAuth2Error,
    Resolution, StaticMessageSource, WriteError,
};
