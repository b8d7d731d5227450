//! OAuth2 token issuance and verification with principal claims
//!
//! Access tokens issued by [`JwtTokenSigner`] embed the full [`Principal`]
//! as claims, so a resource server can reconstruct the user with a
//! [`ClaimsCodec`] instead of calling back to a directory. Resource servers
//! verify presented tokens with a [`ClockSkewTokenVerifier`], which tolerates
//! modest disagreement between the issuer's clock and its own.
//!
//! The user directory, client registry, and token store are collaborators
//! supplied by the host through the [`UserDirectory`], [`ClientRegistry`],
//! and [`TokenStore`] traits. In-memory implementations of each are provided.
//!
//! ```
//! use warden_clock::System;
//! use warden_oauth2::{
//!     AuthorizationState, Authorities, ClaimsCodec, ClientId, ClockSkewTokenVerifier,
//!     GrantContext, JwtTokenSigner, JwtTokenStore, Principal, TrustedKeys,
//! };
//! use warden::jwk::{KeyId, SigningKey};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pem = std::fs::read_to_string("../warden/testdata/signing_a.pem")?;
//! let signer = JwtTokenSigner::new(
//!     SigningKey::from_pem(&pem)?,
//!     KeyId::from_static("primary"),
//!     ClaimsCodec::new(),
//!     System,
//! );
//!
//! let alice = Principal::new("u-1", "alice").with_authorization(AuthorizationState::new(
//!     Authorities::from_comma_separated("ROLE_USER"),
//! ));
//! let grant = GrantContext::new(ClientId::from_static("web"), "read".parse()?);
//! let token = signer.issue(&alice, &grant)?;
//!
//! let store = JwtTokenStore::new(TrustedKeys::new(signer.jwks()), ClaimsCodec::new());
//! let verifier = ClockSkewTokenVerifier::new(store, System);
//! let authentication = verifier.load_authentication(&token.value).await?;
//!
//! assert_eq!(authentication.name(), "alice");
//! assert!(authentication.principal.authorities().contains("ROLE_USER"));
//! # Ok(())
//! # }
//! ```

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

mod authorities;
mod braids;
pub mod claims;
mod client;
pub mod directory;
mod keys;
mod policy;
mod principal;
pub mod scope;
mod signer;
mod store;
mod token;
mod verifier;

pub use authorities::{Authorities, GrantedAuthority, InvalidRoleHierarchy, RoleHierarchy};
pub use braids::*;
pub use claims::{ClaimsCodec, ClaimsError, ClaimsMap, PrincipalSource};
pub use client::{ClientDetails, ClientRegistrationError, ClientRegistry, InMemoryClientRegistry};
pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use keys::{KeyError, TrustedKeys};
pub use policy::{AccessDenied, AuthorityPolicy, InsufficientScope, Policy, ScopePolicy};
pub use principal::{AccountStatusError, AuthorizationState, Principal};
pub use scope::{Scope, ScopeToken, ScopeTokenRef};
pub use signer::{
    GrantContext, JwtTokenSigner, RefreshError, SignerSettings, SigningError,
    DEFAULT_ACCESS_TOKEN_VALIDITY, DEFAULT_REFRESH_TOKEN_VALIDITY,
};
pub use store::{InMemoryTokenStore, JwtTokenStore, TokenStore, TokenStoreError};
pub use token::{OAuth2AccessToken, OAuth2Authentication, TokenDetails, BEARER};
pub use verifier::{
    AuthenticationLoader, ClockSkewTokenVerifier, InvalidTokenError, VerifierSettings,
    DEFAULT_MAX_CLOCK_SKEW,
};
