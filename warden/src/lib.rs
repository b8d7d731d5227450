//! This crate implements the parts of the Javascript/JSON Object Signing and
//! Encryption (JOSE) standards needed to issue and check bearer tokens:
//!
//! * JSON Web Signature (JWS): [RFC7515][], RSA algorithms only
//! * JSON Web Key (JWK): [RFC7517][], RSA public keys and key sets
//! * JSON Web Token (JWT): [RFC7519][]
//!
//! Signing keys are imported from PEM files, and the matching public keys
//! are published as a [`Jwks`] for independently deployed verifiers. A token
//! naming a key ID that is no longer in the set cannot be verified, which is
//! how a retired signing key is decommissioned.
//!
//! [RFC7515]: https://tools.ietf.org/html/rfc7515
//! [RFC7517]: https://tools.ietf.org/html/rfc7517
//! [RFC7519]: https://tools.ietf.org/html/rfc7519

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

pub mod error;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jwt;

#[doc(inline)]
pub use jwk::Jwk;
#[doc(inline)]
pub use jwks::Jwks;
#[doc(inline)]
pub use jwt::{Jwt, JwtRef};
