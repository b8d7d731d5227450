//! Common errors

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

use crate::jwa;

/// The JWK cannot be used with the requested algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key incompatible with algorithm '{alg}'")]
pub struct IncompatibleAlgorithm {
    alg: jwa::Algorithm,
}

impl IncompatibleAlgorithm {
    /// The algorithm that was requested
    pub fn algorithm(&self) -> jwa::Algorithm {
        self.alg
    }
}

#[inline]
pub(crate) fn incompatible_algorithm(alg: jwa::Algorithm) -> IncompatibleAlgorithm {
    IncompatibleAlgorithm { alg }
}

/// The provided name could not be matched with supported algorithms
#[derive(Debug, Error)]
#[error("'{alg}' does not match supported algorithms")]
pub struct UnknownAlgorithm {
    alg: String,
}

#[inline]
pub(crate) fn unknown_algorithm(alg: String) -> UnknownAlgorithm {
    UnknownAlgorithm { alg }
}

/// The JWT is malformed and cannot be parsed out into header, payload, and signature sections
#[derive(Clone, Copy, Debug, Error)]
#[error("malformed JWT")]
pub struct MalformedJwt {
    _p: (),
}

pub(crate) const fn malformed_jwt() -> MalformedJwt {
    MalformedJwt { _p: () }
}

/// The JWT header section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT header")]
pub struct MalformedJwtHeader {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_header(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtHeader {
    MalformedJwtHeader {
        source: source.into(),
    }
}

/// The JWT payload section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT payload")]
pub struct MalformedJwtPayload {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtPayload {
    MalformedJwtPayload {
        source: source.into(),
    }
}

/// The JWT signature section is malformed
#[derive(Debug, Error)]
#[error("malformed JWT signature")]
pub struct MalformedJwtSignature {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_jwt_signature(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedJwtSignature {
    MalformedJwtSignature {
        source: source.into(),
    }
}

/// The signature did not match
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch {
    _p: (),
}

pub(crate) const fn signature_mismatch() -> SignatureMismatch {
    SignatureMismatch { _p: () }
}

/// The key material was rejected
#[derive(Debug, Error)]
#[error("key rejected: {reason}")]
pub struct KeyRejected {
    reason: String,
}

pub(crate) fn key_rejected(reason: impl Into<String>) -> KeyRejected {
    KeyRejected {
        reason: reason.into(),
    }
}

/// An unexpected failure inside the cryptographic provider
#[derive(Debug, Error)]
#[error("unexpected error: {reason}")]
pub struct Unexpected {
    reason: String,
}

pub(crate) fn unexpected(reason: impl Into<String>) -> Unexpected {
    Unexpected {
        reason: reason.into(),
    }
}

/// An error while verifying a JWT
#[derive(Debug, Error)]
pub enum JwtVerifyError {
    /// The token is not made up of three `.`-separated sections
    #[error(transparent)]
    MalformedToken(#[from] MalformedJwt),
    /// The header could not be decoded
    #[error(transparent)]
    MalformedTokenHeader(#[from] MalformedJwtHeader),
    /// The payload could not be decoded
    #[error(transparent)]
    MalformedTokenPayload(#[from] MalformedJwtPayload),
    /// The signature could not be decoded
    #[error(transparent)]
    MalformedTokenSignature(#[from] MalformedJwtSignature),
    /// The selected key cannot verify the token's algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),
    /// The token's signature did not verify
    #[error(transparent)]
    SignatureMismatch(#[from] SignatureMismatch),
}

/// An error while constructing and signing a JWT
#[derive(Debug, Error)]
pub enum JwtSigningError {
    /// The header could not be serialized
    #[error(transparent)]
    MalformedTokenHeader(#[from] MalformedJwtHeader),
    /// The payload could not be serialized
    #[error(transparent)]
    MalformedTokenPayload(#[from] MalformedJwtPayload),
    /// The provider failed to produce a signature
    #[error("unable to sign token")]
    Signing(#[from] Unexpected),
}
