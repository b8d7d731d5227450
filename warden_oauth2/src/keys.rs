use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use warden::{error::JwtVerifyError, Jwks, JwtRef};

use crate::ClaimsMap;

/// A token could not be verified against the trusted key set
#[derive(Debug, Error)]
pub enum KeyError {
    /// No trusted key matches the token's key ID and algorithm
    #[error("no matching key found to validate JWT")]
    UnknownKeyId,
    /// The token was malformed or its signature did not verify
    #[error("invalid JWT")]
    JwtVerifyError(#[from] JwtVerifyError),
}

/// The set of public keys whose signatures are trusted
///
/// The set can be replaced at any time to rotate keys. Removing a key from
/// the set causes every token signed with it to be rejected.
#[derive(Clone, Debug)]
#[must_use]
pub struct TrustedKeys {
    jwks: Arc<ArcSwap<Jwks>>,
}

/// Trusts no keys until a key set is installed
impl Default for TrustedKeys {
    fn default() -> Self {
        Self::new(Jwks::default())
    }
}

impl TrustedKeys {
    /// Trusts the keys in `jwks`
    pub fn new(jwks: Jwks) -> Self {
        Self {
            jwks: Arc::new(ArcSwap::from_pointee(jwks)),
        }
    }

    /// Replaces the trusted key set
    pub fn set_jwks(&self, jwks: Jwks) {
        self.jwks.store(Arc::new(jwks));
        tracing::info!("trusted keys replaced");
    }

    /// A snapshot of the currently trusted keys
    pub fn jwks(&self) -> Arc<Jwks> {
        self.jwks.load_full()
    }

    /// Verifies the token's signature and returns its claims
    ///
    /// Registered claims such as `exp` are returned as-is and not checked.
    pub fn verify(&self, token: &JwtRef) -> Result<ClaimsMap, KeyError> {
        let decomposed = token.decompose()?;

        let guard = self.jwks.load();
        let kid = decomposed.kid();
        let alg = decomposed.alg();
        let key = guard.get_key_by_opt(kid, alg).ok_or_else(|| {
            if let Some(kid) = kid {
                tracing::debug!(%kid, %alg, "unable to find matching key");
            } else {
                tracing::debug!(%alg, "unable to find matching key");
            }
            KeyError::UnknownKeyId
        })?;

        Ok(decomposed.verify(key)?)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use warden::{
        jwa::Algorithm,
        jwk::{KeyId, KeyIdRef, SigningKey},
        jwt::Headers,
        Jwk, Jwt,
    };

    use super::*;

    fn key(file: &str) -> Result<SigningKey> {
        let pem = std::fs::read_to_string(format!("../warden/testdata/{}", file))?;
        Ok(SigningKey::from_pem(&pem)?)
    }

    fn signed(key: &SigningKey, kid: &'static str) -> Result<Jwt> {
        let headers = Headers::new(Algorithm::RS256).with_key_id(KeyId::from_static(kid));
        Ok(Jwt::sign(&headers, &json!({ "username": "alice" }), key)?)
    }

    fn trusted(key: &SigningKey, kid: &'static str) -> TrustedKeys {
        let jwk = Jwk::from(key.public_key().clone()).with_key_id(KeyId::from_static(kid));
        TrustedKeys::new(std::iter::once(jwk).collect())
    }

    #[test]
    fn verifies_signed_claims() -> Result<()> {
        let key = key("signing_a.pem")?;
        let keys = trusted(&key, "a");

        let claims = keys.verify(&signed(&key, "a")?)?;
        assert_eq!(claims["username"], "alice");
        Ok(())
    }

    #[test]
    fn decommissioned_key_is_rejected() -> Result<()> {
        let key = key("signing_a.pem")?;
        let keys = trusted(&key, "a");
        let token = signed(&key, "a")?;

        let mut jwks = (*keys.jwks()).clone();
        assert!(jwks.remove_key(KeyIdRef::from_static("a")));
        keys.set_jwks(jwks);

        assert!(matches!(keys.verify(&token), Err(KeyError::UnknownKeyId)));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_rejected() -> Result<()> {
        let keys = trusted(&key("signing_a.pem")?, "a");
        let forged = signed(&key("signing_b.pem")?, "a")?;

        assert!(matches!(
            keys.verify(&forged),
            Err(KeyError::JwtVerifyError(JwtVerifyError::SignatureMismatch(_)))
        ));
        Ok(())
    }

    #[test]
    fn tampered_payload_is_rejected() -> Result<()> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let key = key("signing_a.pem")?;
        let keys = trusted(&key, "a");
        let token = signed(&key, "a")?;

        let mut sections = token.as_str().split('.');
        let header = sections.next().unwrap_or_default();
        let _payload = sections.next();
        let signature = sections.next().unwrap_or_default();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"username":"admin"}"#);
        let forged = Jwt::new(format!("{}.{}.{}", header, forged_payload, signature));

        assert!(matches!(
            keys.verify(&forged),
            Err(KeyError::JwtVerifyError(JwtVerifyError::SignatureMismatch(_)))
        ));
        Ok(())
    }
}
