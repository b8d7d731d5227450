//! JSON Web Tokens signed with RSA keys
//!
//! A token is produced with [`Jwt::sign`] and checked by first
//! [decomposing][JwtRef::decompose] it, choosing a key based on its
//! headers, and then [verifying][Decomposed::verify] the signature. Claim
//! validation beyond the signature is left to the caller, since expiry in
//! this family of crates is judged with an explicit clock-skew allowance.
//!
//! ```
//! use warden::{jwa, jwk::{KeyId, SigningKey}, jwt::{Headers, Jwt}, Jwk};
//!
//! let pem = std::fs::read_to_string("testdata/signing_a.pem").unwrap();
//! let key = SigningKey::from_pem(&pem).unwrap();
//! let headers = Headers::new(jwa::Algorithm::RS256).with_key_id(KeyId::from_static("a"));
//! let token = Jwt::sign(&headers, &serde_json::json!({ "username": "alice" }), &key).unwrap();
//!
//! let jwk = Jwk::from(key.public_key().clone()).with_key_id(KeyId::from_static("a"));
//! let claims: serde_json::Value = token.decompose().unwrap().verify(&jwk).unwrap();
//! assert_eq!(claims["username"], "alice");
//! ```

use std::fmt::{self, Write as _};

use aliri_braid::braid;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error, jwa,
    jwk::{KeyId, KeyIdRef, SigningKey},
    Jwk,
};

/// A JSON Web Token
///
/// The token is a bearer credential, so its [`Debug`][JwtRef#impl-Debug] and
/// [`Display`][JwtRef#impl-Display] implementations hide it unless the
/// alternate form (`{:#?}` or `{:#}`) is requested. Even then the signature
/// is elided.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "A borrowed reference to a JSON Web Token ([`Jwt`])"
)]
#[must_use]
pub struct Jwt;

/// The JOSE header of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    alg: jwa::Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

impl Headers {
    /// Headers for a token signed with `alg`, typed as `JWT`
    pub fn new(alg: jwa::Algorithm) -> Self {
        Self {
            alg,
            kid: None,
            typ: Some("JWT".to_owned()),
        }
    }

    /// Names the key used to sign the token
    pub fn with_key_id(self, kid: KeyId) -> Self {
        Self {
            kid: Some(kid),
            ..self
        }
    }

    /// The signing algorithm
    pub fn alg(&self) -> jwa::Algorithm {
        self.alg
    }

    /// The signing key's ID, if the issuer named one
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }
}

impl Jwt {
    /// Serializes `headers` and `payload` as JSON and signs them with `key`
    pub fn sign<P: Serialize>(
        headers: &Headers,
        payload: &P,
        key: &SigningKey,
    ) -> Result<Self, error::JwtSigningError> {
        let h_raw = serde_json::to_vec(headers).map_err(error::malformed_jwt_header)?;
        let p_raw = serde_json::to_vec(payload).map_err(error::malformed_jwt_payload)?;

        let mut message = String::new();
        URL_SAFE_NO_PAD.encode_string(&h_raw, &mut message);
        message.push('.');
        URL_SAFE_NO_PAD.encode_string(&p_raw, &mut message);

        let signature = key.sign(headers.alg, message.as_bytes())?;

        message.push('.');
        URL_SAFE_NO_PAD.encode_string(&signature, &mut message);

        Ok(Self::new(message))
    }
}

impl JwtRef {
    /// Splits the token into its sections and decodes the header
    ///
    /// The payload is not decoded until the signature has been verified.
    pub fn decompose(&self) -> Result<Decomposed<'_>, error::JwtVerifyError> {
        let mut sections = self.as_str().split('.');
        let (header, payload, signature) =
            match (sections.next(), sections.next(), sections.next(), sections.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(error::malformed_jwt().into()),
            };

        let message = &self.as_str()[..header.len() + 1 + payload.len()];

        let h_raw = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(error::malformed_jwt_header)?;
        let header: Headers = serde_json::from_slice(&h_raw).map_err(error::malformed_jwt_header)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(error::malformed_jwt_signature)?;

        Ok(Decomposed {
            header,
            message,
            payload,
            signature,
        })
    }
}

/// A token split into its sections, with a decoded header
#[derive(Debug)]
pub struct Decomposed<'a> {
    header: Headers,
    message: &'a str,
    payload: &'a str,
    signature: Vec<u8>,
}

impl<'a> Decomposed<'a> {
    /// The decoded header
    pub fn header(&self) -> &Headers {
        &self.header
    }

    /// The signing algorithm named in the header
    pub fn alg(&self) -> jwa::Algorithm {
        self.header.alg
    }

    /// The signing key ID named in the header, if any
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.header.kid()
    }

    /// Verifies the signature with `key` and decodes the payload
    pub fn verify<P: DeserializeOwned>(&self, key: &Jwk) -> Result<P, error::JwtVerifyError> {
        key.verify(self.header.alg, self.message.as_bytes(), &self.signature)?;

        let p_raw = URL_SAFE_NO_PAD
            .decode(self.payload)
            .map_err(error::malformed_jwt_payload)?;
        let payload = serde_json::from_slice(&p_raw).map_err(error::malformed_jwt_payload)?;

        Ok(payload)
    }
}

impl fmt::Debug for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            f.write_char('"')?;
            write_elided(self.as_str(), f)?;
            f.write_char('"')
        } else {
            f.write_str("***JWT***")
        }
    }
}

impl fmt::Display for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write_elided(self.as_str(), f)
        } else {
            f.write_str("***JWT***")
        }
    }
}

fn write_elided(token: &str, f: &mut fmt::Formatter) -> fmt::Result {
    match token.rfind('.') {
        Some(last_period) => {
            f.write_str(&token[..=last_period])?;
            f.write_char('…')
        }
        None => f.write_char('…'),
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::{json, Value};

    use super::*;

    fn signing_key() -> Result<SigningKey> {
        Ok(SigningKey::from_pem(include_str!("../testdata/signing_a.pem"))?)
    }

    fn jwk_for(key: &SigningKey) -> Jwk {
        Jwk::from(key.public_key().clone()).with_key_id(KeyId::from_static("a"))
    }

    #[test]
    fn signed_token_verifies() -> Result<()> {
        let key = signing_key()?;
        let headers = Headers::new(jwa::Algorithm::RS256).with_key_id(KeyId::from_static("a"));
        let token = Jwt::sign(&headers, &json!({ "username": "alice" }), &key)?;

        let decomposed = token.decompose()?;
        assert_eq!(decomposed.alg(), jwa::Algorithm::RS256);
        assert_eq!(decomposed.kid(), Some(KeyIdRef::from_str("a")));

        let claims: Value = decomposed.verify(&jwk_for(&key))?;
        assert_eq!(claims["username"], "alice");
        Ok(())
    }

    #[test]
    fn tampered_payload_is_rejected() -> Result<()> {
        let key = signing_key()?;
        let token = Jwt::sign(
            &Headers::new(jwa::Algorithm::RS256),
            &json!({ "username": "alice" }),
            &key,
        )?;

        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"username":"mallory"}"#);
        let mut parts: Vec<&str> = token.as_str().split('.').collect();
        parts[1] = &forged_payload;
        let forged = Jwt::new(parts.join("."));

        let result = forged.decompose()?.verify::<Value>(&jwk_for(&key));
        assert!(matches!(
            result,
            Err(error::JwtVerifyError::SignatureMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn rejects_wrong_section_count() {
        assert!(JwtRef::from_str("a.b").decompose().is_err());
        assert!(JwtRef::from_str("a.b.c.d").decompose().is_err());
    }

    #[test]
    fn rejects_unsigned_algorithm() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"username":"alice"}"#);
        let token = Jwt::new(format!("{}.{}.", header, payload));
        assert!(matches!(
            token.decompose(),
            Err(error::JwtVerifyError::MalformedTokenHeader(_))
        ));
    }

    #[test]
    fn formatting_hides_token() {
        let token = JwtRef::from_str("aGVhZGVy.cGF5bG9hZA.c2lnbmF0dXJl");
        assert_eq!(format!("{:?}", token), "***JWT***");
        assert_eq!(format!("{}", token), "***JWT***");
        assert_eq!(format!("{:#?}", token), "\"aGVhZGVy.cGF5bG9hZA.…\"");
        assert_eq!(format!("{:#}", token), "aGVhZGVy.cGF5bG9hZA.…");
    }
}
