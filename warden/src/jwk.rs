//! RSA key material in JSON Web Key (JWK) form
//!
//! The authorization server holds a [`SigningKey`] and publishes the
//! matching [`Jwk`] so that resource servers can verify tokens without ever
//! seeing the private half.

use std::{convert::TryFrom, fmt, sync::Arc};

use aliri_braid::braid;
use openssl::{pkey::Private, rsa::Rsa};
use ring::{
    rand::SystemRandom,
    signature::{RsaKeyPair, RsaPublicKeyComponents},
};
use serde::{Deserialize, Serialize};

use crate::{error, jwa};

/// The minimum modulus size accepted for verification, in bytes
const MIN_MODULUS_LEN: usize = 2048 / 8;

/// An identifier for a JWK
#[braid(serde, ref_doc = "A borrowed reference to a [`KeyId`]")]
pub struct KeyId;

/// RSA public key components
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// The public modulus
    #[serde(rename = "n", with = "base64url")]
    modulus: Vec<u8>,

    /// The public exponent
    #[serde(rename = "e", with = "base64url")]
    exponent: Vec<u8>,
}

impl PublicKey {
    /// Constructs a public key from the big-endian modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is smaller than 2048 bits.
    pub fn from_components(
        modulus: impl Into<Vec<u8>>,
        exponent: impl Into<Vec<u8>>,
    ) -> Result<Self, error::KeyRejected> {
        let modulus = modulus.into();
        let exponent = exponent.into();

        let significant = modulus.iter().skip_while(|&&b| b == 0).count();
        if significant < MIN_MODULUS_LEN {
            return Err(error::key_rejected(format!(
                "RSA modulus must be at least 2048 bits, got {}",
                significant * 8
            )));
        }
        if exponent.is_empty() {
            return Err(error::key_rejected("RSA exponent must not be empty"));
        }

        Ok(Self { modulus, exponent })
    }

    /// Imports an RSA public key from a PEM file
    ///
    /// Both PKCS#1 (`RSA PUBLIC KEY`) and X.509 (`PUBLIC KEY`) encodings are
    /// accepted.
    pub fn from_pem(pem: &str) -> Result<Self, error::KeyRejected> {
        let rsa = Rsa::public_key_from_pem(pem.as_bytes())
            .or_else(|_| Rsa::public_key_from_pem_pkcs1(pem.as_bytes()))
            .map_err(|e| error::key_rejected(e.to_string()))?;

        Self::from_components(rsa.n().to_vec(), rsa.e().to_vec())
    }

    /// The public key's modulus
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// The public key's exponent
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    /// Verifies `signature` over `data` with the given algorithm
    pub fn verify(
        &self,
        alg: jwa::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::SignatureMismatch> {
        let components = RsaPublicKeyComponents {
            n: &self.modulus,
            e: &self.exponent,
        };

        components
            .verify(alg.verification_params(), data, signature)
            .map_err(|_| error::signature_mismatch())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &(self.modulus.len() * 8))
            .field("exponent", &self.exponent)
            .finish()
    }
}

/// An RSA private key used to sign tokens
///
/// The private key material is never printed or serialized.
#[derive(Clone)]
pub struct SigningKey {
    public_key: PublicKey,
    key_pair: Arc<RsaKeyPair>,
}

impl SigningKey {
    /// Imports an RSA private key from a PEM file
    ///
    /// Both PKCS#8 (`PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`) encodings
    /// are accepted.
    pub fn from_pem(pem: &str) -> Result<Self, error::KeyRejected> {
        let rsa = Rsa::private_key_from_pem(pem.as_bytes())
            .map_err(|e| error::key_rejected(e.to_string()))?;
        Self::from_openssl_key(&rsa)
    }

    fn from_openssl_key(rsa: &Rsa<Private>) -> Result<Self, error::KeyRejected> {
        let public_key = PublicKey::from_components(rsa.n().to_vec(), rsa.e().to_vec())?;

        let der = rsa
            .private_key_to_der()
            .map_err(|e| error::key_rejected(e.to_string()))?;
        let key_pair = RsaKeyPair::from_der(&der).map_err(|e| error::key_rejected(e.to_string()))?;

        Ok(Self {
            public_key,
            key_pair: Arc::new(key_pair),
        })
    }

    /// The public half of this key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs `data` with the given algorithm
    pub fn sign(&self, alg: jwa::Algorithm, data: &[u8]) -> Result<Vec<u8>, error::Unexpected> {
        let mut buf = vec![0; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(alg.signing_params(), &SystemRandom::new(), data, &mut buf)
            .map_err(|e| error::unexpected(e.to_string()))?;

        Ok(buf)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A JSON Web Key holding an RSA public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JwkDto", into = "JwkDto")]
pub struct Jwk {
    key_id: Option<KeyId>,
    usage: Option<jwa::Usage>,
    algorithm: Option<jwa::Algorithm>,
    key: PublicKey,
}

impl Jwk {
    /// The key's identifier, if any
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The key's declared usage, if any
    pub fn usage(&self) -> Option<jwa::Usage> {
        self.usage
    }

    /// The key's declared algorithm, if any
    pub fn algorithm(&self) -> Option<jwa::Algorithm> {
        self.algorithm
    }

    /// The RSA public key
    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// Whether this key may verify signatures made with `alg`
    pub fn is_compatible(&self, alg: jwa::Algorithm) -> bool {
        self.algorithm.map_or(true, |a| a == alg)
            && self.usage.map_or(true, |u| u == jwa::Usage::Signing)
    }

    /// Sets the key ID
    pub fn with_key_id(self, kid: KeyId) -> Self {
        Self {
            key_id: Some(kid),
            ..self
        }
    }

    /// Sets the key usage
    pub fn with_usage(self, usage: jwa::Usage) -> Self {
        Self {
            usage: Some(usage),
            ..self
        }
    }

    /// Sets the key algorithm
    pub fn with_algorithm(self, alg: jwa::Algorithm) -> Self {
        Self {
            algorithm: Some(alg),
            ..self
        }
    }

    /// Verifies `signature` over `data`, checking algorithm compatibility first
    pub fn verify(
        &self,
        alg: jwa::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::JwtVerifyError> {
        if !self.is_compatible(alg) {
            return Err(error::incompatible_algorithm(alg).into());
        }

        Ok(self.key.verify(alg, data, signature)?)
    }
}

impl From<PublicKey> for Jwk {
    fn from(key: PublicKey) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            key,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct JwkDto {
    kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    usage: Option<jwa::Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<jwa::Algorithm>,
    #[serde(flatten)]
    key: PublicKey,
}

impl TryFrom<JwkDto> for Jwk {
    type Error = error::KeyRejected;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        if dto.kty != "RSA" {
            return Err(error::key_rejected(format!(
                "unsupported key type '{}'",
                dto.kty
            )));
        }

        let key = PublicKey::from_components(dto.key.modulus, dto.key.exponent)?;

        Ok(Self {
            key_id: dto.kid,
            usage: dto.usage,
            algorithm: dto.alg,
            key,
        })
    }
}

impl From<Jwk> for JwkDto {
    fn from(jwk: Jwk) -> Self {
        Self {
            kty: "RSA".to_owned(),
            kid: jwk.key_id,
            usage: jwk.usage,
            alg: jwk.algorithm,
            key: jwk.key,
        }
    }
}

mod base64url {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(s.trim_end_matches('=').as_bytes())
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    const SIGNING_PKCS8: &str = include_str!("../testdata/signing_a.pem");
    const SIGNING_PKCS1: &str = include_str!("../testdata/signing_a_rsa.pem");
    const PUBLIC: &str = include_str!("../testdata/public_a.pem");
    const PUBLIC_PKCS1: &str = include_str!("../testdata/public_a_rsa.pem");

    const MODULUS_A: &str = concat!(
        "m5IEOuuEDEbmJpedT6BHAHnYheNFL7ero5VW9H2SwQSr0Z5Bi-GoXqUUrBD9BpMwm9UXERFWw2Ap-cUSdna",
        "T-yh4Pse5SaemKZ-0GzGqnOeXrEXJZhYW3uDM1aD8C-E20TzVyxeC7kYnQNS-gUBBQ0EZxGs-wbTGjr9AN5",
        "nxVS2ggb2TthXNtdlJ5aqqnObb6uFnwwCCPJuA1__MZCWcrwgGdXMl-JVPBttY77sxZCHO53QxEpqdeHw1a",
        "ugo_rZjFFG5HBJVbrl5srl9fzDCch0afPGfpuIk_yOMuBk586CEI-uNCJW6MP3ao7Ir7RZV_3kaBWqQ950g",
        "N-UQ1xnnrw"
    );

    #[test]
    fn private_key_encodings_agree() -> Result<()> {
        let pkcs8 = SigningKey::from_pem(SIGNING_PKCS8)?;
        let pkcs1 = SigningKey::from_pem(SIGNING_PKCS1)?;
        assert_eq!(pkcs8.public_key(), pkcs1.public_key());
        Ok(())
    }

    #[test]
    fn derived_public_key_matches_pem() -> Result<()> {
        let signing = SigningKey::from_pem(SIGNING_PKCS8)?;
        let public = PublicKey::from_pem(PUBLIC)?;
        assert_eq!(signing.public_key(), &public);
        Ok(())
    }

    #[test]
    fn public_key_encodings_agree() -> Result<()> {
        let spki = PublicKey::from_pem(PUBLIC)?;
        let pkcs1 = PublicKey::from_pem(PUBLIC_PKCS1)?;
        assert_eq!(spki, pkcs1);
        assert_eq!(spki.modulus().len(), 256);
        assert_eq!(spki.exponent(), &[0x01u8, 0x00, 0x01][..]);
        Ok(())
    }

    #[test]
    fn rejects_unterminated_pem() {
        let truncated = "-----BEGIN PUBLIC KEY-----\nMIIB\n";
        assert!(PublicKey::from_pem(truncated).is_err());
        assert!(SigningKey::from_pem(truncated).is_err());
    }

    #[test]
    fn sign_then_verify() -> Result<()> {
        let signing = SigningKey::from_pem(SIGNING_PKCS8)?;
        let sig = signing.sign(jwa::Algorithm::RS256, b"payload")?;
        signing
            .public_key()
            .verify(jwa::Algorithm::RS256, b"payload", &sig)?;
        assert!(signing
            .public_key()
            .verify(jwa::Algorithm::RS256, b"tampered", &sig)
            .is_err());
        assert!(signing
            .public_key()
            .verify(jwa::Algorithm::RS512, b"payload", &sig)
            .is_err());
        Ok(())
    }

    #[test]
    fn jwk_serializes_with_rsa_members() -> Result<()> {
        let signing = SigningKey::from_pem(SIGNING_PKCS8)?;
        let jwk = Jwk::from(signing.public_key().clone())
            .with_key_id(KeyId::from_static("key-a"))
            .with_algorithm(jwa::Algorithm::RS256)
            .with_usage(jwa::Usage::Signing);

        let value = serde_json::to_value(&jwk)?;
        assert_eq!(value["kty"], "RSA");
        assert_eq!(value["kid"], "key-a");
        assert_eq!(value["use"], "sig");
        assert_eq!(value["alg"], "RS256");
        assert_eq!(value["n"], MODULUS_A);
        assert_eq!(value["e"], "AQAB");

        let back: Jwk = serde_json::from_value(value)?;
        assert_eq!(back, jwk);
        Ok(())
    }

    #[test]
    fn rejects_short_modulus() {
        assert!(PublicKey::from_components(vec![0xff; 128], vec![1, 0, 1]).is_err());
    }

    #[test]
    fn debug_never_shows_private_key() -> Result<()> {
        let signing = SigningKey::from_pem(SIGNING_PKCS8)?;
        let dbg = format!("{:?}", signing);
        assert!(dbg.contains("<redacted>"));
        assert!(dbg.contains("bits: 2048"));
        Ok(())
    }

    #[test]
    fn encryption_keys_are_not_compatible() -> Result<()> {
        let jwk = Jwk::from(PublicKey::from_pem(PUBLIC)?).with_usage(jwa::Usage::Encryption);
        assert!(!jwk.is_compatible(jwa::Algorithm::RS256));
        Ok(())
    }
}
