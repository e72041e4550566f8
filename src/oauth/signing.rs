//! RS256 signing key and its published JWK.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::SigningError;

const RSA_BITS: usize = 2048;

/// Public half of the signing key as published in the JWKS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// RS256 key pair used for every issued JWT
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl SigningKey {
    /// Load a PKCS#8 or PKCS#1 private key PEM. Without `kid` the key id is
    /// the SHA-256 thumbprint of the modulus.
    pub fn from_pem(private_pem: &str, kid: Option<&str>) -> Result<Self, SigningError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Self::from_private_key(&private_key, kid)
    }

    /// Generate a fresh key pair, returning it with its PKCS#8 PEM
    pub fn generate(kid: Option<&str>) -> Result<(Self, String), SigningError> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let key = Self::from_private_key(&private_key, kid)?;
        Ok((key, private_pem.to_string()))
    }

    fn from_private_key(private_key: &RsaPrivateKey, kid: Option<&str>) -> Result<Self, SigningError> {
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(private_key);
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();
        let kid = kid
            .map(str::to_string)
            .unwrap_or_else(|| URL_SAFE_NO_PAD.encode(Sha256::digest(&n)));

        let jwk = Jwk {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            alg: "RS256".to_string(),
            kid: kid.clone(),
            n: URL_SAFE_NO_PAD.encode(&n),
            e: URL_SAFE_NO_PAD.encode(&e),
        };

        Ok(Self {
            kid,
            encoding_key,
            decoding_key,
            jwk,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.jwk.clone()],
        }
    }

    /// Sign claims as an RS256 JWT carrying this key's `kid`
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SigningError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| SigningError::SigningFailed(e.to_string()))
    }

    /// Verify signature and expiry. Audience is checked by the caller.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, SigningError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| SigningError::VerificationFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("kid", &self.kid).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const TEST_KEY: &str = include_str!("../../tests/fixtures/signing_key.pem");

    #[derive(Debug, Serialize, Deserialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_pem(TEST_KEY, Some("test-kid")).unwrap();
        let token = key
            .sign(&TestClaims {
                sub: "user-1".to_string(),
                exp: Utc::now().timestamp() + 60,
            })
            .unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("test-kid"));
        assert_eq!(header.alg, Algorithm::RS256);

        let claims: TestClaims = key.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn test_expired_token_fails() {
        let key = SigningKey::from_pem(TEST_KEY, None).unwrap();
        let token = key
            .sign(&TestClaims {
                sub: "user-1".to_string(),
                exp: Utc::now().timestamp() - 3600,
            })
            .unwrap();
        assert!(key.verify::<TestClaims>(&token).is_err());
    }

    #[test]
    fn test_jwks_shape() {
        let key = SigningKey::from_pem(TEST_KEY, None).unwrap();
        let jwks = serde_json::to_value(key.jwks()).unwrap();
        let jwk = &jwks["keys"][0];
        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["use"], "sig");
        assert_eq!(jwk["alg"], "RS256");
        assert_eq!(jwk["e"], "AQAB");
        assert_eq!(jwk["kid"], key.kid());
    }

    #[test]
    fn test_invalid_pem() {
        assert!(matches!(
            SigningKey::from_pem("not a key", None),
            Err(SigningError::InvalidKey(_))
        ));
    }
}
