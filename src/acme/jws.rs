use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use ring::digest::{SHA256, digest};
use ring::rand::SystemRandom;
use ring::signature::{KeyPair, RSA_PKCS1_SHA256, RsaKeyPair};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acme::error::{AcmeError, AcmeResult};
use crate::encode::b64url;

const TYP_JWT: &str = "JWT";
const ALG_RS256: &str = "RS256";
const KTY_RSA: &str = "RSA";

/// RSA public key in JSON Web Key form.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub n: String,
    pub e: String,
}

#[derive(Serialize)]
struct JwsHeader<'a> {
    typ: &'static str,
    alg: &'static str,
    jwk: &'a Jwk,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

/// The RSA account key pair held for the lifetime of a session.
pub struct AccountKey {
    key_pair: RsaKeyPair,
    jwk: Jwk,
}

impl AccountKey {
    /// Loads a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the PEM armor does not
    /// contain a private key, or the key material is rejected.
    pub fn from_pem_file(path: &Path) -> AcmeResult<Self> {
        let pem = std::fs::read(path)?;
        Self::from_pem(&pem)
    }

    /// Parses a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    ///
    /// # Errors
    /// Returns an error if no private key block is found or the key is
    /// rejected by the signer.
    pub fn from_pem(pem: &[u8]) -> AcmeResult<Self> {
        let mut reader = Cursor::new(pem);
        loop {
            match rustls_pemfile::read_one(&mut reader)? {
                Some(rustls_pemfile::Item::Pkcs1Key(der)) => {
                    return Self::from_pkcs1_der(der.secret_pkcs1_der());
                }
                Some(rustls_pemfile::Item::Pkcs8Key(der)) => {
                    return Self::from_pkcs8_der(der.secret_pkcs8_der());
                }
                Some(_) => {}
                None => {
                    return Err(AcmeError::Key(
                        "no RSA private key found in PEM input".to_string(),
                    ));
                }
            }
        }
    }

    /// Parses a PKCS#8 DER RSA private key.
    ///
    /// # Errors
    /// Returns an error if the key material is rejected.
    pub fn from_pkcs8_der(der: &[u8]) -> AcmeResult<Self> {
        let key_pair =
            RsaKeyPair::from_pkcs8(der).map_err(|err| AcmeError::Key(err.to_string()))?;
        Ok(Self::from_key_pair(key_pair))
    }

    /// Parses a PKCS#1 DER RSA private key.
    ///
    /// # Errors
    /// Returns an error if the key material is rejected.
    pub fn from_pkcs1_der(der: &[u8]) -> AcmeResult<Self> {
        let key_pair = RsaKeyPair::from_der(der).map_err(|err| AcmeError::Key(err.to_string()))?;
        Ok(Self::from_key_pair(key_pair))
    }

    fn from_key_pair(key_pair: RsaKeyPair) -> Self {
        let components =
            ring::rsa::PublicKeyComponents::<Vec<u8>>::from(key_pair.public_key());
        let jwk = Jwk {
            kty: KTY_RSA.to_string(),
            n: b64url(trim_leading_zeros(&components.n)),
            e: b64url(trim_leading_zeros(&components.e)),
        };
        Self { key_pair, jwk }
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Signs a message with RSASSA-PKCS1-v1_5 over SHA-256.
    ///
    /// # Errors
    /// Returns an error if the signing operation fails.
    pub fn sign(&self, message: &[u8]) -> AcmeResult<Vec<u8>> {
        let rng = SystemRandom::new();
        let mut signature = vec![0u8; self.key_pair.public_key().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
            .map_err(|_| AcmeError::Key("signing failed".to_string()))?;
        Ok(signature)
    }
}

// JWK integers are minimal big-endian; the DER source may carry a sign byte.
fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    &bytes[start..]
}

/// Builds the RS256 compact token `header.payload.signature` for a payload.
///
/// The header carries `{typ, alg, jwk}` plus `nonce` when one is cached;
/// an absent nonce omits the field entirely.
///
/// # Errors
/// Returns an error if serialization or signing fails.
pub fn create_jws(payload: &Value, nonce: Option<&str>, key: &AccountKey) -> AcmeResult<String> {
    let header = JwsHeader {
        typ: TYP_JWT,
        alg: ALG_RS256,
        jwk: key.jwk(),
        nonce,
    };
    let header_b64 = b64url(serde_json::to_vec(&header)?);
    let payload_b64 = b64url(serde_json::to_vec(payload)?);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = key.sign(signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", b64url(signature)))
}

/// SHA-256 thumbprint of the canonical `{e, kty, n}` JWK rendering.
///
/// # Errors
/// Returns an error if the canonical JSON cannot be produced.
pub fn jwk_thumbprint(jwk: &Jwk) -> AcmeResult<String> {
    let mut map = BTreeMap::new();
    map.insert("e", jwk.e.as_str());
    map.insert("kty", jwk.kty.as_str());
    map.insert("n", jwk.n.as_str());
    let json = serde_json::to_string(&map)?;
    Ok(b64url(digest(&SHA256, json.as_bytes())))
}

/// Key authorization binding a challenge token to the account key.
///
/// # Errors
/// Returns an error if the thumbprint cannot be computed.
pub fn make_key_authorization(token: &str, jwk: &Jwk) -> AcmeResult<String> {
    Ok(format!("{token}.{}", jwk_thumbprint(jwk)?))
}
