use std::path::Path;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use openssl::{
    asn1::Asn1Time,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::{Padding, Rsa},
    sign::{RsaPssSaltlen, Signer},
    x509::X509,
};
use serde::{Deserialize, Serialize};

use crate::CredentialError;

pub const JWS_ALGORITHM: &str = "PS512";

#[derive(Serialize)]
struct Jwk<'a> {
    kty: &'a str,
    n: String,
    e: String,
    x5c: Vec<String>,
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'a str,
    jwk: Jwk<'a>,
}

/// Flattened JWS JSON serialization of a signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsEnvelope {
    pub payload: String,
    pub protected: String,
    pub signature: String,
}

/// Certificate chain plus RSA key; signs with PS512 and embeds the public key.
pub struct SigningIdentity {
    key: PKey<Private>,
    chain: Vec<X509>,
    not_after: DateTime<Utc>,
    protected: String,
}

fn read(path: &Path) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Read { path: path.to_path_buf(), source })
}

fn parse_key(pem: &[u8]) -> Result<PKey<Private>, CredentialError> {
    let key = match PKey::private_key_from_pem(pem) {
        Ok(k) => k,
        Err(_) => Rsa::private_key_from_pem(pem).and_then(PKey::from_rsa).map_err(CredentialError::Key)?,
    };
    if key.rsa().is_err() {
        return Err(CredentialError::UnsupportedKey);
    }
    Ok(key)
}

fn expiry(cert: &X509) -> Result<DateTime<Utc>, CredentialError> {
    let diff = Asn1Time::from_unix(0)?.diff(cert.not_after())?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or(CredentialError::Expiry)
}

impl SigningIdentity {
    /// Build from PEM text. Non-certificate blocks in the chain are skipped.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CredentialError> {
        let chain = X509::stack_from_pem(cert_pem)?;
        let first = chain.first().ok_or(CredentialError::NoCertificates)?;
        let not_after = expiry(first)?;
        let key = parse_key(key_pem)?;
        let rsa = key.rsa()?;

        let header = ProtectedHeader {
            alg: JWS_ALGORITHM,
            jwk: Jwk {
                kty: "RSA",
                n: URL_SAFE_NO_PAD.encode(rsa.n().to_vec()),
                e: URL_SAFE_NO_PAD.encode(rsa.e().to_vec()),
                x5c: chain.iter().map(|c| c.to_der().map(|der| STANDARD.encode(der))).collect::<Result<_, _>>()?,
            },
        };
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        Ok(Self { key, chain, not_after, protected })
    }

    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CredentialError> {
        let cert = read(cert_path)?;
        let key = read(key_path)?;
        Self::from_pem(&cert, &key)
    }

    /// Expiry of the leaf (first) certificate.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// RSASSA-PSS with SHA-512, salt length equal to the digest length.
    pub fn sign(&self, payload: &[u8]) -> Result<JwsEnvelope, CredentialError> {
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signing_input = format!("{}.{}", self.protected, payload);

        let mut signer = Signer::new(MessageDigest::sha512(), &self.key)?;
        signer.set_rsa_padding(Padding::PKCS1_PSS)?;
        signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        signer.set_rsa_mgf1_md(MessageDigest::sha512())?;
        signer.update(signing_input.as_bytes())?;
        let signature = URL_SAFE_NO_PAD.encode(signer.sign_to_vec()?);

        Ok(JwsEnvelope { payload, protected: self.protected.clone(), signature })
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("chain", &self.chain.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}
