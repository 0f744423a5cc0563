//! kinv credentials: the signing identity used for inventory delivery and
//! the manager that keeps it fresh.

#![forbid(unsafe_code)]

use std::path::PathBuf;

mod identity;
mod manager;

pub use identity::{JwsEnvelope, SigningIdentity, JWS_ALGORITHM};
pub use manager::{renewal_delay, CredentialManager, RenewOutcome, RENEW_BEFORE, RETRY_DELAY};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in certificate file")]
    NoCertificates,
    #[error("parsing private key (tried PKCS#8 and PKCS#1): {0}")]
    Key(#[source] openssl::error::ErrorStack),
    #[error("unsupported private key type; an RSA key is required")]
    UnsupportedKey,
    #[error("certificate expiry out of range")]
    Expiry,
    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("encoding protected header: {0}")]
    Encode(#[from] serde_json::Error),
}
