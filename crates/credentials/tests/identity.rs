use std::{fs, path::Path, sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use kinv_credentials::{CredentialError, CredentialManager, RenewOutcome, SigningIdentity, RETRY_DELAY};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::{Padding, Rsa},
    sign::{RsaPssSaltlen, Verifier},
    x509::{X509NameBuilder, X509},
};

fn self_signed(key: &PKey<Private>, days: u32) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "kinv-test").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(days).unwrap()).unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn write_pair(dir: &Path, key: &PKey<Private>, days: u32) -> (std::path::PathBuf, std::path::PathBuf) {
    let cert = dir.join("tls.crt");
    let key_path = dir.join("tls.key");
    fs::write(&cert, self_signed(key, days).to_pem().unwrap()).unwrap();
    fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    (cert, key_path)
}

#[test]
fn signature_verifies_with_pss_sha512() {
    let key = rsa_key();
    let cert = self_signed(&key, 30);
    let identity = SigningIdentity::from_pem(&cert.to_pem().unwrap(), &key.private_key_to_pem_pkcs8().unwrap()).unwrap();

    let env = identity.sign(br#"{"cluster":{}}"#).unwrap();
    assert_eq!(URL_SAFE_NO_PAD.decode(&env.payload).unwrap(), br#"{"cluster":{}}"#);

    let header: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&env.protected).unwrap()).unwrap();
    assert_eq!(header["alg"], "PS512");
    assert_eq!(header["jwk"]["kty"], "RSA");
    assert_eq!(header["jwk"]["x5c"].as_array().map(Vec::len), Some(1));
    let n = URL_SAFE_NO_PAD.decode(header["jwk"]["n"].as_str().unwrap()).unwrap();
    assert_eq!(n, key.rsa().unwrap().n().to_vec());

    let mut verifier = Verifier::new(MessageDigest::sha512(), &key).unwrap();
    verifier.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH).unwrap();
    verifier.set_rsa_mgf1_md(MessageDigest::sha512()).unwrap();
    verifier.update(format!("{}.{}", env.protected, env.payload).as_bytes()).unwrap();
    assert!(verifier.verify(&URL_SAFE_NO_PAD.decode(&env.signature).unwrap()).unwrap());
}

#[test]
fn pkcs1_keys_are_accepted() {
    let key = rsa_key();
    let cert = self_signed(&key, 30);
    let pkcs1 = key.rsa().unwrap().private_key_to_pem().unwrap();
    assert!(SigningIdentity::from_pem(&cert.to_pem().unwrap(), &pkcs1).is_ok());
}

#[test]
fn non_rsa_keys_are_rejected() {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    let cert = self_signed(&ec, 30);
    let err = SigningIdentity::from_pem(&cert.to_pem().unwrap(), &ec.private_key_to_pem_pkcs8().unwrap()).unwrap_err();
    assert!(matches!(err, CredentialError::UnsupportedKey), "{err}");
}

#[test]
fn empty_chain_is_an_error() {
    let key = rsa_key();
    let err = SigningIdentity::from_pem(b"", &key.private_key_to_pem_pkcs8().unwrap()).unwrap_err();
    assert!(matches!(err, CredentialError::NoCertificates | CredentialError::OpenSsl(_)), "{err}");
}

#[test]
fn expiry_comes_from_the_leaf() {
    let key = rsa_key();
    let cert = self_signed(&key, 10);
    let identity = SigningIdentity::from_pem(&cert.to_pem().unwrap(), &key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    let left = identity.not_after() - chrono::Utc::now();
    assert!(left > chrono::Duration::days(9) && left <= chrono::Duration::days(10), "{left}");
}

#[test]
fn missing_files_disable_signing() {
    let dir = tempfile::tempdir().unwrap();
    let key = rsa_key();
    let (cert, key_path) = write_pair(dir.path(), &key, 30);

    assert!(!CredentialManager::initialize(&cert, &key_path, false).is_enabled());
    assert!(!CredentialManager::initialize("", &key_path, true).is_enabled());
    assert!(!CredentialManager::initialize(&cert, dir.path().join("absent.key"), true).is_enabled());
    assert!(!CredentialManager::initialize(dir.path().join("absent.crt"), &key_path, true).is_enabled());

    let mgr = CredentialManager::initialize(&cert, &key_path, true);
    assert!(mgr.is_enabled());
    assert!(mgr.identity().is_some());
}

#[test]
fn unparsable_certificate_heals_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    fs::write(&cert, "not a certificate").unwrap();
    fs::write(&key_path, "not a key").unwrap();

    let mgr = CredentialManager::initialize(&cert, &key_path, true);
    assert!(mgr.is_enabled());
    assert!(mgr.identity().is_none());
    match mgr.renew() {
        RenewOutcome::Failed { retry_in, .. } => assert_eq!(retry_in, RETRY_DELAY),
        other => panic!("expected failure, got {other:?}"),
    }

    let key = rsa_key();
    write_pair(dir.path(), &key, 30);
    match mgr.renew() {
        RenewOutcome::Renewed { next_in, .. } => {
            assert!(next_in > Duration::from_secs(29 * 86_400) && next_in < Duration::from_secs(30 * 86_400));
        }
        other => panic!("expected renewal, got {other:?}"),
    }
    assert!(mgr.identity().is_some());
}

#[test]
fn failed_reload_keeps_the_previous_identity() {
    let dir = tempfile::tempdir().unwrap();
    let key = rsa_key();
    let (cert, key_path) = write_pair(dir.path(), &key, 30);
    let mgr = CredentialManager::initialize(&cert, &key_path, true);
    let before = mgr.identity().unwrap().not_after();

    fs::write(&cert, "truncated").unwrap();
    assert!(matches!(mgr.renew(), RenewOutcome::Failed { .. }));
    assert_eq!(mgr.identity().unwrap().not_after(), before);
}

#[tokio::test(start_paused = true)]
async fn renewal_loop_retries_until_the_certificate_loads() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    fs::write(&cert, "-----BEGIN CERTIFICATE-----\ntruncated").unwrap();
    fs::write(&key_path, "not a key").unwrap();

    let mgr = Arc::new(CredentialManager::initialize(&cert, &key_path, true));
    assert!(mgr.is_enabled());
    assert!(mgr.identity().is_none());
    let handle = mgr.clone().spawn();

    // the issuer rotates valid files in before the retry fires
    let key = rsa_key();
    write_pair(dir.path(), &key, 30);

    tokio::time::sleep(RETRY_DELAY - Duration::from_secs(1)).await;
    assert!(mgr.identity().is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let identity = mgr.identity().expect("identity loaded by the renewal loop");
    assert!(identity.not_after() > chrono::Utc::now() + chrono::Duration::days(29));

    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn renewal_loop_exits_when_signing_is_disabled() {
    let mgr = Arc::new(CredentialManager::disabled());
    mgr.spawn().await.unwrap();
}
