//! kinv delivery: serialize the snapshot, optionally sign it, gzip it and PUT
//! it to the inventory server. The server's acknowledgment is cached for the
//! local read API.

#![forbid(unsafe_code)]

use std::{
    io::Write,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use flate2::{write::GzEncoder, Compression};
use kinv_core::{Inventory, Publisher};
use kinv_credentials::{CredentialError, CredentialManager};
use metrics::{counter, histogram};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{info, warn};

pub mod ack;

pub use ack::{AckCache, AckMetaData, AckResponse, ClusterAck, DeliveryMetadata, ServiceLevel};

pub const INVENTORY_PATH: &str = "/api/v1/inventory";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
pub const CONTENT_TYPE_JOSE: &str = "application/jose+json";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("encoding inventory: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("signing inventory: {0}")]
    Sign(#[from] CredentialError),
    #[error("compressing payload: {0}")]
    Compress(#[from] std::io::Error),
    #[error("sending request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected inventory with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("decoding acknowledgment: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Request body ready for the wire.
#[derive(Debug)]
pub struct EncodedBody {
    pub content_type: &'static str,
    pub signed: bool,
    pub gzipped: Vec<u8>,
}

fn gzip(payload: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut enc = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::default());
    enc.write_all(payload)?;
    enc.finish()
}

/// Serialize, sign when an identity is loaded, then compress.
pub fn encode(inventory: &Inventory, credentials: &CredentialManager) -> Result<EncodedBody, DeliveryError> {
    let json = serde_json::to_vec(inventory).map_err(DeliveryError::Encode)?;
    let identity = if credentials.is_enabled() {
        let id = credentials.identity();
        if id.is_none() {
            warn!("signing enabled but no identity loaded; delivering unsigned");
        }
        id
    } else {
        None
    };
    let (payload, content_type, signed) = match identity {
        Some(id) => {
            let envelope = id.sign(&json)?;
            (serde_json::to_vec(&envelope).map_err(DeliveryError::Encode)?, CONTENT_TYPE_JOSE, true)
        }
        None => (json, CONTENT_TYPE_JSON, false),
    };
    Ok(EncodedBody { content_type, signed, gzipped: gzip(&payload)? })
}

pub struct Deliverer {
    client: reqwest::Client,
    endpoint: String,
    credentials: Arc<CredentialManager>,
    acks: Arc<AckCache>,
}

impl Deliverer {
    /// `base` is the server root; the inventory path is appended.
    pub fn new(
        base: &str,
        timeout: Duration,
        credentials: Arc<CredentialManager>,
        acks: Arc<AckCache>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}{}", base.trim_end_matches('/'), INVENTORY_PATH);
        Ok(Self { client, endpoint, credentials, acks })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn acks(&self) -> &Arc<AckCache> {
        &self.acks
    }

    /// One PUT, no retries. The ack cache changes only on a 2xx with a decodable body.
    pub async fn deliver(&self, inventory: &Inventory) -> Result<DeliveryMetadata, DeliveryError> {
        let started = Instant::now();
        let res = self.try_deliver(inventory).await;
        histogram!("delivery_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(_) => {
                counter!("delivery_ok_total", 1u64);
            }
            Err(e) => {
                counter!("delivery_err_total", 1u64);
                warn!(endpoint = %self.endpoint, error = %e, "delivering inventory");
            }
        }
        res
    }

    async fn try_deliver(&self, inventory: &Inventory) -> Result<DeliveryMetadata, DeliveryError> {
        let body = encode(inventory, &self.credentials)?;
        let size = body.gzipped.len();
        histogram!("delivery_bytes", size as f64);

        let resp = self
            .client
            .put(&self.endpoint)
            .header(CONTENT_TYPE, body.content_type)
            .header(CONTENT_ENCODING, "gzip")
            .body(body.gzipped)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let ack: AckResponse = serde_json::from_slice(&bytes).map_err(DeliveryError::Decode)?;
        if let Some(msg) = ack.message.as_deref() {
            info!(message = msg, "inventory server message");
        }
        let meta = DeliveryMetadata::from_ack(ack, Utc::now());
        self.acks.store(meta.clone());
        info!(
            fqdn = %inventory.cluster.cluster_fqdn,
            status = status.as_u16(),
            signed = body.signed,
            bytes = size,
            "uploaded inventory"
        );
        Ok(meta)
    }
}

#[async_trait::async_trait]
impl Publisher for Deliverer {
    async fn publish(&self, inventory: &Inventory) -> anyhow::Result<()> {
        self.deliver(inventory).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn unsigned_body_is_gzipped_json() {
        let inv = Inventory::new("0.1.0");
        let body = encode(&inv, &CredentialManager::disabled()).unwrap();
        assert_eq!(body.content_type, CONTENT_TYPE_JSON);
        assert!(!body.signed);

        let mut out = String::new();
        GzDecoder::new(body.gzipped.as_slice()).read_to_string(&mut out).unwrap();
        let back: Inventory = serde_json::from_str(&out).unwrap();
        assert_eq!(back, inv);
    }

    #[test]
    fn endpoint_appends_inventory_path() {
        let d = Deliverer::new(
            "http://inventory.example:8086/",
            Duration::from_secs(5),
            Arc::new(CredentialManager::disabled()),
            Arc::new(AckCache::new()),
        )
        .unwrap();
        assert_eq!(d.endpoint(), "http://inventory.example:8086/api/v1/inventory");
    }
}
