use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::SigningIdentity;

/// Renewal fires this long before the leaf certificate expires.
pub const RENEW_BEFORE: Duration = Duration::from_secs(5 * 60);
/// Delay before retrying a failed load.
pub const RETRY_DELAY: Duration = Duration::from_secs(2 * 60);

/// Time until renewal is due; zero when already inside the renewal window.
pub fn renewal_delay(not_after: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let before = chrono::Duration::from_std(RENEW_BEFORE).unwrap_or_else(|_| chrono::Duration::minutes(5));
    (not_after - before - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    Disabled,
    Renewed { not_after: DateTime<Utc>, next_in: Duration },
    Failed { error: String, retry_in: Duration },
}

impl RenewOutcome {
    /// When the supervisor should try again, if ever.
    pub fn next_attempt(&self) -> Option<Duration> {
        match self {
            RenewOutcome::Disabled => None,
            RenewOutcome::Renewed { next_in, .. } => Some(*next_in),
            RenewOutcome::Failed { retry_in, .. } => Some(*retry_in),
        }
    }
}

/// Owns the signing identity. Readers get whatever was last loaded successfully;
/// a failed reload keeps the previous identity in place.
pub struct CredentialManager {
    enabled: bool,
    cert_path: PathBuf,
    key_path: PathBuf,
    identity: ArcSwapOption<SigningIdentity>,
    first_delay: Option<Duration>,
}

impl CredentialManager {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            identity: ArcSwapOption::empty(),
            first_delay: None,
        }
    }

    /// Decide the auth mode and perform the first load.
    ///
    /// Signing is disabled when auth is off, either path is empty, the
    /// certificate file is missing, or the key file cannot be opened. A
    /// certificate that exists but does not parse keeps signing enabled with
    /// no identity and schedules a retry.
    pub fn initialize(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>, auth_enabled: bool) -> Self {
        let (cert_path, key_path) = (cert_path.as_ref(), key_path.as_ref());
        let reason = if !auth_enabled {
            Some("auth disabled by configuration".to_string())
        } else if cert_path.as_os_str().is_empty() || key_path.as_os_str().is_empty() {
            Some("certificate or key path not set".to_string())
        } else if !cert_path.exists() {
            Some(format!("certificate file {} not found", cert_path.display()))
        } else if let Err(e) = std::fs::File::open(key_path) {
            Some(format!("key file {} unreadable: {e}", key_path.display()))
        } else {
            None
        };
        if let Some(reason) = reason {
            info!(%reason, "request signing disabled");
            return Self::disabled();
        }

        let mut mgr = Self {
            enabled: true,
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            identity: ArcSwapOption::empty(),
            first_delay: None,
        };
        mgr.first_delay = mgr.renew().next_attempt();
        mgr
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn identity(&self) -> Option<Arc<SigningIdentity>> {
        self.identity.load_full()
    }

    /// Reload certificate and key from disk.
    pub fn renew(&self) -> RenewOutcome {
        if !self.enabled {
            return RenewOutcome::Disabled;
        }
        match SigningIdentity::load(&self.cert_path, &self.key_path) {
            Ok(identity) => {
                let not_after = identity.not_after();
                self.identity.store(Some(Arc::new(identity)));
                counter!("credential_renew_ok_total", 1u64);
                let mut next_in = renewal_delay(not_after, Utc::now());
                if next_in.is_zero() {
                    // same files would load again; give the issuer time to rotate them
                    warn!(%not_after, "certificate is inside its renewal window");
                    next_in = RETRY_DELAY;
                }
                info!(%not_after, next_in = %humantime::format_duration(next_in), "signing identity loaded");
                RenewOutcome::Renewed { not_after, next_in }
            }
            Err(e) => {
                counter!("credential_renew_err_total", 1u64);
                warn!(error = %e, retry_in = %humantime::format_duration(RETRY_DELAY), "loading signing identity");
                RenewOutcome::Failed { error: e.to_string(), retry_in: RETRY_DELAY }
            }
        }
    }

    /// Supervisory loop. Returns immediately when signing is disabled.
    pub async fn run(self: Arc<Self>) {
        let Some(mut delay) = self.first_delay else { return };
        loop {
            tokio::time::sleep(delay).await;
            match self.renew().next_attempt() {
                Some(next) => delay = next,
                None => return,
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
