//! Daemon-level configuration loaded from the environment, distinct from the
//! observatory JSON that [`skywatch_core::config::ObservatoryConfig`] owns.

use std::env;
use std::path::PathBuf;

use skywatch_core::telescope::CertPaths;

/// Paths and broker settings needed to stand the daemon up, layered beneath
/// the CLI flags in [`crate::cli::Args`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub observatory_config_path: PathBuf,
    pub host_targets_path: PathBuf,
    pub tessellation_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub cert_paths: CertPaths,
    pub lvc_broker_url: Option<String>,
    pub grb_broker_url: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            observatory_config_path: env_path("SCHEDULER_CONFIG", "./observatories.json"),
            host_targets_path: env_path("SCHEDULER_HOST_TARGETS", "./host_targets.csv"),
            tessellation_path: env_path("SCHEDULER_TESSELLATION", "./rasa11.tess"),
            snapshot_path: env_path("SCHEDULER_SNAPSHOT", "./event_snapshot.json"),
            cert_paths: CertPaths {
                ca_bundle: env_path("SCHEDULER_CA_BUNDLE", "./certs/turbo.crt"),
                client_cert: env_path("SCHEDULER_CLIENT_CERT", "./certs/popcorn.crt"),
                client_key: env_path("SCHEDULER_CLIENT_KEY", "./certs/popcorn.key"),
            },
            lvc_broker_url: env::var("SCHEDULER_LVC_BROKER_URL").ok(),
            grb_broker_url: env::var("SCHEDULER_GRB_BROKER_URL").ok(),
        })
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}
