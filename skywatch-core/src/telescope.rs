//! Telescope client (C9): a typed, best-effort wrapper over the per-telescope
//! controller HTTP API. Every call logs and returns failure on transport or
//! non-2xx errors rather than propagating past this boundary.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Certificate, Client, Identity};
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Static configuration for one telescope, fixed after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telescope {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Paths to the TLS material used for mutual-auth sessions in production
/// mode (`turbo.crt` CA bundle, `popcorn.crt`/`popcorn.key` client pair).
#[derive(Debug, Clone)]
pub struct CertPaths {
    pub ca_bundle: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnclosureState {
    Closed,
    Opening,
    Opened,
    Closing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelescopeState {
    pub running: bool,
    pub queue_size: u32,
    pub enclosure: EnclosureState,
    pub last_focused: i64,
    pub last_flat: i64,
}

#[derive(Debug, Clone, Serialize)]
struct PointBody {
    ra: f64,
    dec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposureRequest {
    pub exposure: f64,
    pub gain: f64,
    pub offset: f64,
    pub frame_type: String,
    pub object_name: String,
    pub ra: f64,
    pub dec: f64,
}

/// Every call distinguishes transport failure (logged, `Ok(None)`/`false`)
/// from a decoded response; callers never see a raised exception from this
/// boundary.
pub struct TelescopeClient {
    telescope: Telescope,
    client: Client,
    scheme: &'static str,
}

impl std::fmt::Debug for TelescopeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelescopeClient")
            .field("telescope", &self.telescope)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl TelescopeClient {
    /// Plain HTTP, no TLS material — used in `--debug` mode.
    pub fn insecure(telescope: Telescope) -> crate::error::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            telescope,
            client,
            scheme: "http",
        })
    }

    /// TLS with a CA bundle for server verification and a client cert/key
    /// pair for mutual auth — used in production mode.
    pub fn tls(telescope: Telescope, certs: &CertPaths) -> crate::error::Result<Self> {
        let ca_pem = std::fs::read(&certs.ca_bundle)?;
        let cert_pem = std::fs::read(&certs.client_cert)?;
        let key_pem = std::fs::read(&certs.client_key)?;

        let ca = Certificate::from_pem(&ca_pem)
            .map_err(|e| crate::error::SchedulerError::Tls(e.to_string()))?;
        let mut identity_pem = cert_pem;
        identity_pem.extend_from_slice(&key_pem);
        let identity = Identity::from_pem(&identity_pem)
            .map_err(|e| crate::error::SchedulerError::Tls(e.to_string()))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(ca)
            .identity(identity)
            .build()?;
        Ok(Self {
            telescope,
            client,
            scheme: "https",
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, self.telescope.host, self.telescope.port, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Option<T> {
        match self.client.get(self.url(path)).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<T>().await {
                Ok(body) => Some(body),
                Err(err) => {
                    tracing::warn!(telescope = %self.telescope.name, path, error = %err, "malformed response body");
                    None
                }
            },
            Ok(resp) => {
                tracing::warn!(telescope = %self.telescope.name, path, status = %resp.status(), "non-2xx response");
                None
            }
            Err(err) => {
                tracing::warn!(telescope = %self.telescope.name, path, error = %err, "transport error");
                None
            }
        }
    }

    async fn post_ok(&self, path: &str, body: Option<&(impl Serialize + Sync)>) -> bool {
        let mut req = self.client.post(self.url(path));
        if let Some(b) = body {
            req = req.json(b);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(telescope = %self.telescope.name, path, status = %resp.status(), "non-2xx response");
                false
            }
            Err(err) => {
                tracing::warn!(telescope = %self.telescope.name, path, error = %err, "transport error");
                false
            }
        }
    }

    pub async fn state(&self) -> Option<TelescopeState> {
        self.get_json("/telescope_controller/state").await
    }

    pub async fn start(&self) -> bool {
        self.post_ok("/telescope_controller/start", None::<&()>).await
    }

    pub async fn reset(&self) -> bool {
        self.post_ok("/telescope_controller/reset", None::<&()>).await
    }

    pub async fn stop(&self) -> bool {
        self.post_ok("/telescope_controller/stop", None::<&()>).await
    }

    pub async fn open_enclosure(&self) -> bool {
        self.post_ok("/telescope_controller/enclosure/open", None::<&()>).await
    }

    pub async fn point(&self, ra_deg: f64, dec_deg: f64) -> bool {
        self.post_ok(
            "/telescope_controller/behavior/mount/point",
            Some(&PointBody { ra: ra_deg, dec: dec_deg }),
        )
        .await
    }

    pub async fn park(&self) -> bool {
        self.post_ok("/telescope_controller/behavior/mount/park", None::<&()>).await
    }

    pub async fn exposure(&self, request: &ExposureRequest) -> bool {
        self.post_ok("/telescope_controller/behavior/camera/exposure", Some(request)).await
    }

    pub async fn focus(&self) -> bool {
        self.post_ok("/telescope_controller/behavior/camera/focus", None::<&()>).await
    }

    pub async fn dawn_flats(&self) -> bool {
        self.post_ok("/telescope_controller/behavior/flats/dawn_flats", None::<&()>).await
    }

    pub async fn dusk_flats(&self) -> bool {
        self.post_ok("/telescope_controller/behavior/flats/dusk_flats", None::<&()>).await
    }
}
