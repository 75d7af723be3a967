//! HTTPS fetch side of the LVC skymap boundary. Retrieving the bytes is in
//! scope; decoding the multi-order FITS/HEALPix table into pixels is not
//! (see `SkymapFetcher` in `skywatch_core::lvc`) — this adapter fetches and
//! reports the decode step as unsupported rather than guessing a format.

use async_trait::async_trait;
use reqwest::Client;
use skywatch_core::error::{Result, SchedulerError};
use skywatch_core::lvc::{SkymapFetcher, SkymapPixel};

pub struct HttpSkymapFetcher {
    client: Client,
}

impl HttpSkymapFetcher {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpSkymapFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkymapFetcher for HttpSkymapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<SkymapPixel>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            return Err(SchedulerError::MalformedAlert("empty skymap response".into()));
        }
        Err(SchedulerError::MalformedAlert(
            "multi-order FITS/HEALPix skymap decoding is outside this crate's scope".into(),
        ))
    }
}
