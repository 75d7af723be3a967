//! HTTP long-poll adapter for the external alert broker. The broker exposes
//! one XML payload per successful poll; credentials and the poll endpoint
//! come from [`crate::config::DaemonConfig`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use skywatch_core::alerts::AlertSource;
use skywatch_core::error::Result;

pub struct BrokerAlertSource {
    client: Client,
    url: String,
}

impl BrokerAlertSource {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSource for BrokerAlertSource {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<String>> {
        let request = self.client.get(&self.url).send();
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(resp)) if resp.status().is_success() => match resp.text().await {
                Ok(body) if !body.is_empty() => Ok(Some(body)),
                Ok(_) => Ok(None),
                Err(err) => {
                    tracing::warn!(error = %err, "broker poll returned an unreadable body");
                    Ok(None)
                }
            },
            Ok(Ok(resp)) => {
                tracing::warn!(status = %resp.status(), "broker poll returned a non-2xx status");
                Ok(None)
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "broker poll transport error");
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }
}
