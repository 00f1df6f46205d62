//! HTTP gateway client for the certificate authority
//!
//! Speaks a single JSON call to a TCA gateway:
//! `POST {url}/v1/tcerts` with `{"count": n}` → `{"tcerts": [base64 DER, ...]}`.
//! The gateway owns the authority protocol; this adapter only moves batches.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use serde::{Deserialize, Serialize};
use tcert::{Error, Result, TCert, TCertAuthority};
use tracing::{debug, warn};

use crate::config::AuthorityConfig;

#[derive(Debug, Serialize)]
struct FetchRequest {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    tcerts: Vec<String>,
}

/// `TCertAuthority` backed by the gateway's HTTP API.
pub struct HttpAuthority {
    client: reqwest::Client,
    endpoint: String,
    token: Option<Secret<String>>,
    timeout: Duration,
}

impl HttpAuthority {
    pub fn new(client: reqwest::Client, config: &AuthorityConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/tcerts", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn fetch(&self, count: usize) -> Result<Vec<TCert>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&FetchRequest { count });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("tcert request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Fetch(format!(
                "authority returned {status}: {body}"
            )));
        }

        let batch = response
            .json::<FetchResponse>()
            .await
            .map_err(|e| Error::Fetch(format!("invalid tcert response: {e}")))?;

        let received = batch.tcerts.len();
        let mut tcerts = Vec::with_capacity(received);
        for (index, encoded) in batch.tcerts.iter().enumerate() {
            let der = match STANDARD.decode(encoded) {
                Ok(der) => der,
                Err(e) => {
                    warn!(index, error = %e, "skipping undecodable tcert from authority");
                    continue;
                }
            };
            match self.tcert_from_der(&der) {
                Ok(tcert) => tcerts.push(tcert),
                Err(e) => warn!(index, error = %e, "skipping unparseable tcert from authority"),
            }
        }

        debug!(requested = count, received, accepted = tcerts.len(), "fetched tcerts");
        Ok(tcerts)
    }
}

impl TCertAuthority for HttpAuthority {
    fn fetch_tcerts(
        &self,
        count: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TCert>>> + Send + '_>> {
        Box::pin(self.fetch(count))
    }
}
