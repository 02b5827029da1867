use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use super::SourceStatus;

/// Backend collaborator that stores picture and alert records.
pub trait AlertBackend: Send {
    /// Register the snapshot reference. Returns the backend's picture id.
    fn submit_picture(&mut self, picture: &str) -> Result<i64>;

    /// Create the alert record for a registered picture.
    fn submit_alert(&mut self, picture_id: i64, status: SourceStatus) -> Result<AlertConfirmation>;
}

/// Payload returned by the alert endpoint. This is what the audit log records.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AlertConfirmation {
    pub picture: String,
}

#[derive(Serialize)]
struct PictureRequest<'a> {
    picture: &'a str,
}

#[derive(Deserialize)]
struct PictureResponse {
    picture_id: i64,
}

#[derive(Serialize)]
struct AlertRequest {
    picture_id: i64,
    status: SourceStatus,
}

/// JSON-over-HTTP backend client.
pub struct HttpAlertBackend {
    agent: ureq::Agent,
    picture_url: String,
    alert_url: String,
}

impl HttpAlertBackend {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).context("parse backend url")?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported backend scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let base = base.as_str().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            picture_url: format!("{}/picture", base),
            alert_url: format!("{}/alert", base),
        })
    }

    fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(&self, url: &str, body: &B) -> Result<R> {
        let response = self
            .agent
            .post(url)
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => anyhow!("POST {} returned status {}", url, code),
                other => anyhow!("POST {} failed: {}", url, other),
            })?;
        response
            .into_json::<R>()
            .with_context(|| format!("POST {} returned a malformed body", url))
    }
}

impl AlertBackend for HttpAlertBackend {
    fn submit_picture(&mut self, picture: &str) -> Result<i64> {
        let response: PictureResponse =
            self.post_json(&self.picture_url, &PictureRequest { picture })?;
        Ok(response.picture_id)
    }

    fn submit_alert(&mut self, picture_id: i64, status: SourceStatus) -> Result<AlertConfirmation> {
        self.post_json(&self.alert_url, &AlertRequest { picture_id, status })
    }
}
