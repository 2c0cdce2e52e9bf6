use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.twilio.com";
const API_VERSION: &str = "2010-04-01";

/// Conference lifecycle states as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConferenceStatus {
    Init,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

impl ConferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferenceStatus::Init => "init",
            ConferenceStatus::InProgress => "in-progress",
            ConferenceStatus::Completed => "completed",
            ConferenceStatus::Unknown => "unknown",
        }
    }
}

/// A conference resource owned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conference {
    pub sid: String,
    #[serde(default)]
    pub friendly_name: String,
    pub status: ConferenceStatus,
}

/// The two provider operations the completion workflow needs.
#[async_trait]
pub trait ConferenceProvider: Send + Sync {
    /// List conferences matching a friendly name and status, in provider order.
    async fn list_conferences(
        &self,
        friendly_name: &str,
        status: ConferenceStatus,
    ) -> Result<Vec<Conference>, ProviderError>;

    /// Transition a conference to a new status.
    async fn update_status(
        &self,
        sid: &str,
        status: ConferenceStatus,
    ) -> Result<Conference, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ConferencePage {
    conferences: Vec<Conference>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Authenticated client for the Twilio Conferences REST API.
#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn with_base_url(account_sid: &str, auth_token: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    fn conferences_url(&self) -> String {
        format!(
            "{}/{}/Accounts/{}/Conferences.json",
            self.base_url, API_VERSION, self.account_sid
        )
    }

    fn conference_url(&self, sid: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/Conferences/{}.json",
            self.base_url, API_VERSION, self.account_sid, sid
        )
    }
}

/// Turn a non-2xx response into `ProviderError::Api`, passing success through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => (body.code, body.message.unwrap_or_else(|| text.clone())),
        Err(_) => (None, text),
    };
    Err(ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl ConferenceProvider for TwilioClient {
    async fn list_conferences(
        &self,
        friendly_name: &str,
        status: ConferenceStatus,
    ) -> Result<Vec<Conference>, ProviderError> {
        debug!(friendly_name = %friendly_name, status = status.as_str(), "listing conferences");
        let response = self
            .http
            .get(self.conferences_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .query(&[("FriendlyName", friendly_name), ("Status", status.as_str())])
            .send()
            .await?;

        let page: ConferencePage = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(page.conferences)
    }

    async fn update_status(
        &self,
        sid: &str,
        status: ConferenceStatus,
    ) -> Result<Conference, ProviderError> {
        debug!(sid = %sid, status = status.as_str(), "updating conference");
        let response = self
            .http
            .post(self.conference_url(sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", status.as_str())])
            .send()
            .await?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}
