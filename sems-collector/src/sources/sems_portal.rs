use std::time::Duration;

use reqwest::{header::ACCEPT, Client, StatusCode};
use sems_model::domain::{Credentials, PlantSnapshot, Session};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::pipeline::{AuthError, FetchError, TelemetrySource};

pub const DEFAULT_LOGIN_URL: &str = "https://www.semsportal.com/api/v2/Common/CrossLogin";

const STATUS_PATH: &str = "v2/PowerStation/GetMonitorDetailByPowerstationId";

/// Token header sent before a session exists.
const ANONYMOUS_TOKEN: &str = r#"{"version":"","client":"ios","language":"en"}"#;

#[derive(Serialize)]
struct LoginRequest<'a> {
    account: &'a str,
    pwd: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "hasError", default)]
    has_error: bool,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    api: Option<String>,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    #[serde(rename = "powerStationId")]
    plant_id: &'a str,
}

/// Check the status envelope and pull out its `data` object.
///
/// The portal answers an invalid token with HTTP 200 and a non-`success`
/// message, so that case is reported as a rejected session.
fn status_data(body: Value) -> Result<Value, FetchError> {
    let Value::Object(mut envelope) = body else {
        return Err(FetchError::Malformed("response is not a JSON object".to_string()));
    };

    let msg = match envelope.get("msg") {
        Some(Value::String(msg)) => msg.clone(),
        Some(_) => return Err(FetchError::Malformed("`msg` is not a string".to_string())),
        None => return Err(FetchError::Malformed("missing `msg`".to_string())),
    };
    let data = envelope
        .remove("data")
        .ok_or_else(|| FetchError::Malformed("missing `data`".to_string()))?;

    if msg != "success" || data.is_null() {
        return Err(FetchError::SessionRejected(msg));
    }
    if !data.is_object() {
        return Err(FetchError::Malformed("`data` is not an object".to_string()));
    }
    Ok(data)
}

/// GoodWe SEMS Portal client for a single plant.
pub struct SemsPortalSource {
    client: Client,
    credentials: Credentials,
    login_url: String,
    session_max_age: time::Duration,
}

impl SemsPortalSource {
    pub fn new(
        credentials: Credentials,
        login_url: impl Into<String>,
        request_timeout: Duration,
        session_max_age: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("sems-collector/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            credentials,
            login_url: login_url.into(),
            session_max_age: time::Duration::try_from(session_max_age).unwrap_or(time::Duration::MAX),
        })
    }
}

#[async_trait::async_trait]
impl TelemetrySource for SemsPortalSource {
    fn plant_id(&self) -> &str {
        &self.credentials.plant_id
    }

    async fn obtain_session(&self) -> Result<Session, AuthError> {
        tracing::debug!(account = %self.credentials.account, "logging into SEMS portal");
        metrics::counter!("sems_logins_total").increment(1);

        let response = self
            .client
            .post(&self.login_url)
            .header(ACCEPT, "application/json")
            .header("token", ANONYMOUS_TOKEN)
            .json(&LoginRequest {
                account: &self.credentials.account,
                pwd: &self.credentials.password,
            })
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status));
        }

        let body: LoginResponse = response.json().await.map_err(|e| AuthError::Rejected {
            message: format!("unreadable login response: {e}"),
        })?;
        let message = body.msg.unwrap_or_default();

        let (token, api) = match (body.has_error, body.data, body.api) {
            (false, Some(token), Some(api)) if !api.is_empty() => (token, api),
            _ => return Err(AuthError::Rejected { message }),
        };

        let session = Session::new(token, api, OffsetDateTime::now_utc(), self.session_max_age);
        tracing::info!(
            account = %self.credentials.account,
            api = %session.api_base,
            "logged into SEMS portal"
        );
        Ok(session)
    }

    async fn fetch_status(&self, session: &Session) -> Result<PlantSnapshot, FetchError> {
        let url = session.endpoint(STATUS_PATH);
        tracing::debug!(%url, plant_id = %self.credentials.plant_id, "querying plant status");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header("token", session.token_header())
            .json(&StatusRequest {
                plant_id: &self.credentials.plant_id,
            })
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::SessionRejected(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(PlantSnapshot {
            plant_id: self.credentials.plant_id.clone(),
            fetched_at: OffsetDateTime::now_utc(),
            data: status_data(body)?,
        })
    }
}
