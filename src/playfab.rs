//! Thin client for the Playfab matchmaking API the DS registers with.
//!
//! The service only answers requests carrying the exact SDK and User-Agent
//! identifiers the DS itself uses, so both are installed as default headers.
//! Four operations: health, session-ticket issuance, server lookup by
//! `ip:port` tag, and cloud-script deregistration.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const BASE_URL: &str = "https://5EA1.playfabapi.com";
const HEALTH_URL: &str = "https://5ea1.playfabapi.com/";
const TITLE_ID: &str = "5EA1";
const SDK_VERSION: &str = "UE4MKPL-1.49.201027";
const USER_AGENT: &str = "Astro/++UE4+Release-4.23-CL-0 Windows/10.0.19042.1.256.64bit";

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const ACCOUNT_CREATE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("matchmaking API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("matchmaking API responded with non-OK status: {0}")]
    Status(String),
    #[error("malformed matchmaking API response: {0}")]
    Decode(String),
}

/// One server registration as returned by the lookup endpoint. Only the
/// lobby id matters to the supervisor; the remainder of the record is kept
/// for debug logging.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredServer {
    #[serde(rename = "LobbyID")]
    pub lobby_id: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Standard Playfab response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl Envelope {
    fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("OK")
    }
}

pub struct PlayfabClient {
    http: reqwest::Client,
}

impl PlayfabClient {
    pub fn new() -> Result<Self, ApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-PlayFabSDK",
            reqwest::header::HeaderValue::from_static(SDK_VERSION),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// Whether the matchmaking API is reachable and reports itself healthy.
    /// Transport errors are folded into `false`.
    pub async fn check_health(&self) -> bool {
        #[derive(Deserialize)]
        struct Health {
            #[serde(rename = "Healthy")]
            healthy: bool,
        }

        match self.http.get(HEALTH_URL).send().await {
            Ok(response) => match response.json::<Health>().await {
                Ok(health) => health.healthy,
                Err(e) => {
                    debug!("Malformed matchmaking health response: {e}");
                    false
                }
            },
            Err(e) => {
                debug!("Error while checking matchmaking API health: {e}");
                false
            }
        }
    }

    /// Exchanges the server GUID for a session ticket. A first-time GUID
    /// answers `400 AccountNotFound`; retried once with `CreateAccount`
    /// after a short delay.
    pub async fn login_with_custom_id(&self, server_guid: &str) -> Result<String, ApiError> {
        let url = format!("{BASE_URL}/Client/LoginWithCustomID?sdk={SDK_VERSION}");
        let mut body = json!({
            "CreateAccount": false,
            "CustomId": server_guid,
            "TitleId": TITLE_ID,
        });

        let mut envelope: Envelope = self.http.post(&url).json(&body).send().await?.json().await?;

        if envelope.code == Some(400) && envelope.error.as_deref() == Some("AccountNotFound") {
            tokio::time::sleep(ACCOUNT_CREATE_RETRY_DELAY).await;
            body["CreateAccount"] = json!(true);
            envelope = self.http.post(&url).json(&body).send().await?.json().await?;
        }

        envelope.data["SessionTicket"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode("response carried no SessionTicket".to_string()))
    }

    /// Looks up every registration whose `gameId` tag matches `ip_port`.
    pub async fn get_current_games(
        &self,
        ip_port: &str,
        ticket: &str,
    ) -> Result<Vec<RegisteredServer>, ApiError> {
        let url = format!("{BASE_URL}/Client/GetCurrentGames?sdk={SDK_VERSION}");
        let body = json!({
            "TagFilter": {
                "Includes": [
                    { "Data": { "gameId": ip_port } }
                ]
            }
        });

        let envelope: Envelope = self
            .http
            .post(&url)
            .header("X-Authorization", ticket)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !envelope.is_ok() {
            return Err(ApiError::Status(describe_envelope(&envelope)));
        }

        serde_json::from_value(envelope.data["Games"].clone())
            .map_err(|e| ApiError::Decode(format!("bad Games list: {e}")))
    }

    /// Deregisters one lobby via the matchmaking cloud script.
    pub async fn deregister(&self, lobby_id: &str, ticket: &str) -> Result<(), ApiError> {
        let url = format!("{BASE_URL}/Client/ExecuteCloudScript?sdk={SDK_VERSION}");
        let body = json!({
            "FunctionName": "deregisterDedicatedServer",
            "FunctionParameter": {
                "lobbyId": lobby_id,
            },
            "GeneratePlayStreamEvent": true,
        });

        let envelope: Envelope = self
            .http
            .post(&url)
            .header("X-Authorization", ticket)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !envelope.is_ok() {
            return Err(ApiError::Status(describe_envelope(&envelope)));
        }
        Ok(())
    }
}

fn describe_envelope(envelope: &Envelope) -> String {
    match (&envelope.status, &envelope.error, envelope.code) {
        (_, Some(error), Some(code)) => format!("{code} {error}"),
        (Some(status), _, _) => status.clone(),
        _ => "unknown error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_status_ok_detection() {
        let ok: Envelope =
            serde_json::from_str(r#"{"code":200,"status":"OK","data":{"Games":[]}}"#).unwrap();
        assert!(ok.is_ok());

        let err: Envelope =
            serde_json::from_str(r#"{"code":400,"status":"BadRequest","error":"AccountNotFound"}"#)
                .unwrap();
        assert!(!err.is_ok());
        assert_eq!(describe_envelope(&err), "400 AccountNotFound");
    }

    #[test]
    fn registered_server_keeps_extra_fields() {
        let raw = r#"{"LobbyID":"lobby-1","ServerPort":7777,"GameMode":"CoopStandard"}"#;
        let server: RegisteredServer = serde_json::from_str(raw).unwrap();
        assert_eq!(server.lobby_id, "lobby-1");
        assert_eq!(server.rest["ServerPort"], 7777);
    }

    #[test]
    fn games_list_decodes_from_envelope_data() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"code":200,"status":"OK","data":{"Games":[{"LobbyID":"a"},{"LobbyID":"b"}]}}"#,
        )
        .unwrap();
        let games: Vec<RegisteredServer> =
            serde_json::from_value(envelope.data["Games"].clone()).unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[1].lobby_id, "b");
    }
}
