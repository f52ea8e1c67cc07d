//! HTTP client for an OpenAI-compatible speech endpoint.
//!
//! POST {endpoint}/v1/audio/speech  → encoded audio bytes
//! GET  {endpoint}/v1/voices        → voice names

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{SpeechRequest, SpeechSynthesizer};
use crate::config::SpeechConfig;
use crate::error::SpeechError;

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

pub struct HttpSpeechClient {
    endpoint: String,
    model: String,
    format: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpSpeechClient {
    pub fn new(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            format: config.format.clone(),
            api_key: config.resolved_api_key(),
            client,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>, SpeechError> {
        let body = SpeechBody {
            model: &self.model,
            input: &request.text,
            voice: &request.voice,
            speed: request.rate.speed(),
            response_format: &self.format,
        };

        let url = format!("{}/v1/audio/speech", self.endpoint);
        debug!("POST {url} voice={} rate={} ({} chars)", request.voice, request.rate, request.text.len());

        let resp = self.authorize(self.client.post(&url)).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }

    async fn get_voices(&self) -> Result<Vec<String>, SpeechError> {
        let url = format!("{}/v1/voices", self.endpoint);
        let resp = self.authorize(self.client.get(&url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let data: Value = resp.json().await?;
        Ok(parse_voice_list(&data))
    }
}

impl SpeechSynthesizer for HttpSpeechClient {
    fn synthesize<'a>(&'a self, request: &'a SpeechRequest) -> BoxFuture<'a, Result<Vec<u8>, SpeechError>> {
        Box::pin(self.post_speech(request))
    }

    fn list_voices(&self) -> BoxFuture<'_, Result<Vec<String>, SpeechError>> {
        Box::pin(self.get_voices())
    }
}

/// Accept `[...]` or `{"voices": [...]}` with entries that are either
/// strings or objects carrying `ShortName`, `name` or `id`.
pub fn parse_voice_list(data: &Value) -> Vec<String> {
    let entries = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("voices") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(obj) => ["ShortName", "name", "id"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::Rate;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn speech_handler(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Vec<u8>) {
        if body["input"] == "fail" {
            return (StatusCode::SERVICE_UNAVAILABLE, b"busy".to_vec());
        }
        if body["input"] == "silent" {
            return (StatusCode::OK, Vec::new());
        }
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        let echo = format!(
            "{}|{}|{}|{}|{}",
            body["voice"].as_str().unwrap_or(""),
            body["speed"],
            body["response_format"].as_str().unwrap_or(""),
            body["input"].as_str().unwrap_or(""),
            auth
        );
        (StatusCode::OK, echo.into_bytes())
    }

    async fn voices_handler() -> Json<Value> {
        Json(json!({"voices": [{"ShortName": "en-US-AvaMultilingualNeural"}, {"name": "pt-BR-Thalita"}, "fr-FR-Denise"]}))
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/v1/audio/speech", post(speech_handler))
            .route("/v1/voices", get(voices_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(endpoint: &str, api_key: &str) -> HttpSpeechClient {
        let config = SpeechConfig {
            endpoint: format!("{endpoint}/"),
            api_key: api_key.into(),
            ..SpeechConfig::default()
        };
        HttpSpeechClient::new(&config).unwrap()
    }

    fn request(text: &str) -> SpeechRequest {
        SpeechRequest {
            text: text.into(),
            voice: "en-US-AvaMultilingualNeural".into(),
            rate: Rate::percent(50),
        }
    }

    #[tokio::test]
    async fn posts_speech_request() {
        let endpoint = spawn_server().await;
        let audio = client(&endpoint, "secret").synthesize(&request("Hello.")).await.unwrap();

        assert_eq!(
            String::from_utf8(audio).unwrap(),
            "en-US-AvaMultilingualNeural|1.5|mp3|Hello.|Bearer secret"
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let endpoint = spawn_server().await;
        let result = client(&endpoint, "k").synthesize(&request("fail")).await;

        match result {
            Err(SpeechError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_audio_is_an_error() {
        let endpoint = spawn_server().await;
        let result = client(&endpoint, "k").synthesize(&request("silent")).await;
        assert!(matches!(result, Err(SpeechError::EmptyAudio)));
    }

    #[tokio::test]
    async fn lists_voices() {
        let endpoint = spawn_server().await;
        let voices = client(&endpoint, "k").list_voices().await.unwrap();
        assert_eq!(voices, vec!["en-US-AvaMultilingualNeural", "pt-BR-Thalita", "fr-FR-Denise"]);
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        let result = client("http://127.0.0.1:9", "k").synthesize(&request("Hi.")).await;
        assert!(matches!(result, Err(SpeechError::Http(_))));
    }

    #[test]
    fn parses_plain_array() {
        let voices = parse_voice_list(&json!(["a", {"id": "b"}, 3]));
        assert_eq!(voices, vec!["a", "b"]);
        assert!(parse_voice_list(&json!({"other": 1})).is_empty());
    }
}
