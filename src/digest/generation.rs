use crate::digest::config::{ModelEndpointConfig, PROVIDER_OLLAMA, PROVIDER_OPENAI_COMPATIBLE};
use crate::digest::util::truncate_with_ellipsis;
use crate::error::GenerationError;
use anyhow::{Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub schema: &'a Value,
    pub timeout: Duration,
}

/// A text-generation endpoint. Implementations make exactly one attempt per
/// call; retrying is the caller's business.
pub trait GenerationClient: Send + Sync {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// JSON schema asking for one required string field.
pub fn summary_schema(field: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            field: {"type": "string"}
        },
        "required": [field]
    })
}

fn send_json(
    builder: RequestBuilder,
    payload: &Value,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    let response = builder
        .timeout(timeout)
        .json(payload)
        .send()
        .map_err(|err| map_transport_error(err, timeout))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| map_transport_error(err, timeout))?;
    if !status.is_success() {
        return Err(GenerationError::Status {
            status: status.as_u16(),
            body: truncate_with_ellipsis(body.trim(), MAX_ERROR_BODY_CHARS),
        });
    }
    serde_json::from_str(&body).map_err(|err| GenerationError::MalformedResponse(err.to_string()))
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout {
            timeout_secs: timeout.as_secs().max(1),
        }
    } else {
        GenerationError::Transport(err.to_string())
    }
}

fn http_client() -> Result<Client> {
    Ok(Client::builder().build()?)
}

pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    num_ctx: u64,
}

impl OllamaClient {
    pub fn new(cfg: &ModelEndpointConfig) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            num_ctx: cfg.num_ctx,
        })
    }
}

fn extract_ollama_text(json: &Value) -> Option<String> {
    match json.get("response")? {
        Value::String(text) => Some(text.to_string()),
        Value::Object(object) => Some(Value::Object(object.clone()).to_string()),
        _ => None,
    }
}

impl GenerationClient for OllamaClient {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "format": request.schema,
            "options": {"num_ctx": self.num_ctx}
        });
        let json = send_json(
            self.client.post(&self.endpoint),
            &payload,
            request.timeout,
        )?;
        extract_ollama_text(&json).ok_or_else(|| {
            GenerationError::MalformedResponse("ollama response missing `response`".to_string())
        })
    }
}

pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(cfg: &ModelEndpointConfig) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

fn extract_openai_compatible_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let mut chunks = Vec::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    chunks.push(text.to_string());
                }
            }
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

impl GenerationClient for OpenAiCompatClient {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/chat/completions");
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": request.prompt}
            ],
            "temperature": 0.2,
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "reply", "schema": request.schema}
            }
        });

        let mut builder = self.client.post(&url);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let json = send_json(builder, &payload, request.timeout)?;
        extract_openai_compatible_text(&json).ok_or_else(|| {
            GenerationError::MalformedResponse(
                "openai-compatible response missing text content".to_string(),
            )
        })
    }
}

pub fn build_client(cfg: &ModelEndpointConfig) -> Result<Box<dyn GenerationClient>> {
    match cfg.provider.as_str() {
        PROVIDER_OLLAMA => Ok(Box::new(OllamaClient::new(cfg)?)),
        PROVIDER_OPENAI_COMPATIBLE => Ok(Box::new(OpenAiCompatClient::new(cfg)?)),
        other => bail!("unsupported provider `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn local_cfg(endpoint: String) -> ModelEndpointConfig {
        let mut cfg = crate::digest::config::DigestConfig::default().generation;
        cfg.endpoint = endpoint;
        cfg
    }

    #[test]
    fn schema_requires_the_named_field() {
        let schema = summary_schema("summary");
        assert_eq!(schema["required"][0], "summary");
        assert_eq!(schema["properties"]["summary"]["type"], "string");
    }

    #[test]
    fn ollama_reply_may_be_string_or_object() {
        let text = extract_ollama_text(&json!({"response": "{\"summary\": \"a\"}"}));
        assert_eq!(text.as_deref(), Some("{\"summary\": \"a\"}"));

        let object = extract_ollama_text(&json!({"response": {"summary": "b"}}));
        assert_eq!(object.as_deref(), Some("{\"summary\":\"b\"}"));

        assert!(extract_ollama_text(&json!({"done": true})).is_none());
    }

    #[test]
    fn openai_compatible_content_parts_are_joined() {
        let json = json!({
            "choices": [{"message": {"content": [{"text": "one"}, {"text": "two"}]}}]
        });
        assert_eq!(
            extract_openai_compatible_text(&json).as_deref(),
            Some("one\ntwo")
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut cfg = local_cfg("http://127.0.0.1:9".to_string());
        cfg.provider = "carrier-pigeon".to_string();
        assert!(build_client(&cfg).is_err());
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let client = OllamaClient::new(&local_cfg(format!("http://127.0.0.1:{port}/api/generate")))
            .expect("client");
        let schema = summary_schema("summary");
        let err = client
            .generate(&GenerationRequest {
                prompt: "hi",
                schema: &schema,
                timeout: Duration::from_secs(5),
            })
            .expect_err("nothing is listening");
        assert!(matches!(err, GenerationError::Transport(_)), "{err:?}");
    }

    #[test]
    fn silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let client = OllamaClient::new(&local_cfg(format!("http://127.0.0.1:{port}/api/generate")))
            .expect("client");
        let schema = summary_schema("summary");
        let err = client
            .generate(&GenerationRequest {
                prompt: "hi",
                schema: &schema,
                timeout: Duration::from_millis(300),
            })
            .expect_err("listener never answers");
        assert_eq!(err, GenerationError::Timeout { timeout_secs: 1 });
        drop(listener);
    }
}
