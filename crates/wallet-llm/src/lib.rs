use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub use wallet_error::{Result, WalletError};

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_image(
        &self,
        instruction: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String>;
}

const DEFAULT_MODEL_TIMEOUT_MS: u64 = 60_000;

fn build_http(timeout_ms: Option<u64>) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(
            timeout_ms.unwrap_or(DEFAULT_MODEL_TIMEOUT_MS),
        ))
        .build()
        .map_err(|e| WalletError::Configuration {
            key: "model.timeout_ms".to_string(),
            reason: e.to_string(),
        })
}

fn unavailable(provider: &str, err: impl std::fmt::Display) -> WalletError {
    WalletError::ModelUnavailable {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}

// ========== Vertex AI (Gemini) ==========

#[derive(Clone)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,        // e.g. us-central1
    pub model: String,           // e.g. gemini-2.5-flash-lite
    pub access_token: String,    // OAuth bearer token
    pub api_url: Option<String>, // override for proxies / tests
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct VertexGeminiClient {
    http: Client,
    cfg: VertexConfig,
}

impl VertexGeminiClient {
    pub fn new(cfg: VertexConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(cfg.timeout_ms)?,
            cfg,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.cfg.api_url.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com", self.cfg.location)
        });
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base.trim_end_matches('/'),
            self.cfg.project_id,
            self.cfg.location,
            self.cfg.model
        )
    }

    async fn generate_parts(&self, parts: Vec<GeminiPart>) -> Result<String> {
        let body = GeminiReq {
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
            generation_config: self.cfg.temperature.map(|t| GeminiGenConfig { temperature: t }),
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("vertex", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(unavailable("vertex", format!("status={} body={}", status, txt)));
        }

        let data: GeminiResp = resp.json().await.map_err(|e| unavailable("vertex", e))?;
        let candidate = data
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| unavailable("vertex", "response carried no candidates"))?;
        let mut out = String::new();
        for p in candidate.content.parts {
            if let Some(t) = p.text {
                out.push_str(&t);
            }
        }
        Ok(out)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiReq {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum GeminiPart {
    Text(String),
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

#[derive(Serialize)]
struct GeminiGenConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResp {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiRespContent,
}

#[derive(Deserialize)]
struct GeminiRespContent {
    #[serde(default)]
    parts: Vec<GeminiRespPart>,
}

#[derive(Deserialize)]
struct GeminiRespPart {
    text: Option<String>,
}

#[async_trait]
impl ChatModel for VertexGeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.cfg.model))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_parts(vec![GeminiPart::Text(prompt.to_string())])
            .await
    }
}

#[async_trait]
impl VisionModel for VertexGeminiClient {
    #[instrument(skip(self, instruction, image), fields(model = %self.cfg.model, bytes = image.len()))]
    async fn describe_image(
        &self,
        instruction: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        self.generate_parts(vec![
            GeminiPart::InlineData {
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(image),
            },
            GeminiPart::Text(instruction.to_string()),
        ])
        .await
    }
}

// ========== OpenAI-compatible (OpenAI, gateways, local servers) ==========

#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String, // e.g. https://api.openai.com
    pub api_key: String,  // Bearer token
    pub model: String,    // e.g. gpt-4o-mini
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(cfg.timeout_ms)?,
            cfg,
        })
    }

    async fn complete(&self, content: OaiContent) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        let body = OaiChatReq {
            model: self.cfg.model.clone(),
            messages: vec![OaiChatReqMsg {
                role: "user",
                content,
            }],
            temperature: self.cfg.temperature,
        };

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("openai_compat", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(unavailable(
                "openai_compat",
                format!("status={} body={}", status, txt),
            ));
        }

        let data: OaiChatResp = resp
            .json()
            .await
            .map_err(|e| unavailable("openai_compat", e))?;
        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| unavailable("openai_compat", "response carried no choices"))
    }
}

#[derive(Serialize)]
struct OaiChatReqMsg {
    role: &'static str,
    content: OaiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OaiContent {
    Text(String),
    Parts(Vec<OaiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OaiPart {
    Text { text: String },
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Serialize)]
struct OaiImageUrl {
    url: String,
}

#[derive(Serialize)]
struct OaiChatReq {
    model: String,
    messages: Vec<OaiChatReqMsg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct OaiChatRespChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiChatRespChoice {
    message: OaiChatRespChoiceMsg,
}

#[derive(Deserialize)]
struct OaiChatResp {
    choices: Vec<OaiChatRespChoice>,
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    #[instrument(skip(self, prompt), fields(model = %self.cfg.model))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.complete(OaiContent::Text(prompt.to_string())).await
    }
}

#[async_trait]
impl VisionModel for OpenAiCompatClient {
    #[instrument(skip(self, instruction, image), fields(model = %self.cfg.model, bytes = image.len()))]
    async fn describe_image(
        &self,
        instruction: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        self.complete(OaiContent::Parts(vec![
            OaiPart::Text {
                text: instruction.to_string(),
            },
            OaiPart::ImageUrl {
                image_url: OaiImageUrl { url: data_url },
            },
        ]))
        .await
    }
}

// ========== Provider Factory & Config ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelProviderConfig {
    #[serde(rename = "vertex")]
    Vertex {
        project_id: String,
        location: String,
        model: String,
        access_token: String,
        api_url: Option<String>,
        temperature: Option<f32>,
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        model: String,
        temperature: Option<f32>,
        timeout_ms: Option<u64>,
    },
}

/// 同一个客户端同时承担文本问答与图片分类
pub struct Providers {
    pub chat: Arc<dyn ChatModel>,
    pub vision: Arc<dyn VisionModel>,
}

pub fn make_providers(cfg: ModelProviderConfig) -> Result<Providers> {
    match cfg {
        ModelProviderConfig::Vertex {
            project_id,
            location,
            model,
            access_token,
            api_url,
            temperature,
            timeout_ms,
        } => {
            let client = Arc::new(VertexGeminiClient::new(VertexConfig {
                project_id,
                location,
                model,
                access_token,
                api_url,
                temperature,
                timeout_ms,
            })?);
            Ok(Providers {
                chat: client.clone(),
                vision: client,
            })
        }
        ModelProviderConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
            temperature,
            timeout_ms,
        } => {
            let client = Arc::new(OpenAiCompatClient::new(OpenAiCompatConfig {
                base_url,
                api_key,
                model,
                temperature,
                timeout_ms,
            })?);
            Ok(Providers {
                chat: client.clone(),
                vision: client,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gemini_request_shape() {
        let body = GeminiReq {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![
                    GeminiPart::InlineData {
                        mime_type: "image/png".into(),
                        data: "AAAA".into(),
                    },
                    GeminiPart::Text("classify".into()),
                ],
            }],
            generation_config: Some(GeminiGenConfig { temperature: 0.5 }),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(
            v,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                        {"text": "classify"}
                    ]
                }],
                "generationConfig": {"temperature": 0.5}
            })
        );
    }

    #[test]
    fn test_openai_vision_request_shape() {
        let body = OaiChatReq {
            model: "gpt-4o-mini".into(),
            messages: vec![OaiChatReqMsg {
                role: "user",
                content: OaiContent::Parts(vec![
                    OaiPart::Text {
                        text: "classify".into(),
                    },
                    OaiPart::ImageUrl {
                        image_url: OaiImageUrl {
                            url: "data:image/png;base64,AAAA".into(),
                        },
                    },
                ]),
            }],
            temperature: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["messages"][0]["content"][0]["type"], "text");
        assert_eq!(v["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            v["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        assert!(v.get("temperature").is_none());
    }

    #[test]
    fn test_vertex_endpoint() {
        let client = VertexGeminiClient::new(VertexConfig {
            project_id: "p1".into(),
            location: "us-central1".into(),
            model: "gemini-2.5-flash-lite".into(),
            access_token: "t".into(),
            api_url: None,
            temperature: None,
            timeout_ms: None,
        })
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/p1/locations/us-central1/publishers/google/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[tokio::test]
    async fn test_unreachable_model_is_model_unavailable() {
        let client = OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: "k".into(),
            model: "m".into(),
            temperature: None,
            timeout_ms: Some(2_000),
        })
        .unwrap();
        let err = client.generate("hello").await.unwrap_err();
        assert!(matches!(err, WalletError::ModelUnavailable { .. }));
    }
}
