use anyhow::Context;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::{error::ProxyError, models::ChatRequest, models::Message};

/**
 * \brief 内置 Provider，端点与密钥来源固定。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAI,
    OpenRouter,
    Together,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAI,
        ProviderKind::OpenRouter,
        ProviderKind::Together,
    ];

    /**
     * \brief 按名称解析 Provider，未知名称返回 None。
     */
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(ProviderKind::OpenAI),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "together" => Some(ProviderKind::Together),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Together => "together",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1/chat/completions",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            ProviderKind::Together => "https://api.together.xyz/v1/chat/completions",
        }
    }

    /** \brief 存放该 Provider 密钥的环境变量名。 */
    pub fn key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
        }
    }
}

/**
 * \brief 服务端持有的 Provider 密钥，空字符串视为缺失。
 */
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    openai: Option<String>,
    openrouter: Option<String>,
    together: Option<String>,
}

impl ProviderKeys {
    /**
     * \brief 从环境变量读取全部 Provider 密钥。
     */
    pub fn from_env() -> Self {
        ProviderKind::ALL
            .into_iter()
            .fold(Self::default(), |keys, kind| match std::env::var(kind.key_env()) {
                Ok(value) => keys.with(kind, value),
                Err(_) => keys,
            })
    }

    pub fn with(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        let key = Some(key.into()).filter(|k| !k.is_empty());
        match kind {
            ProviderKind::OpenAI => self.openai = key,
            ProviderKind::OpenRouter => self.openrouter = key,
            ProviderKind::Together => self.together = key,
        }
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::OpenAI => self.openai.as_deref(),
            ProviderKind::OpenRouter => self.openrouter.as_deref(),
            ProviderKind::Together => self.together.as_deref(),
        }
    }

    /** \brief 已配置密钥的 Provider 列表。 */
    pub fn configured(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

/**
 * \brief 解析后的上游目标。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub endpoint: String,
    pub api_key: String,
}

/**
 * \brief 根据请求选择上游端点与密钥。
 * \details useCustom 时两项自定义字段都必须提供；否则按内置 Provider 表解析。
 */
pub fn resolve_target(req: &ChatRequest, keys: &ProviderKeys) -> Result<Target, ProxyError> {
    if req.use_custom {
        let endpoint = non_empty(req.custom_endpoint.as_deref());
        let api_key = non_empty(req.custom_api_key.as_deref());
        return match (endpoint, api_key) {
            (Some(endpoint), Some(api_key)) => Ok(Target {
                endpoint: endpoint.to_string(),
                api_key: api_key.to_string(),
            }),
            _ => Err(ProxyError::BadRequest(
                "customEndpoint and customApiKey are required when useCustom=true".to_string(),
            )),
        };
    }

    let kind = ProviderKind::parse(&req.provider)
        .ok_or_else(|| ProxyError::BadRequest(format!("Unknown provider: {}", req.provider)))?;
    let api_key = keys
        .get(kind)
        .ok_or_else(|| ProxyError::MissingSecret(req.provider.clone()))?;
    Ok(Target {
        endpoint: kind.endpoint().to_string(),
        api_key: api_key.to_string(),
    })
}

/**
 * \brief 非流式调用，返回首个 choice 的文本。
 */
pub async fn chat_once(
    client: &reqwest::Client,
    target: &Target,
    model: &str,
    temperature: f64,
    messages: &[Message],
) -> Result<String, ProxyError> {
    let body = json!({
        "model": model,
        "temperature": temperature,
        "messages": messages,
    });

    let resp = client
        .post(&target.endpoint)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", target.api_key))
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        return Err(ProxyError::Upstream { status, body });
    }
    let v: Value = resp
        .json()
        .await
        .context("upstream returned invalid JSON")?;
    Ok(extract_openai_content(&v))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/**
 * \brief 取 `choices[0].message.content`，兼容旧版 completions 的 `choices[0].text`。
 */
fn extract_openai_content(v: &Value) -> String {
    let first = v.get("choices").and_then(|c| c.get(0));
    first
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| first.and_then(|c| c.get("text")).and_then(|t| t.as_str()))
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(provider: &str) -> ChatRequest {
        serde_json::from_value(json!({
            "provider": provider,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .expect("parse request")
    }

    fn all_keys() -> ProviderKeys {
        ProviderKeys::default()
            .with(ProviderKind::OpenAI, "sk-openai")
            .with(ProviderKind::OpenRouter, "sk-or")
            .with(ProviderKind::Together, "sk-together")
    }

    #[test]
    fn test_provider_table_is_fixed() {
        let keys = all_keys();
        let cases = [
            ("openai", "https://api.openai.com/v1/chat/completions", "sk-openai"),
            ("openrouter", "https://openrouter.ai/api/v1/chat/completions", "sk-or"),
            ("together", "https://api.together.xyz/v1/chat/completions", "sk-together"),
        ];
        for (provider, endpoint, key) in cases {
            let target = resolve_target(&request(provider), &keys).expect("resolve");
            assert_eq!(target.endpoint, endpoint);
            assert_eq!(target.api_key, key);
        }
    }

    #[test]
    fn test_unknown_provider_is_bad_request() {
        for provider in ["anthropic", "OpenAI", ""] {
            let err = resolve_target(&request(provider), &all_keys()).unwrap_err();
            assert!(matches!(err, ProxyError::BadRequest(_)));
            assert_eq!(err.to_string(), format!("Unknown provider: {}", provider));
        }
    }

    #[test]
    fn test_missing_secret_is_server_error() {
        let keys = ProviderKeys::default().with(ProviderKind::OpenAI, "sk-openai");
        let err = resolve_target(&request("together"), &keys).unwrap_err();
        assert!(matches!(err, ProxyError::MissingSecret(ref p) if p == "together"));

        let blank = ProviderKeys::default().with(ProviderKind::OpenAI, "");
        assert!(matches!(
            resolve_target(&request("openai"), &blank),
            Err(ProxyError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_custom_requires_endpoint_and_key() {
        let variants = [
            (None, Some("sk")),
            (Some("https://llm.example.com"), None),
            (Some(""), Some("sk")),
            (None, None),
        ];
        for (endpoint, key) in variants {
            let mut req = request("whatever");
            req.use_custom = true;
            req.custom_endpoint = endpoint.map(str::to_string);
            req.custom_api_key = key.map(str::to_string);
            let err = resolve_target(&req, &ProviderKeys::default()).unwrap_err();
            assert!(matches!(err, ProxyError::BadRequest(_)));
        }
    }

    #[test]
    fn test_custom_bypasses_provider_table() {
        let mut req = request("not-a-provider");
        req.use_custom = true;
        req.custom_endpoint = Some("https://llm.example.com/v1/chat/completions".into());
        req.custom_api_key = Some("sk-custom".into());
        let target = resolve_target(&req, &ProviderKeys::default()).expect("resolve");
        assert_eq!(target.endpoint, "https://llm.example.com/v1/chat/completions");
        assert_eq!(target.api_key, "sk-custom");
    }

    #[test]
    fn test_configured_lists_only_present_keys() {
        let keys = ProviderKeys::default().with(ProviderKind::Together, "sk");
        assert_eq!(keys.configured(), vec![ProviderKind::Together]);
    }

    #[test]
    fn test_extract_content_prefers_message_then_text() {
        let chat = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_openai_content(&chat), "hello");
        let legacy = json!({"choices": [{"text": "legacy"}]});
        assert_eq!(extract_openai_content(&legacy), "legacy");
        let null_content = json!({"choices": [{"message": {"content": null}, "text": "fallback"}]});
        assert_eq!(extract_openai_content(&null_content), "fallback");
        assert_eq!(extract_openai_content(&json!({"choices": []})), "");
    }
}
