use serde::{Deserialize, Serialize};

/** \brief 未指定时使用的默认模型。 */
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/** \brief 未指定时使用的默认采样温度。 */
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/** \brief 未指定时使用的默认 Provider。 */
pub const DEFAULT_PROVIDER: &str = "openai";

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 代理接口 `POST /api/chat` 的请求体。
 * \details 所有字段均可缺省，缺省值与前端默认配置一致。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub use_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_api_key: Option<String>,
}

impl ChatRequest {
    /**
     * \brief 以本地配置与对话消息组装代理请求。
     */
    pub fn from_config(config: &ListingConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            messages,
            provider: config.provider.clone(),
            use_custom: config.use_custom,
            custom_endpoint: Some(config.custom_endpoint.clone()),
            custom_api_key: Some(config.custom_api_key.clone()),
        }
    }
}

/**
 * \brief 代理接口成功时的响应体。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub content: String,
}

/**
 * \brief 生成配置记录，保存在本地存储中。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingConfig {
    /** \brief Provider 标识：openai/openrouter/together */
    pub provider: String,
    /** \brief 模型名 */
    pub model: String,
    /** \brief 采样温度 */
    pub temperature: f64,
    /** \brief 是否改用自定义端点 */
    pub use_custom: bool,
    /** \brief 自定义端点 URL */
    pub custom_endpoint: String,
    /** \brief 自定义 API Key */
    pub custom_api_key: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            use_custom: false,
            custom_endpoint: String::new(),
            custom_api_key: String::new(),
        }
    }
}

/**
 * \brief 需要生成的内容类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenType {
    Title,
    Bullets,
    #[default]
    Both,
}

impl GenType {
    pub fn wants_title(self) -> bool {
        matches!(self, GenType::Title | GenType::Both)
    }

    pub fn wants_bullets(self) -> bool {
        matches!(self, GenType::Bullets | GenType::Both)
    }
}

/**
 * \brief 表单输入：关键词、产品说明与竞品文案。
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingForm {
    pub keywords: String,
    /** \brief 产品说明 */
    pub features: String,
    pub comp_title: String,
    pub comp_bullets: String,
    pub gen_type: GenType,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}
