use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use reqwest::header::CONTENT_TYPE;

use crate::{
    models::{ChatRequest, ChatResponse, ListingConfig, ListingForm, Message},
    prompt::{self, PromptKind},
    telemetry,
};

pub const STATUS_GENERATING: &str = "Generating, please wait…";
pub const STATUS_DONE: &str = "Done";
pub const STATUS_CLEARED: &str = "Cleared";

/**
 * \brief 状态栏文本及其类别。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Info(String),
    Warn(String),
    Error(String),
}

impl Status {
    pub fn text(&self) -> &str {
        match self {
            Status::Info(s) | Status::Warn(s) | Status::Error(s) => s,
        }
    }
}

/**
 * \brief 一次生成的结果；出错时已生成的部分仍保留。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub title: Option<String>,
    pub bullets: Option<String>,
    pub status: Option<Status>,
}

impl Outcome {
    pub fn title_len(&self) -> usize {
        self.title.as_deref().map(prompt::title_len).unwrap_or(0)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, Some(Status::Error(_)))
    }
}

/**
 * \brief 调用本地代理 `/api/chat` 的客户端。
 */
#[derive(Debug, Clone)]
pub struct ProxyClient {
    base_url: String,
    http: reqwest::Client,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /**
     * \brief 发送对话并返回去除首尾空白的回复文本。
     */
    pub async fn call(&self, config: &ListingConfig, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let payload = ChatRequest::from_config(config, messages);
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("API error: {} {}", status, text));
        }
        let data: ChatResponse = resp.json().await?;
        Ok(data.content.trim().to_string())
    }
}

/**
 * \brief 生成流程控制器；生成期间拒绝重复触发（仅为提示性的互斥）。
 */
#[derive(Debug)]
pub struct Controller {
    client: ProxyClient,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Controller {
    pub fn new(client: ProxyClient) -> Self {
        Self {
            client,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /**
     * \brief 执行一次生成：先标题后五点，顺序调用。
     * \details 任一步失败即停止，错误写入状态并记录日志。
     */
    pub async fn generate(&self, form: &ListingForm, config: &ListingConfig) -> Outcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Outcome {
                status: Some(Status::Warn("A generation is already running".to_string())),
                ..Outcome::default()
            };
        }
        let _guard = BusyGuard(&self.busy);

        let mut outcome = Outcome::default();
        telemetry::log_event(
            "client.generate",
            &format!("status={} type={:?}", STATUS_GENERATING, form.gen_type),
        );
        match self.run(form, config, &mut outcome).await {
            Ok(()) => outcome.status = Some(Status::Info(STATUS_DONE.to_string())),
            Err(e) => {
                telemetry::log_error("client.generate", &format!("{:#}", e));
                let msg = e.to_string();
                let msg = if msg.is_empty() {
                    "Generation failed".to_string()
                } else {
                    msg
                };
                outcome.status = Some(Status::Error(msg));
            }
        }
        outcome
    }

    async fn run(
        &self,
        form: &ListingForm,
        config: &ListingConfig,
        outcome: &mut Outcome,
    ) -> Result<()> {
        if form.gen_type.wants_title() {
            let raw = self
                .client
                .call(config, prompt::conversation(PromptKind::Title, form))
                .await?;
            outcome.title = Some(prompt::clean_title(&raw));
        }
        if form.gen_type.wants_bullets() {
            let raw = self
                .client
                .call(config, prompt::conversation(PromptKind::Bullets, form))
                .await?;
            outcome.bullets = Some(prompt::sanitize_bullets(&raw));
        }
        Ok(())
    }
}

/**
 * \brief 清空四项输入，生成类型保持不变。
 */
pub fn clear(form: &mut ListingForm) -> Status {
    form.keywords.clear();
    form.features.clear();
    form.comp_title.clear();
    form.comp_bullets.clear();
    Status::Info(STATUS_CLEARED.to_string())
}
