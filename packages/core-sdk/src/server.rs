use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde_json::json;
use tower_http::services::ServeDir;

use crate::{
    error::ProxyError,
    llm::{self, ProviderKeys},
    models::{ChatRequest, ChatResponse},
    telemetry,
};

/**
 * \brief 代理服务共享状态：HTTP 客户端与服务端密钥。
 */
#[derive(Clone)]
pub struct AppState {
    client: reqwest::Client,
    keys: Arc<ProviderKeys>,
}

impl AppState {
    pub fn new(keys: ProviderKeys) -> Self {
        Self {
            client: reqwest::Client::new(),
            keys: Arc::new(keys),
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供代理接口与静态前端。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let keys = ProviderKeys::from_env();
    let configured = keys
        .configured()
        .into_iter()
        .map(|k| k.name())
        .collect::<Vec<_>>();
    telemetry::log_event(
        "server.start",
        &format!("addr={} providers={:?}", addr, configured),
    );

    let app = router(AppState::new(keys));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 构建路由；`LISTCRAFT_UI_DIR` 指定的目录作为静态页面回退服务。
 */
pub fn router(state: AppState) -> Router {
    let ui_root = std::env::var("LISTCRAFT_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service = get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    Router::new()
        .route(
            "/api/chat",
            post(chat)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route("/api/health", get(health_check))
        .fallback_service(static_service)
        .with_state(state)
}

/**
 * \brief 代理聊天接口：POST /api/chat
 */
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ProxyError> {
    let Json(req) = payload.map_err(|e| ProxyError::BadRequest(e.body_text()))?;
    if req.messages.is_empty() {
        return Err(ProxyError::BadRequest("messages is required".to_string()));
    }

    let target = llm::resolve_target(&req, &state.keys).inspect_err(|e| {
        telemetry::log_error("server.chat", &format!("resolve failed: {}", e));
    })?;
    telemetry::log_event(
        "server.chat",
        &format!(
            "forward provider={} custom={} model={} msgs={}",
            req.provider,
            req.use_custom,
            req.model,
            req.messages.len()
        ),
    );

    let content = llm::chat_once(
        &state.client,
        &target,
        &req.model,
        req.temperature,
        &req.messages,
    )
    .await
    .inspect_err(|e| {
        telemetry::log_error(
            "server.chat",
            &format!("upstream failed: status={} {}", e.status(), e),
        );
    })?;
    Ok(Json(ChatResponse { content }))
}

/**
 * \brief 跨域预检：返回 204 与宽松的 CORS 头。
 */
async fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method Not Allowed" })),
    )
        .into_response()
}

/**
 * \brief 健康检查：列出已配置密钥的 Provider。
 */
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state
        .keys
        .configured()
        .into_iter()
        .map(|k| k.name())
        .collect::<Vec<_>>();
    Json(json!({ "ok": true, "providers": providers }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::ProviderKind;
    use serde_json::Value;

    /**
     * \brief 在回环地址上启动路由，返回基地址。
     */
    pub(crate) async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{}", addr)
    }

    /**
     * \brief 模拟上游 chat-completions 端点，固定返回给定状态与正文。
     */
    pub(crate) async fn spawn_upstream(status: StatusCode, body: Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: axum::http::HeaderMap| {
                let body = body.clone();
                async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth != "Bearer sk-custom" {
                        return (StatusCode::UNAUTHORIZED, "bad key".to_string()).into_response();
                    }
                    (status, body.to_string()).into_response()
                }
            }),
        );
        format!("{}/v1/chat/completions", spawn(app).await)
    }

    async fn proxy(keys: ProviderKeys) -> String {
        spawn(router(AppState::new(keys))).await
    }

    fn custom_body(endpoint: &str) -> Value {
        json!({
            "model": "gpt-4o-mini",
            "temperature": 0.2,
            "messages": [{"role": "user", "content": "hi"}],
            "useCustom": true,
            "customEndpoint": endpoint,
            "customApiKey": "sk-custom"
        })
    }

    async fn post_chat(base: &str, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&body)
            .send()
            .await
            .expect("send");
        let status = resp.status().as_u16();
        let v = resp.json::<Value>().await.expect("json body");
        (status, v)
    }

    #[tokio::test]
    async fn test_custom_endpoint_relays_content() {
        let upstream = spawn_upstream(
            StatusCode::OK,
            json!({"choices": [{"message": {"content": "Drafted title"}}]}),
        )
        .await;
        let base = proxy(ProviderKeys::default()).await;
        let (status, v) = post_chat(&base, custom_body(&upstream)).await;
        assert_eq!(status, 200);
        assert_eq!(v["content"], "Drafted title");
    }

    #[tokio::test]
    async fn test_legacy_text_field_fallback() {
        let upstream =
            spawn_upstream(StatusCode::OK, json!({"choices": [{"text": "legacy text"}]})).await;
        let base = proxy(ProviderKeys::default()).await;
        let (_, v) = post_chat(&base, custom_body(&upstream)).await;
        assert_eq!(v["content"], "legacy text");
    }

    #[tokio::test]
    async fn test_upstream_error_is_relayed_verbatim() {
        let upstream = spawn_upstream(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"error": {"message": "rate limited"}}),
        )
        .await;
        let base = proxy(ProviderKeys::default()).await;
        let (status, v) = post_chat(&base, custom_body(&upstream)).await;
        assert_eq!(status, 429);
        assert_eq!(v["error"], r#"{"error":{"message":"rate limited"}}"#);
    }

    #[tokio::test]
    async fn test_input_errors() {
        let base = proxy(ProviderKeys::default().with(ProviderKind::OpenAI, "sk-openai")).await;

        let (status, v) = post_chat(&base, json!({})).await;
        assert_eq!(status, 400);
        assert_eq!(v["error"], "messages is required");

        let mut missing_key = custom_body("https://llm.example.com");
        missing_key["customApiKey"] = json!("");
        let (status, _) = post_chat(&base, missing_key).await;
        assert_eq!(status, 400);

        let (status, v) = post_chat(
            &base,
            json!({"provider": "mystery", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(v["error"], "Unknown provider: mystery");

        let (status, v) = post_chat(
            &base,
            json!({"provider": "together", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
        assert_eq!(status, 500);
        assert_eq!(v["error"], "Missing server API key for provider: together");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let base = proxy(ProviderKeys::default()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .header(header::CONTENT_TYPE, "application/json")
            .body("{\"messages\": ")
            .send()
            .await
            .expect("send");
        assert_eq!(resp.status().as_u16(), 400);
        let v: Value = resp.json().await.expect("json body");
        assert!(v["error"].is_string());
    }

    #[tokio::test]
    async fn test_preflight_and_method_guard() {
        let base = proxy(ProviderKeys::default()).await;
        let client = reqwest::Client::new();

        let resp = client
            .request(reqwest::Method::OPTIONS, format!("{}/api/chat", base))
            .send()
            .await
            .expect("options");
        assert_eq!(resp.status().as_u16(), 204);
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "Content-Type");

        let resp = client
            .get(format!("{}/api/chat", base))
            .send()
            .await
            .expect("get");
        assert_eq!(resp.status().as_u16(), 405);
        let v: Value = resp.json().await.expect("json body");
        assert_eq!(v["error"], "Method Not Allowed");
    }

    #[tokio::test]
    async fn test_health_lists_configured_providers() {
        let base = proxy(ProviderKeys::default().with(ProviderKind::OpenRouter, "sk-or")).await;
        let v: Value = reqwest::get(format!("{}/api/health", base))
            .await
            .expect("get")
            .json()
            .await
            .expect("json body");
        assert_eq!(v, json!({"ok": true, "providers": ["openrouter"]}));
    }

    async fn assert_server_error(base: &str, endpoint: &str) {
        let (status, v) = post_chat(base, custom_body(endpoint)).await;
        assert_eq!(status, 500);
        let msg = v["error"].as_str().expect("error string");
        assert!(!msg.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_server_error() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = closed.local_addr().expect("local addr").port();
        drop(closed);

        let base = proxy(ProviderKeys::default()).await;
        assert_server_error(&base, &format!("http://127.0.0.1:{}/v1/chat/completions", port))
            .await;
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_server_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::OK, "<html>gateway page</html>") }),
        );
        let upstream = format!("{}/v1/chat/completions", spawn(app).await);
        let base = proxy(ProviderKeys::default()).await;
        assert_server_error(&base, &upstream).await;
    }

    /**
     * \brief 上游返回错误状态，但正文在声明长度前断开。
     */
    fn spawn_truncated_upstream() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).expect("read request");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + len {
                        break;
                    }
                }
            }
            let _ = stream.write_all(
                b"HTTP/1.1 418 I'm a teapot\r\nContent-Type: text/plain\r\nContent-Length: 64\r\nConnection: close\r\n\r\npartial",
            );
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_unreadable_upstream_error_body_is_server_error() {
        let upstream = spawn_truncated_upstream();
        let base = proxy(ProviderKeys::default()).await;
        assert_server_error(&base, &upstream).await;
    }
}
