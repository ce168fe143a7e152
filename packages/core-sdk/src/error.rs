use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/**
 * \brief 代理接口的错误类型，每种错误对应固定的 HTTP 状态码。
 */
#[derive(Debug, Error)]
pub enum ProxyError {
    /** \brief 请求字段缺失或非法、未知 Provider。 */
    #[error("{0}")]
    BadRequest(String),

    /** \brief 服务端缺少 Provider 密钥。 */
    #[error("Missing server API key for provider: {0}")]
    MissingSecret(String),

    /** \brief 上游返回非成功状态，原样转发状态码与正文。 */
    #[error("{body}")]
    Upstream { status: u16, body: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::MissingSecret(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Internal(e.into())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
