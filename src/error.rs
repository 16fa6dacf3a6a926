use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or wrong-typed input field. Never reaches the admission or
    /// provider layers.
    #[error("validation error: {0}")]
    Validation(String),

    /// Daily quota exhausted for a metered identity.
    #[error("daily quota exhausted ({used}/{limit})")]
    QuotaExceeded {
        used: u32,
        limit: u32,
        wait_hours: u64,
    },

    /// Unresolvable or uncredentialed provider. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, non-2xx status, malformed body, or timeout from the
    /// upstream provider.
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        body: Option<String>,
        message: String,
    },

    /// Upstream failure on the prompt-test route, which reports a shorter
    /// diagnostic than the optimize route.
    #[error("prompt test failed: {0}")]
    PromptTestFailed(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Error::QuotaExceeded {
                used,
                limit,
                wait_hours,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "调用次数已达上限",
                    "message": format!("今日已使用 {} 次优化服务，明天再来吧！", used),
                    "remainingTime": format!("{} 小时", wait_hours),
                    "limit": limit,
                }),
            ),
            Error::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "服务配置错误",
                    "message": msg,
                }),
            ),
            Error::Upstream {
                status,
                body,
                message,
            } => {
                tracing::error!(?status, %message, "upstream provider failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "优化失败，请稍后重试",
                        "message": message,
                        "details": body.as_deref().map(parse_detail).unwrap_or(Value::Null),
                    }),
                )
            }
            Error::PromptTestFailed(message) => {
                tracing::error!(%message, "upstream provider failure during prompt test");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "测试失败，请稍后重试",
                        "message": message,
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Surface the upstream body as structured JSON when it parses, otherwise as
/// a raw string.
fn parse_detail(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_maps_to_429() {
        let err = Error::QuotaExceeded {
            used: 10,
            limit: 10,
            wait_hours: 7,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let response = Error::Validation("缺少或无效的 text 参数".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_prompt_test_failure_maps_to_500() {
        let response = Error::PromptTestFailed("provider returned HTTP 502".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_parse_detail_json_body() {
        let detail = parse_detail(r#"{"code":401,"msg":"bad key"}"#);
        assert_eq!(detail["code"], 401);
    }

    #[test]
    fn test_parse_detail_plain_body() {
        let detail = parse_detail("gateway timeout");
        assert_eq!(detail, Value::String("gateway timeout".to_string()));
    }
}
