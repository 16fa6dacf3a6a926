use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::admission::{Admission, AdmissionGate};
use crate::error::{Error, Result};
use crate::identity::extract_identity;
use crate::provider::Generator;
use crate::quota::QuotaDecision;

/// Shared application state, constructed once at startup.
pub struct AppState {
    pub gate: AdmissionGate,
    pub generator: Arc<dyn Generator>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub success: bool,
    pub result: String,
}

/// `POST /optimize` — transform `text` according to `prompt`.
pub async fn optimize(
    State(state): State<SharedState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    let identity = extract_identity(&headers, connect.map(|info| info.0));

    // Validation is fully local: a bad payload must not touch the quota.
    let text = require_string(&body, "text")?;
    let prompt = require_string(&body, "prompt")?;

    run_pipeline(&state, &identity, &text, &prompt).await
}

/// `POST /test-prompt` — same pipeline as `/optimize` with swapped naming,
/// used to try a prompt against a sample text.
pub async fn test_prompt(
    State(state): State<SharedState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    let identity = extract_identity(&headers, connect.map(|info| info.0));

    let prompt = require_string(&body, "prompt")?;
    let test_text = require_string(&body, "testText")?;

    // Validation and quota shapes match /optimize; only the upstream-failure
    // wording differs, as a shorter diagnostic without the body detail.
    run_pipeline(&state, &identity, &test_text, &prompt)
        .await
        .map_err(|err| match err {
            Error::Upstream { message, .. } => Error::PromptTestFailed(message),
            other => other,
        })
}

/// `GET /limit-info` — remaining quota for the caller. Never consumes a slot.
pub async fn limit_info(
    State(state): State<SharedState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let identity = extract_identity(&headers, connect.map(|info| info.0));
    let info = state.gate.remaining_for(&identity);

    Json(json!({
        "success": true,
        "remaining": info.remaining,
        "limit": info.limit,
        "isUnlimited": info.is_unlimited,
    }))
    .into_response()
}

/// `GET /` — service description.
pub async fn index(State(state): State<SharedState>) -> Response {
    let limit = state.gate.daily_limit();

    Json(json!({
        "message": "指令优化工具后端服务",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "optimize": "POST /optimize",
            "testPrompt": "POST /test-prompt",
            "limitInfo": "GET /limit-info",
        },
        "rateLimit": {
            "local": "不限次数",
            "remote": format!("{} 次/天", limit),
        },
    }))
    .into_response()
}

/// Admission check, then the upstream call. The quota slot is consumed before
/// the provider is invoked and is not refunded on upstream failure.
async fn run_pipeline(
    state: &AppState,
    identity: &str,
    text: &str,
    prompt: &str,
) -> Result<Response> {
    let admission = state.gate.evaluate(identity);

    let decision = match admission {
        Admission::Exempt => None,
        Admission::Allowed(decision) => Some(decision),
        Admission::Denied {
            used,
            limit,
            wait_hours,
        } => {
            tracing::info!(identity, used, limit, "request denied: quota exhausted");
            return Err(Error::QuotaExceeded {
                used,
                limit,
                wait_hours,
            });
        }
    };

    // No quota lock is held here; the store update completed above.
    let result = state.generator.generate(text, prompt).await?;

    let mut response = Json(OptimizeResponse {
        success: true,
        result,
    })
    .into_response();

    if let Some(decision) = decision {
        apply_rate_limit_headers(response.headers_mut(), state.gate.daily_limit(), &decision);
    }

    Ok(response)
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u32, decision: &QuotaDecision) {
    headers.insert("X-RateLimit-Limit", header_value(limit.to_string()));
    headers.insert(
        "X-RateLimit-Remaining",
        header_value(decision.remaining.to_string()),
    );
    if let Some(reset) = iso8601(decision.reset_at_ms) {
        headers.insert("X-RateLimit-Reset", header_value(reset));
    }
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

fn iso8601(epoch_ms: u64) -> Option<String> {
    let ts = DateTime::from_timestamp_millis(i64::try_from(epoch_ms).ok()?)?;
    Some(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Extract a required, non-empty string field from a JSON body.
fn require_string(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("缺少或无效的 {} 参数", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_string_present() {
        let body = json!({ "text": "帮我写个邮件" });
        assert_eq!(require_string(&body, "text").unwrap(), "帮我写个邮件");
    }

    #[test]
    fn test_require_string_missing() {
        let body = json!({ "prompt": "x" });
        assert!(require_string(&body, "text").is_err());
    }

    #[test]
    fn test_require_string_wrong_type() {
        let body = json!({ "text": 123 });
        assert!(require_string(&body, "text").is_err());
    }

    #[test]
    fn test_require_string_empty() {
        let body = json!({ "text": "" });
        assert!(require_string(&body, "text").is_err());
    }

    #[test]
    fn test_iso8601_formatting() {
        let rendered = iso8601(0).unwrap();
        assert_eq!(rendered, "1970-01-01T00:00:00.000Z");
    }
}
