use anyhow::{Context, Result};
use reqwest::{
    header::{HeaderMap, LINK, RETRY_AFTER},
    RequestBuilder, StatusCode,
};
use serde::de::DeserializeOwned;

use crate::ports::ApiError;

pub const USER_AGENT: &str = concat!("activity-feed/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 300;

/// Which response headers carry a platform's rate limit state.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHeaders {
    pub reset: &'static str,
    /// When set, a 403 with this header at `0` is a rate limit, not a denial.
    pub remaining: Option<&'static str>,
}

pub struct JsonResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

/// Sends `request` and decodes a JSON body. Non-2xx statuses become
/// `ApiError::Status`; undecodable bodies become `ApiError::Payload`.
/// Transport failures stay untyped.
pub async fn send_json<T: DeserializeOwned>(
    operation: &str,
    request: RequestBuilder,
    rate_limit: RateLimitHeaders,
) -> Result<JsonResponse<T>> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{operation}: request failed"))?;
    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(operation, status, &headers, &body, rate_limit).into());
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("{operation}: failed to read response body"))?;
    let body = serde_json::from_slice::<T>(&bytes).map_err(|err| ApiError::Payload {
        operation: operation.to_string(),
        message: format!("{err}: {}", truncate_for_error(&String::from_utf8_lossy(&bytes))),
    })?;
    Ok(JsonResponse { body, headers })
}

fn status_error(
    operation: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    rate_limit: RateLimitHeaders,
) -> ApiError {
    let exhausted = rate_limit
        .remaining
        .and_then(|name| header_string(headers, name))
        .is_some_and(|remaining| remaining.trim() == "0");
    let status = if status == StatusCode::FORBIDDEN && exhausted {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        status
    };

    ApiError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        retry_after: header_string(headers, RETRY_AFTER.as_str()),
        rate_limit_reset: header_string(headers, rate_limit.reset),
        message: truncate_for_error(body.trim()),
    }
}

pub fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The `rel="next"` target of an RFC 8288 `Link` header.
pub fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(LINK)?.to_str().ok()?;
    raw.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .map(str::to_string)
    })
}

pub fn truncate_for_error(text: &str) -> String {
    if text.chars().count() <= ERROR_BODY_LIMIT {
        return text.to_string();
    }
    let truncated: String = text.chars().take(ERROR_BODY_LIMIT).collect();
    format!("{truncated}...")
}
