use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::KiraError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Blocking client shared by every remote source.
pub fn build_client(timeout: Duration) -> Result<Client, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("kira-annot/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| KiraError::HttpClient(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| KiraError::HttpClient(err.to_string()))
}

/// Sends the request built by `make_req`, retrying throttling, server errors
/// and transport failures with a linear back-off.
pub fn send_with_retries<F, E>(mut make_req: F, on_error: E) -> Result<Response, KiraError>
where
    F: FnMut() -> RequestBuilder,
    E: Fn(String) -> KiraError,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    debug!(status, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(on_error(err.to_string()));
            }
        }
    }
}

/// Passes successful responses through; anything else becomes the error
/// built by `on_status` from the status code and body.
pub fn handle_status<E>(response: Response, on_status: E) -> Result<Response, KiraError>
where
    E: FnOnce(u16, String) -> KiraError,
{
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "request failed".to_string());
    Err(on_status(status, message))
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    std::thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_gateway_errors_are_retried() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 400, 404, 501] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn client_builds_with_timeout() {
        assert!(build_client(Duration::from_secs(1)).is_ok());
    }
}
