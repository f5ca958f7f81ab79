//! Blocking JSON-over-HTTP round trips for the model client.
//!
//! One request, one response, no retries. Failures are classified so callers
//! can map them onto their own error types (a timeout is reported as such,
//! never as an empty result).

use std::error::Error as _;
use std::time::Duration;

/// Why a round trip failed.
#[derive(Debug)]
pub(crate) enum HttpFailure {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// Connection-level failure (refused, DNS, TLS).
    Unreachable(String),
    /// The server answered with a non-success status.
    Status(u16, String),
    /// The response body was not the expected JSON.
    Body(String),
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpFailure::Timeout => write!(f, "request timed out"),
            HttpFailure::Unreachable(m) => write!(f, "unreachable: {m}"),
            HttpFailure::Status(code, body) => write!(f, "status {code}: {body}"),
            HttpFailure::Body(m) => write!(f, "malformed response: {m}"),
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    transport
        .source()
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
}

/// POST `body` as JSON and parse the JSON response.
pub(crate) fn post_json(
    url: &str,
    body: &serde_json::Value,
    timeout_secs: u64,
    authorization: Option<&str>,
) -> Result<serde_json::Value, HttpFailure> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build();

    let body_str = serde_json::to_string(body).map_err(|e| HttpFailure::Body(e.to_string()))?;

    let mut req = agent
        .post(url)
        .set("Content-Type", "application/json")
        .set("Accept", "application/json");
    if let Some(auth) = authorization {
        req = req.set("Authorization", auth);
    }

    let resp = match req.send_string(&body_str) {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            return Err(HttpFailure::Status(code, text));
        }
        Err(ureq::Error::Transport(t)) if is_timeout(&t) => return Err(HttpFailure::Timeout),
        Err(ureq::Error::Transport(t)) => return Err(HttpFailure::Unreachable(t.to_string())),
    };

    let text = resp.into_string().map_err(|e| {
        if matches!(
            e.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) {
            HttpFailure::Timeout
        } else {
            HttpFailure::Body(e.to_string())
        }
    })?;

    serde_json::from_str(&text).map_err(|e| HttpFailure::Body(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_host_is_classified() {
        let err = post_json("http://127.0.0.1:1/x", &serde_json::json!({}), 2, None).unwrap_err();
        assert!(matches!(
            err,
            HttpFailure::Unreachable(_) | HttpFailure::Timeout
        ));
    }
}
