//! Anthropic Messages API client producing advisory trading signals.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::{AdvisoryError, DecodeError};
use crate::models::{Indicators, Signal, SignalAction, SignalSource};

use super::types::*;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the advisory source. Every request is bounded by the
/// configured timeout; expiry surfaces as [`AdvisoryError::Transport`].
pub struct AdvisoryClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AdvisoryClient {
    /// Create a client. A blank API key means the advisor is not configured.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdvisoryError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AdvisoryError::NotConfigured);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: ANTHROPIC_API_BASE.to_string(),
            api_key,
            model: model.into(),
        })
    }

    /// Point the client at another host (for testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the advisor for a recommendation on one instrument.
    pub async fn request_signal(
        &self,
        indicators: &Indicators,
        symbol: &str,
    ) -> Result<Signal, AdvisoryError> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(indicators, symbol),
            }],
        };

        debug!(symbol = %symbol, model = %self.model, "Requesting advisory signal");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Status { status, body });
        }

        let body: MessagesResponse = response.json().await?;
        debug!(stop_reason = ?body.stop_reason, blocks = body.content.len(), "Advisory response");
        let text = body
            .content
            .into_iter()
            .filter(|block| block.kind.is_empty() || block.kind == "text")
            .find_map(|block| block.text)
            .ok_or(DecodeError::Empty)?;

        Ok(decode_signal(&text)?)
    }
}

/// Render the indicator snapshot as the advisory prompt.
pub fn build_prompt(indicators: &Indicators, symbol: &str) -> String {
    let mut prompt = format!(
        "Analyze these technical indicators for {symbol} and provide a trading recommendation:\n\nTechnical Indicators:\n"
    );

    for (name, value) in indicators.entries() {
        match value {
            Some(v) => prompt.push_str(&format!("- {name}: {v:.4}\n")),
            None => prompt.push_str(&format!("- {name}: N/A\n")),
        }
    }

    prompt.push_str(
        "\nProvide your recommendation in exactly this JSON format:\n\
         {\"action\": \"BUY|SELL|HOLD\", \"confidence\": 0.0-1.0, \"reason\": \"brief explanation\"}",
    );
    prompt
}

/// Strictly decode an advisor reply, tolerating a surrounding code fence.
pub fn decode_signal(text: &str) -> Result<Signal, DecodeError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }

    let payload: SignalPayload =
        serde_json::from_str(body).map_err(|e| DecodeError::Json(e.to_string()))?;

    let action = match payload.action.trim().to_uppercase().as_str() {
        "BUY" => SignalAction::Buy,
        "SELL" => SignalAction::Sell,
        "HOLD" => SignalAction::Hold,
        _ => return Err(DecodeError::UnknownAction(payload.action)),
    };

    if !(0.0..=1.0).contains(&payload.confidence) {
        return Err(DecodeError::ConfidenceOutOfRange(payload.confidence));
    }

    Ok(Signal {
        action,
        confidence: payload.confidence,
        reason: payload.reason,
        source: SignalSource::Advisory,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text.trim();
    };

    inner.split_once("```").map_or(inner, |(body, _)| body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_decode_plain_json() {
        let signal =
            decode_signal(r#"{"action": "buy", "confidence": 0.8, "reason": "oversold"}"#).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.confidence, 0.8);
        assert_eq!(signal.reason, "oversold");
        assert_eq!(signal.source, SignalSource::Advisory);
    }

    #[test]
    fn test_decode_fenced_json() {
        let text = "Here you go:\n```json\n{\"action\": \"SELL\", \"confidence\": 0.65, \"reason\": \"overbought\"}\n```\nGood luck.";
        let signal = decode_signal(text).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);

        let bare = "```\n{\"action\": \"HOLD\", \"confidence\": 0.5, \"reason\": \"flat\"}\n```";
        assert_eq!(decode_signal(bare).unwrap().action, SignalAction::Hold);
    }

    #[test]
    fn test_decode_rejects_schema_violations() {
        assert_eq!(decode_signal("   "), Err(DecodeError::Empty));
        assert!(matches!(decode_signal("not json"), Err(DecodeError::Json(_))));

        // Confidence as a string
        assert!(matches!(
            decode_signal(r#"{"action": "BUY", "confidence": "0.9", "reason": "x"}"#),
            Err(DecodeError::Json(_))
        ));

        // Missing reason
        assert!(matches!(
            decode_signal(r#"{"action": "BUY", "confidence": 0.9}"#),
            Err(DecodeError::Json(_))
        ));

        assert_eq!(
            decode_signal(r#"{"action": "SHORT", "confidence": 0.9, "reason": "x"}"#),
            Err(DecodeError::UnknownAction("SHORT".to_string()))
        );
        assert_eq!(
            decode_signal(r#"{"action": "BUY", "confidence": 1.5, "reason": "x"}"#),
            Err(DecodeError::ConfidenceOutOfRange(1.5))
        );
    }

    #[test]
    fn test_prompt_marks_unavailable_values() {
        let indicators = Indicators {
            rsi_14: Some(28.123456),
            points_used: 15,
            ..Indicators::default()
        };

        let prompt = build_prompt(&indicators, "AAPL");
        assert!(prompt.contains("for AAPL"));
        assert!(prompt.contains("- RSI(14): 28.1235"));
        assert!(prompt.contains("- SMA(50): N/A"));
        assert!(prompt.contains(r#""action": "BUY|SELL|HOLD""#));
    }

    #[test]
    fn test_blank_key_is_not_configured() {
        let result = AdvisoryClient::new("  ", DEFAULT_MODEL, DEFAULT_TIMEOUT);
        assert!(matches!(result, Err(AdvisoryError::NotConfigured)));
    }

    /// Read one HTTP request (headers plus any declared body) off the socket.
    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_error_status_is_reported_with_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let body = "overloaded";
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });

        let client = AdvisoryClient::new("test-key", DEFAULT_MODEL, Duration::from_secs(5))
            .unwrap()
            .with_base_url(format!("http://{addr}"));

        let result = client.request_signal(&Indicators::default(), "AAPL").await;
        match result {
            Err(AdvisoryError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_advisor_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and never answer
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let client = AdvisoryClient::new("test-key", DEFAULT_MODEL, Duration::from_millis(200))
            .unwrap()
            .with_base_url(format!("http://{addr}"));

        let started = std::time::Instant::now();
        let result = client.request_signal(&Indicators::default(), "AAPL").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(AdvisoryError::Transport(e)) => assert!(e.is_timeout()),
            other => panic!("expected Transport timeout, got {other:?}"),
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_advisor_is_transport_error() {
        let client = AdvisoryClient::new("test-key", DEFAULT_MODEL, Duration::from_secs(2))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let result = client.request_signal(&Indicators::default(), "AAPL").await;
        assert!(matches!(result, Err(AdvisoryError::Transport(_))));
    }
}
