//! Streaming support for completion responses.
//!
//! OpenRouter streams `/completions` as Server-Sent Events. Each `data:` line
//! carries a JSON chunk with the next text delta, and the stream is closed by
//! a literal `[DONE]`. Errors that happen after the response has started are
//! reported in-band as `{"error": {...}}` chunks.

use serde::Deserialize;

/// One decoded SSE `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    /// Text delta for the first choice
    Text(String),
    /// End-of-stream marker
    Done,
    /// In-band error reported by the provider
    Error {
        /// Provider error code, when it looks like an HTTP status
        code: Option<u16>,
        /// Human readable message
        message: String,
    },
    /// Keep-alive, empty delta, or anything we do not understand
    Skip,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Option<Vec<ChunkChoice>>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

/// Parse a raw SSE data payload.
pub fn parse_sse_data(data: &str) -> SseData {
    let data = data.trim();
    if data.is_empty() {
        return SseData::Skip;
    }
    if data == "[DONE]" {
        return SseData::Done;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(_) => return SseData::Skip,
    };

    if let Some(error) = chunk.error {
        let code = error.code.as_ref().and_then(|c| match c {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
        return SseData::Error {
            code,
            message: error.message.unwrap_or_else(|| "unknown stream error".to_string()),
        };
    }

    match chunk
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.text)
    {
        Some(text) if !text.is_empty() => SseData::Text(text),
        _ => SseData::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta() {
        let data = r#"{"id":"gen-1","choices":[{"text":" I","index":0,"finish_reason":null}]}"#;
        assert_eq!(parse_sse_data(data), SseData::Text(" I".to_string()));
    }

    #[test]
    fn test_parse_done() {
        assert_eq!(parse_sse_data("[DONE]"), SseData::Done);
        assert_eq!(parse_sse_data(" [DONE] "), SseData::Done);
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert_eq!(parse_sse_data(""), SseData::Skip);
        assert_eq!(parse_sse_data("not json"), SseData::Skip);
    }

    #[test]
    fn test_parse_empty_text_is_skipped() {
        let data = r#"{"choices":[{"text":"","finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_data(data), SseData::Skip);
    }

    #[test]
    fn test_parse_in_band_error_numeric_code() {
        let data = r#"{"error":{"message":"Provider returned error","code":502}}"#;
        assert_eq!(
            parse_sse_data(data),
            SseData::Error {
                code: Some(502),
                message: "Provider returned error".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_in_band_error_string_code() {
        let data = r#"{"error":{"message":"overloaded","code":"server_error"}}"#;
        assert_eq!(
            parse_sse_data(data),
            SseData::Error {
                code: None,
                message: "overloaded".to_string(),
            }
        );
    }
}
