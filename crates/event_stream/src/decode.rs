use serde::Deserialize;
use serde_json::Value;

use crate::events::{
    StreamEvent, TokenUsage, EVENT_DONE, EVENT_ERROR, EVENT_TOKEN, EVENT_TOOL_CALL,
    EVENT_TOOL_RESULT,
};

#[derive(Debug, Deserialize)]
struct TokenPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ToolCallPayload {
    id: String,
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct ToolResultPayload {
    id: String,
    output: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DonePayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    duration_ms: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decodes one `(event_type, data)` record into exactly one [`StreamEvent`].
///
/// Never fails: names outside the known set yield `Unrecognized`, payloads
/// that are not JSON objects or lack the fields their type requires yield
/// `Malformed`.
#[must_use]
pub fn decode_event(event_type: &str, data: &str) -> StreamEvent {
    let event_type = event_type.trim();
    let decoder: fn(Value) -> Result<StreamEvent, String> = match event_type {
        EVENT_TOKEN => decode_token,
        EVENT_TOOL_CALL => decode_tool_call,
        EVENT_TOOL_RESULT => decode_tool_result,
        EVENT_DONE => decode_done,
        EVENT_ERROR => decode_error,
        _ => {
            tracing::debug!(event_type, "unrecognized stream event type");
            return StreamEvent::Unrecognized {
                event_type: event_type.to_owned(),
                raw: data.to_owned(),
            };
        }
    };

    let value = match serde_json::from_str::<Value>(data) {
        Ok(value) => value,
        Err(error) => return malformed(event_type, data, format!("invalid JSON: {error}")),
    };
    if !value.is_object() {
        return malformed(event_type, data, "payload is not a JSON object".to_owned());
    }

    decoder(value).unwrap_or_else(|reason| malformed(event_type, data, reason))
}

fn decode_token(value: Value) -> Result<StreamEvent, String> {
    let payload = serde_json::from_value::<TokenPayload>(value).map_err(|e| e.to_string())?;
    Ok(StreamEvent::Token { text: payload.text })
}

fn decode_tool_call(value: Value) -> Result<StreamEvent, String> {
    let payload = serde_json::from_value::<ToolCallPayload>(value).map_err(|e| e.to_string())?;
    Ok(StreamEvent::ToolCall {
        id: payload.id,
        name: payload.name,
        input: payload.input,
    })
}

fn decode_tool_result(value: Value) -> Result<StreamEvent, String> {
    let payload =
        serde_json::from_value::<ToolResultPayload>(value).map_err(|e| e.to_string())?;
    let output = match payload.output {
        Value::String(text) => text,
        Value::Null => return Err("missing field `output`".to_owned()),
        other => other.to_string(),
    };
    Ok(StreamEvent::ToolResult {
        id: payload.id,
        output,
    })
}

fn decode_done(value: Value) -> Result<StreamEvent, String> {
    let payload =
        serde_json::from_value::<DonePayload>(value.clone()).map_err(|e| e.to_string())?;

    let usage = payload.usage.and_then(|usage| {
        serde_json::from_value::<TokenUsage>(usage)
            .map_err(|error| tracing::warn!(%error, "ignoring undecodable usage on done event"))
            .ok()
    });

    Ok(StreamEvent::Done {
        session_id: payload.session_id.filter(|id| !id.trim().is_empty()),
        usage,
        duration_ms: payload.duration_ms.as_ref().and_then(millis_from_value),
        payload: value,
    })
}

fn decode_error(value: Value) -> Result<StreamEvent, String> {
    let payload = serde_json::from_value::<ErrorPayload>(value).map_err(|e| e.to_string())?;
    let message = payload
        .message
        .or(payload.error)
        .ok_or_else(|| "missing field `message`".to_owned())?;
    Ok(StreamEvent::Error { message })
}

fn millis_from_value(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|millis| millis.is_finite() && *millis >= 0.0)
            .map(|millis| millis.round() as u64)
    })
}

fn malformed(event_type: &str, data: &str, reason: String) -> StreamEvent {
    tracing::warn!(event_type, %reason, "malformed stream event payload");
    StreamEvent::Malformed {
        event_type: event_type.to_owned(),
        raw: data.to_owned(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::decode_event;
    use crate::events::{StreamEvent, TokenUsage};

    #[test]
    fn decodes_done_with_fractional_duration() {
        let event = decode_event(
            "done",
            r#"{"sessionId":"abc","usage":{"inputTokens":1,"outputTokens":2},"durationMs":99.6}"#,
        );
        let StreamEvent::Done {
            session_id,
            usage,
            duration_ms,
            ..
        } = event
        else {
            panic!("done payload should decode: {event:?}");
        };
        assert_eq!(session_id.as_deref(), Some("abc"));
        assert_eq!(usage, Some(TokenUsage::new(1, 2, 0)));
        assert_eq!(duration_ms, Some(100));
    }

    #[test]
    fn done_with_bad_usage_keeps_terminal_signal() {
        let event = decode_event("done", r#"{"usage":"lots"}"#);
        assert!(matches!(event, StreamEvent::Done { usage: None, .. }));
    }

    #[test]
    fn tool_result_non_string_output_is_rendered_as_json() {
        let event = decode_event("tool_result", r#"{"id":"t1","output":{"lines":3}}"#);
        assert_eq!(
            event,
            StreamEvent::ToolResult {
                id: "t1".to_string(),
                output: json!({"lines": 3}).to_string(),
            }
        );
    }

    #[test]
    fn tool_result_without_output_is_malformed() {
        let event = decode_event("tool_result", r#"{"id":"t1"}"#);
        assert!(matches!(event, StreamEvent::Malformed { .. }));
    }

    #[test]
    fn error_accepts_error_field_alias() {
        let event = decode_event("error", r#"{"error":"rate limited"}"#);
        assert_eq!(
            event,
            StreamEvent::Error {
                message: "rate limited".to_string(),
            }
        );
    }
}
