//! Minimal SignalR JSON hub protocol.
//!
//! The gateway's realtime hubs speak the SignalR JSON protocol: frames are
//! JSON documents terminated by the 0x1E record separator, starting with a
//! handshake exchange, followed by typed messages. Only the message types the
//! feed needs are modeled; anything else parses to `Other` and is ignored.

use serde_json::Value;

/// Record separator terminating every SignalR frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// A parsed hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Type 1: a named invocation from the server with its arguments.
    Invocation { target: String, arguments: Vec<Value> },
    /// Type 6: keep-alive ping.
    Ping,
    /// Type 7: server is closing the connection.
    Close { error: Option<String> },
    /// Any other message type; carried for logging only.
    Other(i64),
}

/// The opening handshake frame.
pub fn handshake_frame() -> String {
    format!("{{\"protocol\":\"json\",\"version\":1}}{RECORD_SEPARATOR}")
}

/// A fire-and-forget invocation frame (no invocation id, no completion).
pub fn invocation_frame(target: &str, arguments: &[Value]) -> String {
    let body = serde_json::json!({
        "type": 1,
        "target": target,
        "arguments": arguments,
    });
    format!("{body}{RECORD_SEPARATOR}")
}

/// A keep-alive ping frame.
pub fn ping_frame() -> String {
    format!("{{\"type\":6}}{RECORD_SEPARATOR}")
}

/// Check the server's handshake response. An empty JSON object means success;
/// anything else carries an `error` field.
pub fn parse_handshake_response(frame: &str) -> Result<(), String> {
    let trimmed = frame.trim_end_matches(RECORD_SEPARATOR);
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| format!("unparseable handshake response: {e}"))?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(error.to_string()),
        None => Ok(()),
    }
}

/// Split a websocket text payload into hub messages. A payload may carry
/// several frames; frames that fail to parse are skipped.
pub fn parse_frames(text: &str) -> Vec<HubMessage> {
    text.split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .filter_map(parse_frame)
        .collect()
}

fn parse_frame(frame: &str) -> Option<HubMessage> {
    let value: Value = serde_json::from_str(frame).ok()?;
    let message_type = value.get("type").and_then(Value::as_i64)?;

    match message_type {
        1 => {
            let target = value.get("target").and_then(Value::as_str)?.to_string();
            let arguments = match value.get("arguments") {
                Some(Value::Array(args)) => args.clone(),
                _ => Vec::new(),
            };
            Some(HubMessage::Invocation { target, arguments })
        }
        6 => Some(HubMessage::Ping),
        7 => Some(HubMessage::Close {
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        other => Some(HubMessage::Other(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_frame_is_terminated() {
        let frame = handshake_frame();
        assert!(frame.ends_with(RECORD_SEPARATOR));
        assert!(frame.contains("\"protocol\":\"json\""));
    }

    #[test]
    fn handshake_response_success_and_error() {
        assert!(parse_handshake_response("{}\u{1e}").is_ok());
        let err = parse_handshake_response("{\"error\":\"unsupported protocol\"}\u{1e}");
        assert_eq!(err.unwrap_err(), "unsupported protocol");
    }

    #[test]
    fn invocation_frame_round_trips() {
        let frame = invocation_frame("SubscribeOrders", &[serde_json::json!(42)]);
        let messages = parse_frames(&frame);
        assert_eq!(
            messages,
            vec![HubMessage::Invocation {
                target: "SubscribeOrders".to_string(),
                arguments: vec![serde_json::json!(42)],
            }]
        );
    }

    #[test]
    fn multiple_frames_in_one_payload() {
        let payload = format!(
            "{}{}",
            ping_frame(),
            invocation_frame("GatewayQuote", &[serde_json::json!("CON.F.US.MES.U25")])
        );
        let messages = parse_frames(&payload);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], HubMessage::Ping);
    }

    #[test]
    fn junk_frames_are_skipped() {
        let payload = format!("not-json{RECORD_SEPARATOR}{{\"type\":6}}{RECORD_SEPARATOR}");
        let messages = parse_frames(&payload);
        assert_eq!(messages, vec![HubMessage::Ping]);
    }

    #[test]
    fn close_frame_carries_error() {
        let messages = parse_frames("{\"type\":7,\"error\":\"shutting down\"}\u{1e}");
        assert_eq!(
            messages,
            vec![HubMessage::Close {
                error: Some("shutting down".to_string())
            }]
        );
    }
}
