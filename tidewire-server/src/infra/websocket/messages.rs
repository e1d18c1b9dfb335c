use axum::extract::ws::{Message, Utf8Bytes};
use tidewire_model::{ClientCommand, Frame, ProtocolError};

/// Encodes an outbound frame as a text message.
pub fn frame_to_websocket(frame: &Frame) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(Utf8Bytes::from(json)))
}

/// Decodes a client message. `Ok(None)` for control frames that carry no
/// command.
pub fn websocket_to_command(msg: &Message) -> Result<Option<ClientCommand>, ProtocolError> {
    match msg {
        Message::Text(text) => ClientCommand::decode(text.as_str().as_bytes()).map(Some),
        Message::Binary(bin) => ClientCommand::decode(bin.as_ref()).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_go_out_as_text() {
        let msg = frame_to_websocket(&Frame::new("backtest:progress", json!({"taskId": "t1"})))
            .unwrap();
        let Message::Text(text) = msg else {
            panic!("expected a text message");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["event"], "backtest:progress");
        assert_eq!(value["data"]["taskId"], "t1");
    }

    #[test]
    fn text_and_binary_commands_decode_alike() {
        let raw = r#"{"event":"backtest:subscribe","data":{"userId":"u1"}}"#;
        let from_text = websocket_to_command(&Message::Text(raw.into())).unwrap();
        let from_binary =
            websocket_to_command(&Message::Binary(raw.as_bytes().to_vec().into())).unwrap();
        assert_eq!(from_text, from_binary);
        assert!(websocket_to_command(&Message::Ping(Vec::new().into())).unwrap().is_none());
    }
}
