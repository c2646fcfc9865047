use axum::extract::ws::{Message, WebSocket};
use ensemble_common::protocol::ws::WsFrame;

pub fn decode_frame(raw: &str) -> Result<WsFrame, serde_json::Error> {
    serde_json::from_str::<WsFrame>(raw)
}

pub fn encode_frame(frame: &WsFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

pub async fn send_frame(socket: &mut WebSocket, frame: &WsFrame) -> Result<(), ()> {
    let encoded = encode_frame(frame).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
