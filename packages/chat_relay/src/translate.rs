//! Mapping between the browser chat dialect and gateway frames.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::frames::{GatewayFrame, InboundFrame};
use crate::protocol::{BotMessage, ServerMessage};

/// Gateway method used for chat text
pub const CHAT_METHOD: &str = "message";
/// The single gateway channel all browser chat goes to
pub const CHAT_CHANNEL: &str = "webchat";

/// Shown when the gateway answers without any text
pub const ACKNOWLEDGEMENT: &str = "I received your message!";
/// Shown for any failed chat response
pub const APOLOGY: &str = "Sorry, I had trouble understanding that.";

/// Build the gateway request for a line of chat.
pub fn chat_request(text: &str) -> GatewayFrame {
    GatewayFrame::request(
        format!("chat-{}", Uuid::new_v4()),
        CHAT_METHOD,
        json!({
            "channel": CHAT_CHANNEL,
            "message": text,
        }),
    )
}

/// Render a gateway frame as an assistant line, if there is a rule for it.
pub fn render(frame: &GatewayFrame) -> Option<BotMessage> {
    match frame {
        GatewayFrame::Res {
            ok,
            payload,
            method: Some(method),
            ..
        } if method == CHAT_METHOD => match (*ok, payload) {
            (true, Some(payload)) => {
                let text = payload
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or(ACKNOWLEDGEMENT);
                Some(BotMessage::reply(text))
            }
            _ => Some(BotMessage::failure(APOLOGY)),
        },
        GatewayFrame::Event { event, payload } if event == CHAT_METHOD => payload
            .get("message")
            .and_then(Value::as_str)
            .map(BotMessage::reply),
        _ => None,
    }
}

/// Wrap a relayed gateway frame for the browser.
pub fn relay_message(inbound: InboundFrame) -> ServerMessage {
    let bot = render(&inbound.frame);
    ServerMessage::Gateway {
        data: inbound.raw,
        bot,
    }
}
