//! The SUCHAT control vocabulary carried inside text frames.
//!
//! | message | direction |
//! |---|---|
//! | `SUCHAT_Connect:<id>` | browser → server, first frame only |
//! | `UserCancelClicked` | browser → server |
//! | `SUCHAT_Close...` | browser → server, or synthesized by the pump |
//! | `SUCHAT_CloseBrowser` | server → browser |
//! | `SUCHAT_CloseSocket` | server → pump, never written to the wire |

pub static CONNECT_TAG: &str = "SUCHAT_Connect";
pub static CLOSE_TAG: &str = "SUCHAT_Close";
pub static CLOSE_BROWSER: &str = "SUCHAT_CloseBrowser";
pub static CLOSE_SOCKET: &str = "SUCHAT_CloseSocket";
pub static USER_CANCEL: &str = "UserCancelClicked";

#[derive(PartialEq, Debug)]
pub enum InboundMessage {
    /// An identity frame. `None` when the id part does not parse.
    Connect(Option<u64>),
    Cancel,
    Close(String),
    Text(String),
}

impl InboundMessage {
    pub fn classify(message: String) -> InboundMessage {
        if message.starts_with(CONNECT_TAG) {
            InboundMessage::Connect(parse_connection_id(&message))
        } else if message == USER_CANCEL {
            InboundMessage::Cancel
        } else if message.starts_with(CLOSE_TAG) {
            InboundMessage::Close(message)
        } else {
            InboundMessage::Text(message)
        }
    }
}

/// Extracts the id from `SUCHAT_Connect:<id>`.
///
/// The page substitutes `Connection_ID <id>` into its script, so the id is the
/// last whitespace separated token after the first colon.
pub fn parse_connection_id(message: &str) -> Option<u64> {
    let (_, rest) = message.split_once(':')?;
    rest.split_whitespace().last()?.parse().ok()
}

pub fn identity_message(session_id: u64) -> String {
    format!("{}:{}", CONNECT_TAG, session_id)
}

pub fn is_close_socket(message: &str) -> bool {
    message.starts_with(CLOSE_SOCKET)
}

pub fn close_notification(code: Option<u16>) -> String {
    match code {
        Some(code) => format!("{}:WebSocket Client Disconnected with Code: {}", CLOSE_TAG, code),
        None => format!("{}:WebSocket Client Disconnected with Code: none", CLOSE_TAG),
    }
}

pub fn abort_notification() -> String {
    format!("{}:WebSocket Client Disconnected with ConnectionAbort", CLOSE_TAG)
}

pub fn error_notification(reason: &str) -> String {
    format!("{}:WebSocket Client Disconnected after {}", CLOSE_TAG, reason)
}
