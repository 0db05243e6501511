mod config;
mod error;
mod frame_parser;
mod handlers;
mod http;
mod log_mailbox;
mod mailbox;
mod progress;
mod protocol;
mod router;
mod server;
mod session;
mod shake_hand;
mod websocket;
mod worker_pool;
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use frame_parser::{decode, encode_text_frame, DataFrame, DataFrameReceiver, FrameParser, Opcode};
pub use handlers::{CONSOLE_PATH, CONTROL_PANEL_COMMAND_PATH, CONTROL_PANEL_PATH, INDEX_PATH, SUCHAT_PATH};
pub use http::{parse_request, Request};
pub use log_mailbox::LogMailbox;
pub use mailbox::Mailbox;
pub use progress::{PageSource, ProgressBar, PROGRESS_PATH};
pub use protocol::{identity_message, CLOSE_BROWSER, CLOSE_SOCKET, CLOSE_TAG, CONNECT_TAG, USER_CANCEL};
pub use router::{Handler, Router};
pub use server::Server;
pub use session::{Session, Status};
pub use shake_hand::{build_upgrade_response, compute_accept_key};
pub use websocket::{WebSocket, WebSocketStream};
pub use worker_pool::WorkerPool;
