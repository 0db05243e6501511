#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use suchat_server::{compute_accept_key, Server, ServerConfig, SUCHAT_PATH};

static INIT_LOGGING: Once = Once::new();

pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        accept_poll_ms: 5,
        shutdown_delay_ms: 10,
        update_interval_ms: 10,
        ..ServerConfig::default()
    }
}

pub fn start_server() -> (Server, SocketAddr) {
    init_test_logging();
    let server = Server::new(test_config());
    let addr = server.start().unwrap();
    (server, addr)
}

pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

pub fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = connect(addr);
    write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

/// Splits a response into head and body.
pub fn split_response(response: &str) -> (&str, &str) {
    let end = response.find("\r\n\r\n").expect("no end of headers");
    (&response[..end], &response[end + 4..])
}

/// Reads from `stream` until `needle` shows up in what was read so far.
pub fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut received = Vec::new();
    let mut buffer = [0u8; 1024];
    while !String::from_utf8_lossy(&received).contains(needle) {
        let read = stream.read(&mut buffer).unwrap();
        assert!(read > 0, "stream closed before {:?} arrived", needle);
        received.extend_from_slice(&buffer[..read]);
    }
    String::from_utf8_lossy(&received).into_owned()
}

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// Just enough of a browser WebSocket to talk to the server.
pub struct WsClient {
    pub stream: TcpStream,
}

impl WsClient {
    pub fn connect(addr: SocketAddr) -> WsClient {
        let mut stream = connect(addr);
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
            SUCHAT_PATH
        )
        .unwrap();

        let head = read_head(&mut stream);
        assert!(head.starts_with("HTTP/1.1 101"), "unexpected response: {}", head);
        assert!(head.contains(&compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==")));

        WsClient { stream }
    }

    pub fn send_text(&mut self, message: &str) {
        self.send_frame(0x81, message.as_bytes());
    }

    pub fn send_close(&mut self, code: u16) {
        self.send_frame(0x88, &code.to_be_bytes());
    }

    fn send_frame(&mut self, first_byte: u8, payload: &[u8]) {
        assert!(payload.len() < 126);
        let mut frame = vec![first_byte, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&MASK);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        self.stream.write_all(&frame).unwrap();
    }

    /// Next text frame from the server, `None` once the server hung up.
    pub fn read_text(&mut self) -> Option<String> {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).ok()?;
        assert_eq!(header[0], 0x81, "expected an unfragmented text frame");
        assert_eq!(header[1] & 0x80, 0, "server frames are never masked");

        let length = match header[1] & 0x7f {
            126 => {
                let mut extended = [0u8; 2];
                self.stream.read_exact(&mut extended).ok()?;
                u16::from_be_bytes(extended) as usize
            }
            127 => {
                let mut extended = [0u8; 8];
                self.stream.read_exact(&mut extended).ok()?;
                u64::from_be_bytes(extended) as usize
            }
            length => length as usize,
        };

        let mut payload = vec![0u8; length];
        self.stream.read_exact(&mut payload).ok()?;
        Some(String::from_utf8(payload).unwrap())
    }
}

pub fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}
