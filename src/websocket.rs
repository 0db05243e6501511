use std::io::{self, prelude::*, BufReader};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame_parser::{encode_text_frame, DataFrame, FrameParser, Opcode};
use crate::protocol::{self, InboundMessage};
use crate::session::Session;
use crate::shake_hand::{build_upgrade_response, compute_accept_key};

/// A byte stream that can be upgraded to a WebSocket.
///
/// The pump writes through the stream itself and reads through a second
/// handle obtained from [`WebSocketStream::reader`], so reads and writes can
/// block independently.
pub trait WebSocketStream: Write + Send {
    type Reader: Read + Send + 'static;

    fn reader(&self) -> io::Result<Self::Reader>;

    /// Closes both directions. Unblocks a reader stuck on the other handle.
    fn close(&mut self) -> io::Result<()>;
}

impl WebSocketStream for TcpStream {
    type Reader = TcpStream;

    fn reader(&self) -> io::Result<TcpStream> {
        self.try_clone()
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Everything the pump waits on arrives through one channel: text queued by
/// the application and frames decoded by the reader thread.
#[derive(Debug)]
pub(crate) enum PumpEvent {
    Outbound(String),
    Inbound(Result<DataFrame>),
}

pub struct WebSocket<S: WebSocketStream> {
    stream: S,
    session: Arc<Session>,

    // Set once this connection has presented the session's id.
    bound: bool,
    running: bool,
    console: Option<Box<dyn Fn(&str) + Send>>,
}

impl<S: WebSocketStream> WebSocket<S> {
    pub fn new(stream: S, session: Arc<Session>) -> WebSocket<S> {
        WebSocket {
            stream,
            session,
            bound: false,
            running: false,
            console: None,
        }
    }

    /// Copies connection events, such as close notifications, to `console`.
    pub fn with_console<F>(mut self, console: F) -> WebSocket<S>
    where
        F: Fn(&str) + Send + 'static,
    {
        self.console = Some(Box::new(console));
        self
    }

    /// Completes the upgrade and pumps frames until either side ends the
    /// session. The stream is closed on every exit path.
    pub fn open(mut self, client_key: &str) -> Result<()> {
        let (sender, receiver) = mpsc::channel();
        let started = self.start(client_key, &sender);
        let result = match &started {
            Ok(_) => self.transfer_full_duplex(&receiver, &sender),
            Err(_) => Ok(()),
        };

        if let Err(err) = self.stream.close() {
            debug!(error = %err, "socket already closed");
        }
        info!(session_id = self.session.id(), "websocket closed");

        let reader_thread = started?;
        if reader_thread.join().is_err() {
            warn!("websocket reader thread panicked");
        }
        result
    }

    fn start(&mut self, client_key: &str, sender: &Sender<PumpEvent>) -> Result<JoinHandle<()>> {
        let accept_key = compute_accept_key(client_key);
        self.stream.write_all(&build_upgrade_response(&accept_key))?;
        self.stream.flush()?;

        let reader = self.stream.reader()?;
        spawn_reader(reader, sender.clone()).map_err(Error::from)
    }

    /// Moves outbound messages to the socket and inbound frames to the session.
    ///
    /// Returns once the close-socket sentinel is seen, the peer closes or
    /// drops, or the peer breaks the identity protocol.
    pub(crate) fn transfer_full_duplex(
        &mut self,
        events: &Receiver<PumpEvent>,
        outbound: &Sender<PumpEvent>,
    ) -> Result<()> {
        self.running = true;
        while self.running {
            let event = match events.recv() {
                Ok(event) => event,
                Err(_) => break,
            };

            match event {
                PumpEvent::Outbound(message) => self.outbound_transfer(message)?,
                PumpEvent::Inbound(frame) => self.inbound_transfer(frame, outbound),
            }
        }

        Ok(())
    }

    fn outbound_transfer(&mut self, message: String) -> Result<()> {
        if protocol::is_close_socket(&message) {
            debug!(session_id = self.session.id(), "websocket stopped by close sentinel");
            self.running = false;
            return Ok(());
        }

        let frame = encode_text_frame(message.as_bytes());
        let written = self.stream.write_all(&frame).and_then(|_| self.stream.flush());
        if let Err(err) = written {
            let notification = protocol::abort_notification();
            self.report(&notification);
            self.finish(notification);
            return Err(Error::from_read(err));
        }

        Ok(())
    }

    fn inbound_transfer(&mut self, frame: Result<DataFrame>, outbound: &Sender<PumpEvent>) {
        match frame {
            Ok(frame) if frame.opcode == Opcode::Close => {
                let notification = protocol::close_notification(frame.close_code());
                self.report(&notification);
                self.finish(notification);
            }
            Ok(frame) => self.route(InboundMessage::classify(frame.text()), outbound),
            Err(Error::ConnectionAbort) => {
                let notification = protocol::abort_notification();
                self.report(&notification);
                self.finish(notification);
            }
            Err(err) => {
                warn!(session_id = self.session.id(), error = %err, "closing websocket after read failure");
                let notification = protocol::error_notification(&err.to_string());
                self.report(&notification);
                self.finish(notification);
            }
        }
    }

    fn route(&mut self, message: InboundMessage, outbound: &Sender<PumpEvent>) {
        match message {
            InboundMessage::Connect(claimed_id) => {
                if self.session.connect(claimed_id, outbound.clone()).is_ok() {
                    self.bound = true;
                } else {
                    // No error frame for a stale page.
                    self.bound = false;
                    self.running = false;
                }
            }
            _ if !self.bound => {
                warn!(session_id = self.session.id(), "application frame before identity");
                self.session.reject();
                self.running = false;
            }
            InboundMessage::Cancel => {
                self.session.deliver(protocol::USER_CANCEL.to_owned());
            }
            InboundMessage::Close(message) | InboundMessage::Text(message) => {
                self.session.deliver(message);
            }
        }
    }

    fn report(&self, line: &str) {
        match &self.console {
            Some(console) => console(line),
            None => info!(session_id = self.session.id(), "{}", line),
        }
    }

    fn finish(&mut self, notification: String) {
        if self.bound {
            self.session.disconnect(notification);
        }
        self.running = false;
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    events: Sender<PumpEvent>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("suchat-reader".to_owned())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut parser = FrameParser::new();

            loop {
                let frame = parser.decode(&mut reader);
                let last = !matches!(&frame, Ok(frame) if frame.opcode == Opcode::Text);

                if events.send(PumpEvent::Inbound(frame)).is_err() || last {
                    break;
                }
            }
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::Status;

    struct RecordingStream {
        written: Vec<u8>,
        closed: bool,
    }

    impl Write for RecordingStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl WebSocketStream for RecordingStream {
        type Reader = io::Empty;

        fn reader(&self) -> io::Result<io::Empty> {
            Ok(io::empty())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn text_frame(message: &str) -> PumpEvent {
        PumpEvent::Inbound(Ok(DataFrame {
            opcode: Opcode::Text,
            payload_bytes: message.as_bytes().to_vec(),
            masking_key: Some([1, 2, 3, 4]),
        }))
    }

    fn websocket(session: &Arc<Session>) -> WebSocket<RecordingStream> {
        WebSocket::new(
            RecordingStream {
                written: Vec::new(),
                closed: false,
            },
            Arc::clone(session),
        )
    }

    #[test]
    fn it_stops_at_the_close_socket_sentinel() {
        let session = Arc::new(Session::new(5));
        let mut websocket = websocket(&session);
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame(&protocol::identity_message(5))).unwrap();
        sender.send(PumpEvent::Outbound("before".to_owned())).unwrap();
        sender.send(PumpEvent::Outbound(protocol::CLOSE_SOCKET.to_owned())).unwrap();
        sender.send(PumpEvent::Outbound("after".to_owned())).unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert_eq!(websocket.stream.written, encode_text_frame(b"before"));
        assert_eq!(session.status(), Status::Connected);
    }

    #[test]
    fn it_consumes_the_identity_frame_and_delivers_the_rest() {
        let session = Arc::new(Session::new(5));
        let mut websocket = websocket(&session);
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame("SUCHAT_Connect:Connection_ID 5")).unwrap();
        sender.send(text_frame("UserStopClicked")).unwrap();
        sender.send(text_frame("UserCancelClicked")).unwrap();
        sender.send(PumpEvent::Inbound(Err(Error::ConnectionAbort))).unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert_eq!(session.try_receive().as_deref(), Some("UserStopClicked"));
        assert_eq!(session.try_receive().as_deref(), Some("UserCancelClicked"));
        assert_eq!(
            session.try_receive(),
            Some(protocol::abort_notification())
        );
        assert_eq!(session.status(), Status::Closed);
    }

    #[test]
    fn a_wrong_identity_stops_the_pump_silently() {
        let session = Arc::new(Session::new(5));
        let mut websocket = websocket(&session);
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame("SUCHAT_Connect:6")).unwrap();
        sender.send(text_frame("never routed")).unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert!(websocket.stream.written.is_empty());
        assert_eq!(session.status(), Status::Closed);
        assert_eq!(session.try_receive(), None);
    }

    #[test]
    fn a_first_frame_without_identity_closes_the_session() {
        let session = Arc::new(Session::new(5));
        let mut websocket = websocket(&session);
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame("hello")).unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert_eq!(session.status(), Status::Closed);
        assert_eq!(session.try_receive(), None);
    }

    #[test]
    fn a_close_frame_notifies_the_application() {
        let session = Arc::new(Session::new(5));
        let mut websocket = websocket(&session);
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame("SUCHAT_Connect:5")).unwrap();
        sender
            .send(PumpEvent::Inbound(Ok(DataFrame {
                opcode: Opcode::Close,
                payload_bytes: 1001u16.to_be_bytes().to_vec(),
                masking_key: Some([0; 4]),
            })))
            .unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert_eq!(
            session.try_receive().as_deref(),
            Some("SUCHAT_Close:WebSocket Client Disconnected with Code: 1001")
        );
        assert_eq!(session.status(), Status::Closed);
    }

    #[test]
    fn close_notifications_reach_the_console() {
        let session = Arc::new(Session::new(5));
        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut websocket = {
            let lines = Arc::clone(&lines);
            websocket(&session).with_console(move |line| lines.lock().unwrap().push(line.to_owned()))
        };
        let (sender, receiver) = mpsc::channel();

        sender.send(text_frame("SUCHAT_Connect:5")).unwrap();
        sender.send(PumpEvent::Inbound(Err(Error::ConnectionAbort))).unwrap();

        websocket.transfer_full_duplex(&receiver, &sender).unwrap();

        assert_eq!(*lines.lock().unwrap(), vec![protocol::abort_notification()]);
    }

    #[test]
    fn open_answers_the_handshake_and_closes_the_stream() {
        let session = Arc::new(Session::new(5));
        let websocket = websocket(&session);

        // The empty reader reports a dropped peer straight away.
        websocket.open("dGhlIHNhbXBsZSBub25jZQ==").unwrap();

        assert_eq!(session.status(), Status::Waiting);
    }
}
