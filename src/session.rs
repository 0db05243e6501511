use std::sync::mpsc::Sender;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{lock, Error, Result};
use crate::mailbox::Mailbox;
use crate::protocol::{self, CLOSE_BROWSER, CLOSE_SOCKET};
use crate::websocket::PumpEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    Connected,
    Closed,
}

/// One progress conversation with one browser page.
///
/// Starts out `Waiting`. The first pump to present the right id moves it to
/// `Connected`; anything else ends it. `Closed` is terminal, a new session is
/// created for the next conversation.
pub struct Session {
    id: u64,
    status: Mutex<Status>,
    mailbox: Mailbox,
}

impl Session {
    pub fn new(id: u64) -> Session {
        Session {
            id,
            status: Mutex::new(Status::Waiting),
            mailbox: Mailbox::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> Status {
        *lock(&self.status)
    }

    /// Queues a message for the browser. Dropped unless the session is connected.
    pub fn send(&self, message: impl Into<String>) -> Status {
        let status = lock(&self.status);
        if *status == Status::Connected && !self.mailbox.post(message.into()) {
            debug!(session_id = self.id, "outbound message dropped, pump is gone");
        }
        *status
    }

    /// Returns the oldest unread browser message, if there is one.
    pub fn try_receive(&self) -> Option<String> {
        self.mailbox.pop_inbound()
    }

    /// Tells the browser page to close itself, then stops the pump.
    pub fn close_signal(&self) {
        let mut status = lock(&self.status);
        if *status == Status::Connected {
            self.mailbox.post(CLOSE_BROWSER.to_owned());
            self.mailbox.post(CLOSE_SOCKET.to_owned());
        }

        *status = Status::Closed;
        self.mailbox.detach();
        info!(session_id = self.id, "session closed");
    }

    /// Binds a pump to this session if `claimed_id` is ours and nobody else got here first.
    pub(crate) fn connect(&self, claimed_id: Option<u64>, outbound: Sender<PumpEvent>) -> Result<()> {
        let mut status = lock(&self.status);
        if *status == Status::Waiting && claimed_id == Some(self.id) {
            self.mailbox.attach(outbound);
            *status = Status::Connected;
            info!(session_id = self.id, "session connected");
            return Ok(());
        }

        let current = *status;
        warn!(
            session_id = self.id,
            claimed_id = ?claimed_id,
            status = ?current,
            "rejecting connection with stale or wrong identity"
        );
        self.end(&mut status, protocol::error_notification("identity mismatch"));
        Err(Error::IdentityMismatch)
    }

    /// Ends the session because a connection broke the identity protocol.
    pub(crate) fn reject(&self) {
        let mut status = lock(&self.status);
        self.end(&mut status, protocol::error_notification("identity mismatch"));
    }

    /// Hands a browser message to the application. Returns false if the session is not connected.
    pub(crate) fn deliver(&self, message: String) -> bool {
        let status = lock(&self.status);
        if *status != Status::Connected {
            return false;
        }

        self.mailbox.push_inbound(message);
        true
    }

    /// The bound pump is going away. Leaves `notification` for the application.
    pub(crate) fn disconnect(&self, notification: String) {
        let mut status = lock(&self.status);
        if *status == Status::Connected {
            self.mailbox.push_inbound(notification);
            *status = Status::Closed;
        }
        self.mailbox.detach();
    }

    // A pump that is still bound gets told to stop, and the application is
    // told why its conversation ended.
    fn end(&self, status: &mut Status, notification: String) {
        if *status == Status::Connected {
            self.mailbox.post(CLOSE_SOCKET.to_owned());
            self.mailbox.push_inbound(notification);
        }

        *status = Status::Closed;
        self.mailbox.detach();
    }
}
