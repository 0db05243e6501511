use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::error::lock;
use crate::websocket::PumpEvent;

/// Carries messages between the application thread and a session's pump.
///
/// Outbound messages go straight into the pump's event channel once a pump
/// has bound itself to the session. Inbound messages wait in a FIFO until the
/// application polls for them.
pub struct Mailbox {
    outbound: Mutex<Option<Sender<PumpEvent>>>,
    inbound: Mutex<VecDeque<String>>,
}

impl Mailbox {
    pub fn new() -> Mailbox {
        Mailbox {
            outbound: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn attach(&self, outbound: Sender<PumpEvent>) {
        *lock(&self.outbound) = Some(outbound);
    }

    pub(crate) fn detach(&self) {
        lock(&self.outbound).take();
    }

    /// Queues a message for the pump. Returns false when no pump is listening.
    pub(crate) fn post(&self, message: String) -> bool {
        let mut outbound = lock(&self.outbound);
        let delivered = match outbound.as_ref() {
            Some(sender) => sender.send(PumpEvent::Outbound(message)).is_ok(),
            None => false,
        };

        if !delivered {
            outbound.take();
        }

        delivered
    }

    pub(crate) fn push_inbound(&self, message: String) {
        lock(&self.inbound).push_back(message);
    }

    /// Never blocks.
    pub fn pop_inbound(&self) -> Option<String> {
        lock(&self.inbound).pop_front()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox::new()
    }
}
