use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::error::lock;

/// Feeds server log lines to at most one console viewer.
///
/// Attaching a viewer detaches the previous one: its receiver disconnects,
/// which ends that viewer's loop. Lines logged while nobody is attached are
/// dropped.
pub struct LogMailbox {
    viewer: Mutex<Option<Sender<String>>>,
}

impl LogMailbox {
    pub fn new() -> LogMailbox {
        LogMailbox {
            viewer: Mutex::new(None),
        }
    }

    pub fn attach(&self) -> Receiver<String> {
        let (sender, receiver) = mpsc::channel();
        *lock(&self.viewer) = Some(sender);
        receiver
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.viewer).is_some()
    }

    pub fn log(&self, message: &str) {
        let mut viewer = lock(&self.viewer);
        let gone = match viewer.as_ref() {
            Some(sender) => sender.send(format!("{}<br>", message)).is_err(),
            None => false,
        };

        if gone {
            viewer.take();
        }
    }

    /// Detaches the current viewer, if any.
    pub fn close(&self) {
        lock(&self.viewer).take();
    }
}

impl Default for LogMailbox {
    fn default() -> Self {
        LogMailbox::new()
    }
}
