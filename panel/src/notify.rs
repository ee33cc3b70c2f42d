// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator and user notifications
//!
//! Mail delivery itself is an external collaborator; the orchestration core
//! only needs somewhere to hand a message.  Deployments wire a real sender
//! behind this trait; [`LogNotifier`] emits notifications into the log
//! (useful for development) and [`RecordingNotifier`] captures them for
//! test assertions.

use slog::Logger;
use std::sync::Mutex;

pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &str, subject: &str, body: &str);
}

/// Notifier that writes notifications to the log
pub struct LogNotifier {
    log: Logger,
}

impl LogNotifier {
    pub fn new(log: Logger) -> LogNotifier {
        LogNotifier { log }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, recipient: &str, subject: &str, body: &str) {
        info!(
            self.log,
            "notification";
            "recipient" => recipient,
            "subject" => subject,
            "body" => body,
        );
    }
}

/// Notifier that records notifications for inspection
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> RecordingNotifier {
        RecordingNotifier::default()
    }

    /// All notifications so far as `(recipient, subject)` pairs.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: &str, subject: &str, _body: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
    }
}
