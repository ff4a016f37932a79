//! Fire-and-forget registration notices.
//!
//! After a record is created the portal hands a [`RegistrationNotice`] to a
//! background worker. Whatever the notifier does, the create has already
//! succeeded; failures are logged and dropped.

use crate::error::Result;
use crate::types::{RegistrationRecord, Timestamp};
use crossbeam_channel::{unbounded, Sender};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

/// What the confirmation email needs to say.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationNotice {
    pub to: String,
    pub student_name: String,
    pub student_id: String,
    pub programme: String,
    pub program_level: String,
    pub amount_paid: Decimal,
    pub registered_at: Timestamp,
    pub collected_by: String,
}

impl From<&RegistrationRecord> for RegistrationNotice {
    fn from(record: &RegistrationRecord) -> Self {
        Self {
            to: record.email.clone(),
            student_name: record.full_name.clone(),
            student_id: record.student_id.clone(),
            programme: record.programme.clone(),
            program_level: record.program_level.clone(),
            amount_paid: record.amount_paid,
            registered_at: record.created_at,
            collected_by: record.collected_by.clone(),
        }
    }
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notices (email, SMS, ...).
pub trait RegistrationNotifier: Send + Sync {
    fn notify(&self, notice: &RegistrationNotice) -> std::result::Result<(), NotifyError>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl RegistrationNotifier for NoopNotifier {
    fn notify(&self, _notice: &RegistrationNotice) -> std::result::Result<(), NotifyError> {
        Ok(())
    }
}

/// Runs a notifier on its own thread so callers never wait on it.
pub struct NotificationDispatcher {
    sender: Option<Sender<RegistrationNotice>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn RegistrationNotifier>) -> Result<Self> {
        let (sender, receiver) = unbounded::<RegistrationNotice>();

        let worker = std::thread::Builder::new()
            .name("registration-notifier".into())
            .spawn(move || {
                for notice in receiver.iter() {
                    match notifier.notify(&notice) {
                        Ok(()) => debug!(student = %notice.student_id, "registration notice sent"),
                        Err(error) => warn!(
                            student = %notice.student_id,
                            %error,
                            "registration notice failed"
                        ),
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a notice. Never blocks.
    pub fn dispatch(&self, notice: RegistrationNotice) {
        let Some(ref sender) = self.sender else {
            return;
        };
        if sender.send(notice).is_err() {
            warn!("notification worker has stopped; notice dropped");
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
