//! Post-commit side effects: notifications and badge triggers.
//!
//! Both are fire-and-forget. The engine collects them while a critical
//! section is open and dispatches only after the owning batch has committed;
//! a failing sink is logged and swallowed, never propagated and never
//! retried.
use std::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingRequested,
    BookingApproved,
    BookingRejected,
    SessionCancelled,
    PartnerCheckedIn,
    SessionStarted,
    CompletionConfirmed,
    SessionCompleted,
    DisputeRaised,
    DisputeResolved,
    CreditAdjusted,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub session_id: Option<String>,
}

impl Notification {
    pub(crate) fn for_session(
        recipient_id: &str,
        kind: NotificationKind,
        title: &str,
        message: String,
        session_id: &str,
    ) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            kind,
            title: title.to_string(),
            message,
            session_id: Some(session_id.to_string()),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, note: Notification) -> anyhow::Result<()>;
}

pub trait BadgeTrigger: Send + Sync {
    fn session_completed(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Drops everything. The default when the embedder wires no sink.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _note: Notification) -> anyhow::Result<()> {
        Ok(())
    }
}

impl BadgeTrigger for NullSink {
    fn session_completed(&self, _user_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hands notifications to a channel for out-of-band delivery. This replaces
/// any shared mutable connection registry: the engine only ever sends.
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, note: Notification) -> anyhow::Result<()> {
        self.tx
            .send(note)
            .map_err(|_| anyhow::Error::msg("notification receiver dropped"))
    }
}

/// Best-effort dispatch of the notes collected during an operation.
pub(crate) fn dispatch(sink: &dyn NotificationSink, notes: Vec<Notification>) {
    for note in notes {
        if let Err(e) = sink.deliver(note.clone()) {
            warn!(
                recipient = %note.recipient_id,
                kind = ?note.kind,
                error = %e,
                "notification delivery failed, dropping"
            );
        }
    }
}

pub(crate) fn trigger_badges(badges: &dyn BadgeTrigger, user_ids: &[&str]) {
    for user_id in user_ids {
        if let Err(e) = badges.session_completed(user_id) {
            warn!(user = %user_id, error = %e, "badge trigger failed, ignoring");
        }
    }
}
