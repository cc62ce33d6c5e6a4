//! Session rows and the status state machine.
use crate::credits::Credits;
use crate::error::EngineError;
use crate::time::TimeStamp;
use chrono::Utc;
use sled::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SessionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    InProgress,
    #[n(3)]
    Completed,
    #[n(4)]
    Cancelled,
    #[n(5)]
    Rejected,
    #[n(6)]
    Disputed,
}

impl SessionStatus {
    /// Terminal states are permanent, a session never reopens.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Rejected
        )
    }

    /// Legal successors. Dispute entry is allowed from every non-terminal
    /// state; leaving Disputed is an admin-only resolution.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Disputed)
                | (Approved, InProgress)
                | (Approved, Cancelled)
                | (Approved, Disputed)
                | (InProgress, Completed)
                | (InProgress, Disputed)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Approved => "approved",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Disputed => "disputed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SessionMode {
    #[n(0)]
    Online,
    #[n(1)]
    Offline,
    #[n(2)]
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Teacher,
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Session {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub offer_id: String,
    #[n(2)]
    pub teacher_id: String,
    #[n(3)]
    pub student_id: String,
    #[n(4)]
    pub title: String,
    #[n(5)]
    pub description: String,
    #[n(6)]
    pub duration_minutes: u32,
    #[n(7)]
    pub mode: SessionMode,
    #[n(8)]
    pub scheduled_at: TimeStamp<Utc>,
    #[n(9)]
    pub status: SessionStatus,
    /// Frozen at booking time, later offer rate changes never touch it.
    #[n(10)]
    pub credit_amount: Credits,
    #[n(11)]
    pub credit_held: bool,
    #[n(12)]
    pub credit_released: bool,
    #[n(13)]
    pub teacher_checked_in_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub student_checked_in_at: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub teacher_confirmed: bool,
    #[n(16)]
    pub student_confirmed: bool,
    #[n(17)]
    pub started_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub cancelled_by: Option<String>,
    #[n(20)]
    pub cancel_reason: Option<String>,
    #[n(21)]
    pub created_at: TimeStamp<Utc>,
    #[n(22)]
    pub disputed_by: Option<String>,
    #[n(23)]
    pub dispute_reason: Option<String>,
}

impl Session {
    /// Which side of the session a user is on, if any.
    pub fn party_of(&self, user_id: &str) -> Option<Party> {
        if user_id == self.teacher_id {
            Some(Party::Teacher)
        } else if user_id == self.student_id {
            Some(Party::Student)
        } else {
            None
        }
    }

    pub fn checked_in(&self, party: Party) -> bool {
        match party {
            Party::Teacher => self.teacher_checked_in_at.is_some(),
            Party::Student => self.student_checked_in_at.is_some(),
        }
    }

    pub fn confirmed(&self, party: Party) -> bool {
        match party {
            Party::Teacher => self.teacher_confirmed,
            Party::Student => self.student_confirmed,
        }
    }

    /// Held and not yet resolved, the only state escrow may leave from.
    pub fn escrow_open(&self) -> bool {
        self.credit_held && !self.credit_released
    }

    /// Guarded transition. Fails with `InvalidState` and no effect when the
    /// move is not legal from the current status.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition(next) {
            return Err(EngineError::InvalidState(format!(
                "cannot move session {} from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Booking input. Built by the request layer, validated by the engine.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub student_id: String,
    pub offer_id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: u32,
    pub mode: SessionMode,
    pub scheduled_at: TimeStamp<Utc>,
}

impl BookingRequest {
    pub fn new(student_id: &str, offer_id: &str, scheduled_at: TimeStamp<Utc>) -> Self {
        Self {
            student_id: student_id.to_string(),
            offer_id: offer_id.to_string(),
            title: String::new(),
            description: String::new(),
            duration_minutes: 60,
            mode: SessionMode::Online,
            scheduled_at,
        }
    }
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
    pub fn duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }
    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.duration_minutes == 0 {
            return Err(EngineError::InvalidSchedule(
                "duration must be positive".into(),
            ));
        }
        if !self.scheduled_at.is_future() {
            return Err(EngineError::InvalidSchedule(
                "scheduled time must be in the future".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn storage_key(session_id: &str) -> String {
    format!("session/{session_id}")
}

/// Index row guarding the one-live-session-per-triple invariant. The offer
/// determines the teacher, so (offer, student) is enough to key the triple.
pub(crate) fn active_key(offer_id: &str, student_id: &str) -> String {
    format!("active/{offer_id}/{student_id}")
}

pub(crate) fn load(db: &Db, session_id: &str) -> Result<Session, EngineError> {
    match db.get(storage_key(session_id))? {
        Some(bytes) => Ok(minicbor::decode(&bytes)?),
        None => Err(EngineError::NotFound("session", session_id.to_string())),
    }
}
