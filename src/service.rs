//! Service layer API for the session and escrow workflow.
//!
//! Every mutating operation is one atomic unit: the rows it touches are
//! locked for the whole read-modify-write, all writes go through a single
//! `sled::Batch`, and notifications collected along the way are dispatched
//! only after the batch commits.
use crate::account::{self, CreditBalance};
use crate::credits::{self, Credits};
use crate::error::EngineError;
use crate::ledger::{self, EntryKind, LedgerEntry};
use crate::locks::LockTable;
use crate::notify::{
    self, BadgeTrigger, Notification, NotificationKind, NotificationSink, NullSink,
};
use crate::offer::RateResolver;
use crate::session::{self, BookingRequest, Party, Session, SessionStatus};
use crate::time::TimeStamp;
use crate::utils;
use sled::{Batch, Db};
use std::sync::Arc;
use tracing::info;

/// Who is asking. The request layer authenticates; the engine only checks
/// participation and the admin bit.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    admin: bool,
}

impl Actor {
    pub fn user(id: &str) -> Self {
        Self {
            id: id.to_string(),
            admin: false,
        }
    }
    pub fn admin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            admin: true,
        }
    }
    pub fn is_admin(&self) -> bool {
        self.admin
    }
}

/// The two legal dispute outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Refund,
    Payout,
}

impl Resolution {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw {
            "refund" => Ok(Resolution::Refund),
            "payout" => Ok(Resolution::Payout),
            other => Err(EngineError::InvalidResolution(other.to_string())),
        }
    }
}

pub struct SessionService {
    db: Arc<Db>,
    locks: LockTable,
    resolver: Arc<dyn RateResolver>,
    notifier: Arc<dyn NotificationSink>,
    badges: Arc<dyn BadgeTrigger>,
}

impl SessionService {
    pub fn new(db: Arc<Db>, resolver: Arc<dyn RateResolver>) -> Self {
        Self {
            db,
            locks: LockTable::new(),
            resolver,
            notifier: Arc::new(NullSink),
            badges: Arc::new(NullSink),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_badges(mut self, badges: Arc<dyn BadgeTrigger>) -> Self {
        self.badges = badges;
        self
    }

    // ---- accounts -------------------------------------------------------

    /// Open an account with a welcome grant. Opening twice is a conflict.
    pub fn open_account(
        &self,
        user_id: &str,
        welcome_grant: Credits,
    ) -> Result<CreditBalance, EngineError> {
        let key = account::storage_key(user_id);
        self.locks.with_locks(&[&key], || {
            if account::exists(&self.db, user_id)? {
                return Err(EngineError::Conflict(format!(
                    "account already exists for {user_id}"
                )));
            }
            let before = CreditBalance::new();
            let mut balance = before;
            balance.grant(welcome_grant)?;

            let mut batch = Batch::default();
            batch.insert(key.as_bytes(), minicbor::to_vec(&balance)?);
            LedgerEntry::record(
                user_id,
                EntryKind::Initial,
                welcome_grant,
                before,
                balance,
                None,
                "welcome credit grant",
            )?
            .append_to(&mut batch)?;
            self.db.apply_batch(batch)?;

            info!(account = %user_id, grant = %welcome_grant, "account opened");
            Ok(balance)
        })
    }

    pub fn account(&self, user_id: &str) -> Result<CreditBalance, EngineError> {
        account::load(&self.db, user_id)
    }

    pub fn session(&self, session_id: &str) -> Result<Session, EngineError> {
        session::load(&self.db, session_id)
    }

    pub fn account_history(&self, user_id: &str) -> Result<Vec<LedgerEntry>, EngineError> {
        ledger::entries_for_account(&self.db, user_id)
    }

    pub fn session_audit(&self, session_id: &str) -> Result<Vec<LedgerEntry>, EngineError> {
        ledger::entries_for_session(&self.db, session_id)
    }

    // ---- booking --------------------------------------------------------

    /// Book a session against an offer. Offer resolution happens up front;
    /// the availability check, the hold and the session insert share one
    /// critical section on the student's account row so two concurrent
    /// bookings can never both pass the balance check.
    pub fn book_session(&self, request: BookingRequest) -> Result<Session, EngineError> {
        request.validate()?;
        let terms = self.resolver.resolve_offer(&request.offer_id)?;
        if terms.owner_id == request.student_id {
            return Err(EngineError::Unauthorized(
                "cannot book your own offer".into(),
            ));
        }
        if !terms.is_available {
            return Err(EngineError::Conflict(format!(
                "offer {} is not available",
                request.offer_id
            )));
        }
        let amount = credits::session_amount(terms.hourly_rate, request.duration_minutes)
            .ok_or_else(|| EngineError::internal("credit amount overflow"))?;

        let student_key = account::storage_key(&request.student_id);
        let (session, notes) = self.locks.with_locks(&[&student_key], || {
            if !account::exists(&self.db, &terms.owner_id)? {
                return Err(EngineError::NotFound("account", terms.owner_id.clone()));
            }
            let active_key = session::active_key(&request.offer_id, &request.student_id);
            if self.db.get(&active_key)?.is_some() {
                return Err(EngineError::Conflict(
                    "an active session already exists for this offer".into(),
                ));
            }

            let before = account::load(&self.db, &request.student_id)?;
            let mut balance = before;
            balance.hold(amount)?;

            let session = Session {
                id: utils::new_uuid_to_bech32("sess_")?,
                offer_id: request.offer_id.clone(),
                teacher_id: terms.owner_id.clone(),
                student_id: request.student_id.clone(),
                title: request.title.clone(),
                description: request.description.clone(),
                duration_minutes: request.duration_minutes,
                mode: request.mode,
                scheduled_at: request.scheduled_at.clone(),
                status: SessionStatus::Pending,
                credit_amount: amount,
                credit_held: true,
                credit_released: false,
                teacher_checked_in_at: None,
                student_checked_in_at: None,
                teacher_confirmed: false,
                student_confirmed: false,
                started_at: None,
                completed_at: None,
                cancelled_by: None,
                cancel_reason: None,
                created_at: TimeStamp::now(),
                disputed_by: None,
                dispute_reason: None,
            };

            let mut batch = Batch::default();
            batch.insert(student_key.as_bytes(), minicbor::to_vec(&balance)?);
            LedgerEntry::record(
                &request.student_id,
                EntryKind::Hold,
                amount,
                before,
                balance,
                Some(&session.id),
                format!("credits held for session '{}'", session.title),
            )?
            .append_to(&mut batch)?;
            put_session(&mut batch, &session)?;
            batch.insert(active_key.as_bytes(), session.id.as_bytes());
            self.db.apply_batch(batch)?;

            info!(session = %session.id, amount = %amount, "session booked, credits held");
            let note = Notification::for_session(
                &session.teacher_id,
                NotificationKind::BookingRequested,
                "New session request",
                format!("You have a new booking request: '{}'", session.title),
                &session.id,
            );
            Ok((session, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    // ---- party transitions ---------------------------------------------

    /// Teacher accepts a pending request.
    pub fn approve(&self, session_id: &str, actor: &Actor) -> Result<Session, EngineError> {
        let skey = session::storage_key(session_id);
        let (session, notes) = self.locks.with_locks(&[&skey], || {
            let mut session = session::load(&self.db, session_id)?;
            require_party(&session, actor, Party::Teacher)?;
            session.transition(SessionStatus::Approved)?;

            let mut batch = Batch::default();
            put_session(&mut batch, &session)?;
            self.db.apply_batch(batch)?;

            info!(session = %session.id, "session approved");
            let note = Notification::for_session(
                &session.student_id,
                NotificationKind::BookingApproved,
                "Session approved",
                format!("'{}' was approved by the teacher", session.title),
                &session.id,
            );
            Ok((session, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    /// Teacher declines a pending request; the hold flows back to the
    /// student in the same unit of work.
    pub fn reject(
        &self,
        session_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<Session, EngineError> {
        let probe = session::load(&self.db, session_id)?;
        let skey = session::storage_key(session_id);
        let akey = account::storage_key(&probe.student_id);
        let (session, notes) = self.locks.with_locks(&[&skey, &akey], || {
            let mut session = session::load(&self.db, session_id)?;
            require_party(&session, actor, Party::Teacher)?;
            session.transition(SessionStatus::Rejected)?;
            session.cancelled_by = Some(actor.id.clone());
            session.cancel_reason = Some(reason.to_string());

            let mut batch = Batch::default();
            self.apply_release(&mut batch, &mut session, "booking rejected, escrow refunded")?;
            put_session(&mut batch, &session)?;
            clear_active(&mut batch, &session);
            self.db.apply_batch(batch)?;

            info!(session = %session.id, "session rejected, escrow released");
            let note = Notification::for_session(
                &session.student_id,
                NotificationKind::BookingRejected,
                "Session rejected",
                format!("'{}' was declined: {reason}", session.title),
                &session.id,
            );
            Ok((session, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    /// Either party backs out of an approved session.
    pub fn cancel(
        &self,
        session_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<Session, EngineError> {
        let probe = session::load(&self.db, session_id)?;
        let skey = session::storage_key(session_id);
        let akey = account::storage_key(&probe.student_id);
        let (session, notes) = self.locks.with_locks(&[&skey, &akey], || {
            let mut session = session::load(&self.db, session_id)?;
            let party = require_participant(&session, actor)?;
            session.transition(SessionStatus::Cancelled)?;
            session.cancelled_by = Some(actor.id.clone());
            session.cancel_reason = Some(reason.to_string());

            let mut batch = Batch::default();
            self.apply_release(&mut batch, &mut session, "session cancelled, escrow refunded")?;
            put_session(&mut batch, &session)?;
            clear_active(&mut batch, &session);
            self.db.apply_batch(batch)?;

            info!(session = %session.id, by = ?party, "session cancelled, escrow released");
            let other = other_party_id(&session, party);
            let note = Notification::for_session(
                other,
                NotificationKind::SessionCancelled,
                "Session cancelled",
                format!("'{}' was cancelled: {reason}", session.title),
                &session.id,
            );
            Ok((session, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    // ---- check-in and start --------------------------------------------

    /// Record one party's arrival. The both-present join condition is
    /// evaluated inside the same critical section as the flag write, so two
    /// near-simultaneous check-ins still produce exactly one promotion.
    pub fn check_in(&self, session_id: &str, actor: &Actor) -> Result<Session, EngineError> {
        let skey = session::storage_key(session_id);
        let (session, notes) = self.locks.with_locks(&[&skey], || {
            let mut session = session::load(&self.db, session_id)?;
            let party = require_participant(&session, actor)?;
            if session.status != SessionStatus::Approved {
                return Err(EngineError::InvalidState(format!(
                    "check-in requires an approved session, status is {}",
                    session.status.as_str()
                )));
            }
            if session.checked_in(party) {
                return Err(EngineError::AlreadyActed(format!(
                    "{} already checked in",
                    actor.id
                )));
            }
            match party {
                Party::Teacher => session.teacher_checked_in_at = Some(TimeStamp::now()),
                Party::Student => session.student_checked_in_at = Some(TimeStamp::now()),
            }

            let mut notes = vec![Notification::for_session(
                other_party_id(&session, party),
                NotificationKind::PartnerCheckedIn,
                "Partner checked in",
                format!("Your partner arrived for '{}'", session.title),
                &session.id,
            )];
            let both_present =
                session.checked_in(Party::Teacher) && session.checked_in(Party::Student);
            if both_present {
                session.transition(SessionStatus::InProgress)?;
                session.started_at = Some(TimeStamp::now());
                info!(session = %session.id, "both parties present, session started");
                for user in [&session.teacher_id, &session.student_id] {
                    notes.push(Notification::for_session(
                        user,
                        NotificationKind::SessionStarted,
                        "Session started",
                        format!("'{}' is now in progress", session.title),
                        &session.id,
                    ));
                }
            }

            let mut batch = Batch::default();
            put_session(&mut batch, &session)?;
            self.db.apply_batch(batch)?;
            Ok((session, notes))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    /// Fallback start that bypasses check-in: either party may move an
    /// approved, scheduled session straight to in-progress.
    pub fn start_session(&self, session_id: &str, actor: &Actor) -> Result<Session, EngineError> {
        let skey = session::storage_key(session_id);
        let (session, notes) = self.locks.with_locks(&[&skey], || {
            let mut session = session::load(&self.db, session_id)?;
            require_participant(&session, actor)?;
            session.transition(SessionStatus::InProgress)?;
            session.started_at = Some(TimeStamp::now());

            let mut batch = Batch::default();
            put_session(&mut batch, &session)?;
            self.db.apply_batch(batch)?;

            info!(session = %session.id, "session started directly");
            let notes = [&session.teacher_id, &session.student_id]
                .map(|user| {
                    Notification::for_session(
                        user,
                        NotificationKind::SessionStarted,
                        "Session started",
                        format!("'{}' is now in progress", session.title),
                        &session.id,
                    )
                })
                .to_vec();
            Ok((session, notes))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    // ---- completion handshake ------------------------------------------

    /// Record one party's completion confirmation. Idempotent per party.
    /// When both flags are set, the same unit of work marks the session
    /// completed and performs the escrow transfer exactly once.
    pub fn confirm_completion(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<Session, EngineError> {
        let probe = session::load(&self.db, session_id)?;
        let skey = session::storage_key(session_id);
        let student_key = account::storage_key(&probe.student_id);
        let teacher_key = account::storage_key(&probe.teacher_id);
        let (session, notes, completed) =
            self.locks
                .with_locks(&[&skey, &student_key, &teacher_key], || {
                    let mut session = session::load(&self.db, session_id)?;
                    let party = require_participant(&session, actor)?;
                    if session.status != SessionStatus::InProgress {
                        return Err(EngineError::InvalidState(format!(
                            "confirmation requires an in-progress session, status is {}",
                            session.status.as_str()
                        )));
                    }
                    if session.confirmed(party) {
                        // repeat confirmation carries no additional effect
                        return Ok((session, Vec::new(), false));
                    }
                    match party {
                        Party::Teacher => session.teacher_confirmed = true,
                        Party::Student => session.student_confirmed = true,
                    }

                    let mut notes = vec![Notification::for_session(
                        other_party_id(&session, party),
                        NotificationKind::CompletionConfirmed,
                        "Completion confirmed",
                        format!("Your partner confirmed '{}' as done", session.title),
                        &session.id,
                    )];
                    let both_confirmed = session.teacher_confirmed && session.student_confirmed;

                    let mut batch = Batch::default();
                    if both_confirmed {
                        session.transition(SessionStatus::Completed)?;
                        session.completed_at = Some(TimeStamp::now());
                        self.apply_transfer(&mut batch, &mut session)?;
                        clear_active(&mut batch, &session);
                        info!(
                            session = %session.id,
                            amount = %session.credit_amount,
                            "session completed, credits transferred"
                        );
                        for user in [&session.teacher_id, &session.student_id] {
                            notes.push(Notification::for_session(
                                user,
                                NotificationKind::SessionCompleted,
                                "Session completed",
                                format!("'{}' is complete, credits settled", session.title),
                                &session.id,
                            ));
                        }
                    }
                    put_session(&mut batch, &session)?;
                    self.db.apply_batch(batch)?;
                    Ok((session, notes, both_confirmed))
                })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        if completed {
            notify::trigger_badges(
                self.badges.as_ref(),
                &[&session.teacher_id, &session.student_id],
            );
        }
        Ok(session)
    }

    // ---- dispute and administration ------------------------------------

    /// Either party freezes the session for administrative review. Legal
    /// from every non-terminal status; a disputed session accepts no
    /// further confirmations.
    pub fn dispute(
        &self,
        session_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<Session, EngineError> {
        let skey = session::storage_key(session_id);
        let (session, notes) = self.locks.with_locks(&[&skey], || {
            let mut session = session::load(&self.db, session_id)?;
            let party = require_participant(&session, actor)?;
            session.transition(SessionStatus::Disputed)?;
            session.disputed_by = Some(actor.id.clone());
            session.dispute_reason = Some(reason.to_string());

            let mut batch = Batch::default();
            put_session(&mut batch, &session)?;
            self.db.apply_batch(batch)?;

            info!(session = %session.id, by = ?party, "session disputed");
            let note = Notification::for_session(
                other_party_id(&session, party),
                NotificationKind::DisputeRaised,
                "Session disputed",
                format!("'{}' was disputed: {reason}", session.title),
                &session.id,
            );
            Ok((session, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    /// Admin assigns the final outcome of a disputed session: `Refund`
    /// releases the escrow to the student and cancels, `Payout` transfers
    /// it to the teacher and completes.
    pub fn resolve_dispute(
        &self,
        session_id: &str,
        actor: &Actor,
        resolution: Resolution,
    ) -> Result<Session, EngineError> {
        require_admin(actor)?;
        let probe = session::load(&self.db, session_id)?;
        let skey = session::storage_key(session_id);
        let student_key = account::storage_key(&probe.student_id);
        let teacher_key = account::storage_key(&probe.teacher_id);
        let (session, notes) = self
            .locks
            .with_locks(&[&skey, &student_key, &teacher_key], || {
                let mut session = session::load(&self.db, session_id)?;
                if session.status != SessionStatus::Disputed {
                    return Err(EngineError::InvalidState(format!(
                        "resolution requires a disputed session, status is {}",
                        session.status.as_str()
                    )));
                }

                let mut batch = Batch::default();
                let outcome = match resolution {
                    Resolution::Refund => {
                        session.transition(SessionStatus::Cancelled)?;
                        session.cancelled_by = Some(actor.id.clone());
                        session.cancel_reason = Some("dispute resolved: refund".into());
                        self.apply_release(
                            &mut batch,
                            &mut session,
                            "dispute resolved, escrow refunded",
                        )?;
                        "refund"
                    }
                    Resolution::Payout => {
                        session.transition(SessionStatus::Completed)?;
                        session.completed_at = Some(TimeStamp::now());
                        self.apply_transfer(&mut batch, &mut session)?;
                        "payout"
                    }
                };
                put_session(&mut batch, &session)?;
                clear_active(&mut batch, &session);
                self.db.apply_batch(batch)?;

                info!(session = %session.id, outcome, "dispute resolved");
                let notes = [&session.teacher_id, &session.student_id]
                    .map(|user| {
                        Notification::for_session(
                            user,
                            NotificationKind::DisputeResolved,
                            "Dispute resolved",
                            format!("'{}' was resolved with outcome: {outcome}", session.title),
                            &session.id,
                        )
                    })
                    .to_vec();
                Ok((session, notes))
            })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(session)
    }

    /// Operator intervention on a session without going through the party
    /// actions. Same state preconditions as the party-driven equivalents:
    /// approve/reject need Pending, complete needs InProgress.
    pub fn admin_set_status(
        &self,
        session_id: &str,
        actor: &Actor,
        target: SessionStatus,
    ) -> Result<Session, EngineError> {
        require_admin(actor)?;
        if !matches!(
            target,
            SessionStatus::Approved | SessionStatus::Rejected | SessionStatus::Completed
        ) {
            return Err(EngineError::InvalidState(format!(
                "admin override supports approved, rejected or completed, not {}",
                target.as_str()
            )));
        }
        let probe = session::load(&self.db, session_id)?;
        let skey = session::storage_key(session_id);
        let student_key = account::storage_key(&probe.student_id);
        let teacher_key = account::storage_key(&probe.teacher_id);
        let session = self
            .locks
            .with_locks(&[&skey, &student_key, &teacher_key], || {
                let mut session = session::load(&self.db, session_id)?;
                session.transition(target)?;

                let mut batch = Batch::default();
                match target {
                    SessionStatus::Rejected => {
                        session.cancelled_by = Some(actor.id.clone());
                        session.cancel_reason = Some("rejected by administrator".into());
                        self.apply_release(
                            &mut batch,
                            &mut session,
                            "administrative rejection, escrow refunded",
                        )?;
                        clear_active(&mut batch, &session);
                    }
                    SessionStatus::Completed => {
                        session.completed_at = Some(TimeStamp::now());
                        self.apply_transfer(&mut batch, &mut session)?;
                        clear_active(&mut batch, &session);
                    }
                    _ => {}
                }
                put_session(&mut batch, &session)?;
                self.db.apply_batch(batch)?;

                info!(session = %session.id, status = target.as_str(), "administrative override");
                Ok(session)
            })?;
        Ok(session)
    }

    /// Admin-granted spendable credits.
    pub fn credit_bonus(
        &self,
        actor: &Actor,
        user_id: &str,
        amount: Credits,
        reason: &str,
    ) -> Result<CreditBalance, EngineError> {
        require_admin(actor)?;
        self.adjust_balance(user_id, amount, EntryKind::Bonus, reason)
    }

    /// Admin-applied deduction from spendable credits.
    pub fn apply_penalty(
        &self,
        actor: &Actor,
        user_id: &str,
        amount: Credits,
        reason: &str,
    ) -> Result<CreditBalance, EngineError> {
        require_admin(actor)?;
        self.adjust_balance(user_id, amount, EntryKind::Penalty, reason)
    }

    fn adjust_balance(
        &self,
        user_id: &str,
        amount: Credits,
        kind: EntryKind,
        reason: &str,
    ) -> Result<CreditBalance, EngineError> {
        let key = account::storage_key(user_id);
        let (balance, notes) = self.locks.with_locks(&[&key], || {
            let before = account::load(&self.db, user_id)?;
            let mut balance = before;
            match kind {
                EntryKind::Bonus => balance.grant(amount)?,
                EntryKind::Penalty => balance.deduct(amount)?,
                _ => return Err(EngineError::internal("unsupported adjustment kind")),
            }

            let mut batch = Batch::default();
            batch.insert(key.as_bytes(), minicbor::to_vec(&balance)?);
            LedgerEntry::record(user_id, kind, amount, before, balance, None, reason)?
                .append_to(&mut batch)?;
            self.db.apply_batch(batch)?;

            info!(account = %user_id, kind = ?kind, amount = %amount, "balance adjusted");
            let note = Notification {
                recipient_id: user_id.to_string(),
                kind: NotificationKind::CreditAdjusted,
                title: "Credit adjustment".into(),
                message: format!("Your balance was adjusted: {reason}"),
                session_id: None,
            };
            Ok((balance, vec![note]))
        })?;
        notify::dispatch(self.notifier.as_ref(), notes);
        Ok(balance)
    }

    // ---- escrow primitives ---------------------------------------------

    /// Release the held amount back to the student. Caller must hold the
    /// session and student account locks; guarded by the held-not-released
    /// escrow state.
    fn apply_release(
        &self,
        batch: &mut Batch,
        session: &mut Session,
        description: &str,
    ) -> Result<(), EngineError> {
        if !session.escrow_open() {
            return Err(EngineError::internal(format!(
                "escrow already resolved for session {}",
                session.id
            )));
        }
        let before = account::load(&self.db, &session.student_id)?;
        let mut balance = before;
        balance.release(session.credit_amount)?;
        batch.insert(
            account::storage_key(&session.student_id).as_bytes(),
            minicbor::to_vec(&balance)?,
        );
        LedgerEntry::record(
            &session.student_id,
            EntryKind::Refund,
            session.credit_amount,
            before,
            balance,
            Some(&session.id),
            description,
        )?
        .append_to(batch)?;
        session.credit_released = true;
        Ok(())
    }

    /// Move the held amount from student to teacher. The only operation
    /// that moves value between accounts; invocable once per session.
    /// Caller must hold the session and both account locks.
    fn apply_transfer(&self, batch: &mut Batch, session: &mut Session) -> Result<(), EngineError> {
        if !session.escrow_open() {
            return Err(EngineError::internal(format!(
                "escrow already resolved for session {}",
                session.id
            )));
        }
        let amount = session.credit_amount;

        let student_before = account::load(&self.db, &session.student_id)?;
        let mut student = student_before;
        student.settle_out(amount)?;
        batch.insert(
            account::storage_key(&session.student_id).as_bytes(),
            minicbor::to_vec(&student)?,
        );
        LedgerEntry::record(
            &session.student_id,
            EntryKind::Spent,
            amount,
            student_before,
            student,
            Some(&session.id),
            format!("credits spent on session '{}'", session.title),
        )?
        .append_to(batch)?;

        let teacher_before = account::load(&self.db, &session.teacher_id)?;
        let mut teacher = teacher_before;
        teacher.grant(amount)?;
        batch.insert(
            account::storage_key(&session.teacher_id).as_bytes(),
            minicbor::to_vec(&teacher)?,
        );
        LedgerEntry::record(
            &session.teacher_id,
            EntryKind::Earned,
            amount,
            teacher_before,
            teacher,
            Some(&session.id),
            format!("credits earned teaching '{}'", session.title),
        )?
        .append_to(batch)?;

        session.credit_released = true;
        Ok(())
    }
}

fn put_session(batch: &mut Batch, session: &Session) -> Result<(), EngineError> {
    batch.insert(
        session::storage_key(&session.id).as_bytes(),
        minicbor::to_vec(session)?,
    );
    Ok(())
}

fn clear_active(batch: &mut Batch, session: &Session) {
    batch.remove(session::active_key(&session.offer_id, &session.student_id).as_bytes());
}

fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Unauthorized(format!(
            "{} is not an administrator",
            actor.id
        )))
    }
}

fn require_participant(session: &Session, actor: &Actor) -> Result<Party, EngineError> {
    session.party_of(&actor.id).ok_or_else(|| {
        EngineError::Unauthorized(format!(
            "{} is not a participant of session {}",
            actor.id, session.id
        ))
    })
}

fn require_party(session: &Session, actor: &Actor, expected: Party) -> Result<(), EngineError> {
    match require_participant(session, actor)? {
        party if party == expected => Ok(()),
        _ => Err(EngineError::Unauthorized(format!(
            "only the {} may perform this action",
            match expected {
                Party::Teacher => "teacher",
                Party::Student => "student",
            }
        ))),
    }
}

fn other_party_id(session: &Session, party: Party) -> &str {
    match party {
        Party::Teacher => &session.student_id,
        Party::Student => &session.teacher_id,
    }
}
