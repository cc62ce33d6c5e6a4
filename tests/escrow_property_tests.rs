//! Property-based tests for the escrow engine.
//!
//! These drive random balances, rates, durations and lifecycle paths through
//! the engine and check the invariants that must hold for every input: holds
//! are exact or fully absent, escrow resolves to exactly one of transfer or
//! refund, and credit is conserved across both accounts.

use proptest::prelude::*;
use sled::open;
use std::sync::Arc;
use tempfile::tempdir;
use timebank::{
    Actor, BookingRequest, Credits, EngineError, EntryKind, OfferBook, Resolution, SessionService,
    SessionStatus, TimeStamp,
};

fn rate_strategy() -> impl Strategy<Value = Credits> {
    // includes zero to exercise the 1:1 fallback
    (0u64..=500).prop_map(Credits::from_centis)
}

fn balance_strategy() -> impl Strategy<Value = Credits> {
    (0u64..=2_000).prop_map(Credits::from_centis)
}

fn duration_strategy() -> impl Strategy<Value = u32> {
    1u32..=300
}

/// The five ways a session with held credit can reach a terminal state.
#[derive(Debug, Clone, Copy)]
enum TerminalPath {
    Complete,
    Reject,
    Cancel,
    DisputeRefund,
    DisputePayout,
}

fn path_strategy() -> impl Strategy<Value = TerminalPath> {
    prop_oneof![
        Just(TerminalPath::Complete),
        Just(TerminalPath::Reject),
        Just(TerminalPath::Cancel),
        Just(TerminalPath::DisputeRefund),
        Just(TerminalPath::DisputePayout),
    ]
}

struct World {
    _dir: tempfile::TempDir,
    service: SessionService,
    teacher: Actor,
    student: Actor,
    offer_id: String,
}

fn world(student_balance: Credits, rate: Credits) -> World {
    let dir = tempdir().unwrap();
    let db = Arc::new(open(dir.path().join("prop.db")).unwrap());
    let offers = Arc::new(OfferBook::new(db.clone()));
    let service = SessionService::new(db, offers.clone());

    let teacher = Actor::user("user_teacher");
    let student = Actor::user("user_student");
    service
        .open_account(&teacher.id, Credits::from_whole(1))
        .unwrap();
    service.open_account(&student.id, student_balance).unwrap();
    let offer = offers.register(&teacher.id, "anything", rate).unwrap();

    World {
        _dir: dir,
        service,
        teacher,
        student,
        offer_id: offer.id,
    }
}

fn expected_amount(rate: Credits, minutes: u32) -> Credits {
    let rate = if rate.is_zero() {
        Credits::from_whole(1)
    } else {
        rate
    };
    Credits::from_centis((rate.centis() as u128 * minutes as u128 / 60) as u64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Hold correctness: a booking succeeds with an exact hold when the
    /// amount fits the available balance, otherwise it fails with
    /// `InsufficientCredits` and changes nothing.
    #[test]
    fn hold_is_exact_or_absent(
        balance in balance_strategy(),
        rate in rate_strategy(),
        minutes in duration_strategy(),
    ) {
        let w = world(balance, rate);
        let amount = expected_amount(rate, minutes);

        let result = w.service.book_session(
            BookingRequest::new(&w.student.id, &w.offer_id, TimeStamp::new_with(2099, 1, 1, 0, 0, 0))
                .duration_minutes(minutes),
        );

        let account = w.service.account(&w.student.id).unwrap();
        if amount <= balance {
            let session = result.unwrap();
            prop_assert_eq!(session.credit_amount, amount);
            prop_assert_eq!(account.held(), amount);
            prop_assert_eq!(account.total(), balance);
        } else {
            prop_assert!(
                matches!(result.unwrap_err(), EngineError::InsufficientCredits { .. }),
                "expected InsufficientCredits"
            );
            prop_assert_eq!(account.held(), Credits::ZERO);
            prop_assert_eq!(account.total(), balance);
            // nothing but the welcome grant in the ledger
            prop_assert_eq!(w.service.account_history(&w.student.id).unwrap().len(), 1);
        }
    }

    /// Escrow zero-sum: whichever terminal path a session takes, the held
    /// amount is either fully transferred or fully refunded, never both and
    /// never partially, and total credit across both accounts is conserved.
    #[test]
    fn escrow_resolves_exactly_once(
        rate in rate_strategy(),
        minutes in duration_strategy(),
        path in path_strategy(),
    ) {
        let balance = Credits::from_whole(50);
        let w = world(balance, rate);
        let amount = expected_amount(rate, minutes);
        prop_assume!(amount <= balance);

        let admin = Actor::admin("user_admin");
        let session = w.service.book_session(
            BookingRequest::new(&w.student.id, &w.offer_id, TimeStamp::new_with(2099, 1, 1, 0, 0, 0))
                .duration_minutes(minutes),
        ).unwrap();

        let transferred = match path {
            TerminalPath::Reject => {
                w.service.reject(&session.id, &w.teacher, "no").unwrap();
                false
            }
            TerminalPath::Cancel => {
                w.service.approve(&session.id, &w.teacher).unwrap();
                w.service.cancel(&session.id, &w.student, "no").unwrap();
                false
            }
            TerminalPath::Complete => {
                w.service.approve(&session.id, &w.teacher).unwrap();
                w.service.check_in(&session.id, &w.teacher).unwrap();
                w.service.check_in(&session.id, &w.student).unwrap();
                w.service.confirm_completion(&session.id, &w.teacher).unwrap();
                w.service.confirm_completion(&session.id, &w.student).unwrap();
                true
            }
            TerminalPath::DisputeRefund => {
                w.service.dispute(&session.id, &w.student, "bad").unwrap();
                w.service.resolve_dispute(&session.id, &admin, Resolution::Refund).unwrap();
                false
            }
            TerminalPath::DisputePayout => {
                w.service.approve(&session.id, &w.teacher).unwrap();
                w.service.dispute(&session.id, &w.teacher, "bad").unwrap();
                w.service.resolve_dispute(&session.id, &admin, Resolution::Payout).unwrap();
                true
            }
        };

        let session = w.service.session(&session.id).unwrap();
        prop_assert!(session.status.is_terminal());
        prop_assert!(session.credit_held && session.credit_released);

        let student = w.service.account(&w.student.id).unwrap();
        let teacher = w.service.account(&w.teacher.id).unwrap();
        prop_assert_eq!(student.held(), Credits::ZERO);

        let audit = w.service.session_audit(&session.id).unwrap();
        let count = |kind: EntryKind| audit.iter().filter(|e| e.kind == kind).count();
        prop_assert_eq!(count(EntryKind::Hold), 1);
        if transferred {
            prop_assert_eq!((count(EntryKind::Spent), count(EntryKind::Earned), count(EntryKind::Refund)), (1, 1, 0));
            // the transfer pair nets to zero across the two accounts
            let spent: i64 = audit.iter().filter(|e| e.kind == EntryKind::Spent).map(|e| e.amount).sum();
            let earned: i64 = audit.iter().filter(|e| e.kind == EntryKind::Earned).map(|e| e.amount).sum();
            prop_assert_eq!(spent + earned, 0);
            prop_assert_eq!(student.total(), balance.checked_sub(amount).unwrap());
            prop_assert_eq!(teacher.total(), Credits::from_whole(1).checked_add(amount).unwrap());
        } else {
            prop_assert_eq!((count(EntryKind::Spent), count(EntryKind::Earned), count(EntryKind::Refund)), (0, 0, 1));
            prop_assert_eq!(student.total(), balance);
            prop_assert_eq!(teacher.total(), Credits::from_whole(1));
        }

        // conservation: nothing created or destroyed, only moved
        let combined = student.total().checked_add(teacher.total()).unwrap();
        prop_assert_eq!(combined, balance.checked_add(Credits::from_whole(1)).unwrap());
    }

    /// No double transfer: duplicate confirmations after completion cannot
    /// produce a second payout.
    #[test]
    fn completion_pays_exactly_once(
        rate in rate_strategy(),
        minutes in duration_strategy(),
    ) {
        let balance = Credits::from_whole(50);
        let w = world(balance, rate);
        let amount = expected_amount(rate, minutes);
        prop_assume!(amount <= balance);

        let session = w.service.book_session(
            BookingRequest::new(&w.student.id, &w.offer_id, TimeStamp::new_with(2099, 1, 1, 0, 0, 0))
                .duration_minutes(minutes),
        ).unwrap();
        w.service.approve(&session.id, &w.teacher).unwrap();
        w.service.start_session(&session.id, &w.student).unwrap();
        w.service.confirm_completion(&session.id, &w.student).unwrap();
        // duplicate delivery of the same confirmation
        w.service.confirm_completion(&session.id, &w.student).unwrap();
        w.service.confirm_completion(&session.id, &w.teacher).unwrap();
        prop_assert!(w.service.confirm_completion(&session.id, &w.teacher).is_err());

        let teacher = w.service.account(&w.teacher.id).unwrap();
        prop_assert_eq!(teacher.total(), Credits::from_whole(1).checked_add(amount).unwrap());
        let audit = w.service.session_audit(&session.id).unwrap();
        prop_assert_eq!(audit.iter().filter(|e| e.kind == EntryKind::Earned).count(), 1);

        let reloaded = w.service.session(&session.id).unwrap();
        prop_assert_eq!(reloaded.status, SessionStatus::Completed);
    }
}
