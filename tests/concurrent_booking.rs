//! Races against the booking critical section.
//!
//! The student's account row is locked for the whole availability check +
//! hold + insert, so concurrent bookings can never jointly overdraw the
//! available balance, and two bookings of the same offer can never both
//! slip past the conflict guard.

use sled::open;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use timebank::{
    Actor, BookingRequest, Credits, EngineError, OfferBook, SessionService, TimeStamp,
};

fn future() -> TimeStamp<chrono::Utc> {
    TimeStamp::new_with(2099, 3, 1, 9, 0, 0)
}

#[test]
fn concurrent_bookings_never_overdraw() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join("race_overdraw.db"))?);
    let offers = Arc::new(OfferBook::new(db.clone()));
    let service = Arc::new(SessionService::new(db, offers.clone()));

    let teacher = Actor::user("user_teacher");
    let student = Actor::user("user_student");
    service.open_account(&teacher.id, Credits::ZERO)?;
    // 10.00 buys exactly five one-hour sessions at 2.00/h
    service.open_account(&student.id, Credits::from_whole(10))?;

    // distinct offers so the conflict guard stays out of the way
    let offer_ids: Vec<String> = (0..8)
        .map(|_| {
            offers
                .register(&teacher.id, "tutoring", Credits::from_whole(2))
                .map(|o| o.id)
        })
        .collect::<Result<_, _>>()?;

    let handles: Vec<_> = offer_ids
        .into_iter()
        .map(|offer_id| {
            let service = service.clone();
            let student_id = student.id.clone();
            thread::spawn(move || {
                service.book_session(
                    BookingRequest::new(&student_id, &offer_id, future()).duration_minutes(60),
                )
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::InsufficientCredits { .. }) => {}
            Err(other) => panic!("unexpected booking failure: {other}"),
        }
    }

    assert_eq!(successes, 5);
    let account = service.account(&student.id)?;
    assert_eq!(account.held(), Credits::from_whole(10));
    assert_eq!(account.available(), Credits::ZERO);
    assert_eq!(account.total(), Credits::from_whole(10));

    Ok(())
}

#[test]
fn concurrent_bookings_of_one_offer_yield_one_session() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join("race_conflict.db"))?);
    let offers = Arc::new(OfferBook::new(db.clone()));
    let service = Arc::new(SessionService::new(db, offers.clone()));

    let teacher = Actor::user("user_teacher");
    let student = Actor::user("user_student");
    service.open_account(&teacher.id, Credits::ZERO)?;
    service.open_account(&student.id, Credits::from_whole(50))?;
    let offer = offers.register(&teacher.id, "tutoring", Credits::from_whole(2))?;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            let student_id = student.id.clone();
            let offer_id = offer.id.clone();
            thread::spawn(move || {
                service.book_session(BookingRequest::new(&student_id, &offer_id, future()))
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(other) => panic!("unexpected booking failure: {other}"),
        }
    }

    // balance allowed all six, the triple guard allowed exactly one
    assert_eq!(successes, 1);
    assert_eq!(
        service.account(&student.id)?.held(),
        Credits::from_whole(2)
    );

    Ok(())
}
