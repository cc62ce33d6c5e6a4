//! Append-only audit trail of balance-affecting events.
//!
//! An entry is written in the same batch as the balance mutation it records
//! and is never updated or deleted. The engine itself never reads the ledger
//! back to compute balances; the account row is the source of truth and the
//! ledger exists for audit queries only.
use crate::account::CreditBalance;
use crate::credits::Credits;
use crate::error::EngineError;
use crate::time::TimeStamp;
use crate::utils;
use chrono::Utc;
use sled::{Batch, Db};

const KEY_PREFIX: &str = "ledger/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum EntryKind {
    /// Welcome grant at account opening.
    #[n(0)]
    Initial,
    /// Escrow reservation. Total balance unchanged, availability shrinks.
    #[n(1)]
    Hold,
    /// Escrow released back to the student (rejection/cancellation/refund).
    #[n(2)]
    Refund,
    /// Student side of the completion transfer.
    #[n(3)]
    Spent,
    /// Teacher side of the completion transfer.
    #[n(4)]
    Earned,
    #[n(5)]
    Bonus,
    #[n(6)]
    Penalty,
}

impl EntryKind {
    /// Sign convention: debits and reservations are negative.
    fn sign(self) -> i64 {
        match self {
            EntryKind::Initial | EntryKind::Refund | EntryKind::Earned | EntryKind::Bonus => 1,
            EntryKind::Hold | EntryKind::Spent | EntryKind::Penalty => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LedgerEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub account_id: String,
    #[n(2)]
    pub kind: EntryKind,
    /// Signed centicredits, sign per [`EntryKind::sign`].
    #[n(3)]
    pub amount: i64,
    #[n(4)]
    pub total_before: Credits,
    #[n(5)]
    pub total_after: Credits,
    #[n(6)]
    pub held_before: Credits,
    #[n(7)]
    pub held_after: Credits,
    #[n(8)]
    pub session_id: Option<String>,
    #[n(9)]
    pub description: String,
    #[n(10)]
    pub recorded_at: TimeStamp<Utc>,
}

impl LedgerEntry {
    pub(crate) fn record(
        account_id: &str,
        kind: EntryKind,
        amount: Credits,
        before: CreditBalance,
        after: CreditBalance,
        session_id: Option<&str>,
        description: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let unsigned = i64::try_from(amount.centis())
            .map_err(|_| EngineError::internal("ledger amount exceeds i64 range"))?;
        Ok(Self {
            id: utils::new_uuid_to_bech32("txn_")?,
            account_id: account_id.to_string(),
            kind,
            amount: unsigned * kind.sign(),
            total_before: before.total(),
            total_after: after.total(),
            held_before: before.held(),
            held_after: after.held(),
            session_id: session_id.map(str::to_string),
            description: description.into(),
            recorded_at: TimeStamp::now(),
        })
    }

    pub(crate) fn append_to(&self, batch: &mut Batch) -> Result<(), EngineError> {
        let key = format!("{KEY_PREFIX}{}", self.id);
        batch.insert(key.as_bytes(), minicbor::to_vec(self)?);
        Ok(())
    }
}

fn scan(db: &Db, keep: impl Fn(&LedgerEntry) -> bool) -> Result<Vec<LedgerEntry>, EngineError> {
    let mut entries = Vec::new();
    for item in db.scan_prefix(KEY_PREFIX) {
        let (_, bytes) = item?;
        let entry: LedgerEntry = minicbor::decode(&bytes)?;
        if keep(&entry) {
            entries.push(entry);
        }
    }
    // bech32 keys do not sort chronologically, the timestamp does
    entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
    Ok(entries)
}

/// Full history for one account, oldest first.
pub fn entries_for_account(db: &Db, user_id: &str) -> Result<Vec<LedgerEntry>, EngineError> {
    scan(db, |e| e.account_id == user_id)
}

/// Every entry tagged to one session, across both accounts, oldest first.
pub fn entries_for_session(db: &Db, session_id: &str) -> Result<Vec<LedgerEntry>, EngineError> {
    scan(db, |e| e.session_id.as_deref() == Some(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_entry_is_negative_with_unchanged_total() {
        let mut before = CreditBalance::new();
        before.grant(Credits::from_whole(10)).unwrap();
        let mut after = before;
        after.hold(Credits::from_whole(3)).unwrap();

        let entry = LedgerEntry::record(
            "user_x",
            EntryKind::Hold,
            Credits::from_whole(3),
            before,
            after,
            Some("sess_x"),
            "escrow hold",
        )
        .unwrap();

        assert_eq!(entry.amount, -300);
        assert_eq!(entry.total_before, entry.total_after);
        assert_eq!(entry.held_after, Credits::from_whole(3));
    }

    #[test]
    fn earned_entry_is_positive() {
        let before = CreditBalance::new();
        let mut after = before;
        after.grant(Credits::from_whole(3)).unwrap();

        let entry = LedgerEntry::record(
            "user_t",
            EntryKind::Earned,
            Credits::from_whole(3),
            before,
            after,
            Some("sess_x"),
            "session payout",
        )
        .unwrap();

        assert_eq!(entry.amount, 300);
    }

    #[test]
    fn entry_encoding() {
        let balance = CreditBalance::new();
        let original = LedgerEntry::record(
            "user_x",
            EntryKind::Bonus,
            Credits::from_centis(50),
            balance,
            balance,
            None,
            "spot bonus",
        )
        .unwrap();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: LedgerEntry = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
