//! Per-user credit balance rows.
//!
//! `total` is everything the user owns, `held` is the slice currently locked
//! in escrow for open sessions. Fields are private: every mutation goes
//! through a checked method so `held <= total` holds by construction and
//! `available()` can never underflow.
use crate::credits::Credits;
use crate::error::EngineError;
use sled::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct CreditBalance {
    #[n(0)]
    total: Credits,
    #[n(1)]
    held: Credits,
}

impl CreditBalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn total(&self) -> Credits {
        self.total
    }
    pub const fn held(&self) -> Credits {
        self.held
    }
    /// The only amount spendable for new bookings.
    pub fn available(&self) -> Credits {
        // held <= total is maintained by every mutation below
        self.total
            .checked_sub(self.held)
            .unwrap_or(Credits::ZERO)
    }

    /// Add spendable credits (welcome grant, bonus, incoming transfer).
    pub fn grant(&mut self, amount: Credits) -> Result<(), EngineError> {
        self.total = self
            .total
            .checked_add(amount)
            .ok_or_else(|| EngineError::internal("balance overflow on grant"))?;
        Ok(())
    }

    /// Reserve credits for escrow. Total is unchanged; availability shrinks.
    pub fn hold(&mut self, amount: Credits) -> Result<(), EngineError> {
        if self.available() < amount {
            return Err(EngineError::InsufficientCredits {
                needed: amount,
                available: self.available(),
            });
        }
        self.held = self
            .held
            .checked_add(amount)
            .ok_or_else(|| EngineError::internal("held overflow on hold"))?;
        Ok(())
    }

    /// Return reserved credits to availability (rejection, cancellation,
    /// dispute refund).
    pub fn release(&mut self, amount: Credits) -> Result<(), EngineError> {
        self.held = self
            .held
            .checked_sub(amount)
            .ok_or_else(|| EngineError::internal("release exceeds held amount"))?;
        Ok(())
    }

    /// Student side of a transfer: the held slice leaves the account for good.
    pub fn settle_out(&mut self, amount: Credits) -> Result<(), EngineError> {
        if self.held < amount {
            return Err(EngineError::internal("settle exceeds held amount"));
        }
        self.held = self
            .held
            .checked_sub(amount)
            .ok_or_else(|| EngineError::internal("settle held underflow"))?;
        self.total = self
            .total
            .checked_sub(amount)
            .ok_or_else(|| EngineError::internal("settle total underflow"))?;
        Ok(())
    }

    /// Remove spendable credits (penalty). Never touches the held slice.
    pub fn deduct(&mut self, amount: Credits) -> Result<(), EngineError> {
        if self.available() < amount {
            return Err(EngineError::InsufficientCredits {
                needed: amount,
                available: self.available(),
            });
        }
        self.total = self
            .total
            .checked_sub(amount)
            .ok_or_else(|| EngineError::internal("deduct total underflow"))?;
        Ok(())
    }
}

pub(crate) fn storage_key(user_id: &str) -> String {
    format!("account/{user_id}")
}

pub(crate) fn load(db: &Db, user_id: &str) -> Result<CreditBalance, EngineError> {
    match db.get(storage_key(user_id))? {
        Some(bytes) => Ok(minicbor::decode(&bytes)?),
        None => Err(EngineError::NotFound("account", user_id.to_string())),
    }
}

pub(crate) fn exists(db: &Db, user_id: &str) -> Result<bool, EngineError> {
    Ok(db.contains_key(storage_key(user_id))?)
}
