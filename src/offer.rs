//! Teaching offers and the rate-resolution seam.
//!
//! The engine only ever asks three things about an offer: who owns it, what
//! it costs per hour, and whether it is currently bookable. That contract is
//! the [`RateResolver`] trait; [`OfferBook`] is the sled-backed directory
//! used in tests and by embedders without their own catalog.
use crate::credits::Credits;
use crate::error::EngineError;
use crate::utils;
use sled::Db;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OfferTerms {
    pub owner_id: String,
    pub hourly_rate: Credits,
    pub is_available: bool,
}

pub trait RateResolver: Send + Sync {
    /// Fails with `NotFound` if the offer does not exist.
    fn resolve_offer(&self, offer_id: &str) -> Result<OfferTerms, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Offer {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner_id: String,
    #[n(2)]
    pub skill: String,
    #[n(3)]
    pub hourly_rate: Credits,
    #[n(4)]
    pub is_available: bool,
}

fn storage_key(offer_id: &str) -> String {
    format!("offer/{offer_id}")
}

/// Minimal offer catalog. Rate changes here never touch open sessions; the
/// escrow amount is frozen on the session row at booking time.
pub struct OfferBook {
    db: Arc<Db>,
}

impl OfferBook {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn register(
        &self,
        owner_id: &str,
        skill: &str,
        hourly_rate: Credits,
    ) -> Result<Offer, EngineError> {
        let offer = Offer {
            id: utils::new_uuid_to_bech32("offer_")?,
            owner_id: owner_id.to_string(),
            skill: skill.to_string(),
            hourly_rate,
            is_available: true,
        };
        self.db
            .insert(storage_key(&offer.id), minicbor::to_vec(&offer)?)?;
        Ok(offer)
    }

    pub fn set_available(&self, offer_id: &str, available: bool) -> Result<(), EngineError> {
        let mut offer = self.get(offer_id)?;
        offer.is_available = available;
        self.db
            .insert(storage_key(offer_id), minicbor::to_vec(&offer)?)?;
        Ok(())
    }

    pub fn set_rate(&self, offer_id: &str, hourly_rate: Credits) -> Result<(), EngineError> {
        let mut offer = self.get(offer_id)?;
        offer.hourly_rate = hourly_rate;
        self.db
            .insert(storage_key(offer_id), minicbor::to_vec(&offer)?)?;
        Ok(())
    }

    pub fn get(&self, offer_id: &str) -> Result<Offer, EngineError> {
        match self.db.get(storage_key(offer_id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(EngineError::NotFound("offer", offer_id.to_string())),
        }
    }
}

impl RateResolver for OfferBook {
    fn resolve_offer(&self, offer_id: &str) -> Result<OfferTerms, EngineError> {
        let offer = self.get(offer_id)?;
        Ok(OfferTerms {
            owner_id: offer.owner_id,
            hourly_rate: offer.hourly_rate,
            is_available: offer.is_available,
        })
    }
}
