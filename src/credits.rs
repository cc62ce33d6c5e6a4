//! Fixed-point time-credit amounts.
//!
//! Credits are stored as whole hundredths ("centicredits") in a u64 so
//! balance math stays exact. 1.50 credits == `Credits::from_centis(150)`.
use std::fmt;

pub const CENTIS_PER_CREDIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Credits(u64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_centis(centis: u64) -> Self {
        Self(centis)
    }
    pub const fn from_whole(credits: u64) -> Self {
        Self(credits * CENTIS_PER_CREDIT)
    }
    pub const fn centis(self) -> u64 {
        self.0
    }
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }
    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }
}

/// Escrow amount for a session: `hourly_rate * minutes / 60`, exact in u128.
/// A zero rate falls back to one credit per hour so free-listed offers still
/// move time at a 1:1 ratio.
pub fn session_amount(hourly_rate: Credits, duration_minutes: u32) -> Option<Credits> {
    let rate = if hourly_rate.is_zero() {
        Credits::from_whole(1)
    } else {
        hourly_rate
    };
    let centis = (rate.0 as u128)
        .checked_mul(duration_minutes as u128)?
        .checked_div(60)?;
    u64::try_from(centis).ok().map(Credits)
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / CENTIS_PER_CREDIT,
            self.0 % CENTIS_PER_CREDIT
        )
    }
}

impl<C> minicbor::Encode<C> for Credits {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Credits {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Credits(d.u64()?))
    }
}
