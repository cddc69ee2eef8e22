//! Token price bounds and fallbacks
//!
//! Oracle reads outside these ranges are treated as bad data, never as market moves.

use serde::{Deserialize, Serialize};

use crate::{TokenSymbol, ValidationError};

/// Inclusive plausible USD range for a token
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check a fetched value, returning it unchanged when plausible
    pub fn validate(&self, token: TokenSymbol, value: f64) -> Result<f64, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite { token });
        }
        if !self.contains(value) {
            return Err(ValidationError::OutOfRange {
                token,
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }
}

pub const ETH_RANGE: PriceRange = PriceRange::new(500.0, 10_000.0);
pub const MATIC_RANGE: PriceRange = PriceRange::new(0.05, 5.0);

pub const ETH_FALLBACK_USD: f64 = 2500.0;
pub const MATIC_FALLBACK_USD: f64 = 0.85;

/// Default plausible range for a token
pub fn plausible_range(token: TokenSymbol) -> PriceRange {
    match token {
        TokenSymbol::Eth => ETH_RANGE,
        TokenSymbol::Matic => MATIC_RANGE,
    }
}

/// Static price used when the first fetch for a token fails
pub fn fallback_price(token: TokenSymbol) -> f64 {
    match token {
        TokenSymbol::Eth => ETH_FALLBACK_USD,
        TokenSymbol::Matic => MATIC_FALLBACK_USD,
    }
}
