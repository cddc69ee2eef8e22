//! Price math for on-chain oracle reads

use alloy_primitives::{I256, U256};

/// Uniswap V3 `slot0` price field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
}

impl Slot0 {
    /// Raw price (token1 units per token0 unit) from sqrtPriceX96
    pub fn raw_price(&self) -> f64 {
        let sqrt_price = u256_to_f64(self.sqrt_price_x96);
        let q96: f64 = 2f64.powi(96);
        (sqrt_price / q96).powi(2)
    }

    /// Human price of token0 in token1, adjusted for decimals.
    /// With `invert`, returns token1 priced in token0 instead.
    pub fn price(&self, token0_decimals: u8, token1_decimals: u8, invert: bool) -> f64 {
        let raw = self.raw_price();
        if raw == 0.0 {
            return 0.0;
        }

        let scale = 10f64.powi(token0_decimals as i32 - token1_decimals as i32);
        let price = raw * scale;
        if invert {
            1.0 / price
        } else {
            price
        }
    }
}

/// Chainlink round answer scaled to a decimal price
pub fn scale_answer(answer: I256, decimals: u8) -> f64 {
    let (sign, abs) = answer.into_sign_and_abs();
    let raw = u256_to_f64(abs);
    let raw = if sign.is_negative() { -raw } else { raw };
    raw / 10f64.powi(decimals as i32)
}

/// Nearest f64, limb by limb from the most significant
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}
