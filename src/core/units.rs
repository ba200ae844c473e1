//! Monetary and Size Units
//!
//! Satoshi amounts, mining fee rates, the coordination fee schedule,
//! and the virtual-size constants used for fee and budget accounting.

use serde::{Serialize, Deserialize};

/// Largest valid satoshi amount (21 million BTC).
pub const MAX_MONEY: u64 = 2_100_000_000_000_000;

/// Virtual size of a P2WPKH input, witness included.
pub const P2WPKH_INPUT_VSIZE: u64 = 68;

/// Virtual size of a taproot key-path input.
pub const P2TR_INPUT_VSIZE: u64 = 58;

/// Virtual size of a P2WPKH output.
pub const P2WPKH_OUTPUT_VSIZE: u64 = 31;

/// Virtual size of a taproot output.
pub const P2TR_OUTPUT_VSIZE: u64 = 43;

/// Fixed per-transaction overhead (version, locktime, counts, segwit marker).
pub const SHARED_OVERHEAD_VSIZE: u64 = 11;

/// Policy limit on standard transaction virtual size.
pub const MAX_STANDARD_TX_VSIZE: u64 = 100_000;

/// Outputs below this value are uneconomical to spend.
pub const DUST_THRESHOLD: Amount = Amount::from_sat(294);

// =============================================================================
// AMOUNT
// =============================================================================

/// A satoshi amount.
///
/// Plain `u64` newtype; arithmetic in protocol code goes through the
/// checked helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Zero satoshis.
    pub const ZERO: Amount = Amount(0);

    /// Create from a raw satoshi count.
    pub const fn from_sat(sat: u64) -> Self {
        Self(sat)
    }

    /// Raw satoshi count.
    pub const fn to_sat(self) -> u64 {
        self.0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

// =============================================================================
// FEE RATES
// =============================================================================

/// A mining fee rate in satoshis per 1000 virtual bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate {
    /// Satoshis per kilo-vbyte.
    pub sat_per_kvb: u64,
}

impl FeeRate {
    /// Create from satoshis per kilo-vbyte.
    pub const fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        Self { sat_per_kvb }
    }

    /// Create from whole satoshis per vbyte.
    pub const fn from_sat_per_vb(sat_per_vb: u64) -> Self {
        Self { sat_per_kvb: sat_per_vb * 1000 }
    }

    /// Mining fee for `vsize` virtual bytes, rounded up.
    pub fn fee(&self, vsize: u64) -> Amount {
        Amount::from_sat((self.sat_per_kvb * vsize).div_ceil(1000))
    }
}

/// The coordinator's fee schedule on registered input value.
///
/// Inputs at or below the plebs threshold are exempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationFeeRate {
    /// Fee in parts per million of input value.
    pub rate_ppm: u64,
    /// Inputs at or below this value pay no coordination fee.
    pub plebs_dont_pay_threshold: Amount,
}

impl CoordinationFeeRate {
    /// Create a fee schedule.
    pub const fn new(rate_ppm: u64, plebs_dont_pay_threshold: Amount) -> Self {
        Self { rate_ppm, plebs_dont_pay_threshold }
    }

    /// A zero-fee schedule.
    pub const fn zero() -> Self {
        Self { rate_ppm: 0, plebs_dont_pay_threshold: Amount::ZERO }
    }

    /// Coordination fee owed on an input of `value`, rounded down.
    pub fn fee(&self, value: Amount) -> Amount {
        if value <= self.plebs_dont_pay_threshold {
            return Amount::ZERO;
        }
        let fee = (value.to_sat() as u128 * self.rate_ppm as u128) / 1_000_000;
        Amount::from_sat(fee as u64)
    }
}

// =============================================================================
// TESTS
// =============================================================================
