//! Max-Suggested-Amount Ladder
//!
//! Chooses the advertised maximum input amount for each newly created
//! round. Most rounds advertise the full registrable maximum; periodically
//! a round is capped low so small-balance participants get a venue that
//! whales are steered away from, segregating the two over time.
//!
//! The ladder pairs a doubling divisor with a tenfold-growing amount:
//! `(2, base), (4, base*10), (8, base*100), …` up to the registrable
//! maximum. Each round creation advances a counter; the bucket with the
//! largest divisor dividing the counter wins, and counters no bucket
//! divides fall through to the maximum.

use crate::core::units::Amount;

/// Ladder provider for advertised maximum amounts.
#[derive(Clone, Debug)]
pub struct MaxSuggestedAmountProvider {
    /// `(divisor, amount)` pairs, increasing divisor.
    ladder: Vec<(u64, Amount)>,
    max_amount: Amount,
    counter: u64,
    force_max: bool,
}

impl MaxSuggestedAmountProvider {
    /// Build the ladder from a base amount up to the registrable maximum.
    pub fn new(base_amount: Amount, max_amount: Amount) -> Self {
        let mut ladder = Vec::new();
        let mut divisor: u64 = 2;
        let mut amount = base_amount;
        while amount < max_amount && amount > Amount::ZERO {
            ladder.push((divisor, amount));
            divisor = divisor.saturating_mul(2);
            amount = Amount::from_sat(amount.to_sat().saturating_mul(10));
        }
        Self { ladder, max_amount, counter: 0, force_max: false }
    }

    /// The amount to advertise for the next round. Advances the counter.
    pub fn next_max_suggested(&mut self) -> Amount {
        self.counter += 1;
        if self.force_max {
            self.force_max = false;
            return self.max_amount;
        }
        self.ladder.iter()
            .rev()
            .find(|(divisor, _)| self.counter % divisor == 0)
            .map(|(_, amount)| *amount)
            .unwrap_or(self.max_amount)
    }

    /// A round failed input registration outright: do not starve the
    /// network behind a low cap, advertise the maximum next.
    pub fn on_input_registration_failed(&mut self) {
        self.force_max = true;
    }

    /// Rounds created so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}
