//! Fixed-precision decimal helpers.
//!
//! Money math never touches floating point (SPEC_FULL.md §9). Digests are
//! computed over a canonical 8-fractional-digit string so they stay portable
//! across implementations that might reconstruct the chain independently.

use rust_decimal::Decimal;

pub const DIGEST_SCALE: u32 = 8;

/// Canonical decimal string used inside the ledger digest payload.
pub fn canonical(amount: Decimal) -> String {
    amount.round_dp(DIGEST_SCALE).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn canonical_is_stable_across_equivalent_scales() {
        let a = Decimal::from_str("1.50").unwrap();
        let b = Decimal::from_str("1.5000").unwrap();
        assert_eq!(canonical(a), canonical(b));
    }
}
