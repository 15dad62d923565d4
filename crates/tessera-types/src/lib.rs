//! # tessera-types
//!
//! Shared domain types used across the Tessera workspace: identifiers, escrow
//! parameters and time windows, orders and fills, sponsored transactions and
//! coordinator events.
//!
//! ## Modules
//!
//! - [`ids`] — 32-byte identifiers (addresses, escrow/order/fill ids) and chain ids
//! - [`escrow`] — Escrow parameters, time windows, phases and read-only views
//! - [`sponsored`] — Gasless escrow-creation transactions co-signed by maker and sponsor
//! - [`order`] — Orders, order intents, fills and deployments
//! - [`events`] — Coordinator events and subscription filters

pub mod escrow;
pub mod events;
pub mod ids;
pub mod order;
pub mod sponsored;

pub use ids::{Address, AssetId, ChainId, EscrowId, FillId, OrderId};
pub use tessera_crypto::Hash;

/// Token amounts in the smallest unit of the asset.
pub type Amount = u128;

/// Unix time in seconds.
pub type Timestamp = u64;

/// Maximum number of parts an order (and its source escrow) may be split into.
pub const MAX_PARTS: u32 = 20;

/// Cumulative amount unlocked by the secret at `index` (1-based).
///
/// Indices `1..=num_parts` unlock `index * part_size`; the completion index
/// `num_parts + 1` unlocks the whole amount. Any other index, a zero part
/// count, or a total not divisible by the part count yields `None`.
pub fn max_cumulative_fill(total: Amount, num_parts: u32, index: u32) -> Option<Amount> {
    if num_parts == 0 || total % Amount::from(num_parts) != 0 {
        return None;
    }
    let part_size = total / Amount::from(num_parts);
    match index {
        0 => None,
        i if i <= num_parts => part_size.checked_mul(Amount::from(i)),
        i if i == num_parts + 1 => Some(total),
        _ => None,
    }
}

/// `amount * part / whole`, rounding down. `None` on overflow or zero `whole`.
pub fn pro_rata(amount: Amount, part: Amount, whole: Amount) -> Option<Amount> {
    if whole == 0 {
        return None;
    }
    amount.checked_mul(part).map(|scaled| scaled / whole)
}

/// Errors raised while parsing or validating shared types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, TypesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_cumulative_fill() {
        let total = 1_000_000;
        assert_eq!(max_cumulative_fill(total, 10, 1), Some(100_000));
        assert_eq!(max_cumulative_fill(total, 10, 5), Some(500_000));
        assert_eq!(max_cumulative_fill(total, 10, 10), Some(total));
        assert_eq!(max_cumulative_fill(total, 10, 11), Some(total));
        assert_eq!(max_cumulative_fill(total, 10, 0), None);
        assert_eq!(max_cumulative_fill(total, 10, 12), None);
        assert_eq!(max_cumulative_fill(total, 0, 1), None);
        assert_eq!(max_cumulative_fill(1_000_001, 10, 1), None);
    }

    #[test]
    fn test_pro_rata() {
        assert_eq!(pro_rata(2_000, 250, 1_000), Some(500));
        assert_eq!(pro_rata(10, 1, 3), Some(3));
        assert_eq!(pro_rata(10, 1, 0), None);
        assert_eq!(pro_rata(u128::MAX, 2, 3), None);
    }
}
