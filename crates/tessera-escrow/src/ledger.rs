//! Token balances held outside escrows.

use std::collections::HashMap;

use tessera_types::{Address, Amount, AssetId};

use crate::{EscrowError, Result};

/// Free balances per `(owner, asset)`.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<(Address, AssetId), Amount>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, owner: &Address, asset: &AssetId) -> Amount {
        self.balances
            .get(&(*owner, asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn credit(&mut self, owner: Address, asset: AssetId, amount: Amount) {
        let entry = self.balances.entry((owner, asset)).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// # Errors
    ///
    /// - [`EscrowError::InsufficientFunds`] if the balance is too low; nothing changes
    pub fn debit(&mut self, owner: &Address, asset: &AssetId, amount: Amount) -> Result<()> {
        let available = self.balance_of(owner, asset);
        if available < amount {
            return Err(EscrowError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        self.balances
            .insert((*owner, asset.clone()), available - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_debit() {
        let mut ledger = Ledger::new();
        let alice = Address::new([1; 32]);
        let sui = AssetId::new("sui");

        ledger.credit(alice, sui.clone(), 100);
        ledger.debit(&alice, &sui, 40).expect("debit");
        assert_eq!(ledger.balance_of(&alice, &sui), 60);

        assert_eq!(
            ledger.debit(&alice, &sui, 61),
            Err(EscrowError::InsufficientFunds {
                needed: 61,
                available: 60
            })
        );
        assert_eq!(ledger.balance_of(&alice, &sui), 60);
        assert_eq!(ledger.balance_of(&alice, &AssetId::new("eth")), 0);
    }
}
