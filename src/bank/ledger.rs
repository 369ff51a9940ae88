use crate::common::{ProtocolError, TransferError};
use crate::network::{Amount, NodeId};
use crate::snapshot::EpochTable;

/// The only state shared between a branch's tasks. It always sits behind the
/// branch's balance lock, so a credit and its channel recording happen in one
/// step, and so do a local-state recording and the markers that follow it.
#[derive(Debug)]
pub struct Ledger {
    balance: i64,
    epochs: EpochTable,
}

impl Ledger {
    pub fn new(balance: i64) -> Self {
        Ledger {
            balance,
            epochs: EpochTable::default(),
        }
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn ensure_funds(&self, amount: Amount) -> Result<(), TransferError> {
        if amount == 0 {
            return Err(TransferError::InvalidAmount);
        }
        match i64::try_from(amount) {
            Ok(amount) if amount <= self.balance => Ok(()),
            _ => Err(TransferError::InsufficientFunds {
                requested: amount,
                available: self.balance,
            }),
        }
    }

    /// Only called after `ensure_funds` and a successful send, so `amount`
    /// fits in the balance.
    pub fn debit(&mut self, amount: Amount) {
        self.balance -= amount as i64;
    }

    /// Applies an incoming transfer and counts it toward any channel being
    /// recorded. An amount the balance cannot absorb is refused untouched.
    pub fn credit(&mut self, from: NodeId, amount: Amount) -> Result<(), ProtocolError> {
        self.balance = i64::try_from(amount)
            .ok()
            .and_then(|amount| self.balance.checked_add(amount))
            .ok_or(ProtocolError::AmountOutOfRange { from, amount })?;
        self.epochs.observe_transfer(from, amount);
        Ok(())
    }

    pub fn epochs(&self) -> &EpochTable {
        &self.epochs
    }

    pub fn epochs_mut(&mut self) -> &mut EpochTable {
        &mut self.epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ChannelRecord, Epoch};

    #[test]
    fn test_rejects_overdraft() {
        let ledger = Ledger::new(100);

        assert!(ledger.ensure_funds(100).is_ok());
        assert!(matches!(
            ledger.ensure_funds(101),
            Err(TransferError::InsufficientFunds { requested: 101, available: 100 })
        ));
        assert!(matches!(ledger.ensure_funds(0), Err(TransferError::InvalidAmount)));
    }

    #[test]
    fn test_amounts_beyond_i64_are_refused() {
        let mut ledger = Ledger::new(10);
        ledger.epochs_mut().begin(Epoch::initiate(0, 10, [1]));

        assert!(matches!(
            ledger.ensure_funds(u64::MAX),
            Err(TransferError::InsufficientFunds { available: 10, .. })
        ));
        assert!(ledger.ensure_funds(1 << 63).is_err());

        assert!(matches!(
            ledger.credit(1, u64::MAX),
            Err(ProtocolError::AmountOutOfRange { from: 1, .. })
        ));
        assert!(ledger.credit(1, i64::MAX as u64).is_err());
        assert_eq!(ledger.balance(), 10);
        let epoch = ledger.epochs().get(0).unwrap();
        assert_eq!(epoch.channel(1), Some(ChannelRecord::Recording(0)));
    }

    #[test]
    fn test_credit_feeds_recording_channels() {
        let mut ledger = Ledger::new(500);
        ledger.credit(1, 10).unwrap();

        let balance = ledger.balance();
        ledger.epochs_mut().begin(Epoch::initiate(0, balance, [1]));
        ledger.credit(1, 25).unwrap();
        ledger.debit(5);

        assert_eq!(ledger.balance(), 530);
        let epoch = ledger.epochs().get(0).unwrap();
        assert_eq!(epoch.local_balance, 510);
        assert_eq!(epoch.channel(1), Some(ChannelRecord::Recording(25)));
    }
}
