use serde::{Deserialize, Serialize};

/// A user's ledger columns. `hold_amount` tracks funds already debited from
/// `wallet` that are earmarked for unresolved bookings; it is a running
/// counter, not a second ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet: f64,
    pub hold_amount: f64,
}

impl Wallet {
    /// Booking creation requires strictly more than the fare.
    pub fn covers(&self, fare_amount: f64) -> bool {
        self.wallet > fare_amount
    }
}

/// The two mutable balance columns; keeps column names out of caller SQL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceField {
    Wallet,
    HoldAmount,
}

impl BalanceField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::HoldAmount => "hold_amount",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_must_exceed_fare() {
        let wallet = Wallet {
            wallet: 200.0,
            hold_amount: 0.0,
        };

        assert!(wallet.covers(199.99));
        assert!(!wallet.covers(200.0));
        assert!(!wallet.covers(250.0));
    }
}
