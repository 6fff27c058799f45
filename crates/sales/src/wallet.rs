use serde::{Deserialize, Serialize};

use chronicle_core::{Aggregate, AggregateKey, AggregateState, ValidationErrors};
use chronicle_events::{Event, EventHandlers, HandlerError, HandlerTable};

use crate::events::{Payment, WalletDeposited, WalletOpened};

/// Aggregate: Wallet. Listens to `wallet` (home) and `tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    state: AggregateState,
    owner: String,
    balance: i64,
}

impl Wallet {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Balance in cents. Handlers may drive it negative; such a wallet is
    /// rejected at save.
    pub fn balance(&self) -> i64 {
        self.balance
    }
}

impl Aggregate for Wallet {
    const TYPE_NAME: &'static str = "Wallet";
    const LISTEN_DOMAINS: &'static [&'static str] = &["wallet", "tx"];

    fn seeded(key: AggregateKey) -> Self {
        Self {
            state: AggregateState::seeded(key),
            owner: String::new(),
            balance: 0,
        }
    }

    fn state(&self) -> &AggregateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState {
        &mut self.state
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.balance < 0 {
            errors.add("balance", "must be greater than or equal to 0");
        }
        errors.into_result()
    }
}

impl EventHandlers for Wallet {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::<Self>::new()
            .on("Wallet.Opened", |wallet, event| {
                let e: WalletOpened = event.payload_as()?;
                wallet.owner = e.owner;
                Ok(())
            })
            .on("Wallet.Deposited", |wallet, event| {
                let e: WalletDeposited = event.payload_as()?;
                wallet.balance = wallet.balance.saturating_add(e.amount);
                Ok(())
            })
            .on("Tx.Payment", on_payment)
    }
}

fn on_payment(wallet: &mut Wallet, event: &Event) -> Result<(), HandlerError> {
    let e: Payment = event.payload_as()?;
    wallet.balance = wallet.balance.saturating_sub(e.amount);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chronicle_core::EventId;
    use chronicle_events::{DomainEvent, PendingEvent};
    use proptest::prelude::*;

    fn event<E: DomainEvent>(id: u64, payload: &E) -> Event {
        PendingEvent {
            domain: E::DOMAIN.to_string(),
            event_type: E::EVENT_TYPE.to_string(),
            uuid: AggregateKey::new("wallet-1").unwrap(),
            payload: serde_json::to_value(payload).unwrap(),
            created_at: Utc::now(),
        }
        .into_event(EventId::new(id))
    }

    fn run(wallet: &mut Wallet, event: &Event) {
        let handler = Wallet::handlers().lookup(&event.event_type).unwrap();
        handler(wallet, event).unwrap();
    }

    #[test]
    fn overdrawn_wallets_fail_validation() {
        let mut wallet = Wallet::seeded(AggregateKey::new("wallet-1").unwrap());
        run(&mut wallet, &event(1, &WalletOpened { owner: "ada".into() }));
        run(&mut wallet, &event(2, &WalletDeposited { amount: 100 }));
        run(
            &mut wallet,
            &event(3, &Payment { sale_uuid: "s".into(), wallet_uuid: "wallet-1".into(), amount: 150 }),
        );

        assert_eq!(wallet.balance(), -50);
        let errors = wallet.validate().unwrap_err();
        assert_eq!(errors.errors()[0].field, "balance");
    }

    #[test]
    fn wallets_ignore_sale_events() {
        assert!(!Wallet::handlers().handles("Sale.Created"));
        assert!(Wallet::handlers().handles("Tx.Payment"));
    }

    proptest! {
        /// Property: a wallet validates iff deposits cover payments.
        #[test]
        fn validation_tracks_the_sign_of_the_balance(
            deposits in prop::collection::vec(0i64..1_000, 0..10),
            payments in prop::collection::vec(0i64..1_000, 0..10),
        ) {
            let mut wallet = Wallet::seeded(AggregateKey::new("wallet-1").unwrap());
            let mut id = 0;
            for amount in &deposits {
                id += 1;
                run(&mut wallet, &event(id, &WalletDeposited { amount: *amount }));
            }
            for amount in &payments {
                id += 1;
                let p = Payment { sale_uuid: "s".into(), wallet_uuid: "wallet-1".into(), amount: *amount };
                run(&mut wallet, &event(id, &p));
            }

            let balance: i64 = deposits.iter().sum::<i64>() - payments.iter().sum::<i64>();
            prop_assert_eq!(wallet.balance(), balance);
            prop_assert_eq!(wallet.validate().is_ok(), balance >= 0);
        }
    }
}
