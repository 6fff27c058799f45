use serde::{Deserialize, Serialize};

use chronicle_core::AggregateKey;
use chronicle_events::DomainEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCreated {
    pub customer: String,
}

impl DomainEvent for SaleCreated {
    const EVENT_TYPE: &'static str = "Sale.Created";
    const DOMAIN: &'static str = "sales";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub sku: String,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: i64,
}

impl DomainEvent for LineAdded {
    const EVENT_TYPE: &'static str = "Sale.LineAdded";
    const DOMAIN: &'static str = "sales";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCancelled {
    #[serde(default)]
    pub reason: Option<String>,
}

impl DomainEvent for SaleCancelled {
    const EVENT_TYPE: &'static str = "Sale.Cancelled";
    const DOMAIN: &'static str = "sales";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOpened {
    pub owner: String,
}

impl DomainEvent for WalletOpened {
    const EVENT_TYPE: &'static str = "Wallet.Opened";
    const DOMAIN: &'static str = "wallet";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDeposited {
    pub amount: i64,
}

impl DomainEvent for WalletDeposited {
    const EVENT_TYPE: &'static str = "Wallet.Deposited";
    const DOMAIN: &'static str = "wallet";
}

/// A wallet paying (part of) a sale.
///
/// The event's own uuid identifies the transaction; the sale and the wallet
/// it settles are found through the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub sale_uuid: String,
    pub wallet_uuid: String,
    pub amount: i64,
}

impl DomainEvent for Payment {
    const EVENT_TYPE: &'static str = "Tx.Payment";
    const DOMAIN: &'static str = "tx";

    fn aggregate_key(&self, domain: &str) -> Option<AggregateKey> {
        let key = match domain {
            "sales" => &self.sale_uuid,
            "wallet" => &self.wallet_uuid,
            _ => return None,
        };
        AggregateKey::new(key.clone()).ok()
    }
}
