//! Sales and wallet domain module (event-applied).
//!
//! Business rules only: handlers mutate aggregates from events, validation
//! runs when the projector saves them. No IO.
//!
//! `Tx.Payment` lives in the `tx` domain and touches both a sale and a
//! wallet; [`key_routes`] tells the resolver which key each side uses.

pub mod events;
pub mod sale;
pub mod wallet;

use chronicle_events::KeyRoutes;

pub use events::{LineAdded, Payment, SaleCancelled, SaleCreated, WalletDeposited, WalletOpened};
pub use sale::{Sale, SaleLine, SaleStatus};
pub use wallet::Wallet;

/// Key routes for events that update aggregates keyed by a payload field.
pub fn key_routes() -> KeyRoutes {
    KeyRoutes::new().register::<Payment>()
}
