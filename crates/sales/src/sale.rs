use serde::{Deserialize, Serialize};

use chronicle_core::{Aggregate, AggregateKey, AggregateState, ValidationErrors};
use chronicle_events::{Event, EventHandlers, HandlerError, HandlerTable};

use crate::events::{LineAdded, Payment, SaleCancelled, SaleCreated};

/// Sale status lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    #[default]
    Open,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: i64,
}

impl SaleLine {
    pub fn amount(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

/// Aggregate: Sale, keyed by the uuid of its `Sale.Created` event.
///
/// Listens to `sales` (home) and `tx`, where payments are keyed by
/// `sale_uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    state: AggregateState,
    customer: String,
    status: SaleStatus,
    lines: Vec<SaleLine>,
    total: i64,
    paid: i64,
}

impl Sale {
    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn lines(&self) -> &[SaleLine] {
        &self.lines
    }

    /// Sum of line amounts, in cents.
    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn paid(&self) -> i64 {
        self.paid
    }

    pub fn outstanding(&self) -> i64 {
        self.total - self.paid
    }
}

impl Aggregate for Sale {
    const TYPE_NAME: &'static str = "Sale";
    const LISTEN_DOMAINS: &'static [&'static str] = &["sales", "tx"];

    fn seeded(key: AggregateKey) -> Self {
        Self {
            state: AggregateState::seeded(key),
            customer: String::new(),
            status: SaleStatus::Open,
            lines: Vec::new(),
            total: 0,
            paid: 0,
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
        if self.customer.trim().is_empty() {
            errors.add("customer", "can't be blank");
        }
        if self.status == SaleStatus::Cancelled && self.paid > 0 {
            errors.add("status", "can't cancel a sale with payments");
        }
        errors.into_result()
    }
}

impl EventHandlers for Sale {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::<Self>::new()
            .on("Sale.Created", on_created)
            .on("Sale.LineAdded", on_line_added)
            .on("Sale.Cancelled", on_cancelled)
            .on("Tx.Payment", on_payment)
    }
}

fn on_created(sale: &mut Sale, event: &Event) -> Result<(), HandlerError> {
    let e: SaleCreated = event.payload_as()?;
    sale.customer = e.customer;
    Ok(())
}

fn on_line_added(sale: &mut Sale, event: &Event) -> Result<(), HandlerError> {
    let e: LineAdded = event.payload_as()?;
    let line = SaleLine {
        sku: e.sku,
        quantity: e.quantity,
        unit_price: e.unit_price,
    };
    sale.total = sale.total.saturating_add(line.amount());
    sale.lines.push(line);
    Ok(())
}

fn on_cancelled(sale: &mut Sale, event: &Event) -> Result<(), HandlerError> {
    let _: SaleCancelled = event.payload_as()?;
    sale.status = SaleStatus::Cancelled;
    Ok(())
}

fn on_payment(sale: &mut Sale, event: &Event) -> Result<(), HandlerError> {
    let e: Payment = event.payload_as()?;
    sale.paid = sale.paid.saturating_add(e.amount);
    if sale.status == SaleStatus::Open && sale.total > 0 && sale.paid >= sale.total {
        sale.status = SaleStatus::Paid;
    }
    Ok(())
}
