use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::model::TradePlan;

pub type TicketId = String;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("submission timed out")]
    Timeout,
}

/// Broker execution boundary. Treated as at-most-once: the evaluator must
/// not resubmit a plan whose outcome is unknown without an idempotency
/// check first.
#[async_trait]
pub trait BrokerExecutor: Send + Sync {
    async fn submit_order(&self, plan: &TradePlan) -> Result<TicketId, BrokerError>;
}

/// Paper broker: accepts everything and fabricates a ticket. Used for dry
/// runs and local development; live brokers plug in behind the same trait.
pub struct PaperBroker;

#[async_trait]
impl BrokerExecutor for PaperBroker {
    async fn submit_order(&self, plan: &TradePlan) -> Result<TicketId, BrokerError> {
        let ticket = format!("paper-{}", plan.plan_id);
        info!(plan_id = %plan.plan_id, symbol = %plan.symbol, ticket = %ticket,
              "📄 Paper fill");
        Ok(ticket)
    }
}
