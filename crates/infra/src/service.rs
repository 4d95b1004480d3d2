//! The transition service: application-level orchestration of the order
//! lifecycle.
//!
//! Every public method is one member of the single operation family
//! "transition order to status X with payload Y". A transition executes as
//! one atomic unit: load + rehydrate the order, decide events, apply ledger
//! movements, append to the store, publish. Concurrent transitions on the
//! same order are serialized by a per-order lock, backed by the store's
//! optimistic version check.
//!
//! Ledger movements that were applied before a later step fails are
//! compensated in reverse order, so a failed transition leaves no partial
//! trace and callers may safely resubmit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use kontor_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, FundingAccountId, SupplierId, UserId,
};
use kontor_events::{EventBus, EventEnvelope};
use kontor_finance::{
    CurrencyCode, FundingAccounts, FundingError, LedgerError, RateRegistry, SupplierCreditLedger,
};
use kontor_procurement::{
    AdvanceStatus, CompleteOrder, ConfirmPayment, CreateOrder, CreditNoteId, DeleteOrder,
    LineReceipt, LineSpec, MarkLost, OrderCommand, OrderEvent, OrderNumber, PurchaseOrder,
    PurchaseOrderId, ReceiptOutcome, RecordArrival, RecordDestinationShipment, RecordDispatch,
    ReplaceLines, Revalue, StartHubTransit,
};

use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};

const AGGREGATE_TYPE: &str = "procurement.order";

/// Lead time assumed when payment confirmation carries no expected
/// delivery date.
const DEFAULT_DELIVERY_LEAD_DAYS: i64 = 30;

/// Transition failure taxonomy.
///
/// Validation and invariant errors are rejected before any side effect;
/// ledger/funding/store failures abort the transition with full
/// compensation of anything already applied.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("order not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no exchange rate registered for currency {0}")]
    UnknownCurrency(CurrencyCode),

    #[error("supplier credit ledger rejected the operation: {0}")]
    Ledger(#[from] LedgerError),

    #[error("funding account rejected the operation: {0}")]
    Funding(#[from] FundingError),

    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),

    #[error("event publication failed after commit: {0}")]
    Publish(String),

    #[error("failed to decode stored events: {0}")]
    Deserialize(String),
}

impl From<DomainError> for TransitionError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => TransitionError::Validation(msg),
            DomainError::InvariantViolation(msg) => TransitionError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => TransitionError::Validation(msg),
            DomainError::NotFound => TransitionError::NotFound,
            DomainError::Conflict(msg) => TransitionError::Conflict(msg),
        }
    }
}

/// Result of a successful transition: the updated order plus a
/// human-readable summary of the derived values, for audit purposes.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: PurchaseOrder,
    pub summary: String,
}

/// Payload for order creation. Without an explicit exchange rate the order
/// inherits the registry's current rate for its currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub currency: CurrencyCode,
    pub exchange_rate: Option<Decimal>,
    pub lines: Vec<LineSpec>,
    pub created_by: UserId,
}

/// Payload for payment confirmation. The supplier credit balance snapshot
/// and the order number are injected by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: PurchaseOrderId,
    pub funding_account_id: FundingAccountId,
    pub new_exchange_rate: Option<Decimal>,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub actor: UserId,
    pub comment: Option<String>,
}

/// Payload for receipt reconciliation. The credit note identifier is
/// injected by the service and consumed only when a refund is due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReceiptRequest {
    pub order_id: PurchaseOrderId,
    pub receipts: Vec<LineReceipt>,
    pub outcome: ReceiptOutcome,
    pub actor: UserId,
    pub comment: Option<String>,
}

/// A ledger movement planned for the current transition. Applied in order,
/// compensated in reverse order on a later failure.
#[derive(Debug, Clone)]
enum LedgerOp {
    SupplierDebit {
        supplier: SupplierId,
        amount: Decimal,
        memo: String,
    },
    SupplierCredit {
        supplier: SupplierId,
        amount: Decimal,
        memo: String,
    },
    FundingDebit {
        account: FundingAccountId,
        amount: Decimal,
    },
}

/// Orchestrates order transitions against the store, bus, and the three
/// financial collaborators.
pub struct ProcurementService<S, B> {
    store: S,
    bus: B,
    supplier_credit: Arc<dyn SupplierCreditLedger>,
    funding: Arc<dyn FundingAccounts>,
    rates: Arc<dyn RateRegistry>,
    locks: Mutex<HashMap<PurchaseOrderId, Arc<Mutex<()>>>>,
    order_sequence: AtomicU64,
}

impl<S, B> ProcurementService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        supplier_credit: Arc<dyn SupplierCreditLedger>,
        funding: Arc<dyn FundingAccounts>,
        rates: Arc<dyn RateRegistry>,
    ) -> Self {
        Self {
            store,
            bus,
            supplier_credit,
            funding,
            rates,
            locks: Mutex::new(HashMap::new()),
            order_sequence: AtomicU64::new(0),
        }
    }

    // -- operation family: transition order to status X with payload Y ----

    pub fn create_order(&self, req: CreateOrderRequest) -> Result<TransitionOutcome, TransitionError> {
        let exchange_rate = match req.exchange_rate {
            Some(rate) => rate,
            None => self
                .rates
                .rate(&req.currency)
                .ok_or_else(|| TransitionError::UnknownCurrency(req.currency.clone()))?,
        };

        self.run_transition(req.order_id, |_| {
            Ok(OrderCommand::CreateOrder(CreateOrder {
                order_id: req.order_id,
                supplier_id: req.supplier_id,
                currency: req.currency.clone(),
                exchange_rate,
                lines: req.lines.clone(),
                created_by: req.created_by,
                occurred_at: Utc::now(),
            }))
        })
    }

    pub fn replace_lines(&self, cmd: ReplaceLines) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::ReplaceLines(cmd.clone())))
    }

    pub fn delete_order(&self, cmd: DeleteOrder) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::DeleteOrder(cmd.clone())))
    }

    pub fn revalue(&self, cmd: Revalue) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::Revalue(cmd.clone())))
    }

    pub fn confirm_payment(
        &self,
        req: ConfirmPaymentRequest,
    ) -> Result<TransitionOutcome, TransitionError> {
        // Reject an unknown funding account before any side effect runs.
        self.funding
            .balance(req.funding_account_id)
            .map_err(|err| match err {
                FundingError::UnknownAccount(id) => {
                    TransitionError::Validation(format!("unknown funding account {id}"))
                }
                other => other.into(),
            })?;

        self.run_transition(req.order_id, |order| {
            let supplier = order
                .supplier_id()
                .ok_or(TransitionError::NotFound)?;
            let supplier_credit_balance = self.supplier_credit.balance(supplier);
            let order_number = order
                .order_number()
                .cloned()
                .unwrap_or_else(|| self.next_order_number());

            Ok(OrderCommand::ConfirmPayment(ConfirmPayment {
                order_id: req.order_id,
                funding_account_id: req.funding_account_id,
                supplier_credit_balance,
                order_number,
                new_exchange_rate: req.new_exchange_rate,
                expected_delivery_date: Some(req.expected_delivery_date.unwrap_or_else(|| {
                    Utc::now() + chrono::Duration::days(DEFAULT_DELIVERY_LEAD_DAYS)
                })),
                actor: req.actor,
                comment: req.comment.clone(),
                occurred_at: Utc::now(),
            }))
        })
    }

    pub fn record_dispatch(&self, cmd: RecordDispatch) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::RecordDispatch(cmd.clone())))
    }

    pub fn advance_status(&self, cmd: AdvanceStatus) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::AdvanceStatus(cmd.clone())))
    }

    pub fn record_destination_shipment(
        &self,
        cmd: RecordDestinationShipment,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| {
            Ok(OrderCommand::RecordDestinationShipment(cmd.clone()))
        })
    }

    pub fn record_arrival(&self, cmd: RecordArrival) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::RecordArrival(cmd.clone())))
    }

    pub fn start_hub_transit(
        &self,
        cmd: StartHubTransit,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::StartHubTransit(cmd.clone())))
    }

    pub fn report_receipt(
        &self,
        req: ReportReceiptRequest,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(req.order_id, |_| {
            Ok(OrderCommand::ReportReceipt(kontor_procurement::ReportReceipt {
                order_id: req.order_id,
                receipts: req.receipts.clone(),
                outcome: req.outcome,
                credit_note_id: CreditNoteId::new(),
                actor: req.actor,
                comment: req.comment.clone(),
                occurred_at: Utc::now(),
            }))
        })
    }

    pub fn complete(&self, cmd: CompleteOrder) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::CompleteOrder(cmd.clone())))
    }

    pub fn mark_lost(&self, cmd: MarkLost) -> Result<TransitionOutcome, TransitionError> {
        self.run_transition(cmd.order_id, |_| Ok(OrderCommand::MarkLost(cmd.clone())))
    }

    /// Current state of an order, rehydrated from its stream.
    pub fn load_order(&self, order_id: PurchaseOrderId) -> Result<PurchaseOrder, TransitionError> {
        let (order, version) = self.rehydrate(order_id)?;
        if version == 0 || order.is_deleted() {
            return Err(TransitionError::NotFound);
        }
        Ok(order)
    }

    // -- pipeline ---------------------------------------------------------

    fn run_transition<F>(
        &self,
        order_id: PurchaseOrderId,
        build: F,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        F: FnOnce(&PurchaseOrder) -> Result<OrderCommand, TransitionError>,
    {
        let lock = self.order_lock(order_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| TransitionError::Conflict("order lock poisoned".to_string()))?;

        // 1) Load + rehydrate under the order lock.
        let (mut order, version) = self.rehydrate(order_id)?;

        // 2) Decide events (pure).
        let command = build(&order)?;
        let events = order.handle(&command)?;
        if events.is_empty() {
            return Ok(TransitionOutcome {
                summary: "no change".to_string(),
                order,
            });
        }

        // 3) Apply ledger movements, compensating on partial failure.
        let effects = self.plan_effects(&order, &events)?;
        self.apply_effects(&effects)?;

        // 4) Append. The order lock makes a concurrency conflict here
        //    unexpected; if the store still rejects, undo the ledger
        //    movements so nothing of the transition survives.
        let uncommitted = events
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(order_id.0, AGGREGATE_TYPE, Uuid::now_v7(), event)
            })
            .collect::<Result<Vec<_>, _>>();
        let uncommitted = match uncommitted {
            Ok(u) => u,
            Err(err) => {
                self.revert_effects(&effects);
                return Err(err.into());
            }
        };
        let committed = match self
            .store
            .append(uncommitted, ExpectedVersion::Exact(version))
        {
            Ok(c) => c,
            Err(err) => {
                self.revert_effects(&effects);
                return Err(err.into());
            }
        };

        // 5) Evolve state, run post-commit side-calls, publish.
        for event in &events {
            order.apply(event);
        }
        self.post_commit(&order, &events);

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| TransitionError::Publish(format!("{e:?}")))?;
        }

        let summary = summarize(&order, &events);
        tracing::info!(
            order_id = %order_id,
            status = %order.status(),
            version = order.version(),
            "transition applied: {summary}"
        );

        Ok(TransitionOutcome { order, summary })
    }

    fn order_lock(&self, order_id: PurchaseOrderId) -> Result<Arc<Mutex<()>>, TransitionError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| TransitionError::Conflict("lock table poisoned".to_string()))?;
        Ok(locks.entry(order_id).or_default().clone())
    }

    fn rehydrate(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<(PurchaseOrder, u64), TransitionError> {
        let mut stream = self.store.load_stream(order_id.0)?;
        stream.sort_by_key(|e| e.sequence_number);
        let version = stream.last().map(|e| e.sequence_number).unwrap_or(0);

        let mut order = PurchaseOrder::empty(order_id);
        for stored in &stream {
            let event: OrderEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| TransitionError::Deserialize(e.to_string()))?;
            order.apply(&event);
        }

        Ok((order, version))
    }

    fn next_order_number(&self) -> OrderNumber {
        let n = self.order_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        OrderNumber::generate(n)
    }

    // -- ledger effects ---------------------------------------------------

    fn plan_effects(
        &self,
        order: &PurchaseOrder,
        events: &[OrderEvent],
    ) -> Result<Vec<LedgerOp>, TransitionError> {
        let mut effects = Vec::new();

        for event in events {
            match event {
                OrderEvent::PaymentConfirmed(e) => {
                    let supplier = order.supplier_id().ok_or_else(|| {
                        TransitionError::InvariantViolation("order has no supplier".to_string())
                    })?;
                    if e.from_supplier_credit > Decimal::ZERO {
                        effects.push(LedgerOp::SupplierDebit {
                            supplier,
                            amount: e.from_supplier_credit,
                            memo: format!("payment for order {}", e.order_number),
                        });
                    }
                    if e.from_funding_account > Decimal::ZERO {
                        effects.push(LedgerOp::FundingDebit {
                            account: e.funding_account_id,
                            amount: e.from_funding_account,
                        });
                    }
                }
                OrderEvent::RefundCredited(e) => {
                    let supplier = order.supplier_id().ok_or_else(|| {
                        TransitionError::InvariantViolation("order has no supplier".to_string())
                    })?;
                    let reference = order
                        .order_number()
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| order.id_typed().to_string());
                    effects.push(LedgerOp::SupplierCredit {
                        supplier,
                        amount: e.amount,
                        memo: format!(
                            "shortage refund for order {reference}, credit note {}",
                            e.credit_note_id
                        ),
                    });
                }
                _ => {}
            }
        }

        Ok(effects)
    }

    fn apply_effects(&self, effects: &[LedgerOp]) -> Result<(), TransitionError> {
        for (idx, op) in effects.iter().enumerate() {
            if let Err(err) = self.apply_effect(op) {
                // Compensate whatever already went through, newest first.
                for done in effects[..idx].iter().rev() {
                    self.revert_effect(done);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_effect(&self, op: &LedgerOp) -> Result<(), TransitionError> {
        match op {
            LedgerOp::SupplierDebit {
                supplier,
                amount,
                memo,
            } => self.supplier_credit.debit(*supplier, *amount, memo)?,
            LedgerOp::SupplierCredit {
                supplier,
                amount,
                memo,
            } => self.supplier_credit.credit(*supplier, *amount, memo)?,
            LedgerOp::FundingDebit { account, amount } => {
                self.funding.debit(*account, *amount)?
            }
        }
        Ok(())
    }

    fn revert_effects(&self, effects: &[LedgerOp]) {
        for op in effects.iter().rev() {
            self.revert_effect(op);
        }
    }

    fn revert_effect(&self, op: &LedgerOp) {
        let result: Result<(), TransitionError> = match op {
            LedgerOp::SupplierDebit {
                supplier,
                amount,
                memo,
            } => self
                .supplier_credit
                .credit(*supplier, *amount, &format!("reversal: {memo}"))
                .map_err(Into::into),
            LedgerOp::SupplierCredit {
                supplier,
                amount,
                memo,
            } => self
                .supplier_credit
                .debit(*supplier, *amount, &format!("reversal: {memo}"))
                .map_err(Into::into),
            LedgerOp::FundingDebit { account, amount } => {
                self.funding.credit(*account, *amount).map_err(Into::into)
            }
        };

        if let Err(err) = result {
            tracing::error!(?op, ?err, "failed to compensate ledger movement");
        }
    }

    // -- post-commit side-calls ------------------------------------------

    fn post_commit(&self, order: &PurchaseOrder, events: &[OrderEvent]) {
        for event in events {
            match event {
                OrderEvent::CurrencyRevalued(e) => {
                    // Deliberate global effect: subsequent orders in this
                    // currency inherit the new rate. Explicit and logged.
                    if let Some(currency) = order.currency() {
                        self.rates.set_rate(currency.clone(), e.exchange_rate);
                        tracing::info!(
                            order_id = %order.id_typed(),
                            currency = %currency,
                            rate = %e.exchange_rate,
                            "shared exchange rate updated"
                        );
                    }
                }
                OrderEvent::RefundCredited(e) => {
                    tracing::info!(
                        order_id = %order.id_typed(),
                        amount = %e.amount,
                        credit_note = %e.credit_note_id,
                        "supplier refund credited"
                    );
                }
                OrderEvent::ReceiptReconciled(_) => {
                    for line in order.lines() {
                        if line
                            .received_quantity
                            .is_some_and(|received| received > line.ordered_quantity)
                        {
                            tracing::warn!(
                                order_id = %order.id_typed(),
                                line_no = line.line_no,
                                ordered = line.ordered_quantity,
                                received = line.received_quantity.unwrap_or(0),
                                "over-receipt recorded"
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn summarize(order: &PurchaseOrder, events: &[OrderEvent]) -> String {
    let parts: Vec<String> = events
        .iter()
        .map(|event| match event {
            OrderEvent::OrderCreated(e) => format!(
                "order created: {} lines, total {} {}",
                e.lines.len(),
                order.total_amount(),
                e.currency
            ),
            OrderEvent::LinesReplaced(e) => format!(
                "lines replaced: {} lines, total {}",
                e.lines.len(),
                order.total_amount()
            ),
            OrderEvent::OrderDeleted(_) => "draft order deleted".to_string(),
            OrderEvent::CurrencyRevalued(e) => {
                format!("revalued at exchange rate {}", e.exchange_rate)
            }
            OrderEvent::PaymentConfirmed(e) => format!(
                "payment of {} allocated ({} from supplier credit, {} from funding account) as {}",
                e.amount_home, e.from_supplier_credit, e.from_funding_account, e.order_number
            ),
            OrderEvent::SupplierDispatched(e) => format!(
                "dispatched via {} ({})",
                e.courier_name, e.tracking_number
            ),
            OrderEvent::StatusAdvanced(e) => format!("status advanced to {}", e.to),
            OrderEvent::DestinationShipped(e) => format!("shipped under lot {}", e.lot_number),
            OrderEvent::DestinationArrived(e) => format!(
                "freight apportioned: {} kg at {}/kg = {}",
                order.total_weight_kg(),
                e.shipping_rate_per_kg,
                order.total_shipping_cost()
            ),
            OrderEvent::HubTransitStarted(e) => {
                format!("hub transit started ({})", e.hub_tracking_number)
            }
            OrderEvent::ReceiptReconciled(e) => format!(
                "receipt reconciled to {}: {} kg, shipping {}",
                e.outcome.status(),
                order.total_weight_kg(),
                order.total_shipping_cost()
            ),
            OrderEvent::RefundCredited(e) => format!(
                "refund {} credited to supplier (credit note {})",
                e.amount, e.credit_note_id
            ),
            OrderEvent::OrderCompleted(e) => format!(
                "completed: {} lines handed to stocking",
                e.stocked.len()
            ),
            OrderEvent::OrderLost(e) => format!(
                "marked lost: {} redistributed across surviving lines",
                e.total_lost_value
            ),
        })
        .collect();

    parts.join("; ")
}
