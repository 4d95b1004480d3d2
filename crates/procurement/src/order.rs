//! The `PurchaseOrder` aggregate: lifecycle state machine, commands, events.
//!
//! Every transition is an event in the order's append-only stream; the
//! stream doubles as the status history. Costing algorithms run inside
//! `apply` so replay is deterministic; anything that needs external data
//! (ledger balances, assigned numbers) arrives on the command and is
//! recorded on the event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kontor_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, FundingAccountId, SupplierId, UserId,
};
use kontor_events::Event;
use kontor_finance::CurrencyCode;

use crate::allocation::split_payment;
use crate::costing::{apportion_freight, revalue_lines};
use crate::line::{LineSpec, OrderLine};
use crate::reconciliation::{
    LineLoss, LineReceipt, apply_receipts, reconcile, redistribute_loss, total_lost_value,
    validate_losses,
};

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-readable order number, assigned once at first payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn new(number: impl Into<String>) -> Result<Self, DomainError> {
        let number = number.into();
        if number.trim().is_empty() {
            return Err(DomainError::validation("order number must not be empty"));
        }
        Ok(Self(number))
    }

    /// Generate a number from the assignment sequence (`PO-000001`, …).
    pub fn generate(sequence: u64) -> Self {
        Self(format!("PO-{sequence:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credit note identifier, issued when a refund is auto-credited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditNoteId(Uuid);

impl CreditNoteId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CreditNoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CreditNoteId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    PaymentConfirmed,
    SupplierDispatched,
    WarehouseReceived,
    ShippedToDestination,
    ArrivedAtDestination,
    InTransitToHub,
    ReceivedAtHub,
    PartiallyCompleted,
    Completed,
    Lost,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Lost)
    }

    /// Strict transition graph. `Lost` is the only cross-cutting target,
    /// reachable from every non-terminal state.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if next == Lost {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Draft, PaymentConfirmed)
                | (PaymentConfirmed, SupplierDispatched)
                | (SupplierDispatched, WarehouseReceived)
                | (WarehouseReceived, ShippedToDestination)
                | (ShippedToDestination, ArrivedAtDestination)
                | (ArrivedAtDestination, InTransitToHub)
                | (InTransitToHub, ReceivedAtHub)
                | (InTransitToHub, PartiallyCompleted)
                | (ReceivedAtHub, Completed)
                | (PartiallyCompleted, Completed)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            OrderStatus::Draft => "draft",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::SupplierDispatched => "supplier_dispatched",
            OrderStatus::WarehouseReceived => "warehouse_received",
            OrderStatus::ShippedToDestination => "shipped_to_destination",
            OrderStatus::ArrivedAtDestination => "arrived_at_destination",
            OrderStatus::InTransitToHub => "in_transit_to_hub",
            OrderStatus::ReceivedAtHub => "received_at_hub",
            OrderStatus::PartiallyCompleted => "partially_completed",
            OrderStatus::Completed => "completed",
            OrderStatus::Lost => "lost",
        })
    }
}

/// Where a reconciled order lands. Caller-supplied alongside the receipt
/// data, not derived by the reconciliation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOutcome {
    ReceivedAtHub,
    PartiallyCompleted,
}

impl ReceiptOutcome {
    pub fn status(self) -> OrderStatus {
        match self {
            ReceiptOutcome::ReceivedAtHub => OrderStatus::ReceivedAtHub,
            ReceiptOutcome::PartiallyCompleted => OrderStatus::PartiallyCompleted,
        }
    }
}

/// Payment allocation recorded at confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub funding_account_id: FundingAccountId,
    /// `total_amount × exchange_rate` at confirmation time (home currency).
    pub amount_home: Decimal,
    pub from_supplier_credit: Decimal,
    pub from_funding_account: Decimal,
}

/// Quantity handed to the external inventory service for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockedLine {
    pub line_no: u32,
    pub quantity: u32,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Command: CreateOrder (enters `Draft`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub currency: CurrencyCode,
    pub exchange_rate: Decimal,
    pub lines: Vec<LineSpec>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReplaceLines (wholesale, `Draft` only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceLines {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<LineSpec>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteOrder (`Draft` only, cascades line deletion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOrder {
    pub order_id: PurchaseOrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Revalue — change the exchange rate on a non-terminal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revalue {
    pub order_id: PurchaseOrderId,
    pub exchange_rate: Decimal,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment (`Draft → PaymentConfirmed`).
///
/// `supplier_credit_balance` is a snapshot the caller reads inside the same
/// unit of work; `order_number` is consumed only if none is assigned yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub order_id: PurchaseOrderId,
    pub funding_account_id: FundingAccountId,
    pub supplier_credit_balance: Decimal,
    pub order_number: OrderNumber,
    pub new_exchange_rate: Option<Decimal>,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDispatch (`PaymentConfirmed → SupplierDispatched`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDispatch {
    pub order_id: PurchaseOrderId,
    pub courier_name: String,
    pub tracking_number: String,
    pub shipping_method: Option<String>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceStatus — label-only edges of the graph
/// (currently `SupplierDispatched → WarehouseReceived`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceStatus {
    pub order_id: PurchaseOrderId,
    pub to: OrderStatus,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDestinationShipment (`WarehouseReceived → ShippedToDestination`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDestinationShipment {
    pub order_id: PurchaseOrderId,
    pub lot_number: String,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordArrival (`ShippedToDestination → ArrivedAtDestination`).
/// Supplies the per-kilogram freight rate, apportioned over ordered
/// quantities at this stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordArrival {
    pub order_id: PurchaseOrderId,
    pub shipping_rate_per_kg: Decimal,
    /// Order-level weight declared by the forwarder; equal-split fallback
    /// for lines without weight data.
    pub declared_total_weight_kg: Option<Decimal>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartHubTransit (`ArrivedAtDestination → InTransitToHub`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartHubTransit {
    pub order_id: PurchaseOrderId,
    pub hub_tracking_number: String,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReportReceipt (`InTransitToHub → ReceivedAtHub | PartiallyCompleted`).
///
/// `credit_note_id` is consumed only when the reconciliation yields a
/// positive refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReceipt {
    pub order_id: PurchaseOrderId,
    pub receipts: Vec<LineReceipt>,
    pub outcome: ReceiptOutcome,
    pub credit_note_id: CreditNoteId,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder (`ReceivedAtHub | PartiallyCompleted → Completed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: PurchaseOrderId,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkLost (`any non-terminal → Lost`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkLost {
    pub order_id: PurchaseOrderId,
    pub losses: Vec<LineLoss>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    ReplaceLines(ReplaceLines),
    DeleteOrder(DeleteOrder),
    Revalue(Revalue),
    ConfirmPayment(ConfirmPayment),
    RecordDispatch(RecordDispatch),
    AdvanceStatus(AdvanceStatus),
    RecordDestinationShipment(RecordDestinationShipment),
    RecordArrival(RecordArrival),
    StartHubTransit(StartHubTransit),
    ReportReceipt(ReportReceipt),
    CompleteOrder(CompleteOrder),
    MarkLost(MarkLost),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub currency: CurrencyCode,
    pub exchange_rate: Decimal,
    pub lines: Vec<LineSpec>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesReplaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinesReplaced {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<LineSpec>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub order_id: PurchaseOrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CurrencyRevalued. Home-currency fields on every line are
/// recomputed during apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRevalued {
    pub order_id: PurchaseOrderId,
    pub exchange_rate: Decimal,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentConfirmed. Carries the allocation because it depends on a
/// ledger balance snapshot external to the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub funding_account_id: FundingAccountId,
    pub amount_home: Decimal,
    pub from_supplier_credit: Decimal,
    pub from_funding_account: Decimal,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SupplierDispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierDispatched {
    pub order_id: PurchaseOrderId,
    pub courier_name: String,
    pub tracking_number: String,
    pub shipping_method: Option<String>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusAdvanced — a label-only transition inside the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusAdvanced {
    pub order_id: PurchaseOrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DestinationShipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationShipped {
    pub order_id: PurchaseOrderId,
    pub lot_number: String,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DestinationArrived. Freight is apportioned over ordered
/// quantities during apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationArrived {
    pub order_id: PurchaseOrderId,
    pub shipping_rate_per_kg: Decimal,
    pub declared_total_weight_kg: Option<Decimal>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: HubTransitStarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubTransitStarted {
    pub order_id: PurchaseOrderId,
    pub hub_tracking_number: String,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptReconciled. Received/lost quantities are recorded and
/// freight re-apportioned over received quantities during apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptReconciled {
    pub order_id: PurchaseOrderId,
    pub receipts: Vec<LineReceipt>,
    pub outcome: ReceiptOutcome,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCredited — integration event for the external accounting
/// service; the amount has been credited to the supplier ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundCredited {
    pub order_id: PurchaseOrderId,
    pub amount: Decimal,
    pub credit_note_id: CreditNoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted — integration event for the external inventory
/// service, carrying the quantities to post as stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: PurchaseOrderId,
    pub stocked: Vec<StockedLine>,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderLost. Lost value is redistributed across surviving lines
/// during apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLost {
    pub order_id: PurchaseOrderId,
    pub losses: Vec<LineLoss>,
    pub total_lost_value: Decimal,
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LinesReplaced(LinesReplaced),
    OrderDeleted(OrderDeleted),
    CurrencyRevalued(CurrencyRevalued),
    PaymentConfirmed(PaymentConfirmed),
    SupplierDispatched(SupplierDispatched),
    StatusAdvanced(StatusAdvanced),
    DestinationShipped(DestinationShipped),
    DestinationArrived(DestinationArrived),
    HubTransitStarted(HubTransitStarted),
    ReceiptReconciled(ReceiptReconciled),
    RefundCredited(RefundCredited),
    OrderCompleted(OrderCompleted),
    OrderLost(OrderLost),
}

impl OrderEvent {
    /// The status this event moves the order to, if it changes status.
    /// Drives the status-history read model.
    pub fn status_change(&self) -> Option<OrderStatus> {
        match self {
            OrderEvent::OrderCreated(_) => Some(OrderStatus::Draft),
            OrderEvent::PaymentConfirmed(_) => Some(OrderStatus::PaymentConfirmed),
            OrderEvent::SupplierDispatched(_) => Some(OrderStatus::SupplierDispatched),
            OrderEvent::StatusAdvanced(e) => Some(e.to),
            OrderEvent::DestinationShipped(_) => Some(OrderStatus::ShippedToDestination),
            OrderEvent::DestinationArrived(_) => Some(OrderStatus::ArrivedAtDestination),
            OrderEvent::HubTransitStarted(_) => Some(OrderStatus::InTransitToHub),
            OrderEvent::ReceiptReconciled(e) => Some(e.outcome.status()),
            OrderEvent::OrderCompleted(_) => Some(OrderStatus::Completed),
            OrderEvent::OrderLost(_) => Some(OrderStatus::Lost),
            OrderEvent::LinesReplaced(_)
            | OrderEvent::OrderDeleted(_)
            | OrderEvent::CurrencyRevalued(_)
            | OrderEvent::RefundCredited(_) => None,
        }
    }

    pub fn actor(&self) -> Option<UserId> {
        match self {
            OrderEvent::OrderCreated(e) => Some(e.created_by),
            OrderEvent::LinesReplaced(e) => Some(e.actor),
            OrderEvent::OrderDeleted(e) => Some(e.actor),
            OrderEvent::CurrencyRevalued(e) => Some(e.actor),
            OrderEvent::PaymentConfirmed(e) => Some(e.actor),
            OrderEvent::SupplierDispatched(e) => Some(e.actor),
            OrderEvent::StatusAdvanced(e) => Some(e.actor),
            OrderEvent::DestinationShipped(e) => Some(e.actor),
            OrderEvent::DestinationArrived(e) => Some(e.actor),
            OrderEvent::HubTransitStarted(e) => Some(e.actor),
            OrderEvent::ReceiptReconciled(e) => Some(e.actor),
            OrderEvent::RefundCredited(_) => None,
            OrderEvent::OrderCompleted(e) => Some(e.actor),
            OrderEvent::OrderLost(e) => Some(e.actor),
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            OrderEvent::PaymentConfirmed(e) => e.comment.as_deref(),
            OrderEvent::SupplierDispatched(e) => e.comment.as_deref(),
            OrderEvent::StatusAdvanced(e) => e.comment.as_deref(),
            OrderEvent::DestinationShipped(e) => e.comment.as_deref(),
            OrderEvent::DestinationArrived(e) => e.comment.as_deref(),
            OrderEvent::HubTransitStarted(e) => e.comment.as_deref(),
            OrderEvent::ReceiptReconciled(e) => e.comment.as_deref(),
            OrderEvent::OrderCompleted(e) => e.comment.as_deref(),
            OrderEvent::OrderLost(e) => e.comment.as_deref(),
            _ => None,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "procurement.order.created",
            OrderEvent::LinesReplaced(_) => "procurement.order.lines_replaced",
            OrderEvent::OrderDeleted(_) => "procurement.order.deleted",
            OrderEvent::CurrencyRevalued(_) => "procurement.order.currency_revalued",
            OrderEvent::PaymentConfirmed(_) => "procurement.order.payment_confirmed",
            OrderEvent::SupplierDispatched(_) => "procurement.order.supplier_dispatched",
            OrderEvent::StatusAdvanced(_) => "procurement.order.status_advanced",
            OrderEvent::DestinationShipped(_) => "procurement.order.destination_shipped",
            OrderEvent::DestinationArrived(_) => "procurement.order.destination_arrived",
            OrderEvent::HubTransitStarted(_) => "procurement.order.hub_transit_started",
            OrderEvent::ReceiptReconciled(_) => "procurement.order.receipt_reconciled",
            OrderEvent::RefundCredited(_) => "procurement.order.refund_credited",
            OrderEvent::OrderCompleted(_) => "procurement.order.completed",
            OrderEvent::OrderLost(_) => "procurement.order.lost",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LinesReplaced(e) => e.occurred_at,
            OrderEvent::OrderDeleted(e) => e.occurred_at,
            OrderEvent::CurrencyRevalued(e) => e.occurred_at,
            OrderEvent::PaymentConfirmed(e) => e.occurred_at,
            OrderEvent::SupplierDispatched(e) => e.occurred_at,
            OrderEvent::StatusAdvanced(e) => e.occurred_at,
            OrderEvent::DestinationShipped(e) => e.occurred_at,
            OrderEvent::DestinationArrived(e) => e.occurred_at,
            OrderEvent::HubTransitStarted(e) => e.occurred_at,
            OrderEvent::ReceiptReconciled(e) => e.occurred_at,
            OrderEvent::RefundCredited(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
            OrderEvent::OrderLost(e) => e.occurred_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_id: Option<SupplierId>,
    created_by: Option<UserId>,
    order_number: Option<OrderNumber>,
    status: OrderStatus,

    currency: Option<CurrencyCode>,
    exchange_rate: Decimal,
    /// Sum of line subtotals in the supplier's currency. Fixed after draft.
    total_amount: Decimal,
    total_weight_kg: Decimal,
    total_shipping_cost: Decimal,
    declared_total_weight_kg: Option<Decimal>,
    shipping_rate_per_kg: Option<Decimal>,

    payment: Option<PaymentRecord>,
    expected_delivery_date: Option<DateTime<Utc>>,

    refund_amount: Decimal,
    refund_auto_credited: bool,
    credit_note_id: Option<CreditNoteId>,

    courier_name: Option<String>,
    tracking_number: Option<String>,
    lot_number: Option<String>,
    hub_tracking_number: Option<String>,
    shipping_method: Option<String>,

    lines: Vec<OrderLine>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            supplier_id: None,
            created_by: None,
            order_number: None,
            status: OrderStatus::Draft,
            currency: None,
            exchange_rate: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            total_weight_kg: Decimal::ZERO,
            total_shipping_cost: Decimal::ZERO,
            declared_total_weight_kg: None,
            shipping_rate_per_kg: None,
            payment: None,
            expected_delivery_date: None,
            refund_amount: Decimal::ZERO,
            refund_auto_credited: false,
            credit_note_id: None,
            courier_name: None,
            tracking_number: None,
            lot_number: None,
            hub_tracking_number: None,
            shipping_method: None,
            lines: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn currency(&self) -> Option<&CurrencyCode> {
        self.currency.as_ref()
    }

    pub fn exchange_rate(&self) -> Decimal {
        self.exchange_rate
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn total_weight_kg(&self) -> Decimal {
        self.total_weight_kg
    }

    pub fn total_shipping_cost(&self) -> Decimal {
        self.total_shipping_cost
    }

    pub fn payment(&self) -> Option<&PaymentRecord> {
        self.payment.as_ref()
    }

    pub fn expected_delivery_date(&self) -> Option<DateTime<Utc>> {
        self.expected_delivery_date
    }

    pub fn refund_amount(&self) -> Decimal {
        self.refund_amount
    }

    pub fn refund_auto_credited(&self) -> bool {
        self.refund_auto_credited
    }

    pub fn credit_note_id(&self) -> Option<CreditNoteId> {
        self.credit_note_id
    }

    pub fn courier_name(&self) -> Option<&str> {
        self.courier_name.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn lot_number(&self) -> Option<&str> {
        self.lot_number.as_deref()
    }

    pub fn hub_tracking_number(&self) -> Option<&str> {
        self.hub_tracking_number.as_deref()
    }

    pub fn shipping_method(&self) -> Option<&str> {
        self.shipping_method.as_deref()
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for PurchaseOrder {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.supplier_id = Some(e.supplier_id);
                self.created_by = Some(e.created_by);
                self.currency = Some(e.currency.clone());
                self.exchange_rate = e.exchange_rate;
                self.lines = build_lines(&e.lines, e.exchange_rate);
                self.total_amount = self.lines.iter().map(OrderLine::supplier_subtotal).sum();
                self.status = OrderStatus::Draft;
                self.created = true;
            }
            OrderEvent::LinesReplaced(e) => {
                self.lines = build_lines(&e.lines, self.exchange_rate);
                self.total_amount = self.lines.iter().map(OrderLine::supplier_subtotal).sum();
            }
            OrderEvent::OrderDeleted(_) => {
                // Cascade: draft deletion removes the lines with the order.
                self.lines.clear();
                self.deleted = true;
            }
            OrderEvent::CurrencyRevalued(e) => {
                self.exchange_rate = e.exchange_rate;
                revalue_lines(&mut self.lines, e.exchange_rate);
            }
            OrderEvent::PaymentConfirmed(e) => {
                if self.order_number.is_none() {
                    self.order_number = Some(e.order_number.clone());
                }
                if self.expected_delivery_date.is_none() {
                    self.expected_delivery_date = e.expected_delivery_date;
                }
                self.payment = Some(PaymentRecord {
                    funding_account_id: e.funding_account_id,
                    amount_home: e.amount_home,
                    from_supplier_credit: e.from_supplier_credit,
                    from_funding_account: e.from_funding_account,
                });
                self.status = OrderStatus::PaymentConfirmed;
            }
            OrderEvent::SupplierDispatched(e) => {
                self.courier_name = Some(e.courier_name.clone());
                self.tracking_number = Some(e.tracking_number.clone());
                self.shipping_method = e.shipping_method.clone();
                self.status = OrderStatus::SupplierDispatched;
            }
            OrderEvent::StatusAdvanced(e) => {
                self.status = e.to;
            }
            OrderEvent::DestinationShipped(e) => {
                self.lot_number = Some(e.lot_number.clone());
                self.status = OrderStatus::ShippedToDestination;
            }
            OrderEvent::DestinationArrived(e) => {
                self.shipping_rate_per_kg = Some(e.shipping_rate_per_kg);
                self.declared_total_weight_kg = e.declared_total_weight_kg;
                let totals = apportion_freight(
                    &mut self.lines,
                    e.shipping_rate_per_kg,
                    e.declared_total_weight_kg,
                );
                self.total_weight_kg = totals.total_weight_kg;
                self.total_shipping_cost = totals.total_shipping_cost;
                self.status = OrderStatus::ArrivedAtDestination;
            }
            OrderEvent::HubTransitStarted(e) => {
                self.hub_tracking_number = Some(e.hub_tracking_number.clone());
                self.status = OrderStatus::InTransitToHub;
            }
            OrderEvent::ReceiptReconciled(e) => {
                apply_receipts(&mut self.lines, &e.receipts);
                // Second apportionment run, over received quantities;
                // supersedes the arrival-time run.
                let rate = self.shipping_rate_per_kg.unwrap_or(Decimal::ZERO);
                let totals =
                    apportion_freight(&mut self.lines, rate, self.declared_total_weight_kg);
                self.total_weight_kg = totals.total_weight_kg;
                self.total_shipping_cost = totals.total_shipping_cost;
                self.status = e.outcome.status();
            }
            OrderEvent::RefundCredited(e) => {
                self.refund_amount = e.amount;
                self.refund_auto_credited = true;
                self.credit_note_id = Some(e.credit_note_id);
            }
            OrderEvent::OrderCompleted(e) => {
                for stocked in &e.stocked {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == stocked.line_no)
                    {
                        line.stocked_quantity = Some(stocked.quantity);
                    }
                }
                self.status = OrderStatus::Completed;
            }
            OrderEvent::OrderLost(e) => {
                redistribute_loss(&mut self.lines, &e.losses);
                self.status = OrderStatus::Lost;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let OrderCommand::CreateOrder(cmd) = command {
            return self.handle_create(cmd);
        }

        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.deleted {
            return Err(DomainError::not_found());
        }

        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::ReplaceLines(cmd) => self.handle_replace_lines(cmd),
            OrderCommand::DeleteOrder(cmd) => self.handle_delete(cmd),
            OrderCommand::Revalue(cmd) => self.handle_revalue(cmd),
            OrderCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            OrderCommand::RecordDispatch(cmd) => self.handle_record_dispatch(cmd),
            OrderCommand::AdvanceStatus(cmd) => self.handle_advance_status(cmd),
            OrderCommand::RecordDestinationShipment(cmd) => self.handle_destination_shipment(cmd),
            OrderCommand::RecordArrival(cmd) => self.handle_record_arrival(cmd),
            OrderCommand::StartHubTransit(cmd) => self.handle_start_hub_transit(cmd),
            OrderCommand::ReportReceipt(cmd) => self.handle_report_receipt(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            OrderCommand::MarkLost(cmd) => self.handle_mark_lost(cmd),
        }
    }
}

fn build_lines(specs: &[LineSpec], exchange_rate: Decimal) -> Vec<OrderLine> {
    specs
        .iter()
        .enumerate()
        .map(|(idx, spec)| OrderLine::from_spec(idx as u32 + 1, spec, exchange_rate))
        .collect()
}

fn validate_specs(specs: &[LineSpec]) -> Result<(), DomainError> {
    if specs.is_empty() {
        return Err(DomainError::validation(
            "purchase order must have at least one line",
        ));
    }
    for spec in specs {
        spec.validate()?;
    }
    Ok(())
}

impl PurchaseOrder {
    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), DomainError> {
        if self.status.can_advance_to(to) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "illegal status transition {} -> {}",
                self.status, to
            )))
        }
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.exchange_rate <= Decimal::ZERO {
            return Err(DomainError::validation("exchange rate must be positive"));
        }
        validate_specs(&cmd.lines)?;

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            supplier_id: cmd.supplier_id,
            currency: cmd.currency.clone(),
            exchange_rate: cmd.exchange_rate,
            lines: cmd.lines.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_replace_lines(&self, cmd: &ReplaceLines) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(
                "lines are replaceable only while the order is in draft",
            ));
        }
        validate_specs(&cmd.lines)?;

        Ok(vec![OrderEvent::LinesReplaced(LinesReplaced {
            order_id: cmd.order_id,
            lines: cmd.lines.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(
                "only draft purchase orders can be deleted",
            ));
        }

        Ok(vec![OrderEvent::OrderDeleted(OrderDeleted {
            order_id: cmd.order_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revalue(&self, cmd: &Revalue) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        if self.status.is_terminal() {
            return Err(DomainError::invariant(
                "exchange rate is fixed once the order is settled",
            ));
        }
        if cmd.exchange_rate <= Decimal::ZERO {
            return Err(DomainError::validation("exchange rate must be positive"));
        }

        Ok(vec![OrderEvent::CurrencyRevalued(CurrencyRevalued {
            order_id: cmd.order_id,
            exchange_rate: cmd.exchange_rate,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_payment(&self, cmd: &ConfirmPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::PaymentConfirmed)?;

        let effective_rate = cmd.new_exchange_rate.unwrap_or(self.exchange_rate);
        if effective_rate <= Decimal::ZERO {
            return Err(DomainError::validation("exchange rate must be positive"));
        }

        let mut events = Vec::new();
        if cmd.new_exchange_rate.is_some() && effective_rate != self.exchange_rate {
            events.push(OrderEvent::CurrencyRevalued(CurrencyRevalued {
                order_id: cmd.order_id,
                exchange_rate: effective_rate,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        let amount_home = self.total_amount * effective_rate;
        let split = split_payment(amount_home, cmd.supplier_credit_balance);

        let order_number = self
            .order_number
            .clone()
            .unwrap_or_else(|| cmd.order_number.clone());
        let expected_delivery_date = self.expected_delivery_date.or(cmd.expected_delivery_date);

        events.push(OrderEvent::PaymentConfirmed(PaymentConfirmed {
            order_id: cmd.order_id,
            order_number,
            funding_account_id: cmd.funding_account_id,
            amount_home,
            from_supplier_credit: split.from_supplier_credit,
            from_funding_account: split.from_funding_account,
            expected_delivery_date,
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_record_dispatch(&self, cmd: &RecordDispatch) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::SupplierDispatched)?;
        if cmd.courier_name.trim().is_empty() || cmd.tracking_number.trim().is_empty() {
            return Err(DomainError::validation(
                "dispatch requires courier name and tracking number",
            ));
        }

        Ok(vec![OrderEvent::SupplierDispatched(SupplierDispatched {
            order_id: cmd.order_id,
            courier_name: cmd.courier_name.clone(),
            tracking_number: cmd.tracking_number.clone(),
            shipping_method: cmd.shipping_method.clone(),
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance_status(&self, cmd: &AdvanceStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;

        match (self.status, cmd.to) {
            (OrderStatus::SupplierDispatched, OrderStatus::WarehouseReceived) => {
                Ok(vec![OrderEvent::StatusAdvanced(StatusAdvanced {
                    order_id: cmd.order_id,
                    from: self.status,
                    to: cmd.to,
                    actor: cmd.actor,
                    comment: cmd.comment.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            (from, to) if from.can_advance_to(to) => Err(DomainError::invariant(format!(
                "transition {from} -> {to} has side effects; use its dedicated operation"
            ))),
            (from, to) => Err(DomainError::invariant(format!(
                "illegal status transition {from} -> {to}"
            ))),
        }
    }

    fn handle_destination_shipment(
        &self,
        cmd: &RecordDestinationShipment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::ShippedToDestination)?;
        if cmd.lot_number.trim().is_empty() {
            return Err(DomainError::validation(
                "destination shipment requires a lot number",
            ));
        }

        Ok(vec![OrderEvent::DestinationShipped(DestinationShipped {
            order_id: cmd.order_id,
            lot_number: cmd.lot_number.clone(),
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_arrival(&self, cmd: &RecordArrival) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::ArrivedAtDestination)?;
        if cmd.shipping_rate_per_kg < Decimal::ZERO {
            return Err(DomainError::validation(
                "shipping rate must be non-negative",
            ));
        }
        if cmd.declared_total_weight_kg.is_some_and(|w| w < Decimal::ZERO) {
            return Err(DomainError::validation(
                "declared total weight must be non-negative",
            ));
        }

        Ok(vec![OrderEvent::DestinationArrived(DestinationArrived {
            order_id: cmd.order_id,
            shipping_rate_per_kg: cmd.shipping_rate_per_kg,
            declared_total_weight_kg: cmd.declared_total_weight_kg,
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_hub_transit(
        &self,
        cmd: &StartHubTransit,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::InTransitToHub)?;
        if cmd.hub_tracking_number.trim().is_empty() {
            return Err(DomainError::validation(
                "hub transit requires a tracking number",
            ));
        }

        Ok(vec![OrderEvent::HubTransitStarted(HubTransitStarted {
            order_id: cmd.order_id,
            hub_tracking_number: cmd.hub_tracking_number.clone(),
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_report_receipt(&self, cmd: &ReportReceipt) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(cmd.outcome.status())?;

        let report = reconcile(&self.lines, &cmd.receipts, self.exchange_rate)?;

        let mut events = vec![OrderEvent::ReceiptReconciled(ReceiptReconciled {
            order_id: cmd.order_id,
            receipts: cmd.receipts.clone(),
            outcome: cmd.outcome,
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if report.total_refund > Decimal::ZERO {
            events.push(OrderEvent::RefundCredited(RefundCredited {
                order_id: cmd.order_id,
                amount: report.total_refund,
                credit_note_id: cmd.credit_note_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Completed)?;

        let stocked = self
            .lines
            .iter()
            .map(|line| StockedLine {
                line_no: line.line_no,
                quantity: line.received_quantity.unwrap_or(0),
            })
            .collect();

        Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            stocked,
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_lost(&self, cmd: &MarkLost) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Lost)?;
        validate_losses(&self.lines, &cmd.losses)?;

        Ok(vec![OrderEvent::OrderLost(OrderLost {
            order_id: cmd.order_id,
            losses: cmd.losses.clone(),
            total_lost_value: total_lost_value(&self.lines, &cmd.losses),
            actor: cmd.actor,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
