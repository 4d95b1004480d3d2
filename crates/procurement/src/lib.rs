//! Procurement order lifecycle & cost reconciliation engine.
//!
//! Drives an international purchase order from creation through payment,
//! shipping, receipt, and final landed-cost settlement. The `PurchaseOrder`
//! aggregate orchestrates the pure costing algorithms as side effects of
//! status transitions; every transition is an event in the order's
//! append-only stream.

pub mod allocation;
pub mod costing;
pub mod line;
pub mod order;
pub mod reconciliation;

pub use allocation::{PaymentSplit, split_payment};
pub use costing::{FreightTotals, apportion_freight, revalue_lines};
pub use line::{LineSpec, OrderLine};
pub use order::{
    AdvanceStatus, CompleteOrder, ConfirmPayment, CreateOrder, CreditNoteId, CurrencyRevalued,
    DeleteOrder, DestinationArrived, DestinationShipped, HubTransitStarted, MarkLost,
    OrderCommand, OrderCompleted, OrderCreated, OrderDeleted, OrderEvent, OrderLost, OrderNumber,
    OrderStatus, PaymentConfirmed, PaymentRecord, PurchaseOrder, PurchaseOrderId, ReceiptOutcome,
    ReceiptReconciled, RecordArrival, RecordDestinationShipment, RecordDispatch, RefundCredited,
    ReplaceLines, ReportReceipt, Revalue, StartHubTransit, StatusAdvanced, StockedLine,
    SupplierDispatched,
};
pub use reconciliation::{
    LineLoss, LineReceipt, LineReconciliation, ReconciliationReport, REFUND_THRESHOLD_PCT,
    reconcile, redistribute_loss, total_lost_value, validate_losses,
};
