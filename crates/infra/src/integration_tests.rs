//! Integration tests for the full transition pipeline:
//! request → service → ledgers → event store → bus → read models.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use kontor_core::{AggregateId, FundingAccountId, ProductId, SupplierId, UserId};
use kontor_events::{EventBus, EventEnvelope, InMemoryEventBus};
use kontor_finance::{
    CurrencyCode, FundingAccounts, FundingError, InMemoryFundingAccounts, InMemoryRateRegistry,
    InMemorySupplierLedger, OverdraftPolicy, RateRegistry, SupplierCreditLedger,
};
use kontor_procurement::{
    AdvanceStatus, CompleteOrder, DeleteOrder, LineReceipt, LineSpec, OrderStatus,
    PurchaseOrderId, ReceiptOutcome, RecordArrival, RecordDestinationShipment, RecordDispatch,
    Revalue, StartHubTransit,
};

use crate::event_store::InMemoryEventStore;
use crate::history::status_history;
use crate::service::{
    ConfirmPaymentRequest, CreateOrderRequest, ProcurementService, ReportReceiptRequest,
    TransitionError,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Harness {
    service: ProcurementService<Arc<InMemoryEventStore>, Bus>,
    store: Arc<InMemoryEventStore>,
    bus: Bus,
    supplier_credit: Arc<InMemorySupplierLedger>,
    funding: Arc<InMemoryFundingAccounts>,
    rates: Arc<InMemoryRateRegistry>,
    supplier: SupplierId,
    account: FundingAccountId,
    actor: UserId,
}

fn setup(credit_balance: i64, account_balance: i64) -> Harness {
    kontor_observability::tracing::init();

    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let supplier_credit = Arc::new(InMemorySupplierLedger::new());
    let funding = Arc::new(InMemoryFundingAccounts::new());
    let rates = Arc::new(InMemoryRateRegistry::new());

    let supplier = SupplierId::new();
    let account = FundingAccountId::new();
    supplier_credit
        .credit(supplier, Decimal::from(credit_balance), "opening balance")
        .unwrap();
    funding.open_account(account, Decimal::from(account_balance), OverdraftPolicy::Forbidden);

    let service = ProcurementService::new(
        store.clone(),
        bus.clone(),
        supplier_credit.clone() as Arc<dyn SupplierCreditLedger>,
        funding.clone() as Arc<dyn FundingAccounts>,
        rates.clone() as Arc<dyn RateRegistry>,
    );

    Harness {
        service,
        store,
        bus,
        supplier_credit,
        funding,
        rates,
        supplier,
        account,
        actor: UserId::new(),
    }
}

fn usd() -> CurrencyCode {
    CurrencyCode::new("USD").unwrap()
}

fn spec(price: i64, quantity: u32, unit_weight_g: i64) -> LineSpec {
    LineSpec {
        product_id: ProductId::new(),
        supplier_unit_price: Decimal::from(price),
        ordered_quantity: quantity,
        unit_weight_g: Decimal::from(unit_weight_g),
        extra_weight_per_unit_g: Decimal::from(50),
    }
}

fn order_id() -> PurchaseOrderId {
    PurchaseOrderId::new(AggregateId::new())
}

fn create(h: &Harness, id: PurchaseOrderId, rate: Option<i64>, lines: Vec<LineSpec>) -> Result<()> {
    h.service.create_order(CreateOrderRequest {
        order_id: id,
        supplier_id: h.supplier,
        currency: usd(),
        exchange_rate: rate.map(Decimal::from),
        lines,
        created_by: h.actor,
    })?;
    Ok(())
}

fn confirm(h: &Harness, id: PurchaseOrderId) -> Result<(), TransitionError> {
    h.service
        .confirm_payment(ConfirmPaymentRequest {
            order_id: id,
            funding_account_id: h.account,
            new_exchange_rate: None,
            expected_delivery_date: None,
            actor: h.actor,
            comment: None,
        })
        .map(|_| ())
}

/// Drive a confirmed order up to `InTransitToHub`.
fn walk_to_hub(h: &Harness, id: PurchaseOrderId) -> Result<()> {
    h.service.record_dispatch(RecordDispatch {
        order_id: id,
        courier_name: "DHL".to_string(),
        tracking_number: "TRK-100".to_string(),
        shipping_method: Some("sea".to_string()),
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;
    h.service.advance_status(AdvanceStatus {
        order_id: id,
        to: OrderStatus::WarehouseReceived,
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;
    h.service
        .record_destination_shipment(RecordDestinationShipment {
            order_id: id,
            lot_number: "LOT-42".to_string(),
            actor: h.actor,
            comment: None,
            occurred_at: chrono::Utc::now(),
        })?;
    h.service.record_arrival(RecordArrival {
        order_id: id,
        shipping_rate_per_kg: Decimal::from(3),
        declared_total_weight_kg: None,
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;
    h.service.start_hub_transit(StartHubTransit {
        order_id: id,
        hub_tracking_number: "HUB-7".to_string(),
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;
    Ok(())
}

#[test]
fn full_lifecycle_reaches_completed_and_posts_stock() -> Result<()> {
    let h = setup(3000, 10_000);
    let subscription = h.bus.subscribe();
    let id = order_id();

    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;
    confirm(&h, id)?;

    // 7500 total: 3000 from credit, 4500 from the account.
    assert_eq!(h.supplier_credit.balance(h.supplier), Decimal::ZERO);
    assert_eq!(h.funding.balance(h.account)?, Decimal::from(5500));

    walk_to_hub(&h, id)?;
    h.service.report_receipt(ReportReceiptRequest {
        order_id: id,
        receipts: vec![LineReceipt {
            line_no: 1,
            received_quantity: 50,
        }],
        outcome: ReceiptOutcome::ReceivedAtHub,
        actor: h.actor,
        comment: None,
    })?;
    let outcome = h.service.complete(CompleteOrder {
        order_id: id,
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;

    assert_eq!(outcome.order.status(), OrderStatus::Completed);
    assert_eq!(outcome.order.lines()[0].stocked_quantity, Some(50));
    assert!(outcome.summary.contains("completed"));

    let payment = outcome.order.payment().unwrap();
    assert_eq!(payment.amount_home, Decimal::from(7500));
    assert_eq!(payment.from_supplier_credit, Decimal::from(3000));
    assert_eq!(payment.from_funding_account, Decimal::from(4500));

    // Every committed event reached the bus; the last one posts stock.
    let mut envelopes = Vec::new();
    while let Ok(envelope) = subscription.try_recv() {
        envelopes.push(envelope);
    }
    assert_eq!(envelopes.len(), 9);
    assert!(envelopes.last().unwrap().payload().get("OrderCompleted").is_some());

    Ok(())
}

#[test]
fn overdraft_rejection_rolls_back_the_whole_transition() -> Result<()> {
    // 7500 due, 3000 credit, only 1000 in the account: the 4500 draw fails.
    let h = setup(3000, 1000);
    let id = order_id();
    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;

    let err = confirm(&h, id).unwrap_err();
    assert!(matches!(
        err,
        TransitionError::Funding(FundingError::OverdraftRejected { .. })
    ));

    // The supplier credit debit was compensated; nothing moved.
    assert_eq!(h.supplier_credit.balance(h.supplier), Decimal::from(3000));
    assert_eq!(h.funding.balance(h.account)?, Decimal::from(1000));
    let memos: Vec<String> = h
        .supplier_credit
        .entries(h.supplier)
        .into_iter()
        .map(|e| e.memo)
        .collect();
    assert!(memos.iter().any(|m| m.starts_with("reversal:")));

    // The order is exactly as it was: still draft, no payment, no number.
    let order = h.service.load_order(id)?;
    assert_eq!(order.status(), OrderStatus::Draft);
    assert!(order.payment().is_none());
    assert!(order.order_number().is_none());
    let history = status_history(h.store.as_ref(), id)?;
    assert_eq!(history.len(), 1);

    // Resubmission with a funded account succeeds.
    h.funding.credit(h.account, Decimal::from(9000))?;
    confirm(&h, id).map_err(|e| anyhow::anyhow!("resubmit failed: {e}"))?;
    assert_eq!(h.funding.balance(h.account)?, Decimal::from(5500));

    Ok(())
}

#[test]
fn shortage_refund_is_credited_with_a_memo() -> Result<()> {
    let h = setup(0, 100_000);
    let subscription = h.bus.subscribe();
    let id = order_id();

    create(&h, id, Some(15), vec![spec(5, 100, 200)])?;
    confirm(&h, id)?;
    walk_to_hub(&h, id)?;

    let outcome = h.service.report_receipt(ReportReceiptRequest {
        order_id: id,
        receipts: vec![LineReceipt {
            line_no: 1,
            received_quantity: 80,
        }],
        outcome: ReceiptOutcome::PartiallyCompleted,
        actor: h.actor,
        comment: Some("20 units short".to_string()),
    })?;

    // 20 lost × 5 × 15 = 1500, auto-credited with a credit note.
    assert_eq!(outcome.order.refund_amount(), Decimal::from(1500));
    assert!(outcome.order.refund_auto_credited());
    let credit_note = outcome.order.credit_note_id().unwrap();
    assert_eq!(h.supplier_credit.balance(h.supplier), Decimal::from(1500));

    let entries = h.supplier_credit.entries(h.supplier);
    let refund_entry = entries.last().unwrap();
    assert!(refund_entry.memo.contains(&credit_note.to_string()));
    assert!(refund_entry.memo.contains("shortage refund"));

    // The refund event is published for the accounting service.
    let mut saw_refund = false;
    while let Ok(envelope) = subscription.try_recv() {
        if envelope.payload().get("RefundCredited").is_some() {
            saw_refund = true;
        }
    }
    assert!(saw_refund);

    Ok(())
}

#[test]
fn revaluation_updates_the_shared_rate_registry() -> Result<()> {
    let h = setup(0, 100_000);
    h.rates.set_rate(usd(), Decimal::from(12));

    // No explicit rate: the order inherits the registry's 12.
    let id = order_id();
    create(&h, id, None, vec![spec(10, 50, 200)])?;
    let order = h.service.load_order(id)?;
    assert_eq!(order.exchange_rate(), Decimal::from(12));

    h.service.revalue(Revalue {
        order_id: id,
        exchange_rate: Decimal::from(15),
        actor: h.actor,
        occurred_at: chrono::Utc::now(),
    })?;

    // The global registry follows: the next order in USD inherits 15.
    assert_eq!(h.rates.rate(&usd()), Some(Decimal::from(15)));
    let second = order_id();
    create(&h, second, None, vec![spec(1, 1, 100)])?;
    assert_eq!(h.service.load_order(second)?.exchange_rate(), Decimal::from(15));

    // And the first order's lines were recomputed.
    let order = h.service.load_order(id)?;
    assert_eq!(order.lines()[0].line_total, Decimal::from(7500));

    Ok(())
}

#[test]
fn create_without_a_registered_rate_is_rejected() {
    let h = setup(0, 1000);
    let err = create(&h, order_id(), None, vec![spec(1, 1, 100)]).unwrap_err();
    let err: TransitionError = err.downcast().unwrap();
    assert!(matches!(err, TransitionError::UnknownCurrency(_)));
}

#[test]
fn unknown_funding_account_is_a_validation_error() -> Result<()> {
    let h = setup(0, 1000);
    let id = order_id();
    create(&h, id, Some(15), vec![spec(1, 1, 100)])?;

    let err = h
        .service
        .confirm_payment(ConfirmPaymentRequest {
            order_id: id,
            funding_account_id: FundingAccountId::new(),
            new_exchange_rate: None,
            expected_delivery_date: None,
            actor: h.actor,
            comment: None,
        })
        .unwrap_err();
    assert!(matches!(err, TransitionError::Validation(_)));

    Ok(())
}

#[test]
fn draft_deletion_cascades_but_dispatched_orders_survive() -> Result<()> {
    let h = setup(0, 100_000);
    let id = order_id();
    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;

    h.service.delete_order(DeleteOrder {
        order_id: id,
        actor: h.actor,
        occurred_at: chrono::Utc::now(),
    })?;
    assert!(matches!(
        h.service.load_order(id),
        Err(TransitionError::NotFound)
    ));

    let id = order_id();
    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;
    confirm(&h, id)?;
    h.service.record_dispatch(RecordDispatch {
        order_id: id,
        courier_name: "DHL".to_string(),
        tracking_number: "TRK-1".to_string(),
        shipping_method: None,
        actor: h.actor,
        comment: None,
        occurred_at: chrono::Utc::now(),
    })?;

    let err = h
        .service
        .delete_order(DeleteOrder {
            order_id: id,
            actor: h.actor,
            occurred_at: chrono::Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, TransitionError::InvariantViolation(_)));
    assert_eq!(
        h.service.load_order(id)?.status(),
        OrderStatus::SupplierDispatched
    );

    Ok(())
}

#[test]
fn status_history_chains_previous_and_new_statuses() -> Result<()> {
    let h = setup(0, 100_000);
    let id = order_id();
    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;
    confirm(&h, id)?;
    walk_to_hub(&h, id)?;

    let history = status_history(h.store.as_ref(), id)?;
    let chain: Vec<(Option<OrderStatus>, OrderStatus)> = history
        .iter()
        .map(|e| (e.previous_status, e.new_status))
        .collect();

    assert_eq!(
        chain,
        vec![
            (None, OrderStatus::Draft),
            (Some(OrderStatus::Draft), OrderStatus::PaymentConfirmed),
            (Some(OrderStatus::PaymentConfirmed), OrderStatus::SupplierDispatched),
            (Some(OrderStatus::SupplierDispatched), OrderStatus::WarehouseReceived),
            (Some(OrderStatus::WarehouseReceived), OrderStatus::ShippedToDestination),
            (Some(OrderStatus::ShippedToDestination), OrderStatus::ArrivedAtDestination),
            (Some(OrderStatus::ArrivedAtDestination), OrderStatus::InTransitToHub),
        ]
    );

    Ok(())
}

#[test]
fn concurrent_confirmations_debit_exactly_once() -> Result<()> {
    let h = setup(3000, 10_000);
    let id = order_id();
    create(&h, id, Some(15), vec![spec(10, 50, 200)])?;

    let service = Arc::new(h.service);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let account = h.account;
                let actor = h.actor;
                scope.spawn(move || {
                    service
                        .confirm_payment(ConfirmPaymentRequest {
                            order_id: id,
                            funding_account_id: account,
                            new_exchange_rate: None,
                            expected_delivery_date: None,
                            actor,
                            comment: None,
                        })
                        .map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    // One allocation only: 3000 from credit, 4500 from the account.
    assert_eq!(h.supplier_credit.balance(h.supplier), Decimal::ZERO);
    assert_eq!(h.funding.balance(h.account)?, Decimal::from(5500));

    Ok(())
}
