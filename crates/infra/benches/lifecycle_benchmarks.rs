//! Benchmarks for the transition pipeline and the costing algorithms.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use kontor_core::{AggregateId, FundingAccountId, ProductId, SupplierId, UserId};
use kontor_events::{EventEnvelope, InMemoryEventBus};
use kontor_finance::{
    CurrencyCode, InMemoryFundingAccounts, InMemoryRateRegistry, InMemorySupplierLedger,
    OverdraftPolicy, SupplierCreditLedger,
};
use kontor_procurement::{
    AdvanceStatus, CompleteOrder, LineReceipt, LineSpec, OrderLine, OrderStatus, PurchaseOrderId,
    ReceiptOutcome, RecordArrival, RecordDestinationShipment, RecordDispatch, StartHubTransit,
    apportion_freight,
};
use kontor_infra::{
    ConfirmPaymentRequest, CreateOrderRequest, InMemoryEventStore, ProcurementService,
    ReportReceiptRequest,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

fn service() -> (
    ProcurementService<Arc<InMemoryEventStore>, Bus>,
    SupplierId,
    FundingAccountId,
) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let supplier_credit = Arc::new(InMemorySupplierLedger::new());
    let funding = Arc::new(InMemoryFundingAccounts::new());
    let rates = Arc::new(InMemoryRateRegistry::new());

    let supplier = SupplierId::new();
    let account = FundingAccountId::new();
    supplier_credit
        .credit(supplier, Decimal::from(1_000_000_000i64), "opening balance")
        .unwrap();
    funding.open_account(account, Decimal::ZERO, OverdraftPolicy::Unlimited);

    let service = ProcurementService::new(store, bus, supplier_credit, funding, rates);

    (service, supplier, account)
}

fn spec(price: i64, quantity: u32) -> LineSpec {
    LineSpec {
        product_id: ProductId::new(),
        supplier_unit_price: Decimal::from(price),
        ordered_quantity: quantity,
        unit_weight_g: Decimal::from(200),
        extra_weight_per_unit_g: Decimal::from(50),
    }
}

fn run_lifecycle(
    service: &ProcurementService<Arc<InMemoryEventStore>, Bus>,
    supplier: SupplierId,
    account: FundingAccountId,
) {
    let id = PurchaseOrderId::new(AggregateId::new());
    let actor = UserId::new();
    let now = chrono::Utc::now();

    service
        .create_order(CreateOrderRequest {
            order_id: id,
            supplier_id: supplier,
            currency: CurrencyCode::new("USD").unwrap(),
            exchange_rate: Some(Decimal::from(15)),
            lines: vec![spec(10, 50), spec(25, 20)],
            created_by: actor,
        })
        .unwrap();
    service
        .confirm_payment(ConfirmPaymentRequest {
            order_id: id,
            funding_account_id: account,
            new_exchange_rate: None,
            expected_delivery_date: None,
            actor,
            comment: None,
        })
        .unwrap();
    service
        .record_dispatch(RecordDispatch {
            order_id: id,
            courier_name: "DHL".to_string(),
            tracking_number: "TRK".to_string(),
            shipping_method: None,
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
    service
        .advance_status(AdvanceStatus {
            order_id: id,
            to: OrderStatus::WarehouseReceived,
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
    service
        .record_destination_shipment(RecordDestinationShipment {
            order_id: id,
            lot_number: "LOT".to_string(),
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
    service
        .record_arrival(RecordArrival {
            order_id: id,
            shipping_rate_per_kg: Decimal::from(3),
            declared_total_weight_kg: None,
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
    service
        .start_hub_transit(StartHubTransit {
            order_id: id,
            hub_tracking_number: "HUB".to_string(),
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
    service
        .report_receipt(ReportReceiptRequest {
            order_id: id,
            receipts: vec![
                LineReceipt {
                    line_no: 1,
                    received_quantity: 45,
                },
                LineReceipt {
                    line_no: 2,
                    received_quantity: 20,
                },
            ],
            outcome: ReceiptOutcome::ReceivedAtHub,
            actor,
            comment: None,
        })
        .unwrap();
    service
        .complete(CompleteOrder {
            order_id: id,
            actor,
            comment: None,
            occurred_at: now,
        })
        .unwrap();
}

fn lifecycle_benchmark(c: &mut Criterion) {
    let (service, supplier, account) = service();
    c.bench_function("order_lifecycle_end_to_end", |b| {
        b.iter(|| run_lifecycle(&service, supplier, account));
    });
}

fn apportionment_benchmark(c: &mut Criterion) {
    let mut lines: Vec<OrderLine> = (0u32..100)
        .map(|i| OrderLine::from_spec(i + 1, &spec(10, 50 + i), Decimal::from(15)))
        .collect();

    c.bench_function("freight_apportionment_100_lines", |b| {
        b.iter(|| apportion_freight(&mut lines, Decimal::from(3), None));
    });
}

criterion_group!(benches, lifecycle_benchmark, apportionment_benchmark);
criterion_main!(benches);
