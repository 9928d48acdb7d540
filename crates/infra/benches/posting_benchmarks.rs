use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::runtime::Runtime;

use tally_core::Currency;
use tally_infra::{InMemoryLedgerStore, Ledger, OutboxConfig};
use tally_ledger::{
    Account, Direction, Journal, Layer, NewAccount, NewEntryTemplate, NewJournal, NewParamDefinition, NewTxInput,
    NewTxTemplate, NormalBalance, ParamDataType, Params, TxTemplate, check_balanced,
};

struct Books {
    ledger: Ledger<InMemoryLedgerStore>,
    journal: Journal,
    cash: Account,
    revenue: Account,
}

fn sale_template() -> NewTxTemplate {
    NewTxTemplate::new("SALE", NewTxInput::new("params.journal", "date('2024-01-31')"))
        .with_param(NewParamDefinition::new("journal", ParamDataType::Uuid))
        .with_param(NewParamDefinition::new("cash", ParamDataType::Uuid))
        .with_param(NewParamDefinition::new("revenue", ParamDataType::Uuid))
        .with_param(NewParamDefinition::new("amount", ParamDataType::Decimal))
        .with_entry(NewEntryTemplate::new(
            "SALE_DR",
            "params.cash",
            "'USD'",
            Direction::Debit,
            Layer::Settled,
            "params.amount",
        ))
        .with_entry(NewEntryTemplate::new(
            "SALE_CR",
            "params.revenue",
            "'USD'",
            Direction::Credit,
            Layer::Settled,
            "params.amount",
        ))
}

/// The sale template keyed by `params.reference`, so reposts are idempotent.
fn keyed_sale_template() -> NewTxTemplate {
    let mut template = sale_template().with_param(NewParamDefinition::new("reference", ParamDataType::String));
    template.code = "KEYED_SALE".to_string();
    template.transaction.external_id = Some("params.reference".to_string());
    template
}

fn setup(rt: &Runtime) -> Books {
    rt.block_on(async {
        let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()), OutboxConfig::default());
        let journal = ledger.create_journal(NewJournal::new("Bench")).await.unwrap();
        let cash = ledger
            .create_account(NewAccount::new("1000", "Cash", NormalBalance::Debit))
            .await
            .unwrap();
        let revenue = ledger
            .create_account(NewAccount::new("4000", "Revenue", NormalBalance::Credit))
            .await
            .unwrap();
        ledger.create_tx_template(sale_template()).await.unwrap();
        ledger.create_tx_template(keyed_sale_template()).await.unwrap();
        Books {
            ledger,
            journal,
            cash,
            revenue,
        }
    })
}

fn sale_params(books: &Books, amount: Decimal) -> Params {
    Params::new()
        .with("journal", books.journal.id)
        .with("cash", books.cash.id)
        .with("revenue", books.revenue.id)
        .with("amount", amount)
}

fn bench_posting_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("posting_latency");

    group.bench_function("post_two_leg_sale", |b| {
        let books = setup(&rt);
        b.to_async(&rt).iter(|| {
            let params = sale_params(&books, black_box(dec!(19.99)));
            let ledger = books.ledger.clone();
            async move { ledger.post_transaction("SALE", params).await.unwrap() }
        });
    });

    group.bench_function("idempotent_repost", |b| {
        let books = setup(&rt);
        let params = sale_params(&books, dec!(5)).with("reference", "dup");
        rt.block_on(books.ledger.post_transaction("KEYED_SALE", params.clone())).unwrap();
        b.to_async(&rt).iter(|| {
            let ledger = books.ledger.clone();
            let params = params.clone();
            async move { ledger.post_transaction("KEYED_SALE", params).await.unwrap() }
        });
    });

    group.finish();
}

fn bench_materialization(c: &mut Criterion) {
    let template = TxTemplate::create(sale_template(), chrono::Utc::now()).unwrap();
    let params = Params::new()
        .with("journal", tally_core::JournalId::new())
        .with("cash", tally_core::AccountId::new())
        .with("revenue", tally_core::AccountId::new())
        .with("amount", "123.45");

    c.bench_function("bind_and_materialize", |b| {
        b.iter(|| {
            let bound = template.bind_params(black_box(&params)).unwrap();
            black_box(template.materialize_entries(&bound.params).unwrap())
        });
    });
}

fn bench_balance_check_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_check_throughput");
    let currencies: Vec<Currency> = ["USD", "EUR", "BTC"].iter().map(|c| c.parse().unwrap()).collect();

    for legs in [2usize, 16, 128, 1024].iter() {
        group.throughput(Throughput::Elements(*legs as u64));
        group.bench_with_input(BenchmarkId::new("check_balanced", legs), legs, |b, &n| {
            // Pairs of equal debit/credit legs spread over currencies and layers.
            let entries: Vec<(Currency, Layer, Direction, Decimal)> = (0..n)
                .map(|i| {
                    let pair = i / 2;
                    let currency = currencies[pair % currencies.len()].clone();
                    let layer = if pair % 2 == 0 { Layer::Settled } else { Layer::Pending };
                    let direction = if i % 2 == 0 { Direction::Debit } else { Direction::Credit };
                    (currency, layer, direction, Decimal::new(pair as i64 + 1, 2))
                })
                .collect();

            b.iter(|| {
                check_balanced(entries.iter().map(|(c, l, d, u)| (c, *l, *d, *u))).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_posting_latency,
    bench_materialization,
    bench_balance_check_throughput
);
criterion_main!(benches);
