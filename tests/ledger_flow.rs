use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use stock_ledger::accounting::TransactionType;
use stock_ledger::accounts::AccountLookup;
use stock_ledger::config::Config;
use stock_ledger::error::{LedgerError, Result};
use stock_ledger::ledger::{Ledger, LedgerTx};
use stock_ledger::service::{NewTransaction, TransactionQuery, TransactionService};

fn service(dir: &tempfile::TempDir) -> TransactionService {
    service_with(dir, &Config::default())
}

fn service_with(dir: &tempfile::TempDir, config: &Config) -> TransactionService {
    let ledger = Ledger::open(&dir.path().join("ledger.db"), config.busy_timeout()).unwrap();
    TransactionService::new(ledger, config)
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()
}

fn trade(kind: TransactionType, quantity: Decimal, price: Decimal, date: DateTime<Utc>) -> NewTransaction {
    NewTransaction {
        ticker: "VNM".to_string(),
        transaction_type: kind,
        quantity,
        price,
        fee: Decimal::ZERO,
        tax_rate: Decimal::ZERO,
        transaction_date: date,
        stock_account_id: None,
        notes: None,
    }
}

#[test]
fn sell_consumes_oldest_lots_first() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    service.record("u1", trade(TransactionType::Buy, dec!(50), dec!(12), day(9))).unwrap();
    service.record("u1", trade(TransactionType::Buy, dec!(100), dec!(10), day(2))).unwrap();
    let sold = service
        .record("u1", trade(TransactionType::Sell, dec!(120), dec!(15), day(20)))
        .unwrap();

    assert_eq!(sold.transaction.calculated_pl, Some(dec!(560)));
    let outcome = sold.sale.unwrap();
    assert_eq!(outcome.cost_basis, dec!(1240));
    assert_eq!(outcome.consumptions.len(), 2);
    assert_eq!(outcome.consumptions[0].acquired_at, day(2));
    assert_eq!(outcome.consumptions[0].quantity_consumed, dec!(100));
    assert_eq!(outcome.consumptions[1].quantity_consumed, dec!(20));

    let lots = service.lots("u1", None, Some("vnm")).unwrap();
    let remaining: Decimal = lots.iter().map(|l| l.quantity_remaining).sum();
    assert_eq!(remaining, dec!(30));

    let audit = service.consumptions("u1", sold.transaction.id).unwrap();
    let consumed: Decimal = audit.consumptions.iter().map(|c| c.quantity_consumed).sum();
    assert_eq!(consumed, dec!(120));
    assert_eq!(service.recompute("u1", sold.transaction.id).unwrap(), dec!(560));
}

#[test]
fn buy_creates_one_lot_with_zero_pl() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    let mut buy = trade(TransactionType::Buy, dec!(10), dec!(25.5), day(3));
    buy.fee = dec!(2);
    let recorded = service.record("u1", buy).unwrap();

    assert_eq!(recorded.transaction.calculated_pl, Some(Decimal::ZERO));
    let lot = recorded.purchase_lot.unwrap();
    assert_eq!(lot.quantity_remaining, dec!(10));
    assert_eq!(lot.transaction_id, Some(recorded.transaction.id));
    assert_eq!(service.lots("u1", None, None).unwrap().len(), 1);
}

#[test]
fn oversell_leaves_the_ledger_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    service.record("u1", trade(TransactionType::Buy, dec!(10), dec!(10), day(2))).unwrap();
    let before = service.lots("u1", None, None).unwrap();

    let err = service
        .record("u1", trade(TransactionType::Sell, dec!(11), dec!(12), day(3)))
        .unwrap_err();
    match err {
        LedgerError::InsufficientInventory { requested, available, .. } => {
            assert_eq!(requested, dec!(11));
            assert_eq!(available, dec!(10));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(service.lots("u1", None, None).unwrap(), before);
    let page = service.list("u1", &TransactionQuery::default()).unwrap();
    assert_eq!(page.total_count, 1);
}

#[test]
fn users_do_not_share_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    service.record("u1", trade(TransactionType::Buy, dec!(10), dec!(10), day(2))).unwrap();
    let err = service
        .record("u2", trade(TransactionType::Sell, dec!(1), dec!(10), day(3)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientInventory { .. }));

    let foreign = service.positions("u1", None).unwrap()[0].stock_account_id.clone();
    let mut sell = trade(TransactionType::Sell, dec!(1), dec!(10), day(3));
    sell.stock_account_id = Some(foreign);
    assert!(matches!(service.record("u2", sell), Err(LedgerError::Validation(_))));
}

#[test]
fn listing_reports_profit_stats() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    service.record("u1", trade(TransactionType::Buy, dec!(10), dec!(10), day(2))).unwrap();
    service.record("u1", trade(TransactionType::Sell, dec!(5), dec!(12), day(3))).unwrap();
    service.record("u1", trade(TransactionType::Sell, dec!(5), dec!(8), day(4))).unwrap();

    let page = service.list("u1", &TransactionQuery::default()).unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.transactions[0].transaction_date, day(4));
    assert_eq!(page.profit_stats.total_transactions, 2);
    assert_eq!(page.profit_stats.gross_profit_loss, dec!(0));
    assert_eq!(page.profit_stats.success_rate, dec!(50));

    let bad = TransactionQuery {
        page_size: 500,
        ..TransactionQuery::default()
    };
    assert!(matches!(service.list("u1", &bad), Err(LedgerError::Validation(_))));
}

#[test]
fn concurrent_sells_never_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(service(&dir));
    service.record("u1", trade(TransactionType::Buy, dec!(100), dec!(10), day(2))).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service.record("u1", trade(TransactionType::Sell, dec!(20), dec!(11), day(5)))
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => accepted += 1,
            Err(LedgerError::InsufficientInventory { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(accepted, 5);
    let lots = service.lots("u1", None, None).unwrap();
    assert_eq!(lots[0].quantity_remaining, Decimal::ZERO);
}

struct BrokerAccount;

impl AccountLookup for BrokerAccount {
    fn resolve(&self, tx: &LedgerTx<'_>, user_id: &str, _requested: Option<&str>) -> Result<String> {
        let id = format!("{}-broker", user_id);
        if tx.account(&id)?.is_none() {
            tx.insert_account(user_id, &id, "Broker", Some("SSI"))?;
        }
        Ok(id)
    }
}

#[test]
fn custom_account_lookup_books_every_trade() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).with_account_lookup(Box::new(BrokerAccount));

    let recorded = service
        .record("u1", trade(TransactionType::Buy, dec!(3), dec!(7), day(2)))
        .unwrap();
    assert_eq!(recorded.transaction.stock_account_id, "u1-broker");

    let positions = service.positions("u1", Some("u1-broker")).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(3));
}

#[test]
fn same_second_lots_are_consumed_by_acquisition_time() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);
    let second = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();

    service
        .record("u1", trade(TransactionType::Buy, dec!(10), dec!(20), second + Duration::milliseconds(900)))
        .unwrap();
    service
        .record("u1", trade(TransactionType::Buy, dec!(10), dec!(10), second + Duration::milliseconds(100)))
        .unwrap();
    let sold = service
        .record("u1", trade(TransactionType::Sell, dec!(10), dec!(15), second + Duration::seconds(1)))
        .unwrap();

    assert_eq!(sold.transaction.calculated_pl, Some(dec!(50)));
    let consumed = &sold.sale.unwrap().consumptions[0];
    assert_eq!(consumed.unit_cost, dec!(10));
    assert_eq!(consumed.acquired_at, second + Duration::milliseconds(100));

    let lots = service.lots("u1", None, None).unwrap();
    assert_eq!(lots[0].acquired_at, second + Duration::milliseconds(100));
    assert_eq!(lots[1].quantity_remaining, dec!(10));
}

#[test]
fn recompute_keeps_the_recorded_scale_after_config_change() {
    let dir = tempfile::tempdir().unwrap();
    let sold = {
        let service = service(&dir);
        service.record("u1", trade(TransactionType::Buy, dec!(2), dec!(10.25), day(2))).unwrap();
        service.record("u1", trade(TransactionType::Sell, dec!(2), dec!(12), day(3))).unwrap()
    };
    assert_eq!(sold.transaction.calculated_pl, Some(dec!(3.5)));

    let config = Config {
        rounding_scale: 0,
        ..Config::default()
    };
    let reopened = service_with(&dir, &config);
    assert_eq!(reopened.recompute("u1", sold.transaction.id).unwrap(), dec!(3.5));
}

#[test]
fn tax_rate_above_one_hundred_is_rejected_for_buys() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir);

    let mut buy = trade(TransactionType::Buy, dec!(1), dec!(10), day(2));
    buy.tax_rate = dec!(500);
    assert!(matches!(service.record("u1", buy), Err(LedgerError::Validation(_))));
    assert!(service.lots("u1", None, None).unwrap().is_empty());
}
