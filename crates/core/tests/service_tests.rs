// ═══════════════════════════════════════════════════════════════════
// Service Tests — accounts, buy lots, sells, dividend batches and
// read paths through the LotLedger facade
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use lot_ledger_core::errors::{CoreError, ErrorKind};
use lot_ledger_core::models::account::Account;
use lot_ledger_core::models::dividend::{DivAllocationInput, NewDividendBatch};
use lot_ledger_core::models::lot::{BuyLot, ImportedLot, ImportedSell, LotEdit, NewLot};
use lot_ledger_core::models::query::{
    FilterBound, ListLotsQuery, LotField, RangeFilter, SortOrder, SortSpec,
};
use lot_ledger_core::models::settings::LedgerSettings;
use lot_ledger_core::repository::memory::MemoryRepository;
use lot_ledger_core::LotLedger;

const ALICE: &str = "alice";
const BOB: &str = "bob";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn buy(account: &Account, code: &str, price: f64, amount: f64, on: NaiveDate) -> NewLot {
    NewLot {
        account_id: account.id,
        stock_code: code.into(),
        buy_price: price,
        buy_amount: amount,
        buy_date: on,
    }
}

fn dividend(code: &str, per_div: f64, on: NaiveDate, lots: &[(Uuid, f64)]) -> NewDividendBatch {
    NewDividendBatch {
        stock_code: code.into(),
        per_div,
        div_date: on,
        allocations: lots
            .iter()
            .map(|(id, amount)| DivAllocationInput {
                buy_record_id: *id,
                div_amount: *amount,
            })
            .collect(),
    }
}

async fn setup() -> (LotLedger, Account) {
    let ledger = LotLedger::in_memory();
    let account = ledger.create_account(ALICE, "Main", "USD").await.unwrap();
    (ledger, account)
}

async fn reference_lot(ledger: &LotLedger, account: &Account) -> BuyLot {
    ledger
        .create_lot(ALICE, buy(account, "AAPL", 10.0, 100.0, date(2024, 1, 1)))
        .await
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════

mod accounts {
    use super::*;

    #[tokio::test]
    async fn create_and_list_sorted_by_name() {
        let ledger = LotLedger::in_memory();
        ledger.create_account(ALICE, "Zeta", "usd").await.unwrap();
        ledger.create_account(ALICE, "Alpha", "HKD").await.unwrap();
        ledger.create_account(BOB, "Other", "EUR").await.unwrap();

        let accounts = ledger.list_accounts(ALICE).await.unwrap();
        let names: Vec<&str> = accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Zeta"]);
        assert_eq!(accounts[1].currency, "USD");
    }

    #[tokio::test]
    async fn invalid_currency_is_rejected() {
        let ledger = LotLedger::in_memory();
        assert!(matches!(
            ledger.create_account(ALICE, "Main", "DOLLARS").await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn missing_is_not_found_and_foreign_is_unauthorized() {
        let (ledger, account) = setup().await;
        assert!(matches!(
            ledger.get_account(ALICE, Uuid::new_v4()).await,
            Err(CoreError::AccountNotFound(_))
        ));
        assert!(matches!(
            ledger.get_account(BOB, account.id).await,
            Err(CoreError::Unauthorized(_))
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Buy lots & sells
// ═══════════════════════════════════════════════════════════════════

mod lots {
    use super::*;

    #[tokio::test]
    async fn create_starts_fully_unsold() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        assert_eq!(lot.unsold_amount, 100.0);
        assert_eq!(lot.profit_loss, 0.0);
        assert_eq!(ledger.get_lot(ALICE, lot.id).await.unwrap(), lot);
    }

    #[tokio::test]
    async fn create_requires_an_owned_account() {
        let (ledger, account) = setup().await;
        let mut missing = account.clone();
        missing.id = Uuid::new_v4();
        assert!(matches!(
            ledger
                .create_lot(ALICE, buy(&missing, "AAPL", 1.0, 1.0, date(2024, 1, 1)))
                .await,
            Err(CoreError::AccountNotFound(_))
        ));
        assert!(matches!(
            ledger
                .create_lot(BOB, buy(&account, "AAPL", 1.0, 1.0, date(2024, 1, 1)))
                .await,
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_non_positive_terms() {
        let (ledger, account) = setup().await;
        assert!(matches!(
            ledger
                .create_lot(ALICE, buy(&account, "AAPL", 0.0, 1.0, date(2024, 1, 1)))
                .await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            ledger
                .create_lot(ALICE, buy(&account, " ", 1.0, 1.0, date(2024, 1, 1)))
                .await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn sell_prices_and_records_the_sale() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;

        let (updated, allocation) = ledger
            .sell(ALICE, lot.id, 12.0, 40.0, date(2024, 7, 1))
            .await
            .unwrap();
        assert_eq!(allocation.profit_loss, 80.0);
        assert_eq!(allocation.apy, 44.14);
        assert_eq!(updated.unsold_amount, 60.0);
        assert_eq!(updated.profit_loss, 80.0);
        assert_eq!(ledger.get_lot(ALICE, lot.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn overselling_fails_and_changes_nothing() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        let (after_first, _) = ledger
            .sell(ALICE, lot.id, 12.0, 40.0, date(2024, 7, 1))
            .await
            .unwrap();

        match ledger.sell(ALICE, lot.id, 12.0, 70.0, date(2024, 8, 1)).await {
            Err(CoreError::ExceedsAvailable {
                remaining,
                requested,
            }) => {
                assert_eq!(remaining, 60.0);
                assert_eq!(requested, 70.0);
            }
            other => panic!("expected ExceedsAvailable, got {other:?}"),
        }
        assert_eq!(ledger.get_lot(ALICE, lot.id).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn sell_against_missing_or_foreign_lot() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        assert!(matches!(
            ledger.sell(ALICE, Uuid::new_v4(), 1.0, 1.0, date(2024, 2, 1)).await,
            Err(CoreError::LotNotFound(_))
        ));
        assert!(matches!(
            ledger.sell(BOB, lot.id, 1.0, 1.0, date(2024, 2, 1)).await,
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_sale_restores_the_lot() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        let (_, allocation) = ledger
            .sell(ALICE, lot.id, 12.0, 40.0, date(2024, 7, 1))
            .await
            .unwrap();

        let restored = ledger
            .delete_sell_allocation(ALICE, lot.id, allocation.id)
            .await
            .unwrap();
        assert_eq!(restored.unsold_amount, 100.0);
        assert_eq!(restored.profit_loss, 0.0);
        assert!(restored.sell_allocations.is_empty());

        assert!(matches!(
            ledger
                .delete_sell_allocation(ALICE, lot.id, allocation.id)
                .await,
            Err(CoreError::AllocationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn get_lot_lists_sales_newest_first() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        for day in [date(2024, 3, 1), date(2024, 9, 1), date(2024, 5, 1)] {
            ledger.sell(ALICE, lot.id, 11.0, 1.0, day).await.unwrap();
        }
        let fetched = ledger.get_lot(ALICE, lot.id).await.unwrap();
        let dates: Vec<NaiveDate> = fetched.sell_allocations.iter().map(|s| s.sell_date).collect();
        assert_eq!(dates, [date(2024, 9, 1), date(2024, 5, 1), date(2024, 3, 1)]);
    }

    #[tokio::test]
    async fn edit_checks_existing_sales() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        ledger
            .sell(ALICE, lot.id, 12.0, 40.0, date(2024, 7, 1))
            .await
            .unwrap();

        let mut edit = LotEdit {
            account_id: account.id,
            stock_code: "AAPL".into(),
            buy_price: 10.0,
            buy_amount: 30.0,
            buy_date: date(2024, 1, 1),
        };
        assert!(matches!(
            ledger.edit_lot(ALICE, lot.id, edit.clone()).await,
            Err(CoreError::BelowSoldAmount { pre_sold, .. }) if pre_sold == 40.0
        ));

        edit.buy_amount = 50.0;
        edit.buy_date = date(2024, 8, 1);
        assert!(matches!(
            ledger.edit_lot(ALICE, lot.id, edit.clone()).await,
            Err(CoreError::DateAfterEarliestSale { earliest, .. }) if earliest == date(2024, 7, 1)
        ));

        edit.buy_date = date(2024, 2, 1);
        let edited = ledger.edit_lot(ALICE, lot.id, edit).await.unwrap();
        assert_eq!(edited.unsold_amount, 10.0);
        // P&L stays pinned to the sell-time computation.
        assert_eq!(edited.sell_allocations[0].profit_loss, 80.0);
    }

    #[tokio::test]
    async fn moving_a_lot_relinks_its_dividends() {
        let (ledger, account) = setup().await;
        let other = ledger.create_account(ALICE, "Second", "USD").await.unwrap();
        let lot = reference_lot(&ledger, &account).await;
        let batch = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot.id, 100.0)]))
            .await
            .unwrap();

        let edit = LotEdit {
            account_id: other.id,
            stock_code: lot.stock_code.clone(),
            buy_price: lot.buy_price,
            buy_amount: lot.buy_amount,
            buy_date: lot.buy_date,
        };
        ledger.edit_lot(ALICE, lot.id, edit).await.unwrap();

        let relinked = ledger.get_dividend_batch(ALICE, batch.id).await.unwrap();
        assert_eq!(relinked.account_ids, vec![other.id]);
        assert_eq!(relinked.div_records[0].account_id, other.id);
    }

    #[tokio::test]
    async fn stock_code_is_fixed_once_dividends_reference_the_lot() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        let batch = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot.id, 100.0)]))
            .await
            .unwrap();

        let recode = LotEdit {
            account_id: account.id,
            stock_code: "MSFT".into(),
            buy_price: lot.buy_price,
            buy_amount: lot.buy_amount,
            buy_date: lot.buy_date,
        };
        assert!(matches!(
            ledger.edit_lot(ALICE, lot.id, recode.clone()).await,
            Err(CoreError::ValidationError(_))
        ));
        assert_eq!(ledger.get_lot(ALICE, lot.id).await.unwrap().stock_code, "AAPL");

        ledger.delete_dividend_batch(ALICE, batch.id).await.unwrap();
        let recoded = ledger.edit_lot(ALICE, lot.id, recode).await.unwrap();
        assert_eq!(recoded.stock_code, "MSFT");
    }

    #[tokio::test]
    async fn cannot_move_a_lot_into_a_foreign_account() {
        let (ledger, account) = setup().await;
        let foreign = ledger.create_account(BOB, "Bob's", "USD").await.unwrap();
        let lot = reference_lot(&ledger, &account).await;
        let edit = LotEdit {
            account_id: foreign.id,
            stock_code: "AAPL".into(),
            buy_price: 10.0,
            buy_amount: 100.0,
            buy_date: date(2024, 1, 1),
        };
        assert!(matches!(
            ledger.edit_lot(ALICE, lot.id, edit).await,
            Err(CoreError::Unauthorized(_))
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Bulk import
// ═══════════════════════════════════════════════════════════════════

mod import {
    use super::*;

    fn imported(amount: f64, sells: &[f64]) -> ImportedLot {
        ImportedLot {
            stock_code: "AAPL".into(),
            buy_price: 10.0,
            buy_amount: amount,
            buy_date: date(2024, 1, 1),
            sells: sells
                .iter()
                .map(|s| ImportedSell {
                    sell_price: 12.0,
                    sell_amount: *s,
                    sell_date: date(2024, 7, 1),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn imports_lots_with_their_sales() {
        let (ledger, account) = setup().await;
        let lots = ledger
            .import_lots(ALICE, account.id, vec![imported(100.0, &[40.0]), imported(5.0, &[])])
            .await
            .unwrap();
        assert_eq!(lots.len(), 2);
        assert_eq!(lots[0].unsold_amount, 60.0);
        assert_eq!(lots[0].profit_loss, 80.0);

        let page = ledger.list_lots(ALICE, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn one_oversold_lot_rejects_the_whole_import() {
        let (ledger, account) = setup().await;
        let result = ledger
            .import_lots(
                ALICE,
                account.id,
                vec![imported(100.0, &[40.0]), imported(10.0, &[6.0, 6.0])],
            )
            .await;
        assert!(matches!(result, Err(CoreError::ExceedsAvailable { .. })));

        let page = ledger.list_lots(ALICE, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn imports_from_json() {
        let (ledger, account) = setup().await;
        let json = r#"[
            {"stockCode": "MSFT", "buyPrice": 300, "buyAmount": 10, "buyDate": "2024-01-02",
             "sells": [{"sellPrice": 330, "sellAmount": 4, "sellDate": "2024-03-01"}]},
            {"stockCode": "MSFT", "buyPrice": 310, "buyAmount": 5, "buyDate": "2024-02-02"}
        ]"#;
        let lots = ledger
            .import_lots_from_json(ALICE, account.id, json)
            .await
            .unwrap();
        assert_eq!(lots[0].unsold_amount, 6.0);
        assert_eq!(lots[0].profit_loss, 120.0);
        assert_eq!(lots[1].sell_allocations.len(), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let (ledger, account) = setup().await;
        let err = ledger
            .import_lots_from_json(ALICE, account.id, "[{")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let page = ledger.list_lots(ALICE, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Dividend batches
// ═══════════════════════════════════════════════════════════════════

mod dividends {
    use super::*;

    async fn two_accounts_two_lots() -> (LotLedger, Account, Account, BuyLot, BuyLot) {
        let (ledger, x) = setup().await;
        let y = ledger.create_account(ALICE, "Second", "USD").await.unwrap();
        let lot_a = ledger
            .create_lot(ALICE, buy(&x, "AAPL", 10.0, 100.0, date(2024, 1, 1)))
            .await
            .unwrap();
        let lot_b = ledger
            .create_lot(ALICE, buy(&y, "AAPL", 11.0, 50.0, date(2024, 3, 1)))
            .await
            .unwrap();
        (ledger, x, y, lot_a, lot_b)
    }

    #[tokio::test]
    async fn create_derives_account_ids() {
        let (ledger, x, y, lot_a, lot_b) = two_accounts_two_lots().await;
        let batch = ledger
            .create_dividend_batch(
                ALICE,
                dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 100.0), (lot_b.id, 50.0)]),
            )
            .await
            .unwrap();
        assert_eq!(batch.account_ids, vec![x.id, y.id]);
        assert_eq!(batch.div_records[1].account_id, y.id);
    }

    #[tokio::test]
    async fn unknown_lot_fails_create() {
        let (ledger, _, _, lot_a, _) = two_accounts_two_lots().await;
        assert!(matches!(
            ledger
                .create_dividend_batch(
                    ALICE,
                    dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 1.0), (Uuid::new_v4(), 1.0)]),
                )
                .await,
            Err(CoreError::LotNotFound(_))
        ));
        assert!(ledger
            .stock_codes_with_dividends(ALICE, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn lot_of_another_stock_is_rejected() {
        let (ledger, x, _, lot_a, _) = two_accounts_two_lots().await;
        let msft = ledger
            .create_lot(ALICE, buy(&x, "MSFT", 300.0, 1.0, date(2024, 1, 1)))
            .await
            .unwrap();
        assert!(matches!(
            ledger
                .create_dividend_batch(
                    ALICE,
                    dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 1.0), (msft.id, 1.0)]),
                )
                .await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn edit_replaces_everything() {
        let (ledger, _, y, lot_a, lot_b) = two_accounts_two_lots().await;
        let batch = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 100.0)]))
            .await
            .unwrap();

        let edited = ledger
            .edit_dividend_batch(
                ALICE,
                batch.id,
                dividend("AAPL", 0.75, date(2024, 6, 15), &[(lot_b.id, 20.0)]),
            )
            .await
            .unwrap();
        assert_eq!(edited.id, batch.id);
        assert_eq!(edited.per_div, 0.75);
        assert_eq!(edited.account_ids, vec![y.id]);
        assert_eq!(edited.div_records.len(), 1);
        assert_eq!(ledger.get_dividend_batch(ALICE, batch.id).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn edit_and_delete_missing_batch() {
        let (ledger, _, _, lot_a, _) = two_accounts_two_lots().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            ledger
                .edit_dividend_batch(ALICE, missing, dividend("AAPL", 1.0, date(2024, 6, 1), &[(lot_a.id, 1.0)]))
                .await,
            Err(CoreError::BatchNotFound(id)) if id == missing
        ));
        assert!(matches!(
            ledger.delete_dividend_batch(ALICE, missing).await,
            Err(CoreError::BatchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_the_batch() {
        let (ledger, _, _, lot_a, _) = two_accounts_two_lots().await;
        let batch = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 1.0, date(2024, 6, 1), &[(lot_a.id, 1.0)]))
            .await
            .unwrap();
        ledger.delete_dividend_batch(ALICE, batch.id).await.unwrap();
        assert!(matches!(
            ledger.get_dividend_batch(ALICE, batch.id).await,
            Err(CoreError::BatchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn foreign_caller_cannot_see_a_batch() {
        let (ledger, _, _, lot_a, _) = two_accounts_two_lots().await;
        let batch = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 1.0, date(2024, 6, 1), &[(lot_a.id, 1.0)]))
            .await
            .unwrap();
        assert!(matches!(
            ledger.get_dividend_batch(BOB, batch.id).await,
            Err(CoreError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.delete_dividend_batch(BOB, batch.id).await,
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn read_paths_filter_by_account_membership() {
        let (ledger, x, y, lot_a, lot_b) = two_accounts_two_lots().await;
        let msft = ledger
            .create_lot(ALICE, buy(&y, "MSFT", 300.0, 10.0, date(2024, 1, 1)))
            .await
            .unwrap();
        ledger
            .create_dividend_batch(
                ALICE,
                dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 100.0), (lot_b.id, 50.0)]),
            )
            .await
            .unwrap();
        ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.25, date(2024, 9, 1), &[(lot_a.id, 100.0)]))
            .await
            .unwrap();
        ledger
            .create_dividend_batch(ALICE, dividend("MSFT", 2.0, date(2024, 5, 1), &[(msft.id, 10.0)]))
            .await
            .unwrap();

        let x_only = [x.id];
        let batches = ledger
            .dividend_batches_for_stock(ALICE, Some(&x_only), "AAPL")
            .await
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].div_date, date(2024, 9, 1));

        assert_eq!(
            ledger.stock_codes_with_dividends(ALICE, Some(&x_only)).await.unwrap(),
            vec!["AAPL".to_string()]
        );
        assert_eq!(
            ledger.stock_codes_with_dividends(ALICE, None).await.unwrap(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );

        let totals = ledger.total_dividend_by_stock_code(ALICE, None).await.unwrap();
        let expected: BTreeMap<String, f64> =
            [("AAPL".to_string(), 100.0), ("MSFT".to_string(), 20.0)].into();
        assert_eq!(totals, expected);

        let x_totals = ledger
            .total_dividend_by_stock_code(ALICE, Some(&x_only))
            .await
            .unwrap();
        assert_eq!(x_totals["AAPL"], 75.0);
    }

    #[tokio::test]
    async fn dividends_for_lot_unwinds_batches() {
        let (ledger, _, _, lot_a, lot_b) = two_accounts_two_lots().await;
        let first = ledger
            .create_dividend_batch(
                ALICE,
                dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 100.0), (lot_b.id, 50.0)]),
            )
            .await
            .unwrap();
        let second = ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.25, date(2024, 9, 1), &[(lot_a.id, 80.0)]))
            .await
            .unwrap();

        let for_a = ledger.dividends_for_lot(ALICE, lot_a.id).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].batch_id, second.id);
        assert_eq!(for_a[0].total(), 20.0);
        assert_eq!(for_a[1].batch_id, first.id);
        assert_eq!(for_a[1].div_amount, 100.0);

        let for_b = ledger.dividends_for_lot(ALICE, lot_b.id).await.unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].per_div, 0.5);
    }

    #[tokio::test]
    async fn batch_detail_joins_lots_newest_buy_first() {
        let (ledger, _, _, lot_a, lot_b) = two_accounts_two_lots().await;
        let batch = ledger
            .create_dividend_batch(
                ALICE,
                dividend("AAPL", 0.5, date(2024, 6, 1), &[(lot_a.id, 100.0), (lot_b.id, 50.0)]),
            )
            .await
            .unwrap();

        let detail = ledger.dividend_batch_detail(ALICE, batch.id).await.unwrap();
        assert_eq!(detail.total, 75.0);
        assert_eq!(detail.lines[0].buy_record_id, lot_b.id);
        assert_eq!(detail.lines[0].buy_date, Some(date(2024, 3, 1)));
        assert_eq!(detail.lines[0].total, 25.0);
        assert_eq!(detail.lines[1].buy_price, Some(10.0));
        assert_eq!(detail.lines[1].buy_amount, Some(100.0));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Listing & aggregation
// ═══════════════════════════════════════════════════════════════════

mod queries {
    use super::*;

    async fn five_lots(ledger: &LotLedger, account: &Account) -> Vec<BuyLot> {
        let mut lots = Vec::new();
        for (i, price) in [10.0, 30.0, 20.0, 50.0, 40.0].into_iter().enumerate() {
            let lot = ledger
                .create_lot(
                    ALICE,
                    buy(account, "AAPL", price, 10.0, date(2024, 1, 1 + i as u32)),
                )
                .await
                .unwrap();
            lots.push(lot);
        }
        lots
    }

    #[tokio::test]
    async fn default_sort_is_newest_buy_first() {
        let (ledger, account) = setup().await;
        let lots = five_lots(&ledger, &account).await;
        let page = ledger.list_lots(ALICE, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.data[0].id, lots[4].id);
        assert_eq!(page.data[4].id, lots[0].id);
        assert_eq!(page.next_page, None);
    }

    #[tokio::test]
    async fn pagination_reports_total_and_next_page() {
        let (ledger, account) = setup().await;
        five_lots(&ledger, &account).await;
        let mut query = ListLotsQuery {
            sort: Some(SortSpec {
                key: LotField::BuyPrice,
                order: SortOrder::Asc,
            }),
            limit: Some(2),
            ..ListLotsQuery::default()
        };

        let first = ledger.list_lots(ALICE, &query).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.next_page, Some(2));
        let prices: Vec<f64> = first.data.iter().map(|l| l.buy_price).collect();
        assert_eq!(prices, [10.0, 20.0]);

        query.page = 3;
        let last = ledger.list_lots(ALICE, &query).await.unwrap();
        assert_eq!(last.data.len(), 1);
        assert_eq!(last.data[0].buy_price, 50.0);
        assert_eq!(last.next_page, None);

        query.page = 0;
        assert!(matches!(
            ledger.list_lots(ALICE, &query).await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn range_filters_and_stock_codes() {
        let (ledger, account) = setup().await;
        five_lots(&ledger, &account).await;
        ledger
            .create_lot(ALICE, buy(&account, "MSFT", 25.0, 1.0, date(2024, 2, 1)))
            .await
            .unwrap();

        let mut filter = BTreeMap::new();
        filter.insert(
            LotField::BuyPrice,
            RangeFilter::between(FilterBound::Number(20.0), FilterBound::Number(40.0)),
        );
        let query = ListLotsQuery {
            stock_codes: Some(vec!["AAPL".into()]),
            filter,
            ..ListLotsQuery::default()
        };
        let page = ledger.list_lots(ALICE, &query).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.data.iter().all(|l| l.stock_code == "AAPL"));

        let mut by_date = BTreeMap::new();
        by_date.insert(
            LotField::BuyDate,
            RangeFilter::at_least(FilterBound::Date(date(2024, 1, 4))),
        );
        let query = ListLotsQuery {
            filter: by_date,
            ..ListLotsQuery::default()
        };
        assert_eq!(ledger.list_lots(ALICE, &query).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn page_size_falls_back_and_clamps() {
        let settings = LedgerSettings {
            default_page_limit: 2,
            max_page_limit: 3,
            ..LedgerSettings::default()
        };
        let ledger = LotLedger::new(Arc::new(MemoryRepository::new()), settings).unwrap();
        let account = ledger.create_account(ALICE, "Main", "USD").await.unwrap();
        five_lots(&ledger, &account).await;

        let page = ledger.list_lots(ALICE, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.data.len(), 2);

        let query = ListLotsQuery {
            limit: Some(1_000),
            ..ListLotsQuery::default()
        };
        let page = ledger.list_lots(ALICE, &query).await.unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.next_page, Some(2));
    }

    #[tokio::test]
    async fn foreign_account_in_scope_is_unauthorized() {
        let (ledger, _) = setup().await;
        let foreign = ledger.create_account(BOB, "Bob's", "USD").await.unwrap();
        let query = ListLotsQuery {
            account_ids: Some(vec![foreign.id]),
            ..ListLotsQuery::default()
        };
        assert!(matches!(
            ledger.list_lots(ALICE, &query).await,
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn stock_summary_folds_lots_and_dividends() {
        let (ledger, account) = setup().await;
        let first = reference_lot(&ledger, &account).await;
        ledger
            .sell(ALICE, first.id, 12.0, 40.0, date(2024, 7, 1))
            .await
            .unwrap();
        ledger
            .create_lot(ALICE, buy(&account, "AAPL", 13.0, 30.0, date(2024, 2, 1)))
            .await
            .unwrap();
        ledger
            .create_dividend_batch(ALICE, dividend("AAPL", 0.5, date(2024, 6, 1), &[(first.id, 60.0)]))
            .await
            .unwrap();

        let summary = ledger.stock_summary(ALICE, None).await.unwrap();
        let aapl = &summary["AAPL"];
        assert_eq!(aapl.total_buy_amount, 130.0);
        assert_eq!(aapl.total_unsold_amount, 90.0);
        assert_eq!(aapl.total_cost, 990.0);
        assert_eq!(aapl.avg_cost, 11.0);
        assert_eq!(aapl.total_pl, 80.0);
        assert_eq!(aapl.total_div, 30.0);
    }

    #[tokio::test]
    async fn account_summaries_per_account() {
        let (ledger, account) = setup().await;
        let empty = ledger.create_account(ALICE, "Empty", "EUR").await.unwrap();
        let lot = reference_lot(&ledger, &account).await;
        ledger
            .sell(ALICE, lot.id, 12.0, 100.0, date(2024, 7, 1))
            .await
            .unwrap();
        ledger
            .create_lot(ALICE, buy(&account, "MSFT", 300.0, 2.0, date(2024, 1, 1)))
            .await
            .unwrap();

        let summaries = ledger.account_summaries(ALICE, None).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].account_id, empty.id);
        assert_eq!(summaries[0].lot_count, 0);

        let main = &summaries[1];
        assert_eq!(main.lot_count, 2);
        assert_eq!(main.open_lot_count, 1);
        assert_eq!(main.total_cost, 600.0);
        assert_eq!(main.realized_pl, 200.0);
        assert_eq!(main.total_div, 0.0);
    }

    #[tokio::test]
    async fn sell_allocations_flatten_newest_first() {
        let (ledger, account) = setup().await;
        let lot = reference_lot(&ledger, &account).await;
        ledger
            .sell(ALICE, lot.id, 12.0, 10.0, date(2024, 3, 1))
            .await
            .unwrap();
        ledger
            .sell(ALICE, lot.id, 14.0, 10.0, date(2024, 6, 1))
            .await
            .unwrap();

        let views = ledger.sell_allocations(ALICE, None).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].sell_date, date(2024, 6, 1));
        assert_eq!(views[0].buy_record_id, lot.id);
        assert_eq!(views[0].stock_code, "AAPL");
        assert_eq!(views[0].profit_loss, 40.0);
        assert_eq!(views[1].buy_price, 10.0);
    }

    #[tokio::test]
    async fn another_owner_sees_nothing() {
        let (ledger, account) = setup().await;
        reference_lot(&ledger, &account).await;
        let page = ledger.list_lots(BOB, &ListLotsQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(ledger.stock_summary(BOB, None).await.unwrap().is_empty());
    }
}
