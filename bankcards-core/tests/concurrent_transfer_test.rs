//! Concurrent transfer tests
//!
//! Transfers running on many threads against shared cards must never
//! deadlock, lose an update, or break conservation of money.
//!
//! Run with: cargo test --test concurrent_transfer_test -- --nocapture

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use bankcards_core::adapters::duckdb::DuckDbCardStore;
use bankcards_core::adapters::memory::InMemoryCardStore;
use bankcards_core::domain::NewCard;
use bankcards_core::ports::{CardStore, CardTransaction, OwnerDirectory};
use bankcards_core::services::{CardCipher, ExpirySweeper, TransferService};
use bankcards_core::{CardId, CardStatus, Error, Owner, OwnerId};

const OWNER: OwnerId = 1;
const THREAD_PAIRS: usize = 4;
const ITERATIONS_PER_THREAD: usize = 25;

fn cipher() -> Arc<CardCipher> {
    Arc::new(CardCipher::from_config("plain:0123456789abcdef", None).unwrap())
}

fn number(i: usize) -> String {
    format!("4000{:012}", i)
}

/// Insert `count` cards numbered 1..=count for OWNER; ids come out 1..=count
fn seed_cards(store: &dyn CardStore, cipher: &CardCipher, count: usize) -> Vec<CardId> {
    (1..=count)
        .map(|i| {
            store
                .insert(NewCard {
                    owner_id: OWNER,
                    number_encrypted: cipher.encrypt(&number(i)).unwrap(),
                    valid_until: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                })
                .unwrap()
                .id
        })
        .collect()
}

fn set_balance(store: &dyn CardStore, id: CardId, balance: Decimal) {
    let mut tx = store.begin().unwrap();
    let mut card = tx.lock_by_id(id).unwrap().unwrap();
    card.balance = balance;
    tx.save(&card).unwrap();
    tx.commit().unwrap();
}

fn balance(store: &dyn CardStore, id: CardId) -> Decimal {
    store.find_by_id(id).unwrap().unwrap().balance
}

/// Run opposite-direction transfers between the cards numbered `a` and `b`
/// from `THREAD_PAIRS * 2` threads released together
fn hammer(service: Arc<TransferService>, a: usize, b: usize, amount: Decimal) -> (usize, usize) {
    let barrier = Arc::new(Barrier::new(THREAD_PAIRS * 2));
    let mut handles = Vec::new();

    for t in 0..THREAD_PAIRS * 2 {
        let barrier = Arc::clone(&barrier);
        let service = Arc::clone(&service);
        let (from, to) = if t % 2 == 0 { (number(a), number(b)) } else { (number(b), number(a)) };

        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut committed = 0;
            let mut rejected = 0;
            for _ in 0..ITERATIONS_PER_THREAD {
                match service.transfer_between(OWNER, &from, &to, amount) {
                    Ok(_) => committed += 1,
                    Err(Error::InsufficientFunds(_)) => rejected += 1,
                    Err(e) => panic!("unexpected transfer error: {}", e),
                }
            }
            (committed, rejected)
        }));
    }

    handles
        .into_iter()
        .map(|h| h.join().expect("transfer thread panicked"))
        .fold((0, 0), |acc, r| (acc.0 + r.0, acc.1 + r.1))
}

#[test]
fn test_opposite_directions_between_ids_3_and_7_complete() {
    let store = Arc::new(InMemoryCardStore::with_lock_timeout(Duration::from_secs(10)));
    store.add_owner(Owner::new(OWNER, "owner")).unwrap();
    let cipher = cipher();
    let ids = seed_cards(store.as_ref(), &cipher, 7);
    assert_eq!((ids[2], ids[6]), (3, 7));

    set_balance(store.as_ref(), 3, dec!(100.00));
    set_balance(store.as_ref(), 7, dec!(100.00));

    let service = Arc::new(TransferService::new(store.clone(), store.clone(), cipher));
    let (committed, rejected) = hammer(service, 3, 7, dec!(1.25));

    assert_eq!(committed + rejected, THREAD_PAIRS * 2 * ITERATIONS_PER_THREAD);
    assert!(committed > 0);
    assert_eq!(balance(store.as_ref(), 3) + balance(store.as_ref(), 7), dec!(200.00));
    assert!(balance(store.as_ref(), 3) >= Decimal::ZERO);
    assert!(balance(store.as_ref(), 7) >= Decimal::ZERO);
}

#[test]
fn test_no_lost_updates_on_a_shared_card() {
    // Three sources all pay into card 2 at the same time
    let store = Arc::new(InMemoryCardStore::new());
    store.add_owner(Owner::new(OWNER, "owner")).unwrap();
    let cipher = cipher();
    seed_cards(store.as_ref(), &cipher, 4);
    for id in [1, 3, 4] {
        set_balance(store.as_ref(), id, dec!(50.00));
    }

    let service = Arc::new(TransferService::new(store.clone(), store.clone(), cipher));
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = [1usize, 3, 4]
        .into_iter()
        .map(|source| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    service
                        .transfer_between(OWNER, &number(source), &number(2), dec!(5.00))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(balance(store.as_ref(), 2), dec!(150.00));
    for id in [1, 3, 4] {
        assert!(balance(store.as_ref(), id).is_zero());
    }
}

#[test]
fn test_overdraw_race_never_goes_negative() {
    let store = Arc::new(InMemoryCardStore::new());
    store.add_owner(Owner::new(OWNER, "owner")).unwrap();
    let cipher = cipher();
    seed_cards(store.as_ref(), &cipher, 2);
    set_balance(store.as_ref(), 1, dec!(10.00));

    // Every thread only moves 1 -> 2; only ten of them can succeed
    let service = Arc::new(TransferService::new(store.clone(), store.clone(), cipher));
    let barrier = Arc::new(Barrier::new(20));
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.transfer_between(OWNER, &number(1), &number(2), dec!(1.00))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(Error::InsufficientFunds(_))))
        .count();

    assert_eq!(ok, 10);
    assert_eq!(short, 10);
    assert!(balance(store.as_ref(), 1).is_zero());
    assert_eq!(balance(store.as_ref(), 2), dec!(10.00));
}

#[test]
fn test_lock_timeout_surfaces_as_retryable() {
    let store = Arc::new(InMemoryCardStore::with_lock_timeout(Duration::from_millis(50)));
    store.add_owner(Owner::new(OWNER, "owner")).unwrap();
    let cipher = cipher();
    seed_cards(store.as_ref(), &cipher, 2);
    set_balance(store.as_ref(), 1, dec!(10.00));

    let service = TransferService::new(store.clone(), store.clone(), cipher);

    // Someone else holds card 1
    let mut held = store.begin().unwrap();
    held.lock_by_id(1).unwrap().unwrap();

    let err = service
        .transfer_between(OWNER, &number(1), &number(2), dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::LockTimeout(1)));
    assert!(err.is_retryable());

    drop(held);
    // Resubmitting the same request now succeeds
    let receipt = service
        .transfer_between(OWNER, &number(1), &number(2), dec!(1.00))
        .unwrap();
    assert_eq!(receipt.from_balance, dec!(9.00));
}

#[test]
fn test_sweep_waits_for_transfer_then_blocks_later_debits() {
    let store = Arc::new(InMemoryCardStore::new());
    store.add_owner(Owner::new(OWNER, "owner")).unwrap();
    let cipher = cipher();
    let lapsed = store
        .insert(NewCard {
            owner_id: OWNER,
            number_encrypted: cipher.encrypt(&number(1)).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        })
        .unwrap();
    store
        .insert(NewCard {
            owner_id: OWNER,
            number_encrypted: cipher.encrypt(&number(2)).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
        })
        .unwrap();
    set_balance(store.as_ref(), lapsed.id, dec!(20.00));

    // A transfer already holds the lapsed card
    let mut in_flight = store.begin().unwrap();
    let mut card = in_flight
        .lock_by_id_owner_and_status(lapsed.id, OWNER, CardStatus::Active)
        .unwrap()
        .unwrap();

    let sweeper = ExpirySweeper::new(store.clone());
    let sweep = {
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        thread::spawn(move || sweeper.run_once(today))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(store.find_by_id(lapsed.id).unwrap().unwrap().status, CardStatus::Active);
    card.balance = dec!(15.00);
    in_flight.save(&card).unwrap();
    in_flight.commit().unwrap();

    assert_eq!(sweep.join().unwrap().unwrap(), 1);
    let swept = store.find_by_id(lapsed.id).unwrap().unwrap();
    assert_eq!(swept.status, CardStatus::Expired);
    // The in-flight write was not lost
    assert_eq!(swept.balance, dec!(15.00));

    let service = TransferService::new(store.clone(), store.clone(), cipher);
    let err = service
        .transfer_between(OWNER, &number(1), &number(2), dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::AccountNotFound(_)));
}

#[test]
fn test_duckdb_opposite_directions_complete() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        DuckDbCardStore::new(&temp_dir.path().join("cards.duckdb"))
            .unwrap()
            .with_lock_timeout(Duration::from_secs(30)),
    );
    store.ensure_schema().unwrap();
    let owner = store.add_owner("owner").unwrap();
    assert_eq!(owner.id, OWNER);
    assert!(store.owner_exists(OWNER).unwrap());

    let cipher = cipher();
    seed_cards(store.as_ref(), &cipher, 7);
    set_balance(store.as_ref(), 3, dec!(100.00));
    set_balance(store.as_ref(), 7, dec!(100.00));

    let service = Arc::new(TransferService::new(store.clone(), store.clone(), cipher));
    let (committed, rejected) = hammer(service, 3, 7, dec!(2.50));

    assert_eq!(committed + rejected, THREAD_PAIRS * 2 * ITERATIONS_PER_THREAD);
    assert_eq!(balance(store.as_ref(), 3) + balance(store.as_ref(), 7), dec!(200.00));
}
