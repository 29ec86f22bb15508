//! Integration tests for bankcards-core
//!
//! End-to-end transfer scenarios over a real DuckDB file wired through
//! `BankCardsContext`, the same way the CLI runs them.
//!
//! Run with: cargo test --test integration_tests -- --nocapture

use chrono::{Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use bankcards_core::config::Config;
use bankcards_core::domain::NewCard;
use bankcards_core::ports::CardStore;
use bankcards_core::services::CardUpdate;
use bankcards_core::{BankCardsContext, CardId, CardStatus, Error, OwnerId};

const CARD_1: &str = "4111111111111111";
const CARD_2: &str = "5500000000000004";
const CARD_3: &str = "4000056655665556";

// ============================================================================
// Test Helpers
// ============================================================================

fn write_settings(dir: &TempDir, transformation: Option<&str>) {
    let config = Config {
        crypto_key: Some("base64:MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=".to_string()),
        crypto_transformation: transformation.map(str::to_string),
        card_validity: Some("24".to_string()),
        ..Default::default()
    };
    config.save(dir.path()).expect("Failed to write settings");
}

fn create_context(dir: &TempDir) -> BankCardsContext {
    write_settings(dir, None);
    BankCardsContext::new(dir.path()).expect("Failed to create context")
}

/// Issue a card and give it a starting balance
fn funded_card(ctx: &BankCardsContext, owner_id: OwnerId, number: &str, balance: Decimal) -> CardId {
    let card = ctx.card_service.create(owner_id, number).unwrap();
    ctx.card_service
        .update(
            card.id,
            CardUpdate {
                balance: Some(balance),
                ..Default::default()
            },
        )
        .unwrap();
    card.id
}

fn balance(ctx: &BankCardsContext, id: CardId) -> Decimal {
    ctx.card_service.get(id).unwrap().balance
}

// ============================================================================
// Transfer scenarios
// ============================================================================

#[test]
fn test_transfer_rounds_amount_half_up() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();
    let one = funded_card(&ctx, owner.id, CARD_1, dec!(500.00));
    let two = funded_card(&ctx, owner.id, CARD_2, dec!(50.00));

    let receipt = ctx
        .transfer_service
        .transfer_between(owner.id, CARD_1, CARD_2, dec!(100.005))
        .unwrap();

    assert_eq!(receipt.amount, dec!(100.01));
    assert_eq!(receipt.from_balance, dec!(399.99));
    assert_eq!(receipt.to_balance, dec!(150.01));
    assert_eq!(balance(&ctx, one), dec!(399.99));
    assert_eq!(balance(&ctx, two), dec!(150.01));
    assert_eq!(balance(&ctx, two).to_string(), "150.01");
}

#[test]
fn test_insufficient_funds_leaves_both_balances() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();
    let one = funded_card(&ctx, owner.id, CARD_1, dec!(50.00));
    let two = funded_card(&ctx, owner.id, CARD_2, dec!(50.00));

    let err = ctx
        .transfer_service
        .transfer_between(owner.id, CARD_1, CARD_2, dec!(100.00))
        .unwrap_err();

    assert!(matches!(err, Error::InsufficientFunds(ref masked) if masked == "**** **** **** 1111"));
    assert_eq!(balance(&ctx, one), dec!(50.00));
    assert_eq!(balance(&ctx, two), dec!(50.00));
}

#[test]
fn test_same_card_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();
    let one = funded_card(&ctx, owner.id, CARD_1, dec!(10.00));

    let err = ctx
        .transfer_service
        .transfer_between(owner.id, CARD_1, CARD_1, dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::SameAccount));
    assert_eq!(balance(&ctx, one), dec!(10.00));
}

#[test]
fn test_swept_card_cannot_be_debited() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();
    let live = funded_card(&ctx, owner.id, CARD_2, dec!(10.00));

    // Validity already over, still Active until the sweep runs
    let lapsed = ctx
        .store
        .insert(NewCard {
            owner_id: owner.id,
            number_encrypted: ctx.cipher.encrypt(CARD_1).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
        })
        .unwrap();
    assert_eq!(lapsed.status, CardStatus::Active);

    let expired = ctx.sweeper.run_once(Utc::now().date_naive()).unwrap();
    assert_eq!(expired, 1);
    assert_eq!(ctx.card_service.get(lapsed.id).unwrap().status, CardStatus::Expired);
    assert_eq!(ctx.card_service.get(live).unwrap().status, CardStatus::Active);

    let err = ctx
        .transfer_service
        .transfer_between(owner.id, CARD_1, CARD_2, dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::AccountNotFound(ref masked) if masked == "**** **** **** 1111"));
    assert_eq!(balance(&ctx, live), dec!(10.00));
}

#[test]
fn test_other_owners_card_is_not_found() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let alice = ctx.store.add_owner("alice").unwrap();
    let bob = ctx.store.add_owner("bob").unwrap();
    funded_card(&ctx, alice.id, CARD_1, dec!(10.00));
    let bobs = funded_card(&ctx, bob.id, CARD_2, dec!(0.00));

    let err = ctx
        .transfer_service
        .transfer_between(alice.id, CARD_1, CARD_2, dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::AccountNotFound(_)));
    assert!(balance(&ctx, bobs).is_zero());

    let err = ctx
        .transfer_service
        .transfer_between(bob.id + 100, CARD_1, CARD_2, dec!(1.00))
        .unwrap_err();
    assert!(matches!(err, Error::OwnerNotFound(_)));
}

#[test]
fn test_conservation_across_three_cards() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();
    let ids = [
        funded_card(&ctx, owner.id, CARD_1, dec!(100.00)),
        funded_card(&ctx, owner.id, CARD_2, dec!(0.00)),
        funded_card(&ctx, owner.id, CARD_3, dec!(25.50)),
    ];
    let total: Decimal = ids.iter().map(|id| balance(&ctx, *id)).sum();

    let moves = [
        (CARD_1, CARD_2, dec!(40.004)),
        (CARD_3, CARD_1, dec!(25.50)),
        (CARD_2, CARD_3, dec!(41)),
        (CARD_2, CARD_1, dec!(40.00)),
        (CARD_1, CARD_3, dec!(85.495)),
    ];
    for (from, to, amount) in moves {
        // Some of these fail on funds; conservation must hold either way
        let _ = ctx.transfer_service.transfer_between(owner.id, from, to, amount);
        let balances: Vec<Decimal> = ids.iter().map(|id| balance(&ctx, *id)).collect();
        assert_eq!(balances.iter().copied().sum::<Decimal>(), total);
        assert!(balances.iter().all(|b| *b >= Decimal::ZERO));
    }
}

// ============================================================================
// Context wiring
// ============================================================================

#[test]
fn test_new_cards_use_configured_validity() {
    let dir = TempDir::new().unwrap();
    let ctx = create_context(&dir);
    let owner = ctx.store.add_owner("alice").unwrap();

    let card = ctx.card_service.create(owner.id, CARD_1).unwrap();
    let expected = Utc::now().date_naive().checked_add_months(Months::new(24)).unwrap();
    assert_eq!(card.valid_until, expected);
}

#[test]
fn test_ciphertext_survives_reopen() {
    let dir = TempDir::new().unwrap();
    write_settings(&dir, Some("AES/GCM/DETERMINISTIC"));

    let id = {
        let ctx = BankCardsContext::new(dir.path()).unwrap();
        let owner = ctx.store.add_owner("alice").unwrap();
        ctx.card_service.create(owner.id, CARD_1).unwrap().id
    };

    let ctx = BankCardsContext::new(dir.path()).unwrap();
    assert_eq!(ctx.card_service.get(id).unwrap().masked_number, "**** **** **** 1111");
    let stored = ctx.store.find_by_id(id).unwrap().unwrap();
    assert_eq!(ctx.cipher.decrypt(&stored.number_encrypted).unwrap(), CARD_1);
}

#[test]
fn test_context_requires_a_key() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        card_validity: Some("12".to_string()),
        ..Default::default()
    };
    config.save(dir.path()).unwrap();

    // An environment key would satisfy the check; skip if one is set
    if std::env::var(bankcards_core::config::ENV_CRYPTO_KEY).is_ok() {
        return;
    }
    assert!(BankCardsContext::new(dir.path()).is_err());
}
