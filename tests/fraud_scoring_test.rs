use bigdecimal::BigDecimal;
use payrail::payments::types::{InitiatePaymentRequest, PaymentMethod};
use payrail::services::fraud::FraudScorer;
use std::str::FromStr;
use uuid::Uuid;

fn scorer() -> FraudScorer {
    FraudScorer::new(true, BigDecimal::from_str("0.70").unwrap())
}

fn card_request(amount: &str, card_number: &str, cvv: &str) -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        user_id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: "USD".to_string(),
        payment_method: PaymentMethod::Card,
        payment_provider: None,
        description: None,
        card_number: Some(card_number.to_string()),
        cvv: Some(cvv.to_string()),
        account_number: None,
        routing_number: None,
        wallet_id: None,
        idempotency_key: None,
        webhook_url: None,
        metadata: None,
    }
}

#[test]
fn fresh_card_payment_is_admitted() {
    // Scenario: {amount: 49.99, method: CARD, pan: 4242..., cvv: 123}
    let scorer = scorer();
    let request = card_request("49.99", "4242424242424242", "123");

    let score = scorer.score(&request);
    // CARD 0.10 + known test card 0.10
    assert_eq!(score, BigDecimal::from_str("0.20").unwrap());
    assert!(!scorer.should_block(&score));
}

#[test]
fn huge_amount_with_malformed_pan_is_blocked_without_provider_call() {
    // Scenario: {amount: 75000, method: CARD, pan: "1234"}
    let scorer = scorer();
    let mut request = card_request("75000", "1234", "123");
    request.cvv = None;

    let score = scorer.score(&request);
    assert!(score >= BigDecimal::from_str("0.70").unwrap());
    assert!(scorer.should_block(&score));
}

#[test]
fn identical_inputs_give_identical_scores() {
    let scorer = scorer();
    let request = card_request("1500.25", "4111111111111111", "999");

    let first = scorer.score(&request);
    for _ in 0..20 {
        assert_eq!(scorer.score(&request), first);
    }
}

#[test]
fn score_never_leaves_unit_interval() {
    let scorer = scorer();
    let amounts = ["0.01", "1", "99.99", "100", "999.99", "1000", "9999.99", "10000", "50000", "1000000"];
    for amount in amounts {
        for method in [PaymentMethod::Card, PaymentMethod::Wallet, PaymentMethod::Bank] {
            let mut request = card_request(amount, "bad-pan", "bad-cvv");
            request.payment_method = method;

            let score = scorer.score(&request);
            assert!(score >= BigDecimal::from(0), "score {} for {}", score, amount);
            assert!(score <= BigDecimal::from(1), "score {} for {}", score, amount);
        }
    }
}

#[test]
fn disabled_scorer_admits_everything() {
    let scorer = FraudScorer::new(false, BigDecimal::from_str("0.70").unwrap());
    let request = card_request("75000", "1234", "1");

    let score = scorer.score(&request);
    assert_eq!(score, BigDecimal::from(0));
    assert!(!scorer.should_block(&score));
}
