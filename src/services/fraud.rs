//! Fraud scoring
//!
//! Pure, deterministic risk heuristics over a payment request: weighted
//! contributions summed and clamped to [0, 1]. Scoring has no side effects;
//! velocity checks or external signal providers would layer on top without
//! changing that contract.

use crate::config::{ConfigError, FraudConfig};
use crate::payments::types::{InitiatePaymentRequest, PaymentMethod};
use bigdecimal::{BigDecimal, Zero};

/// Card numbers published by providers for integration testing
const TEST_CARD_NUMBERS: [&str; 5] = [
    "4242424242424242",
    "4000056655665556",
    "5555555555554444",
    "2223003122003222",
    "4000002500003155",
];

pub struct FraudScorer {
    enabled: bool,
    threshold: BigDecimal,
}

/// Weight with two decimal places: `weight(40)` is 0.40
fn weight(hundredths: i64) -> BigDecimal {
    BigDecimal::from(hundredths) / BigDecimal::from(100)
}

impl FraudScorer {
    pub fn new(enabled: bool, threshold: BigDecimal) -> Self {
        Self { enabled, threshold }
    }

    pub fn from_config(config: &FraudConfig) -> Result<Self, ConfigError> {
        let threshold = config
            .score_threshold
            .parse::<BigDecimal>()
            .map_err(|_| ConfigError::InvalidValue("FRAUD_SCORE_THRESHOLD".to_string()))?;

        Ok(Self::new(config.enabled, threshold))
    }

    /// Calculate the fraud score for a payment request
    ///
    /// Returns zero when scoring is disabled.
    pub fn score(&self, request: &InitiatePaymentRequest) -> BigDecimal {
        if !self.enabled {
            return BigDecimal::zero();
        }

        let mut score = BigDecimal::zero();

        score += amount_risk(&request.amount);
        score += payment_method_risk(request.payment_method);

        if request.payment_method == PaymentMethod::Card {
            score += card_risk(request);
        }

        score += suspicious_pattern_risk(&request.amount);

        // Clamp to [0, 1]
        if score > BigDecimal::from(1) {
            score = BigDecimal::from(1);
        }
        if score < BigDecimal::zero() {
            score = BigDecimal::zero();
        }

        score
    }

    /// Check if a payment should be blocked based on its fraud score
    pub fn should_block(&self, score: &BigDecimal) -> bool {
        *score >= self.threshold
    }
}

fn amount_risk(amount: &BigDecimal) -> BigDecimal {
    if *amount >= BigDecimal::from(10_000) {
        weight(40)
    } else if *amount >= BigDecimal::from(1_000) {
        weight(20)
    } else if *amount >= BigDecimal::from(100) {
        weight(10)
    } else {
        BigDecimal::zero()
    }
}

fn payment_method_risk(method: PaymentMethod) -> BigDecimal {
    match method {
        PaymentMethod::Card => weight(10),
        PaymentMethod::Wallet => weight(5),
        PaymentMethod::Bank => weight(15),
    }
}

fn card_risk(request: &InitiatePaymentRequest) -> BigDecimal {
    let mut score = BigDecimal::zero();

    if let Some(card_number) = &request.card_number {
        if !card_number_well_formed(card_number) {
            score += weight(30);
        }
        if is_test_card_number(card_number) {
            score += weight(10);
        }
    }

    if let Some(cvv) = &request.cvv {
        if !cvv_well_formed(cvv) {
            score += weight(20);
        }
    }

    score
}

fn suspicious_pattern_risk(amount: &BigDecimal) -> BigDecimal {
    let mut score = BigDecimal::zero();

    // Exact integer amounts
    if amount.is_integer() {
        score += weight(5);
    }

    // Very small amounts (card testing)
    if *amount <= BigDecimal::from(1) {
        score += weight(10);
    }

    // Very large amounts
    if *amount >= BigDecimal::from(50_000) {
        score += weight(30);
    }

    score
}

/// 13 to 19 digits
fn card_number_well_formed(card_number: &str) -> bool {
    let len = card_number.len();
    (13..=19).contains(&len) && card_number.bytes().all(|b| b.is_ascii_digit())
}

/// 3 or 4 digits
fn cvv_well_formed(cvv: &str) -> bool {
    let len = cvv.len();
    (3..=4).contains(&len) && cvv.bytes().all(|b| b.is_ascii_digit())
}

fn is_test_card_number(card_number: &str) -> bool {
    let normalized: String = card_number.chars().filter(|c| !c.is_whitespace()).collect();
    TEST_CARD_NUMBERS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use uuid::Uuid;

    fn request(amount: &str, method: PaymentMethod) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            user_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from_str(amount).expect("test amount"),
            currency: "USD".to_string(),
            payment_method: method,
            payment_provider: None,
            description: None,
            card_number: None,
            cvv: None,
            account_number: None,
            routing_number: None,
            wallet_id: None,
            idempotency_key: None,
            webhook_url: None,
            metadata: None,
        }
    }

    fn default_scorer() -> FraudScorer {
        FraudScorer::new(true, weight(70))
    }

    #[test]
    fn disabled_scorer_returns_zero() {
        let scorer = FraudScorer::new(false, weight(70));
        let mut req = request("75000", PaymentMethod::Card);
        req.card_number = Some("1234".to_string());

        assert_eq!(scorer.score(&req), BigDecimal::zero());
    }

    #[test]
    fn score_is_deterministic() {
        let scorer = default_scorer();
        let mut req = request("49.99", PaymentMethod::Card);
        req.card_number = Some("4111111111111111".to_string());
        req.cvv = Some("123".to_string());

        assert_eq!(scorer.score(&req), scorer.score(&req));
    }

    #[test]
    fn low_risk_card_payment_passes() {
        // 49.99: no amount bucket, CARD 0.10, valid PAN/CVV, non-integer
        let scorer = default_scorer();
        let mut req = request("49.99", PaymentMethod::Card);
        req.card_number = Some("4111111111111111".to_string());
        req.cvv = Some("123".to_string());

        let score = scorer.score(&req);
        assert_eq!(score, weight(10));
        assert!(!scorer.should_block(&score));
    }

    #[test]
    fn known_test_card_adds_risk() {
        let scorer = default_scorer();
        let mut req = request("49.99", PaymentMethod::Card);
        req.card_number = Some("4242424242424242".to_string());
        req.cvv = Some("123".to_string());

        // CARD 0.10 + test card 0.10
        assert_eq!(scorer.score(&req), weight(20));
    }

    #[test]
    fn huge_amount_with_bad_pan_is_blocked() {
        // 75000 CARD with a 4-digit PAN:
        // >=10000 0.40 + CARD 0.10 + bad PAN 0.30 + integer 0.05 + >=50000 0.30
        // clamps to 1.00
        let scorer = default_scorer();
        let mut req = request("75000", PaymentMethod::Card);
        req.card_number = Some("1234".to_string());

        let score = scorer.score(&req);
        assert_eq!(score, BigDecimal::from(1));
        assert!(scorer.should_block(&score));
    }

    #[test]
    fn amount_buckets_are_exclusive() {
        let scorer = default_scorer();

        // 500.50: bucket 0.10 + WALLET 0.05
        let score = scorer.score(&request("500.50", PaymentMethod::Wallet));
        assert_eq!(score, weight(15));

        // 5000.50: bucket 0.20 + WALLET 0.05
        let score = scorer.score(&request("5000.50", PaymentMethod::Wallet));
        assert_eq!(score, weight(25));
    }

    #[test]
    fn tiny_amount_is_suspicious() {
        let scorer = default_scorer();

        // 0.50: WALLET 0.05 + tiny 0.10
        let score = scorer.score(&request("0.50", PaymentMethod::Wallet));
        assert_eq!(score, weight(15));
    }

    #[test]
    fn bank_method_risk() {
        let scorer = default_scorer();

        // 50.50: BANK 0.15 only
        let score = scorer.score(&request("50.50", PaymentMethod::Bank));
        assert_eq!(score, weight(15));
    }

    #[test]
    fn threshold_blocks_at_boundary() {
        let scorer = default_scorer();
        assert!(scorer.should_block(&weight(70)));
        assert!(scorer.should_block(&weight(71)));
        assert!(!scorer.should_block(&weight(69)));
    }

    #[test]
    fn card_format_checks() {
        assert!(card_number_well_formed("4242424242424242"));
        assert!(!card_number_well_formed("1234"));
        assert!(!card_number_well_formed("42424242424242424242")); // 20 digits
        assert!(!card_number_well_formed("4242-4242-4242-4242"));

        assert!(cvv_well_formed("123"));
        assert!(cvv_well_formed("1234"));
        assert!(!cvv_well_formed("12"));
        assert!(!cvv_well_formed("12a"));
    }

    #[test]
    fn test_card_detection_ignores_whitespace() {
        assert!(is_test_card_number("4242 4242 4242 4242"));
        assert!(!is_test_card_number("4111111111111111"));
    }
}
