//! Type-safe cache key builders

use std::fmt;

pub mod idempotency {
    use super::*;

    pub const NAMESPACE: &str = "idempotency";

    /// Maps a client idempotency key to the owning transaction id.
    #[derive(Debug, Clone)]
    pub struct ReservationKey {
        pub idempotency_key: String,
    }

    impl ReservationKey {
        pub fn new(idempotency_key: impl Into<String>) -> Self {
            Self {
                idempotency_key: idempotency_key.into(),
            }
        }
    }

    impl fmt::Display for ReservationKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}", NAMESPACE, self.idempotency_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_key_format() {
        let key = idempotency::ReservationKey::new("K1");
        assert_eq!(key.to_string(), "idempotency:K1");
    }
}
