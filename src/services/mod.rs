pub mod fraud;
pub mod idempotency;
pub mod payment_service;
pub mod webhook_dispatcher;
