//! Fixed-payment loan amortization.
//!
//! `engine` validates loan terms and resolves the missing unknown
//! (payment or period count) from the closed-form annuity formula;
//! `schedule` turns a solved loan into a period-by-period ledger with
//! running totals. All math in `rust_decimal::Decimal`.

pub mod engine;
pub mod schedule;
