use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AmortError;
use crate::types::{Money, Rate};
use crate::AmortResult;

/// Payment periods per year. Monthly amortization throughout.
pub const PERIODS_PER_YEAR: Decimal = dec!(12);

/// Fixed rounding precision (fractional digits) for all schedule
/// arithmetic. Rounding each ledger entry independently at this
/// precision keeps cumulative error bounded over long schedules.
pub const SCHEDULE_DP: u32 = 8;

/// Loan terms as supplied by the caller.
///
/// Exactly one of `periods` / `periodic_payment` must be given; the
/// engine solves for the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanTermsInput {
    /// Amount borrowed.
    pub principal: Money,
    /// Nominal annual interest rate (0.06 = 6%).
    pub annual_rate: Rate,
    /// Number of payment periods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods: Option<u32>,
    /// Fixed payment per period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodic_payment: Option<Money>,
    /// Date of the first payment. When given, each schedule row carries
    /// a payment date one calendar month after the previous row's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
}

/// Which unknown the engine solves for, resolved once at validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TermSpec {
    /// Period count given; solve for the payment.
    ByPeriods(u32),
    /// Payment given; solve for the period count.
    ByPayment(Money),
}

/// A fully solved loan: both unknowns resolved, totals computed.
/// Immutable once constructed; schedule generation consumes it read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanSolution {
    pub principal: Money,
    /// Annual rate / 12.
    pub periodic_rate: Rate,
    pub periods: u32,
    pub periodic_payment: Money,
    /// periods × periodic_payment.
    pub total_payment: Money,
    /// total_payment − principal. For payment-driven terms the whole-period
    /// rounding of the term can leave part of the balance unpaid; that
    /// amount is excluded here and reported as the schedule's residual.
    pub total_interest: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
}

/// Validate loan terms and resolve the missing unknown.
pub fn solve_terms(input: &LoanTermsInput) -> AmortResult<LoanSolution> {
    let term = validate(input)?;
    let rate = input.annual_rate / PERIODS_PER_YEAR;

    let (periods, payment) = match term {
        TermSpec::ByPeriods(n) => (n, payment_for_term(input.principal, rate, n)?),
        TermSpec::ByPayment(p) => (term_for_payment(input.principal, rate, p)?, p),
    };

    let payment = payment.round_dp(SCHEDULE_DP);
    let total_payment = (payment * Decimal::from(periods)).round_dp(SCHEDULE_DP);

    Ok(LoanSolution {
        principal: input.principal,
        periodic_rate: rate,
        periods,
        periodic_payment: payment,
        total_payment,
        total_interest: total_payment - input.principal,
        start_date: input.start_date,
    })
}

fn validate(input: &LoanTermsInput) -> AmortResult<TermSpec> {
    if input.principal <= Decimal::ZERO {
        return Err(AmortError::InvalidInput {
            field: "principal".into(),
            reason: "Principal must be positive".into(),
        });
    }
    if input.annual_rate < Decimal::ZERO {
        return Err(AmortError::InvalidInput {
            field: "annual_rate".into(),
            reason: "Annual rate must not be negative".into(),
        });
    }

    let term = match (input.periods, input.periodic_payment) {
        (Some(n), None) => TermSpec::ByPeriods(n),
        (None, Some(p)) => TermSpec::ByPayment(p),
        (Some(_), Some(_)) => {
            return Err(AmortError::InvalidInput {
                field: "periods/periodic_payment".into(),
                reason: "Supply either a period count or a periodic payment, not both".into(),
            });
        }
        (None, None) => {
            return Err(AmortError::InvalidInput {
                field: "periods/periodic_payment".into(),
                reason: "Either a period count or a periodic payment is required".into(),
            });
        }
    };

    match term {
        TermSpec::ByPeriods(0) => Err(AmortError::InvalidInput {
            field: "periods".into(),
            reason: "Period count must be at least 1".into(),
        }),
        TermSpec::ByPayment(p) if p <= Decimal::ZERO => Err(AmortError::InvalidInput {
            field: "periodic_payment".into(),
            reason: "Periodic payment must be positive".into(),
        }),
        TermSpec::ByPayment(p) => {
            let first_interest = input.principal * input.annual_rate / PERIODS_PER_YEAR;
            if p <= first_interest {
                return Err(AmortError::InvalidInput {
                    field: "periodic_payment".into(),
                    reason: format!(
                        "Payment {p} does not cover first-period interest {first_interest}; \
                         the balance would never amortize"
                    ),
                });
            }
            Ok(term)
        }
        _ => Ok(term),
    }
}

/// Fixed payment for a fully amortizing loan: P·r·(1+r)^n / ((1+r)^n − 1).
///
/// The zero-rate case takes an explicit branch rather than relying on
/// the near-cancellation of (1+r)^n − 1 at tiny rates. At the other
/// extreme, period counts large enough to overflow the compounding
/// factor are rejected with `InvalidInput` via the checked operations.
fn payment_for_term(principal: Money, rate: Rate, periods: u32) -> AmortResult<Money> {
    if rate.is_zero() {
        return Ok(principal / Decimal::from(periods));
    }
    let overflow = || AmortError::InvalidInput {
        field: "periods".into(),
        reason: format!(
            "Period count {periods} overflows the compounding factor at rate {rate}"
        ),
    };
    let compound = (Decimal::ONE + rate)
        .checked_powi(periods as i64)
        .ok_or_else(overflow)?;
    let numerator = (principal * rate).checked_mul(compound).ok_or_else(overflow)?;
    Ok(numerator / (compound - Decimal::ONE))
}

/// Invert the annuity formula: n = ln(p / (p − P·r)) / ln(1+r),
/// rounded to the nearest whole period (never truncated).
///
/// Validation has already rejected payments that fail to cover the
/// first period's interest, so the logarithm argument is positive.
fn term_for_payment(principal: Money, rate: Rate, payment: Money) -> AmortResult<u32> {
    let exact = if rate.is_zero() {
        principal / payment
    } else {
        let ratio = payment / (payment - principal * rate);
        ratio.ln() / (Decimal::ONE + rate).ln()
    };

    let rounded = exact.round().max(Decimal::ONE);
    rounded.to_u32().ok_or_else(|| AmortError::InvalidInput {
        field: "periodic_payment".into(),
        reason: format!("Resolved period count {rounded} is out of range"),
    })
}
