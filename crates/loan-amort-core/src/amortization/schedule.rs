use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::amortization::engine::{solve_terms, LoanSolution, LoanTermsInput, SCHEDULE_DP};
use crate::error::AmortError;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::AmortResult;

/// Residuals below this are pure rounding noise and not worth a warning.
const RESIDUAL_WARNING_THRESHOLD: Decimal = dec!(0.005);

/// One period of the amortization schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    /// Period number (1-indexed).
    pub period: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<NaiveDate>,
    /// Interest portion of this period's payment.
    pub interest: Money,
    /// Principal portion of this period's payment.
    pub principal: Money,
    /// Balance remaining after this period's payment.
    pub balance: Money,
    /// Principal repaid through this period.
    pub cumulative_principal: Money,
    /// Interest paid through this period.
    pub cumulative_interest: Money,
}

/// Solved loan terms plus the full schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmortizationOutput {
    pub periods: u32,
    pub periodic_payment: Money,
    pub total_payment: Money,
    pub total_interest: Money,
    pub schedule: Vec<ScheduleRow>,
    /// The final row's balance. Rounding leaves this a hair off zero;
    /// payment-driven terms can leave a larger amount because the
    /// period count was rounded to a whole number. The final payment is
    /// never adjusted to absorb it.
    pub residual: Money,
}

/// Solve the loan terms and build the full amortization schedule.
pub fn amortize(input: &LoanTermsInput) -> AmortResult<ComputationOutput<AmortizationOutput>> {
    let start = Instant::now();

    let solution = solve_terms(input)?;
    let (schedule, warnings) = build_schedule(&solution)?;
    let residual = schedule.last().map(|row| row.balance).unwrap_or_default();

    let output = AmortizationOutput {
        periods: solution.periods,
        periodic_payment: solution.periodic_payment,
        total_payment: solution.total_payment,
        total_interest: solution.total_interest,
        schedule,
        residual,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Fixed-Payment Amortization Schedule",
        &serde_json::json!({
            "principal": solution.principal.to_string(),
            "annual_rate": input.annual_rate.to_string(),
            "periodic_rate": solution.periodic_rate.to_string(),
            "periods": solution.periods,
            "rounding_digits": SCHEDULE_DP,
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Build the period-by-period ledger for a solved loan.
///
/// Each entry is rounded independently at `SCHEDULE_DP` digits, the way
/// a servicer's ledger rounds each posted amount, so `interest +
/// principal` equals the payment exactly in every row and rounding
/// error cannot compound through the running balance.
pub fn build_schedule(solution: &LoanSolution) -> AmortResult<(Vec<ScheduleRow>, Vec<String>)> {
    let mut warnings: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(solution.periods as usize);

    let mut balance = solution.principal;
    let mut cumulative_principal = Decimal::ZERO;
    let mut cumulative_interest = Decimal::ZERO;

    for period in 1..=solution.periods {
        let interest = (balance * solution.periodic_rate).round_dp(SCHEDULE_DP);
        let principal = (solution.periodic_payment - interest).round_dp(SCHEDULE_DP);
        balance = (balance - principal).round_dp(SCHEDULE_DP);
        cumulative_principal += principal;
        cumulative_interest += interest;

        rows.push(ScheduleRow {
            period,
            payment_date: payment_date(solution.start_date, period)?,
            interest,
            principal,
            balance,
            cumulative_principal,
            cumulative_interest,
        });
    }

    if balance.abs() > RESIDUAL_WARNING_THRESHOLD {
        warnings.push(format!(
            "Final period leaves a residual balance of {balance}; the last payment was not adjusted"
        ));
    }

    Ok((rows, warnings))
}

/// Payment date for a period: the start date advanced one calendar
/// month per elapsed period.
fn payment_date(start: Option<NaiveDate>, period: u32) -> AmortResult<Option<NaiveDate>> {
    let Some(start) = start else {
        return Ok(None);
    };
    start
        .checked_add_months(Months::new(period - 1))
        .map(Some)
        .ok_or_else(|| {
            AmortError::DateError(format!("Payment date overflow at period {period}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn by_periods(principal: Decimal, annual_rate: Decimal, periods: u32) -> LoanTermsInput {
        LoanTermsInput {
            principal,
            annual_rate,
            periods: Some(periods),
            periodic_payment: None,
            start_date: None,
        }
    }

    #[test]
    fn test_twelve_month_schedule() {
        let result = amortize(&by_periods(dec!(10000), dec!(0.06), 12)).unwrap();
        let out = &result.result;

        assert_eq!(out.schedule.len(), 12);
        assert_eq!(out.periodic_payment.round_dp(2), dec!(860.66));

        // First period: interest on the full principal at 0.5% monthly.
        let first = &out.schedule[0];
        assert_eq!(first.interest, dec!(50));
        assert_eq!(first.principal.round_dp(2), dec!(810.66));
        assert_eq!(first.balance.round_dp(2), dec!(9189.34));

        // Final balance lands within rounding distance of zero.
        let last = out.schedule.last().unwrap();
        assert!(last.balance.abs() < dec!(0.0001), "residual {}", last.balance);
        assert_eq!(out.residual, last.balance);
        assert!(result.warnings.is_empty());

        assert_eq!(out.total_interest.round_dp(2), dec!(327.97));
    }

    #[test]
    fn test_rows_split_payment_exactly() {
        let result = amortize(&by_periods(dec!(250000), dec!(0.055), 360)).unwrap();
        let out = &result.result;

        for row in &out.schedule {
            assert_eq!(
                row.interest + row.principal,
                out.periodic_payment,
                "period {} does not split the payment exactly",
                row.period
            );
        }
    }

    #[test]
    fn test_principal_sums_back_to_loan_amount() {
        let result = amortize(&by_periods(dec!(250000), dec!(0.055), 360)).unwrap();
        let out = &result.result;

        let repaid: Decimal = out.schedule.iter().map(|row| row.principal).sum();
        assert!(
            (repaid - dec!(250000)).abs() < dec!(0.01),
            "principal repaid {repaid}"
        );
        // sum(principal) and the residual account for the principal exactly.
        assert_eq!(repaid + out.residual, dec!(250000));
    }

    #[test]
    fn test_cumulative_totals_are_non_decreasing() {
        let result = amortize(&by_periods(dec!(250000), dec!(0.055), 360)).unwrap();
        let out = &result.result;

        for pair in out.schedule.windows(2) {
            assert!(pair[1].cumulative_principal >= pair[0].cumulative_principal);
            assert!(pair[1].cumulative_interest >= pair[0].cumulative_interest);
        }
        let last = out.schedule.last().unwrap();
        assert_eq!(
            (last.cumulative_principal + last.cumulative_interest).round_dp(SCHEDULE_DP),
            out.total_payment
        );
    }

    #[test]
    fn test_zero_rate_schedule() {
        let result = amortize(&by_periods(dec!(10000), Decimal::ZERO, 10)).unwrap();
        let out = &result.result;

        assert_eq!(out.periodic_payment, dec!(1000));
        for row in &out.schedule {
            assert_eq!(row.interest, Decimal::ZERO);
            assert_eq!(row.principal, dec!(1000));
        }
        assert_eq!(out.schedule.last().unwrap().balance, Decimal::ZERO);
        assert_eq!(out.residual, Decimal::ZERO);
    }

    #[test]
    fn test_payment_dates_advance_monthly() {
        let mut input = by_periods(dec!(10000), dec!(0.06), 12);
        input.start_date = NaiveDate::from_ymd_opt(2026, 1, 15);

        let result = amortize(&input).unwrap();
        let out = &result.result;

        assert_eq!(
            out.schedule[0].payment_date,
            NaiveDate::from_ymd_opt(2026, 1, 15)
        );
        assert_eq!(
            out.schedule[11].payment_date,
            NaiveDate::from_ymd_opt(2026, 12, 15)
        );
    }

    #[test]
    fn test_payment_driven_residual_is_reported() {
        // 1000/month on 10000 at 6% solves to 10.28 periods, rounded to
        // 10, so a chunk of balance survives the final payment.
        let input = LoanTermsInput {
            principal: dec!(10000),
            annual_rate: dec!(0.06),
            periods: None,
            periodic_payment: Some(dec!(1000)),
            start_date: None,
        };

        let result = amortize(&input).unwrap();
        let out = &result.result;

        assert_eq!(out.periods, 10);
        assert!(out.residual > Decimal::ZERO);
        assert_eq!(out.residual, out.schedule.last().unwrap().balance);
        assert_eq!(result.warnings.len(), 1);

        // total_interest stays total_payment − principal; the interest
        // accrued against the unpaid residual is not folded in.
        assert_eq!(out.total_interest, out.total_payment - dec!(10000));
        let accrued: Decimal = out.schedule.iter().map(|row| row.interest).sum();
        assert!(accrued > out.total_interest);
    }

    #[test]
    fn test_invalid_terms_produce_no_rows() {
        let err = amortize(&by_periods(dec!(-1), dec!(0.06), 12)).unwrap_err();
        assert!(matches!(err, AmortError::InvalidInput { .. }));
    }
}
