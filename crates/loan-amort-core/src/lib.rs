pub mod amortization;
pub mod error;
pub mod types;

pub use amortization::engine::{solve_terms, LoanSolution, LoanTermsInput, TermSpec};
pub use amortization::schedule::{amortize, build_schedule, AmortizationOutput, ScheduleRow};
pub use error::AmortError;
pub use types::*;

/// Standard result type for all amortization operations
pub type AmortResult<T> = Result<T, AmortError>;
