use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{ProFormaError, Stage};
use crate::time_value::level_payment;
use crate::types::{Money, Rate};
use crate::ProFormaResult;

const MONTHS_PER_YEAR: u32 = 12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Fully resolved loan terms fed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSpec {
    pub principal: Money,
    /// Nominal annual rate; compounded monthly at `annual_rate / 12`
    pub annual_rate: Rate,
    /// Period over which the level payment retires the loan
    pub amortization_years: u32,
    /// Maturity; may be shorter than amortization (balloon)
    pub loan_term_years: u32,
    /// Leading years of the term in which only interest is paid
    pub interest_only_years: u32,
}

/// Monthly loan simulation rolled up to projection years.
///
/// Every per-year vector has one entry per projected year. Balances are
/// end-of-year and never negative. Once the loan term is reached nothing
/// further is paid and the balance is carried forward unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub monthly_payment: Money,
    /// Level monthly payment x 12
    pub annual_debt_service: Money,
    /// Principal x annual rate, paid during interest-only years
    pub annual_interest_only_payment: Money,
    pub yearly_principal: Vec<Money>,
    pub yearly_interest: Vec<Money>,
    /// Payments actually made in each year (interest + principal)
    pub yearly_debt_service: Vec<Money>,
    pub yearly_loan_balance: Vec<Money>,
}

impl AmortizationSchedule {
    fn empty(years_projected: usize) -> Self {
        AmortizationSchedule {
            monthly_payment: Decimal::ZERO,
            annual_debt_service: Decimal::ZERO,
            annual_interest_only_payment: Decimal::ZERO,
            yearly_principal: vec![Decimal::ZERO; years_projected],
            yearly_interest: vec![Decimal::ZERO; years_projected],
            yearly_debt_service: vec![Decimal::ZERO; years_projected],
            yearly_loan_balance: vec![Decimal::ZERO; years_projected],
        }
    }

    pub fn years(&self) -> usize {
        self.yearly_loan_balance.len()
    }
}

impl LoanSpec {
    /// Reject terms that would make the schedule meaningless.
    pub fn validate(&self) -> ProFormaResult<()> {
        if self.principal < Decimal::ZERO {
            return Err(ProFormaError::invalid(
                Stage::Financing,
                "loan_amount",
                "Loan amount cannot be negative",
            ));
        }
        if self.annual_rate < Decimal::ZERO {
            return Err(ProFormaError::invalid(
                Stage::Financing,
                "annual_interest_rate",
                "Interest rate cannot be negative",
            ));
        }
        if self.principal > Decimal::ZERO {
            if self.amortization_years == 0 {
                return Err(ProFormaError::invalid(
                    Stage::Financing,
                    "amortization_years",
                    "Amortization period must be at least 1 year when a loan is present",
                ));
            }
            if self.loan_term_years == 0 {
                return Err(ProFormaError::invalid(
                    Stage::Financing,
                    "loan_term_years",
                    "Loan term must be at least 1 year when a loan is present",
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Simulate the loan month by month and aggregate to `years_projected` years.
///
/// Interest-only years come first within the term; amortization at the
/// level payment (computed over the full amortization period) starts after
/// them. A zero principal yields an all-zero schedule.
pub fn schedule(loan: &LoanSpec, years_projected: usize) -> ProFormaResult<AmortizationSchedule> {
    loan.validate()?;

    if loan.principal.is_zero() {
        return Ok(AmortizationSchedule::empty(years_projected));
    }

    let monthly_rate = loan.annual_rate / dec!(12);
    let total_months = loan.amortization_years * MONTHS_PER_YEAR;
    let monthly_payment = level_payment(loan.principal, monthly_rate, total_months)?;

    let mut out = AmortizationSchedule {
        monthly_payment,
        annual_debt_service: monthly_payment * dec!(12),
        annual_interest_only_payment: loan.principal * loan.annual_rate,
        yearly_principal: Vec::with_capacity(years_projected),
        yearly_interest: Vec::with_capacity(years_projected),
        yearly_debt_service: Vec::with_capacity(years_projected),
        yearly_loan_balance: Vec::with_capacity(years_projected),
    };

    let term = loan.loan_term_years as usize;
    let io_years = loan.interest_only_years as usize;
    let mut balance = loan.principal;

    for year in 0..years_projected {
        let mut principal_paid = Decimal::ZERO;
        let mut interest_paid = Decimal::ZERO;

        if year < term {
            for _ in 0..MONTHS_PER_YEAR {
                if balance.is_zero() {
                    break;
                }
                let interest = balance * monthly_rate;
                let principal = if year < io_years {
                    Decimal::ZERO
                } else {
                    (monthly_payment - interest).max(Decimal::ZERO).min(balance)
                };
                balance -= principal;
                principal_paid += principal;
                interest_paid += interest;
            }
        }

        out.yearly_principal.push(principal_paid);
        out.yearly_interest.push(interest_paid);
        out.yearly_debt_service.push(principal_paid + interest_paid);
        out.yearly_loan_balance.push(balance);
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
