use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{ProFormaError, Stage};
use crate::types::{Money, Rate};
use crate::ProFormaResult;

/// Starting point for the Newton-Raphson yield search.
pub const IRR_DEFAULT_GUESS: Rate = dec!(0.10);
/// |NPV| below which the solver reports convergence.
pub const CONVERGENCE_THRESHOLD: Decimal = dec!(0.000001);
pub const MAX_IRR_ITERATIONS: u32 = 100;

/// How an IRR search terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrrStatus {
    Converged,
    /// Iteration cap reached with |NPV| still above the threshold.
    MaxIterations,
    /// dNPV/dr was exactly zero, so no Newton step exists.
    ZeroDerivative,
    /// The iterate left the domain (1 + r <= 0) or overflowed.
    Diverged,
    /// No yield exists for this stream (fewer than two flows or a
    /// non-negative initial outlay).
    Undefined,
}

/// Result of an IRR search together with its diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrSolution {
    pub rate: Option<Rate>,
    pub status: IrrStatus,
    pub iterations: u32,
    pub last_npv: Option<Money>,
}

impl IrrSolution {
    pub fn undefined() -> Self {
        IrrSolution {
            rate: None,
            status: IrrStatus::Undefined,
            iterations: 0,
            last_npv: None,
        }
    }

    pub fn converged(&self) -> bool {
        self.status == IrrStatus::Converged
    }

    fn failed(status: IrrStatus, iterations: u32, last_npv: Option<Money>) -> Self {
        IrrSolution {
            rate: None,
            status,
            iterations,
            last_npv,
        }
    }
}

/// Net Present Value of a series of cash flows
pub fn npv(rate: Rate, cash_flows: &[Money]) -> ProFormaResult<Money> {
    if rate <= dec!(-1) {
        return Err(ProFormaError::invalid(
            Stage::Returns,
            "rate",
            "Discount rate must be greater than -100%",
        ));
    }

    let mut result = Decimal::ZERO;
    let one_plus_r = Decimal::ONE + rate;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount = discount
                .checked_mul(one_plus_r)
                .ok_or_else(|| ProFormaError::DivisionByZero {
                    context: format!("NPV discount factor overflow at period {t}"),
                })?;
        }
        if discount.is_zero() {
            return Err(ProFormaError::DivisionByZero {
                context: format!("NPV discount factor at period {t}"),
            });
        }
        result = cf
            .checked_div(discount)
            .and_then(|pv| result.checked_add(pv))
            .ok_or_else(|| ProFormaError::DivisionByZero {
                context: format!("NPV present value overflow at period {t}"),
            })?;
    }

    Ok(result)
}

/// Newton-Raphson search for the rate r where NPV(r) = 0.
///
/// Starts from `guess`, stops once |NPV| < 1e-6 or after 100 iterations.
/// There is no bracketing fallback: streams with several sign changes may
/// converge to any one of their roots, or not at all. Failure is reported
/// through [`IrrSolution::status`] rather than as an error.
pub fn solve_irr(cash_flows: &[Money], guess: Rate) -> IrrSolution {
    if cash_flows.len() < 2 || cash_flows[0] >= Decimal::ZERO {
        return IrrSolution::undefined();
    }

    let mut rate = guess;
    let mut last_npv = None;

    for i in 0..MAX_IRR_ITERATIONS {
        let one_plus_r = Decimal::ONE + rate;
        if one_plus_r <= Decimal::ZERO {
            return IrrSolution::failed(IrrStatus::Diverged, i, last_npv);
        }

        let (npv_val, dnpv) = match npv_and_derivative(cash_flows, one_plus_r) {
            Some(pair) => pair,
            None => return IrrSolution::failed(IrrStatus::Diverged, i, last_npv),
        };
        last_npv = Some(npv_val);

        if npv_val.abs() < CONVERGENCE_THRESHOLD {
            return IrrSolution {
                rate: Some(rate),
                status: IrrStatus::Converged,
                iterations: i,
                last_npv,
            };
        }

        if dnpv.is_zero() {
            return IrrSolution::failed(IrrStatus::ZeroDerivative, i, last_npv);
        }

        let next = npv_val
            .checked_div(dnpv)
            .and_then(|step| rate.checked_sub(step));
        rate = match next {
            Some(r) => r,
            None => return IrrSolution::failed(IrrStatus::Diverged, i, last_npv),
        };
    }

    IrrSolution::failed(IrrStatus::MaxIterations, MAX_IRR_ITERATIONS, last_npv)
}

/// Internal Rate of Return, treating non-convergence as an error.
pub fn irr(cash_flows: &[Money], guess: Rate) -> ProFormaResult<Rate> {
    let solution = solve_irr(cash_flows, guess);
    match (solution.rate, solution.status) {
        (Some(rate), IrrStatus::Converged) => Ok(rate),
        (_, IrrStatus::Undefined) => Err(ProFormaError::InsufficientData(
            "IRR requires at least 2 cash flows and a negative initial cash flow".into(),
        )),
        _ => Err(ProFormaError::ConvergenceFailure {
            function: format!("IRR ({:?})", solution.status),
            iterations: solution.iterations,
            last_delta: solution.last_npv.unwrap_or(Decimal::ZERO),
        }),
    }
}

/// NPV and dNPV/dr at `one_plus_r`, or None if any term overflows.
fn npv_and_derivative(cash_flows: &[Money], one_plus_r: Decimal) -> Option<(Decimal, Decimal)> {
    let mut npv = Decimal::ZERO;
    let mut dnpv = Decimal::ZERO;
    // (1+r)^-t
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        let pv = cf.checked_mul(discount)?;
        npv = npv.checked_add(pv)?;
        if t > 0 {
            // d/dr of CF_t / (1+r)^t = -t * CF_t / (1+r)^(t+1)
            let term = pv
                .checked_mul(Decimal::from(t as i64))?
                .checked_div(one_plus_r)?;
            dnpv = dnpv.checked_sub(term)?;
        }
        discount = discount.checked_div(one_plus_r)?;
    }

    Some((npv, dnpv))
}

/// Level payment that retires `principal` over `periods` at `periodic_rate`:
/// P * r(1+r)^n / ((1+r)^n - 1), or P / n when the rate is zero.
pub fn level_payment(principal: Money, periodic_rate: Rate, periods: u32) -> ProFormaResult<Money> {
    if periods == 0 {
        return Err(ProFormaError::invalid(
            Stage::Financing,
            "amortization_years",
            "Amortization period must be at least one payment",
        ));
    }

    if periodic_rate.is_zero() {
        return Ok(principal / Decimal::from(periods));
    }

    let overflow = || {
        ProFormaError::invalid(
            Stage::Financing,
            "annual_interest_rate",
            "Level payment overflows over the amortization period",
        )
    };

    let compound = (Decimal::ONE + periodic_rate)
        .checked_powu(u64::from(periods))
        .ok_or_else(overflow)?;
    let denominator = compound - Decimal::ONE;
    if denominator.is_zero() {
        return Err(ProFormaError::DivisionByZero {
            context: "level payment denominator".into(),
        });
    }

    principal
        .checked_mul(periodic_rate)
        .and_then(|v| v.checked_mul(compound))
        .and_then(|v| v.checked_div(denominator))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_npv_basic() {
        let cfs = vec![dec!(-1000), dec!(300), dec!(400), dec!(500)];
        let result = npv(dec!(0.10), &cfs).unwrap();
        // -1000 + 300/1.1 + 400/1.21 + 500/1.331 ≈ -21.04
        assert!((result - dec!(-21.04)).abs() < dec!(0.01));
    }

    #[test]
    fn test_npv_rejects_rate_at_minus_one() {
        let result = npv(dec!(-1), &[dec!(-100), dec!(110)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_solve_irr_single_period() {
        let solution = solve_irr(&[dec!(-100), dec!(110)], IRR_DEFAULT_GUESS);
        assert_eq!(solution.status, IrrStatus::Converged);
        let rate = solution.rate.unwrap();
        assert!((rate - dec!(0.10)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_solve_irr_annuity() {
        let cfs = vec![dec!(-1000), dec!(400), dec!(400), dec!(400)];
        let solution = solve_irr(&cfs, IRR_DEFAULT_GUESS);
        assert!(solution.converged());
        // ≈ 9.70%
        assert!((solution.rate.unwrap() - dec!(0.0970)).abs() < dec!(0.001));
        assert!(solution.last_npv.unwrap().abs() < CONVERGENCE_THRESHOLD);
    }

    #[test]
    fn test_solve_irr_negative_yield() {
        let solution = solve_irr(&[dec!(-100), dec!(50), dec!(40)], IRR_DEFAULT_GUESS);
        assert!(solution.converged());
        assert!(solution.rate.unwrap() < Decimal::ZERO);
    }

    #[test]
    fn test_solve_irr_non_negative_initial_flow_is_undefined() {
        let solution = solve_irr(&[dec!(0), dec!(10), dec!(10)], IRR_DEFAULT_GUESS);
        assert_eq!(solution.status, IrrStatus::Undefined);
        assert_eq!(solution.rate, None);
        assert_eq!(solution.iterations, 0);
    }

    #[test]
    fn test_solve_irr_single_flow_is_undefined() {
        let solution = solve_irr(&[dec!(-100)], IRR_DEFAULT_GUESS);
        assert_eq!(solution.status, IrrStatus::Undefined);
    }

    #[test]
    fn test_solve_irr_all_outflows_does_not_converge() {
        // NPV is negative for every r > -1; no root exists.
        let solution = solve_irr(&[dec!(-100), dec!(-10), dec!(-10)], IRR_DEFAULT_GUESS);
        assert!(!solution.converged());
        assert_eq!(solution.rate, None);
        assert!(solution.last_npv.is_some());
    }

    #[test]
    fn test_irr_wrapper_maps_failure_to_error() {
        let err = irr(&[dec!(-100), dec!(-10), dec!(-10)], IRR_DEFAULT_GUESS).unwrap_err();
        match err {
            ProFormaError::ConvergenceFailure { .. } => {}
            other => panic!("Expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_irr_wrapper_undefined_stream() {
        let err = irr(&[dec!(100), dec!(10)], IRR_DEFAULT_GUESS).unwrap_err();
        match err {
            ProFormaError::InsufficientData(_) => {}
            other => panic!("Expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_level_payment_thirty_year_mortgage() {
        // 3,500,000 at 5% over 30 years: ≈ 18,788.76 per month
        let pmt = level_payment(dec!(3500000), dec!(0.05) / dec!(12), 360).unwrap();
        assert!((pmt - dec!(18788.76)).abs() < dec!(0.01), "payment {pmt}");
    }

    #[test]
    fn test_level_payment_zero_rate_is_straight_line() {
        let pmt = level_payment(dec!(120000), Decimal::ZERO, 120).unwrap();
        assert_eq!(pmt, dec!(1000));
    }

    #[test]
    fn test_level_payment_zero_periods_error() {
        let err = level_payment(dec!(1000), dec!(0.01), 0).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Financing));
    }
}
