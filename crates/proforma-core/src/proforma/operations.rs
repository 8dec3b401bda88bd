use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ProFormaError, Stage};
use crate::proforma::amortization::AmortizationSchedule;
use crate::types::{Money, Rate};
use crate::ProFormaResult;

/// Operating results for one projected year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationsYearData {
    /// Zero-based projection year
    pub year: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_year: Option<i32>,
    pub net_operating_income: Money,
    pub capital_costs: Money,
    pub cash_flow_before_debt: Money,
    pub debt_service: Money,
    /// May be negative; shortfalls are reported, never clamped
    pub cash_flow_after_debt: Money,
    /// NOI / debt service, absent when nothing is paid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dscr: Option<Decimal>,
    /// NOI / end-of-year loan balance, absent when the loan is retired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debt_yield: Option<Rate>,
}

/// Zip the NOI and capex forecasts with the schedule's debt service.
pub fn project(
    noi_forecast: &[Money],
    capex_forecast: &[Money],
    schedule: &AmortizationSchedule,
    years_projected: usize,
    analysis_start_year: Option<i32>,
) -> ProFormaResult<Vec<OperationsYearData>> {
    check_length("noi_forecast", noi_forecast.len(), years_projected)?;
    check_length("capex_forecast", capex_forecast.len(), years_projected)?;
    if schedule.years() != years_projected {
        return Err(ProFormaError::invalid(
            Stage::Operations,
            "financing_schedule",
            format!(
                "Schedule covers {} years but {} are projected",
                schedule.years(),
                years_projected
            ),
        ));
    }

    let rows: Vec<OperationsYearData> = (0..years_projected)
        .map(|year| {
            let noi = noi_forecast[year];
            let capex = capex_forecast[year];
            let debt_service = schedule.yearly_debt_service[year];
            let balance = schedule.yearly_loan_balance[year];
            let cash_flow_before_debt = noi - capex;

            OperationsYearData {
                year,
                calendar_year: calendar_year(analysis_start_year, year),
                net_operating_income: noi,
                capital_costs: capex,
                cash_flow_before_debt,
                debt_service,
                cash_flow_after_debt: cash_flow_before_debt - debt_service,
                dscr: ratio(noi, debt_service),
                debt_yield: ratio(noi, balance),
            }
        })
        .collect();

    Ok(rows)
}

/// Calendar label for a projection year, if a start year is known and the
/// sum fits.
pub(crate) fn calendar_year(analysis_start_year: Option<i32>, year: usize) -> Option<i32> {
    let start = analysis_start_year?;
    start.checked_add(i32::try_from(year).ok()?)
}

fn check_length(field: &str, actual: usize, years_projected: usize) -> ProFormaResult<()> {
    if actual != years_projected {
        return Err(ProFormaError::invalid(
            Stage::Operations,
            field,
            format!("Expected {years_projected} entries, got {actual}"),
        ));
    }
    Ok(())
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator > Decimal::ZERO {
        Some(numerator / denominator)
    } else {
        None
    }
}
