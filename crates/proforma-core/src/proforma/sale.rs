use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ProFormaError, Stage};
use crate::proforma::amortization::AmortizationSchedule;
use crate::proforma::operations::calendar_year;
use crate::types::{MetricNote, Money, Rate};
use crate::ProFormaResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// When the property is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleYear {
    /// Zero-based projection year
    Index(usize),
    /// Calendar year, resolved against the analysis start year
    Calendar(i32),
}

/// Disposition assumptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleAssumptions {
    /// Defaults to the final projected year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_year: Option<SaleYear>,
    pub exit_cap_rate: Rate,
    /// Fraction of the sale price paid in brokerage, transfer tax, etc.
    #[serde(default)]
    pub selling_costs_percent: Rate,
    /// Yearly change in the exit cap rate across alternative exit years
    #[serde(default)]
    pub exit_cap_rate_growth: Rate,
}

/// Reversion at the sale year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleProceedsData {
    pub sale_year_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_calendar_year: Option<i32>,
    pub exit_cap_rate: Rate,
    /// NOI capitalised into the price (the year after the sale, when projected)
    pub forward_noi: Money,
    pub sale_price: Option<Money>,
    pub selling_costs_percent: Rate,
    pub selling_costs_amount: Option<Money>,
    pub remaining_loan_balance: Money,
    /// Sale price less selling costs and loan payoff; may be negative
    pub net_sale_proceeds: Option<Money>,
    /// Sale price less selling costs, before loan payoff
    pub unlevered_sale_proceeds: Option<Money>,
}

// ---------------------------------------------------------------------------
// Sale year resolution
// ---------------------------------------------------------------------------

/// Map the requested sale year onto a projection index.
pub fn resolve_sale_year(
    sale_year: Option<SaleYear>,
    years_projected: usize,
    analysis_start_year: Option<i32>,
) -> ProFormaResult<usize> {
    if years_projected == 0 {
        return Err(ProFormaError::invalid(
            Stage::Sale,
            "years_projected",
            "At least one projected year is required to price a sale",
        ));
    }

    let index = match sale_year {
        None => return Ok(years_projected - 1),
        Some(SaleYear::Index(index)) => index as i64,
        Some(SaleYear::Calendar(year)) => {
            let start = analysis_start_year.ok_or_else(|| {
                ProFormaError::invalid(
                    Stage::Sale,
                    "sale_year",
                    "A calendar sale year requires analysis_start_year or acquisition_date",
                )
            })?;
            i64::from(year) - i64::from(start)
        }
    };

    if index < 0 || index >= years_projected as i64 {
        return Err(ProFormaError::invalid(
            Stage::Sale,
            "sale_year",
            format!("Sale year resolves to index {index}, outside 0..{years_projected}"),
        ));
    }

    Ok(index as usize)
}

// ---------------------------------------------------------------------------
// Proceeds
// ---------------------------------------------------------------------------

/// Price the sale from forward NOI and the exit cap rate.
///
/// A non-positive exit cap rate leaves price and proceeds undefined and
/// records a note; it is not an error.
pub fn compute_sale(
    assumptions: &SaleAssumptions,
    noi_forecast: &[Money],
    schedule: &AmortizationSchedule,
    years_projected: usize,
    analysis_start_year: Option<i32>,
    notes: &mut Vec<MetricNote>,
) -> ProFormaResult<SaleProceedsData> {
    validate_assumptions(assumptions)?;
    let index = resolve_sale_year(assumptions.sale_year, years_projected, analysis_start_year)?;

    if noi_forecast.len() != years_projected || schedule.years() != years_projected {
        return Err(ProFormaError::invalid(
            Stage::Sale,
            "noi_forecast",
            format!("Forecast and schedule must both cover {years_projected} years"),
        ));
    }

    let sale = sale_at_index(
        index,
        assumptions.exit_cap_rate,
        assumptions.selling_costs_percent,
        noi_forecast,
        schedule,
    );

    if sale.sale_price.is_none() {
        notes.push(MetricNote::new(
            "sale_price",
            format!(
                "Exit cap rate {} gives no finite sale price; sale price and proceeds are undefined",
                assumptions.exit_cap_rate
            ),
        ));
    }

    Ok(SaleProceedsData {
        sale_calendar_year: calendar_year(analysis_start_year, index),
        ..sale
    })
}

pub fn validate_assumptions(assumptions: &SaleAssumptions) -> ProFormaResult<()> {
    let pct = assumptions.selling_costs_percent;
    if pct < Decimal::ZERO || pct >= Decimal::ONE {
        return Err(ProFormaError::invalid(
            Stage::Sale,
            "selling_costs_percent",
            "Selling costs must be between 0 and 1 (exclusive upper)",
        ));
    }
    if assumptions.exit_cap_rate_growth.abs() >= Decimal::ONE {
        return Err(ProFormaError::invalid(
            Stage::Sale,
            "exit_cap_rate_growth",
            "Exit cap rate growth must be a yearly change strictly between -1 and 1",
        ));
    }
    Ok(())
}

/// Sale economics at an already-validated index.
pub(crate) fn sale_at_index(
    index: usize,
    exit_cap_rate: Rate,
    selling_costs_percent: Rate,
    noi_forecast: &[Money],
    schedule: &AmortizationSchedule,
) -> SaleProceedsData {
    let forward_noi = noi_forecast
        .get(index + 1)
        .copied()
        .unwrap_or(noi_forecast[index]);
    let remaining_loan_balance = schedule.yearly_loan_balance[index];

    let sale_price = if exit_cap_rate > Decimal::ZERO {
        forward_noi.checked_div(exit_cap_rate)
    } else {
        None
    };
    let selling_costs_amount = sale_price.map(|price| price * selling_costs_percent);
    let unlevered_sale_proceeds = sale_price
        .zip(selling_costs_amount)
        .map(|(price, costs)| price - costs);

    SaleProceedsData {
        sale_year_index: index,
        sale_calendar_year: None,
        exit_cap_rate,
        forward_noi,
        sale_price,
        selling_costs_percent,
        selling_costs_amount,
        remaining_loan_balance,
        net_sale_proceeds: unlevered_sale_proceeds.map(|p| p - remaining_loan_balance),
        unlevered_sale_proceeds,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
