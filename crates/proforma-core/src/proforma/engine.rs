use chrono::{Datelike, NaiveDate};
use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{ProFormaError, Stage};
use crate::proforma::amortization::{self, AmortizationSchedule, LoanSpec};
use crate::proforma::operations::{self, OperationsYearData};
use crate::proforma::returns::{self, ExitYearScenario, InvestmentReturns};
use crate::proforma::sale::{self, SaleAssumptions, SaleProceedsData};
use crate::types::{with_metadata, ComputationOutput, MetricNote, Money, Rate};
use crate::ProFormaResult;

const LOAN_TO_VALUE_TOLERANCE: Money = dec!(0.01);

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Acquisition cost components. Fields stay unset until the deal is priced;
/// the purchase price must be present before a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionCosts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_price: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_costs: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_diligence_costs: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_capital_expenditure: Option<Money>,
}

/// Senior loan terms. With neither `loan_amount` nor `loan_to_value` the
/// deal is all-cash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancingTerms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_amount: Option<Money>,
    /// Sizes the loan off the purchase price when `loan_amount` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_to_value: Option<Rate>,
    #[serde(default)]
    pub annual_interest_rate: Rate,
    #[serde(default)]
    pub amortization_years: u32,
    /// Defaults to the amortization period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_term_years: Option<u32>,
    #[serde(default)]
    pub interest_only_years: u32,
    /// Origination fee as a fraction of the loan, netted from funding
    #[serde(default)]
    pub lender_fee_rate: Rate,
}

/// Everything the engine needs for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProFormaInput {
    pub years_projected: usize,
    pub noi_forecast: Vec<Money>,
    pub capex_forecast: Vec<Money>,
    pub acquisition: AcquisitionCosts,
    #[serde(default)]
    pub financing: FinancingTerms,
    pub sale_assumptions: SaleAssumptions,
    /// Calendar year of projection year 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_start_year: Option<i32>,
    /// Used for the start year when `analysis_start_year` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_date: Option<NaiveDate>,
}

impl ProFormaInput {
    /// Parse a deal from a JSON document; numbers may be JSON floats.
    pub fn from_json(json: &str) -> ProFormaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub purchase_price: Money,
    pub closing_costs: Money,
    pub due_diligence_costs: Money,
    pub initial_capital_expenditure: Money,
    pub total_acquisition_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingSummary {
    pub loan_amount: Money,
    pub loan_to_value: Option<Rate>,
    pub lender_fees: Money,
    /// Loan less lender fees
    pub net_loan_funding: Money,
    pub annual_interest_rate: Rate,
    pub amortization_years: u32,
    pub loan_term_years: u32,
    pub interest_only_years: u32,
}

/// Coverage metrics over the years the loan is outstanding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtMetrics {
    pub loan_to_value: Option<Rate>,
    pub min_dscr: Option<Decimal>,
    pub min_debt_yield: Option<Rate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProFormaOutput {
    pub acquisition: AcquisitionSummary,
    pub financing: FinancingSummary,
    pub financing_schedule: AmortizationSchedule,
    pub operations: Vec<OperationsYearData>,
    pub sale_proceeds: SaleProceedsData,
    pub investment_returns: InvestmentReturns,
    pub debt_metrics: DebtMetrics,
    pub exit_year_analysis: Vec<ExitYearScenario>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub undefined_metrics: Vec<MetricNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Input after validation, with every derived term resolved.
struct DealTerms {
    acquisition: AcquisitionSummary,
    financing: FinancingSummary,
    loan: LoanSpec,
    analysis_start_year: Option<i32>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the full pro forma: financing, operations, sale, then returns.
///
/// All configuration invariants are checked before anything is computed, so
/// an error never comes with partial results. Undefined ratios and IRR
/// non-convergence are reported inside the output instead.
pub fn run(input: &ProFormaInput) -> ProFormaResult<ProFormaOutput> {
    let terms = resolve(input)?;
    let years = input.years_projected;

    debug!(
        "financing: loan {} at {} over {}y (term {}y, io {}y)",
        terms.loan.principal,
        terms.loan.annual_rate,
        terms.loan.amortization_years,
        terms.loan.loan_term_years,
        terms.loan.interest_only_years
    );
    let schedule = amortization::schedule(&terms.loan, years)?;

    debug!("operations: projecting {years} years");
    let operations = operations::project(
        &input.noi_forecast,
        &input.capex_forecast,
        &schedule,
        years,
        terms.analysis_start_year,
    )?;

    let mut notes: Vec<MetricNote> = Vec::new();
    let sale_proceeds = sale::compute_sale(
        &input.sale_assumptions,
        &input.noi_forecast,
        &schedule,
        years,
        terms.analysis_start_year,
        &mut notes,
    )?;
    debug!(
        "sale: year {} price {:?} net {:?}",
        sale_proceeds.sale_year_index, sale_proceeds.sale_price, sale_proceeds.net_sale_proceeds
    );

    let investment_returns = returns::compute_returns(
        &terms.acquisition,
        &terms.financing,
        &operations,
        &sale_proceeds,
        &mut notes,
    )?;
    let exit_year_analysis = returns::exit_year_analysis(
        &terms.acquisition,
        &terms.financing,
        &operations,
        &input.noi_forecast,
        &schedule,
        &input.sale_assumptions,
        sale_proceeds.sale_year_index,
    )?;
    debug!(
        "returns: irr {:?} ({:?}), multiple {:?}",
        investment_returns.irr,
        investment_returns.irr_diagnostics.status,
        investment_returns.equity_multiple
    );

    let debt_metrics = debt_metrics(&terms.financing, &operations);
    let warnings = collect_warnings(&debt_metrics, &notes);

    Ok(ProFormaOutput {
        acquisition: terms.acquisition,
        financing: terms.financing,
        financing_schedule: schedule,
        operations,
        sale_proceeds,
        investment_returns,
        debt_metrics,
        exit_year_analysis,
        undefined_metrics: notes,
        warnings,
    })
}

/// Run the pro forma and wrap it in the standard output envelope.
///
/// Warnings move from the result into the envelope.
pub fn model_pro_forma(input: &ProFormaInput) -> ProFormaResult<ComputationOutput<ProFormaOutput>> {
    let start = Instant::now();
    let mut output = run(input)?;
    let warnings = std::mem::take(&mut output.warnings);
    let elapsed = start.elapsed().as_micros() as u64;

    Ok(with_metadata(
        "Real Estate Pro Forma (Levered Cash Flow, Forward-NOI Reversion, Newton-Raphson IRR)",
        input,
        warnings,
        elapsed,
        output,
    ))
}

/// Check every configuration invariant without computing anything.
pub fn validate(input: &ProFormaInput) -> ProFormaResult<()> {
    resolve(input).map(|_| ())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn resolve(input: &ProFormaInput) -> ProFormaResult<DealTerms> {
    let years = input.years_projected;
    if years == 0 {
        return Err(ProFormaError::invalid(
            Stage::Operations,
            "years_projected",
            "At least one year must be projected",
        ));
    }
    for (field, len) in [
        ("noi_forecast", input.noi_forecast.len()),
        ("capex_forecast", input.capex_forecast.len()),
    ] {
        if len != years {
            return Err(ProFormaError::invalid(
                Stage::Operations,
                field,
                format!("Expected {years} entries (years_projected), got {len}"),
            ));
        }
    }

    let acquisition = resolve_acquisition(&input.acquisition)?;
    let (financing, loan) = resolve_financing(&input.financing, acquisition.purchase_price)?;
    // Sizes the level payment without projecting any years
    amortization::schedule(&loan, 0)?;
    returns::equity_investment(&acquisition, &financing)?;

    let analysis_start_year = input
        .analysis_start_year
        .or_else(|| input.acquisition_date.map(|d| d.year()));
    if let Some(start) = analysis_start_year {
        if operations::calendar_year(Some(start), years - 1).is_none() {
            return Err(ProFormaError::invalid(
                Stage::Operations,
                "analysis_start_year",
                format!("Calendar years from {start} over {years} years overflow"),
            ));
        }
    }
    sale::validate_assumptions(&input.sale_assumptions)?;
    sale::resolve_sale_year(input.sale_assumptions.sale_year, years, analysis_start_year)?;

    Ok(DealTerms {
        acquisition,
        financing,
        loan,
        analysis_start_year,
    })
}

fn resolve_acquisition(costs: &AcquisitionCosts) -> ProFormaResult<AcquisitionSummary> {
    let purchase_price = costs.purchase_price.ok_or_else(|| {
        ProFormaError::invalid(
            Stage::Acquisition,
            "purchase_price",
            "Purchase price must be resolved before running the pro forma",
        )
    })?;
    if purchase_price <= Decimal::ZERO {
        return Err(ProFormaError::invalid(
            Stage::Acquisition,
            "purchase_price",
            "Purchase price must be positive",
        ));
    }

    let closing_costs = non_negative_cost("closing_costs", costs.closing_costs)?;
    let due_diligence_costs = non_negative_cost("due_diligence_costs", costs.due_diligence_costs)?;
    let initial_capital_expenditure = non_negative_cost(
        "initial_capital_expenditure",
        costs.initial_capital_expenditure,
    )?;

    Ok(AcquisitionSummary {
        purchase_price,
        closing_costs,
        due_diligence_costs,
        initial_capital_expenditure,
        total_acquisition_cost: purchase_price
            + closing_costs
            + due_diligence_costs
            + initial_capital_expenditure,
    })
}

fn non_negative_cost(field: &str, value: Option<Money>) -> ProFormaResult<Money> {
    let value = value.unwrap_or(Decimal::ZERO);
    if value < Decimal::ZERO {
        return Err(ProFormaError::invalid(
            Stage::Acquisition,
            field,
            "Acquisition cost components cannot be negative",
        ));
    }
    Ok(value)
}

fn resolve_financing(
    terms: &FinancingTerms,
    purchase_price: Money,
) -> ProFormaResult<(FinancingSummary, LoanSpec)> {
    if let Some(ltv) = terms.loan_to_value {
        if ltv < Decimal::ZERO {
            return Err(ProFormaError::invalid(
                Stage::Financing,
                "loan_to_value",
                "Loan-to-value cannot be negative",
            ));
        }
    }

    let loan_amount = match (terms.loan_amount, terms.loan_to_value) {
        (Some(loan), Some(ltv)) => {
            if (loan - ltv * purchase_price).abs() > LOAN_TO_VALUE_TOLERANCE {
                return Err(ProFormaError::invalid(
                    Stage::Financing,
                    "loan_to_value",
                    format!(
                        "Loan amount {loan} disagrees with {ltv} of purchase price {purchase_price}"
                    ),
                ));
            }
            loan
        }
        (Some(loan), None) => loan,
        (None, Some(ltv)) => ltv * purchase_price,
        (None, None) => Decimal::ZERO,
    };

    if terms.lender_fee_rate < Decimal::ZERO || terms.lender_fee_rate >= Decimal::ONE {
        return Err(ProFormaError::invalid(
            Stage::Financing,
            "lender_fee_rate",
            "Lender fee rate must be between 0 and 1 (exclusive upper)",
        ));
    }

    let loan = LoanSpec {
        principal: loan_amount,
        annual_rate: terms.annual_interest_rate,
        amortization_years: terms.amortization_years,
        loan_term_years: terms.loan_term_years.unwrap_or(terms.amortization_years),
        interest_only_years: terms.interest_only_years,
    };
    loan.validate()?;

    let lender_fees = loan_amount * terms.lender_fee_rate;
    let summary = FinancingSummary {
        loan_amount,
        loan_to_value: Some(loan_amount / purchase_price),
        lender_fees,
        net_loan_funding: loan_amount - lender_fees,
        annual_interest_rate: loan.annual_rate,
        amortization_years: loan.amortization_years,
        loan_term_years: loan.loan_term_years,
        interest_only_years: loan.interest_only_years,
    };

    Ok((summary, loan))
}

// ---------------------------------------------------------------------------
// Debt metrics & warnings
// ---------------------------------------------------------------------------

fn debt_metrics(financing: &FinancingSummary, operations: &[OperationsYearData]) -> DebtMetrics {
    DebtMetrics {
        loan_to_value: financing.loan_to_value,
        min_dscr: operations.iter().filter_map(|r| r.dscr).min(),
        min_debt_yield: operations.iter().filter_map(|r| r.debt_yield).min(),
    }
}

fn collect_warnings(metrics: &DebtMetrics, notes: &[MetricNote]) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(dscr) = metrics.min_dscr {
        if dscr < dec!(1.20) {
            warnings.push(format!(
                "Minimum DSCR of {dscr:.2}x is below 1.20x: lender covenant risk"
            ));
        }
    }

    if let Some(ltv) = metrics.loan_to_value {
        if ltv > dec!(0.80) {
            warnings.push(format!(
                "LTV of {:.1}% exceeds 80%: high leverage",
                ltv * dec!(100)
            ));
        }
    }

    for note in notes {
        warnings.push(format!("{} undefined: {}", note.metric, note.reason));
    }

    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proforma::sale::SaleYear;
    use rust_decimal_macros::dec;

    /// 5,000,000 purchase, 70% LTV at 5% over 30 years, flat 300k NOI.
    fn standard_input() -> ProFormaInput {
        ProFormaInput {
            years_projected: 10,
            noi_forecast: vec![dec!(300000); 10],
            capex_forecast: vec![dec!(20000); 10],
            acquisition: AcquisitionCosts {
                purchase_price: Some(dec!(5000000)),
                ..Default::default()
            },
            financing: FinancingTerms {
                loan_to_value: Some(dec!(0.70)),
                annual_interest_rate: dec!(0.05),
                amortization_years: 30,
                loan_term_years: Some(10),
                ..Default::default()
            },
            sale_assumptions: SaleAssumptions {
                sale_year: Some(SaleYear::Index(9)),
                exit_cap_rate: dec!(0.06),
                selling_costs_percent: dec!(0.02),
                exit_cap_rate_growth: Decimal::ZERO,
            },
            analysis_start_year: None,
            acquisition_date: None,
        }
    }

    #[test]
    fn test_loan_sized_from_ltv() {
        let out = run(&standard_input()).unwrap();
        assert_eq!(out.financing.loan_amount, dec!(3500000));
        assert_eq!(out.financing.loan_to_value, Some(dec!(0.70)));
        assert_eq!(out.investment_returns.equity_investment, dec!(1500000));
    }

    #[test]
    fn test_lender_fees_increase_equity() {
        let mut input = standard_input();
        input.financing.lender_fee_rate = dec!(0.01);
        let out = run(&input).unwrap();
        assert_eq!(out.financing.lender_fees, dec!(35000));
        assert_eq!(out.financing.net_loan_funding, dec!(3465000));
        assert_eq!(out.investment_returns.equity_investment, dec!(1535000));
    }

    #[test]
    fn test_loan_term_defaults_to_amortization() {
        let mut input = standard_input();
        input.financing.loan_term_years = None;
        let out = run(&input).unwrap();
        assert_eq!(out.financing.loan_term_years, 30);
    }

    #[test]
    fn test_conflicting_loan_amount_and_ltv() {
        let mut input = standard_input();
        input.financing.loan_amount = Some(dec!(3000000));
        match run(&input).unwrap_err() {
            ProFormaError::InvalidInput { stage, field, .. } => {
                assert_eq!(stage, Stage::Financing);
                assert_eq!(field, "loan_to_value");
            }
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_purchase_price() {
        let mut input = standard_input();
        input.acquisition.purchase_price = None;
        match validate(&input).unwrap_err() {
            ProFormaError::InvalidInput { stage, field, .. } => {
                assert_eq!(stage, Stage::Acquisition);
                assert_eq!(field, "purchase_price");
            }
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_closing_costs() {
        let mut input = standard_input();
        input.acquisition.closing_costs = Some(dec!(-1));
        assert!(run(&input).is_err());
    }

    #[test]
    fn test_loan_above_total_cost() {
        let mut input = standard_input();
        input.financing.loan_to_value = Some(dec!(1.10));
        match validate(&input).unwrap_err() {
            ProFormaError::FinancialImpossibility(_) => {}
            other => panic!("Expected FinancialImpossibility, got {other:?}"),
        }
        assert!(run(&input).is_err());
    }

    #[test]
    fn test_low_dscr_warning() {
        let mut input = standard_input();
        input.noi_forecast = vec![dec!(250000); 10];
        let out = run(&input).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("DSCR")));
    }

    #[test]
    fn test_high_leverage_warning() {
        let mut input = standard_input();
        input.financing.loan_to_value = Some(dec!(0.85));
        let out = run(&input).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("LTV of 85.0%")));
    }

    #[test]
    fn test_debt_metrics_minimums() {
        let out = run(&standard_input()).unwrap();
        let min_dscr = out.debt_metrics.min_dscr.unwrap();
        // 300,000 / 225,465.08
        assert!((min_dscr - dec!(1.3306)).abs() < dec!(0.001), "min dscr {min_dscr}");
        // Year 0 has the highest balance
        assert_eq!(out.debt_metrics.min_debt_yield, out.operations[0].debt_yield);
    }

    #[test]
    fn test_acquisition_date_sets_calendar_years() {
        let mut input = standard_input();
        input.acquisition_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        input.sale_assumptions.sale_year = Some(SaleYear::Calendar(2030));
        let out = run(&input).unwrap();
        assert_eq!(out.operations[0].calendar_year, Some(2025));
        assert_eq!(out.sale_proceeds.sale_year_index, 5);
        assert_eq!(out.exit_year_analysis[5].calendar_year, Some(2030));
    }

    #[test]
    fn test_model_pro_forma_moves_warnings_to_envelope() {
        let mut input = standard_input();
        input.financing.loan_to_value = Some(dec!(0.85));
        let envelope = model_pro_forma(&input).unwrap();
        assert!(envelope.result.warnings.is_empty());
        assert!(!envelope.warnings.is_empty());
        assert!(envelope.methodology.contains("Pro Forma"));
        assert_eq!(envelope.assumptions["years_projected"], 10);
    }
}
