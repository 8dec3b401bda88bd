use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ProFormaError, Stage};
use crate::proforma::amortization::AmortizationSchedule;
use crate::proforma::engine::{AcquisitionSummary, FinancingSummary};
use crate::proforma::operations::OperationsYearData;
use crate::proforma::sale::{sale_at_index, SaleAssumptions, SaleProceedsData};
use crate::time_value::{solve_irr, IrrSolution, IRR_DEFAULT_GUESS};
use crate::types::{MetricNote, Money, Multiple, Rate};
use crate::ProFormaResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Levered (equity) returns over the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentReturns {
    pub equity_investment: Money,
    /// Position 0 is the equity outlay; position y + 1 is year y's cash flow
    /// after debt, plus net sale proceeds at the sale year
    pub equity_cash_flows: Vec<Money>,
    pub yearly_cash_on_cash: Vec<Option<Rate>>,
    /// Cumulative mean of cash-on-cash through each year
    pub running_average_cash_on_cash: Vec<Option<Rate>>,
    pub irr: Option<Rate>,
    pub irr_diagnostics: IrrSolution,
    /// Sum of equity cash flows after the initial outlay
    pub total_distributions: Money,
    /// (total distributions + equity) / equity
    pub equity_multiple: Option<Multiple>,
    pub unlevered: UnleveredReturns,
}

/// Property-level returns ignoring financing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnleveredReturns {
    pub total_cost_basis: Money,
    pub cash_flows: Vec<Money>,
    pub irr: Option<Rate>,
    pub irr_diagnostics: IrrSolution,
    /// Sum of inflows / sum of outflows
    pub equity_multiple: Option<Multiple>,
    /// Cash flow before debt / total acquisition cost
    pub yearly_free_and_clear: Vec<Option<Rate>>,
    pub running_average_free_and_clear: Vec<Option<Rate>>,
}

/// Returns if the property were sold at a given year instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitYearScenario {
    pub sale_year_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_year: Option<i32>,
    /// Exit cap rate after applying the yearly trend
    pub exit_cap_rate: Rate,
    pub sale_price: Option<Money>,
    pub net_sale_proceeds: Option<Money>,
    pub levered_irr: Option<Rate>,
    pub levered_irr_diagnostics: IrrSolution,
    pub unlevered_irr: Option<Rate>,
    pub unlevered_irr_diagnostics: IrrSolution,
    pub equity_multiple: Option<Multiple>,
}

// ---------------------------------------------------------------------------
// Equity
// ---------------------------------------------------------------------------

/// Total acquisition cost less the loan proceeds actually funded.
pub fn equity_investment(
    acquisition: &AcquisitionSummary,
    financing: &FinancingSummary,
) -> ProFormaResult<Money> {
    let equity = acquisition.total_acquisition_cost - financing.net_loan_funding;
    if equity < Decimal::ZERO {
        return Err(ProFormaError::FinancialImpossibility(format!(
            "Net loan funding {} exceeds total acquisition cost {}",
            financing.net_loan_funding, acquisition.total_acquisition_cost
        )));
    }
    Ok(equity)
}

// ---------------------------------------------------------------------------
// Returns
// ---------------------------------------------------------------------------

/// Build the equity and property cash-flow streams and their return metrics.
pub fn compute_returns(
    acquisition: &AcquisitionSummary,
    financing: &FinancingSummary,
    operations: &[OperationsYearData],
    sale: &SaleProceedsData,
    notes: &mut Vec<MetricNote>,
) -> ProFormaResult<InvestmentReturns> {
    let equity = equity_investment(acquisition, financing)?;
    let sale_index = sale.sale_year_index;
    if sale_index >= operations.len() {
        return Err(ProFormaError::invalid(
            Stage::Returns,
            "sale_year_index",
            format!("Sale year {sale_index} is beyond {} operating years", operations.len()),
        ));
    }

    // --- Levered ---
    let equity_cash_flows = cash_flow_stream(
        equity,
        operations.iter().map(|r| r.cash_flow_after_debt),
        sale_index,
        sale.net_sale_proceeds,
    );
    let irr_diagnostics = stream_irr("irr", &equity_cash_flows, sale.net_sale_proceeds, notes);
    let total_distributions: Money = equity_cash_flows[1..].iter().copied().sum();

    let has_equity = equity > Decimal::ZERO;
    if !has_equity {
        notes.push(MetricNote::new(
            "cash_on_cash",
            "Equity investment is zero; cash-on-cash and equity multiple are undefined",
        ));
    }

    let equity_multiple = match sale.net_sale_proceeds {
        Some(_) if has_equity => Some((total_distributions + equity) / equity),
        _ => None,
    };

    let yearly_cash_on_cash: Vec<Option<Rate>> = operations
        .iter()
        .map(|r| has_equity.then(|| r.cash_flow_after_debt / equity))
        .collect();

    // --- Unlevered ---
    let cost_basis = acquisition.total_acquisition_cost;
    let unlevered_cash_flows = cash_flow_stream(
        cost_basis,
        operations.iter().map(|r| r.cash_flow_before_debt),
        sale_index,
        sale.unlevered_sale_proceeds,
    );
    let unlevered_diagnostics = stream_irr(
        "unlevered_irr",
        &unlevered_cash_flows,
        sale.unlevered_sale_proceeds,
        notes,
    );
    let yearly_free_and_clear: Vec<Option<Rate>> = operations
        .iter()
        .map(|r| (cost_basis > Decimal::ZERO).then(|| r.cash_flow_before_debt / cost_basis))
        .collect();

    let unlevered = UnleveredReturns {
        total_cost_basis: cost_basis,
        irr: unlevered_diagnostics.rate,
        irr_diagnostics: unlevered_diagnostics,
        equity_multiple: sale
            .unlevered_sale_proceeds
            .and_then(|_| inflow_outflow_multiple(&unlevered_cash_flows)),
        running_average_free_and_clear: running_average(&yearly_free_and_clear),
        yearly_free_and_clear,
        cash_flows: unlevered_cash_flows,
    };

    Ok(InvestmentReturns {
        equity_investment: equity,
        running_average_cash_on_cash: running_average(&yearly_cash_on_cash),
        yearly_cash_on_cash,
        irr: irr_diagnostics.rate,
        irr_diagnostics,
        total_distributions,
        equity_multiple,
        equity_cash_flows,
        unlevered,
    })
}

/// Levered and unlevered returns for every possible exit year.
///
/// The exit cap rate trends by `exit_cap_rate_growth` per year away from
/// the configured sale year, where it equals `exit_cap_rate`.
pub fn exit_year_analysis(
    acquisition: &AcquisitionSummary,
    financing: &FinancingSummary,
    operations: &[OperationsYearData],
    noi_forecast: &[Money],
    schedule: &AmortizationSchedule,
    assumptions: &SaleAssumptions,
    sale_index: usize,
) -> ProFormaResult<Vec<ExitYearScenario>> {
    let equity = equity_investment(acquisition, financing)?;
    let cost_basis = acquisition.total_acquisition_cost;
    if noi_forecast.len() != operations.len() || schedule.years() != operations.len() {
        return Err(ProFormaError::invalid(
            Stage::Returns,
            "noi_forecast",
            format!("Forecast and schedule must both cover {} years", operations.len()),
        ));
    }
    if sale_index >= operations.len() {
        return Err(ProFormaError::invalid(
            Stage::Returns,
            "sale_year_index",
            format!("Sale year {sale_index} is beyond {} operating years", operations.len()),
        ));
    }

    let cap_rates = (0..operations.len())
        .map(|index| trended_cap_rate(assumptions, index, sale_index))
        .collect::<ProFormaResult<Vec<Rate>>>()?;

    let scenarios: Vec<ExitYearScenario> = (0..operations.len())
        .map(|index| {
            let sale = sale_at_index(
                index,
                cap_rates[index],
                assumptions.selling_costs_percent,
                noi_forecast,
                schedule,
            );
            let held = &operations[..=index];

            let levered = sale.net_sale_proceeds.map(|net| {
                cash_flow_stream(equity, held.iter().map(|r| r.cash_flow_after_debt), index, Some(net))
            });
            let unlevered = sale.unlevered_sale_proceeds.map(|gross| {
                cash_flow_stream(
                    cost_basis,
                    held.iter().map(|r| r.cash_flow_before_debt),
                    index,
                    Some(gross),
                )
            });

            let equity_multiple = levered.as_ref().and_then(|flows| {
                (equity > Decimal::ZERO).then(|| {
                    let distributed: Money = flows[1..].iter().copied().sum();
                    (distributed + equity) / equity
                })
            });

            let levered_irr_diagnostics = scenario_irr(levered.as_deref());
            let unlevered_irr_diagnostics = scenario_irr(unlevered.as_deref());

            ExitYearScenario {
                sale_year_index: index,
                calendar_year: operations[index].calendar_year,
                exit_cap_rate: sale.exit_cap_rate,
                sale_price: sale.sale_price,
                net_sale_proceeds: sale.net_sale_proceeds,
                levered_irr: levered_irr_diagnostics.rate,
                levered_irr_diagnostics,
                unlevered_irr: unlevered_irr_diagnostics.rate,
                unlevered_irr_diagnostics,
                equity_multiple,
            }
        })
        .collect();

    Ok(scenarios)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `[-initial, yearly...]` with `proceeds` added at the sale year.
fn cash_flow_stream(
    initial: Money,
    yearly: impl Iterator<Item = Money>,
    sale_index: usize,
    proceeds: Option<Money>,
) -> Vec<Money> {
    let mut flows: Vec<Money> = std::iter::once(-initial).chain(yearly).collect();
    if let (Some(amount), Some(slot)) = (proceeds, flows.get_mut(sale_index + 1)) {
        *slot += amount;
    }
    flows
}

fn stream_irr(
    metric: &str,
    flows: &[Money],
    proceeds: Option<Money>,
    notes: &mut Vec<MetricNote>,
) -> IrrSolution {
    if proceeds.is_none() {
        notes.push(MetricNote::new(metric, "Sale proceeds are undefined"));
        return IrrSolution::undefined();
    }

    let solution = solve_irr(flows, IRR_DEFAULT_GUESS);
    if !solution.converged() {
        warn!(
            "{metric} did not converge: {:?} after {} iterations",
            solution.status, solution.iterations
        );
        notes.push(MetricNote::new(
            metric,
            format!(
                "Solver stopped with status {:?} after {} iterations",
                solution.status, solution.iterations
            ),
        ));
    }
    solution
}

fn trended_cap_rate(
    assumptions: &SaleAssumptions,
    index: usize,
    sale_index: usize,
) -> ProFormaResult<Rate> {
    let offset = Decimal::from(index as i64 - sale_index as i64);
    assumptions
        .exit_cap_rate_growth
        .checked_mul(offset)
        .and_then(|shift| assumptions.exit_cap_rate.checked_add(shift))
        .ok_or_else(|| {
            ProFormaError::invalid(
                Stage::Sale,
                "exit_cap_rate_growth",
                format!("Exit cap rate overflows when trended to year {index}"),
            )
        })
}

fn scenario_irr(flows: Option<&[Money]>) -> IrrSolution {
    match flows {
        Some(flows) => solve_irr(flows, IRR_DEFAULT_GUESS),
        None => IrrSolution::undefined(),
    }
}

fn inflow_outflow_multiple(flows: &[Money]) -> Option<Multiple> {
    let inflows: Money = flows.iter().filter(|cf| **cf > Decimal::ZERO).copied().sum();
    let outflows: Money = flows.iter().filter(|cf| **cf < Decimal::ZERO).copied().sum();
    if outflows.is_zero() {
        None
    } else {
        Some(inflows / outflows.abs())
    }
}

/// Mean of every value up to and including each year; undefined from the
/// first undefined year onward.
fn running_average(values: &[Option<Rate>]) -> Vec<Option<Rate>> {
    let mut total = Some(Decimal::ZERO);
    values
        .iter()
        .enumerate()
        .map(|(year, value)| {
            total = total.zip(*value).map(|(sum, v)| sum + v);
            total.map(|sum| sum / Decimal::from(year + 1))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proforma::amortization::{schedule, LoanSpec};
    use crate::time_value::IrrStatus;
    use rust_decimal_macros::dec;

    fn acquisition(total: Money) -> AcquisitionSummary {
        AcquisitionSummary {
            purchase_price: total,
            closing_costs: Decimal::ZERO,
            due_diligence_costs: Decimal::ZERO,
            initial_capital_expenditure: Decimal::ZERO,
            total_acquisition_cost: total,
        }
    }

    fn financing(loan: Money) -> FinancingSummary {
        FinancingSummary {
            loan_amount: loan,
            loan_to_value: None,
            lender_fees: Decimal::ZERO,
            net_loan_funding: loan,
            annual_interest_rate: Decimal::ZERO,
            amortization_years: 0,
            loan_term_years: 0,
            interest_only_years: 0,
        }
    }

    fn row(year: usize, before: Money, debt_service: Money) -> OperationsYearData {
        OperationsYearData {
            year,
            calendar_year: None,
            net_operating_income: before,
            capital_costs: Decimal::ZERO,
            cash_flow_before_debt: before,
            debt_service,
            cash_flow_after_debt: before - debt_service,
            dscr: None,
            debt_yield: None,
        }
    }

    fn sale(index: usize, net: Option<Money>) -> SaleProceedsData {
        SaleProceedsData {
            sale_year_index: index,
            sale_calendar_year: None,
            exit_cap_rate: dec!(0.06),
            forward_noi: Decimal::ZERO,
            sale_price: net,
            selling_costs_percent: Decimal::ZERO,
            selling_costs_amount: net.map(|_| Decimal::ZERO),
            remaining_loan_balance: Decimal::ZERO,
            net_sale_proceeds: net,
            unlevered_sale_proceeds: net,
        }
    }

    #[test]
    fn test_single_year_ten_percent() {
        // -100 today, 10 cash flow + 100 sale next year
        let mut notes = Vec::new();
        let r = compute_returns(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &[row(0, dec!(10), Decimal::ZERO)],
            &sale(0, Some(dec!(100))),
            &mut notes,
        )
        .unwrap();

        assert_eq!(r.equity_cash_flows, vec![dec!(-100), dec!(110)]);
        assert!((r.irr.unwrap() - dec!(0.10)).abs() < dec!(0.0001));
        assert_eq!(r.total_distributions, dec!(110));
        assert_eq!(r.equity_multiple, Some(dec!(2.1)));
        assert_eq!(r.yearly_cash_on_cash, vec![Some(dec!(0.1))]);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_sale_proceeds_land_at_sale_year() {
        let mut notes = Vec::new();
        let ops = vec![
            row(0, dec!(10), Decimal::ZERO),
            row(1, dec!(10), Decimal::ZERO),
            row(2, dec!(10), Decimal::ZERO),
        ];
        let r = compute_returns(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &ops,
            &sale(1, Some(dec!(100))),
            &mut notes,
        )
        .unwrap();

        assert_eq!(
            r.equity_cash_flows,
            vec![dec!(-100), dec!(10), dec!(110), dec!(10)]
        );
        assert_eq!(
            r.running_average_cash_on_cash,
            vec![Some(dec!(0.1)), Some(dec!(0.1)), Some(dec!(0.1))]
        );
    }

    #[test]
    fn test_leverage_reduces_equity() {
        let mut notes = Vec::new();
        let r = compute_returns(
            &acquisition(dec!(1000)),
            &financing(dec!(600)),
            &[row(0, dec!(80), dec!(40))],
            &sale(0, Some(dec!(500))),
            &mut notes,
        )
        .unwrap();
        assert_eq!(r.equity_investment, dec!(400));
        assert_eq!(r.equity_cash_flows, vec![dec!(-400), dec!(540)]);
        assert_eq!(r.unlevered.total_cost_basis, dec!(1000));
        assert_eq!(r.unlevered.cash_flows, vec![dec!(-1000), dec!(580)]);
        assert_eq!(r.unlevered.equity_multiple, Some(dec!(0.58)));
        assert_eq!(r.unlevered.yearly_free_and_clear, vec![Some(dec!(0.08))]);
    }

    #[test]
    fn test_zero_equity_leaves_ratios_undefined() {
        let mut notes = Vec::new();
        let r = compute_returns(
            &acquisition(dec!(1000)),
            &financing(dec!(1000)),
            &[row(0, dec!(80), dec!(40))],
            &sale(0, Some(dec!(100))),
            &mut notes,
        )
        .unwrap();

        assert_eq!(r.equity_multiple, None);
        assert_eq!(r.yearly_cash_on_cash, vec![None]);
        assert_eq!(r.running_average_cash_on_cash, vec![None]);
        assert_eq!(r.irr, None);
        assert!(notes.iter().any(|n| n.metric == "cash_on_cash"));
    }

    #[test]
    fn test_negative_equity_error() {
        let mut notes = Vec::new();
        let result = compute_returns(
            &acquisition(dec!(1000)),
            &financing(dec!(1200)),
            &[row(0, dec!(80), dec!(40))],
            &sale(0, Some(dec!(100))),
            &mut notes,
        );
        match result.unwrap_err() {
            ProFormaError::FinancialImpossibility(msg) => {
                assert!(msg.contains("exceeds total acquisition cost"));
            }
            other => panic!("Expected FinancialImpossibility, got {other:?}"),
        }
    }

    #[test]
    fn test_undefined_sale_proceeds() {
        let mut notes = Vec::new();
        let r = compute_returns(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &[row(0, dec!(10), Decimal::ZERO)],
            &sale(0, None),
            &mut notes,
        )
        .unwrap();
        assert_eq!(r.irr, None);
        assert_eq!(r.equity_multiple, None);
        assert_eq!(r.unlevered.irr, None);
        assert_eq!(r.unlevered.equity_multiple, None);
        assert!(notes.iter().any(|n| n.metric == "irr"));
    }

    #[test]
    fn test_running_average_is_cumulative_mean() {
        let values = vec![Some(dec!(0.1)), Some(dec!(0.2)), Some(dec!(0.6))];
        assert_eq!(
            running_average(&values),
            vec![Some(dec!(0.1)), Some(dec!(0.15)), Some(dec!(0.3))]
        );
        assert_eq!(
            running_average(&[Some(dec!(0.1)), None, Some(dec!(0.2))]),
            vec![Some(dec!(0.1)), None, None]
        );
    }

    #[test]
    fn test_running_free_and_clear() {
        let mut notes = Vec::new();
        let ops = vec![
            row(0, dec!(4), Decimal::ZERO),
            row(1, dec!(6), Decimal::ZERO),
            row(2, dec!(11), Decimal::ZERO),
        ];
        let r = compute_returns(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &ops,
            &sale(2, Some(dec!(100))),
            &mut notes,
        )
        .unwrap();
        assert_eq!(
            r.unlevered.running_average_free_and_clear,
            vec![Some(dec!(0.04)), Some(dec!(0.05)), Some(dec!(0.07))]
        );
    }

    // --- Exit-year analysis ---

    fn flat_exit_inputs() -> (Vec<OperationsYearData>, Vec<Money>, AmortizationSchedule) {
        let ops = vec![
            row(0, dec!(10), Decimal::ZERO),
            row(1, dec!(10), Decimal::ZERO),
            row(2, dec!(10), Decimal::ZERO),
        ];
        let no_loan = LoanSpec {
            principal: Decimal::ZERO,
            annual_rate: Decimal::ZERO,
            amortization_years: 0,
            loan_term_years: 0,
            interest_only_years: 0,
        };
        (ops, vec![dec!(10); 3], schedule(&no_loan, 3).unwrap())
    }

    fn trending(growth: Rate) -> SaleAssumptions {
        SaleAssumptions {
            sale_year: None,
            exit_cap_rate: dec!(0.10),
            selling_costs_percent: Decimal::ZERO,
            exit_cap_rate_growth: growth,
        }
    }

    #[test]
    fn test_exit_cap_rate_trends_from_sale_year() {
        let (ops, noi, s) = flat_exit_inputs();
        let scenarios = exit_year_analysis(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &ops,
            &noi,
            &s,
            &trending(dec!(0.01)),
            2,
        )
        .unwrap();

        let caps: Vec<Rate> = scenarios.iter().map(|e| e.exit_cap_rate).collect();
        assert_eq!(caps, vec![dec!(0.08), dec!(0.09), dec!(0.10)]);
        assert_eq!(scenarios[0].sale_price, Some(dec!(125)));
        assert_eq!(scenarios[2].sale_price, Some(dec!(100)));

        // -100, 10, 10, 110 yields 10%
        let last = &scenarios[2];
        assert_eq!(last.levered_irr_diagnostics.status, IrrStatus::Converged);
        assert!((last.levered_irr.unwrap() - dec!(0.10)).abs() < dec!(0.0001));
        assert_eq!(last.unlevered_irr, last.levered_irr);
    }

    #[test]
    fn test_exit_year_without_price_carries_undefined_status() {
        let (ops, noi, s) = flat_exit_inputs();
        let scenarios = exit_year_analysis(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &ops,
            &noi,
            &s,
            &trending(dec!(0.06)),
            2,
        )
        .unwrap();

        // 0.10 - 2 * 0.06 is negative
        let first = &scenarios[0];
        assert_eq!(first.sale_price, None);
        assert_eq!(first.levered_irr, None);
        assert_eq!(first.levered_irr_diagnostics.status, IrrStatus::Undefined);
        assert_eq!(first.unlevered_irr_diagnostics.status, IrrStatus::Undefined);
        assert!(scenarios[2].levered_irr_diagnostics.converged());
    }

    #[test]
    fn test_exit_year_sale_index_out_of_range() {
        let (ops, noi, s) = flat_exit_inputs();
        let result = exit_year_analysis(
            &acquisition(dec!(100)),
            &financing(Decimal::ZERO),
            &ops,
            &noi,
            &s,
            &trending(Decimal::ZERO),
            3,
        );
        assert_eq!(result.unwrap_err().stage(), Some(Stage::Returns));
    }
}
