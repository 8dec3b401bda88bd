use clap::Args;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use proforma_core::proforma::amortization::{self, LoanSpec};
use proforma_core::proforma::engine::{self, ProFormaInput};
use proforma_core::time_value::{self, IrrSolution};
use proforma_core::types::with_metadata;

use crate::input;

/// Arguments for commands that take a whole deal
#[derive(Args)]
pub struct DealArgs {
    /// Path to a JSON or YAML deal file (JSON is read from stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for a standalone amortization schedule
#[derive(Args)]
pub struct AmortizeArgs {
    /// Loan principal
    #[arg(long)]
    pub loan_amount: Decimal,

    /// Nominal annual interest rate (e.g. 0.05 for 5%)
    #[arg(long)]
    pub rate: Decimal,

    /// Amortization period in years
    #[arg(long, default_value = "30")]
    pub amortization_years: u32,

    /// Loan term in years (defaults to the amortization period)
    #[arg(long)]
    pub term_years: Option<u32>,

    /// Leading interest-only years within the term
    #[arg(long, default_value = "0")]
    pub interest_only_years: u32,

    /// Years to project (defaults to the loan term)
    #[arg(long)]
    pub years: Option<usize>,
}

/// Arguments for IRR / NPV of an arbitrary stream
#[derive(Args)]
pub struct IrrArgs {
    /// Comma-separated cash flows, initial outlay first (e.g. "-100,10,110")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub cash_flows: Vec<Decimal>,

    /// Starting rate for the Newton-Raphson search
    #[arg(long, default_value = "0.10")]
    pub guess: Decimal,

    /// Also report NPV at this discount rate
    #[arg(long)]
    pub discount_rate: Option<Decimal>,

    /// Fail instead of reporting diagnostics when the solver does not converge
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRow {
    year: usize,
    principal: Decimal,
    interest: Decimal,
    debt_service: Decimal,
    ending_balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
struct AmortizeOutput {
    monthly_payment: Decimal,
    annual_debt_service: Decimal,
    annual_interest_only_payment: Decimal,
    total_interest: Decimal,
    years: Vec<ScheduleRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IrrOutput {
    irr: Option<Decimal>,
    solution: IrrSolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    npv: Option<Decimal>,
}

fn load_deal(args: &DealArgs) -> Result<ProFormaInput, Box<dyn std::error::Error>> {
    let deal: ProFormaInput = if let Some(ref path) = args.input {
        input::file::read_input(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input <deal.json|deal.yaml> or stdin required for a pro forma".into());
    };
    Ok(deal)
}

pub fn run_pro_forma(args: DealArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let deal = load_deal(&args)?;
    let result = engine::model_pro_forma(&deal)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_validate(args: DealArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let deal = load_deal(&args)?;
    engine::validate(&deal)?;
    Ok(json!({
        "result": {
            "valid": true,
            "years_projected": deal.years_projected,
        }
    }))
}

pub fn run_amortize(args: AmortizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let loan = LoanSpec {
        principal: args.loan_amount,
        annual_rate: args.rate,
        amortization_years: args.amortization_years,
        loan_term_years: args.term_years.unwrap_or(args.amortization_years),
        interest_only_years: args.interest_only_years,
    };
    let years = args.years.unwrap_or(loan.loan_term_years as usize);
    let schedule = amortization::schedule(&loan, years)?;

    let rows: Vec<ScheduleRow> = (0..schedule.years())
        .map(|year| ScheduleRow {
            year,
            principal: schedule.yearly_principal[year].round_dp(2),
            interest: schedule.yearly_interest[year].round_dp(2),
            debt_service: schedule.yearly_debt_service[year].round_dp(2),
            ending_balance: schedule.yearly_loan_balance[year].round_dp(2),
        })
        .collect();
    let total_interest: Decimal = schedule.yearly_interest.iter().copied().sum();

    let output = AmortizeOutput {
        monthly_payment: schedule.monthly_payment.round_dp(2),
        annual_debt_service: schedule.annual_debt_service.round_dp(2),
        annual_interest_only_payment: schedule.annual_interest_only_payment.round_dp(2),
        total_interest: total_interest.round_dp(2),
        years: rows,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    let result = with_metadata(
        "Monthly Level-Payment Amortization",
        &loan,
        Vec::new(),
        elapsed,
        output,
    );
    Ok(serde_json::to_value(result)?)
}

pub fn run_irr(args: IrrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let solution = time_value::solve_irr(&args.cash_flows, args.guess);
    let irr = if args.strict {
        Some(time_value::irr(&args.cash_flows, args.guess)?)
    } else {
        solution.rate
    };

    let npv = match args.discount_rate {
        Some(rate) => Some(time_value::npv(rate, &args.cash_flows)?),
        None => None,
    };

    let mut warnings = Vec::new();
    if !solution.converged() {
        warnings.push(format!(
            "IRR search stopped with status {:?} after {} iterations",
            solution.status, solution.iterations
        ));
    }
    if irr.is_some_and(|r| r < dec!(-0.5)) {
        warnings.push("IRR below -50%: check the sign of the cash flows".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    let result = with_metadata(
        "Newton-Raphson IRR",
        &json!({ "cash_flows": args.cash_flows, "guess": args.guess }),
        warnings,
        elapsed,
        IrrOutput { irr, solution, npv },
    );
    Ok(serde_json::to_value(result)?)
}
