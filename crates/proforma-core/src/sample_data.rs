//! Randomised demo deals for trying the engine without real underwriting.
//!
//! Output is illustrative only and never feeds the engine implicitly; the
//! caller decides whether to run it. Equal seeds produce equal deals.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::proforma::engine::{AcquisitionCosts, FinancingTerms, ProFormaInput};
use crate::proforma::sale::SaleAssumptions;
use crate::types::{Money, Rate};

const SAMPLE_LOAN_TERM_YEARS: u32 = 10;

/// Rate drawn uniformly from `[low_bp, high_bp]` basis points.
fn rate_between(rng: &mut StdRng, low_bp: i64, high_bp: i64) -> Rate {
    Decimal::new(rng.gen_range(low_bp..=high_bp), 4)
}

/// Generate a plausible stabilised-asset deal.
///
/// Purchase price 5-7M, going-in cap rate 5-7% with 2-3% NOI growth,
/// 65-75% LTV at 4.5-6.5% on a 25 or 30 year amortization with a 10 year
/// term, and a 6-7.5% exit cap rate in the final projected year.
pub fn generate_sample_input(seed: u64, years_projected: usize) -> ProFormaInput {
    let mut rng = StdRng::seed_from_u64(seed);

    let purchase_price = Decimal::from(rng.gen_range(50_i64..=70) * 100_000);
    let going_in_cap = rate_between(&mut rng, 500, 700);
    let noi_growth = rate_between(&mut rng, 200, 300);
    let capex_ratio = rate_between(&mut rng, 20, 50);

    let mut noi_forecast: Vec<Money> = Vec::with_capacity(years_projected);
    let mut noi = purchase_price * going_in_cap;
    for _ in 0..years_projected {
        noi_forecast.push(noi.round_dp(2));
        noi *= Decimal::ONE + noi_growth;
    }
    let capex_forecast = vec![(purchase_price * capex_ratio).round_dp(2); years_projected];

    let acquisition = AcquisitionCosts {
        purchase_price: Some(purchase_price),
        closing_costs: Some((purchase_price * rate_between(&mut rng, 150, 250)).round_dp(2)),
        due_diligence_costs: Some(Decimal::from(rng.gen_range(10_i64..=25) * 1_000)),
        initial_capital_expenditure: Some(
            (purchase_price * rate_between(&mut rng, 200, 500)).round_dp(2),
        ),
    };

    let financing = FinancingTerms {
        loan_amount: None,
        loan_to_value: Some(rate_between(&mut rng, 6500, 7500)),
        annual_interest_rate: rate_between(&mut rng, 450, 650),
        amortization_years: if rng.gen_bool(0.5) { 25 } else { 30 },
        loan_term_years: Some(SAMPLE_LOAN_TERM_YEARS),
        interest_only_years: 0,
        lender_fee_rate: dec!(0),
    };

    let sale_assumptions = SaleAssumptions {
        sale_year: None,
        exit_cap_rate: rate_between(&mut rng, 600, 750),
        selling_costs_percent: rate_between(&mut rng, 100, 200),
        exit_cap_rate_growth: Decimal::ZERO,
    };

    ProFormaInput {
        years_projected,
        noi_forecast,
        capex_forecast,
        acquisition,
        financing,
        sale_assumptions,
        analysis_start_year: None,
        acquisition_date: None,
    }
}
