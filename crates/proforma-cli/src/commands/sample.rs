use clap::Args;
use serde_json::Value;

use proforma_core::proforma::engine;
use proforma_core::sample_data::generate_sample_input;

/// Arguments for demo deal generation
#[derive(Args)]
pub struct SampleArgs {
    /// RNG seed; equal seeds give equal deals
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Years to project
    #[arg(long, default_value = "10")]
    pub years: usize,

    /// Run the generated deal instead of printing it
    #[arg(long)]
    pub run: bool,
}

pub fn run_sample(args: SampleArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let deal = generate_sample_input(args.seed, args.years);
    log::debug!("generated sample deal from seed {}", args.seed);

    if args.run {
        let result = engine::model_pro_forma(&deal)?;
        return Ok(serde_json::to_value(result)?);
    }
    Ok(serde_json::to_value(deal)?)
}
