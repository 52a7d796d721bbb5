mod engine;
mod types;

pub use engine::{
    Rng, convert_currency, determine_annual_receipt, freedman_diaconis_bins,
    pension_present_value, run_simulation, run_simulation_with_rng, sample_schedule,
    total_investment_return,
};
pub use types::{
    Inputs, OutputCurrency, PensionProgram, SchedulePoint, SimulationSummary, TrialResult,
};
