use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputCurrency {
    Jpy,
    Foreign,
}

/// Program-year constants of the national pension scheme. Kept configurable so
/// a new fiscal year only needs new values, not code changes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PensionProgram {
    /// Monthly contribution in yen.
    pub monthly_contribution_jpy: f64,
    /// Annual receipt in yen after the full 480 contribution months.
    pub full_annual_receipt_jpy: f64,
}

impl PensionProgram {
    /// Fiscal-2025 program values.
    pub const FISCAL_2025: PensionProgram = PensionProgram {
        monthly_contribution_jpy: 17_510.0,
        full_annual_receipt_jpy: 831_700.0,
    };

    pub fn annual_contribution_jpy(&self) -> f64 {
        self.monthly_contribution_jpy * 12.0
    }
}

#[derive(Debug, Clone)]
pub struct Inputs {
    pub years_of_contribution: u32,
    pub years_to_receive: u32,
    pub interest_rate_mean: f64,
    pub interest_rate_sd: f64,
    pub return_mean: f64,
    pub return_sd: f64,
    /// Yen per unit of the foreign currency.
    pub exchange_rate_mean: f64,
    pub exchange_rate_sd: f64,
    pub output_currency: OutputCurrency,
    pub simulations: u32,
    /// None means a fresh entropy-derived seed per run.
    pub seed: Option<u64>,
    pub program: PensionProgram,
}

/// One (year-index, value) entry of a per-year schedule. Years are 0-based and
/// contiguous in generation order.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SchedulePoint {
    pub year: u32,
    pub value: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub pension_present_value: f64,
    pub investment_total_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub mean_pension: f64,
    pub mean_investment: f64,
    /// Fraction of trials where the pension strictly beat the investment.
    pub pension_better_ratio: f64,
    pub pension_bins: usize,
    pub investment_bins: usize,
    pub pension_values: Vec<f64>,
    pub investment_values: Vec<f64>,
}
