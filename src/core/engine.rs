use std::f64::consts::PI;

use super::types::{Inputs, OutputCurrency, SchedulePoint, SimulationSummary, TrialResult};

/// Fallback histogram bin count for degenerate (zero-IQR) samples.
const FALLBACK_BIN_COUNT: usize = 50;

/// Annual pension receipt in yen for a given contribution history. Accrual is
/// capped at 480 months; exceeding it is an invalid input, not a clamp.
pub fn determine_annual_receipt(
    full_annual_receipt_jpy: f64,
    years_of_contribution: u32,
) -> Result<f64, String> {
    if years_of_contribution > 40 {
        return Err(format!(
            "years of contribution cannot exceed 40, got {years_of_contribution}"
        ));
    }
    Ok(full_annual_receipt_jpy * (years_of_contribution as f64 * 12.0 / 480.0))
}

/// Present value of the receipt stream, discounted per-year by the sampled
/// interest-rate schedule. The year-0 receipt is undiscounted.
pub fn pension_present_value(
    annual_receipt_jpy: f64,
    interest_rate_schedule: &[SchedulePoint],
    years_to_receive: u32,
) -> f64 {
    assert!(
        interest_rate_schedule.len() >= years_to_receive as usize,
        "interest rate schedule length must be at least years to receive"
    );

    let mut present_value = 0.0;
    for point in interest_rate_schedule.iter().take(years_to_receive as usize) {
        let discount = (1.0 + point.value / 100.0).powi(point.year as i32);
        present_value += annual_receipt_jpy / discount;
    }
    present_value
}

/// Future value of one contribution compounded over its remaining horizon.
fn future_investment_value(contribution: f64, annual_return: f64, years_invested: u32) -> f64 {
    contribution * (1.0 + annual_return / 100.0).powi(years_invested as i32)
}

/// Total value of the contribution stream, each contribution compounded at the
/// sampled per-year return. With schedule length L the year-0 contribution
/// compounds for L periods and the final one for exactly 1 (contribute, then
/// grow for the rest of the horizon).
pub fn total_investment_return(
    contribution_schedule: &[SchedulePoint],
    return_rate_schedule: &[SchedulePoint],
) -> f64 {
    assert_eq!(
        contribution_schedule.len(),
        return_rate_schedule.len(),
        "contribution and return rate schedules must have the same length"
    );

    let years = contribution_schedule.len() as u32;
    contribution_schedule
        .iter()
        .zip(return_rate_schedule.iter())
        .map(|(contribution, rate)| {
            future_investment_value(contribution.value, rate.value, years - contribution.year)
        })
        .sum()
}

/// Scalar currency conversion. JPY -> foreign passes the yen-per-unit rate
/// directly; foreign -> JPY passes its reciprocal. Draws are used as sampled,
/// so a zero rate propagates an infinite value rather than being clamped.
pub fn convert_currency(value: f64, exchange_rate: f64) -> f64 {
    value / exchange_rate
}

/// One independent normal draw per year, indexed 0..years-1 in generation
/// order. A standard deviation of 0 yields a constant schedule. Values are
/// never clamped; negative rates are valid samples.
pub fn sample_schedule(mean: f64, sd: f64, years: u32, rng: &mut Rng) -> Vec<SchedulePoint> {
    (0..years)
        .map(|year| SchedulePoint {
            year,
            value: rng.normal(mean, sd),
        })
        .collect()
}

/// Runs the configured number of trials with a seed-derived random stream.
/// Without an explicit seed each run draws fresh entropy.
pub fn run_simulation(inputs: &Inputs) -> Result<SimulationSummary, String> {
    let seed = inputs.seed.unwrap_or_else(entropy_seed);
    let mut rng = Rng::new(splitmix64(seed));
    run_simulation_with_rng(inputs, &mut rng)
}

/// Same driver with a caller-owned random stream, used by tests that need a
/// deterministic draw sequence.
pub fn run_simulation_with_rng(
    inputs: &Inputs,
    rng: &mut Rng,
) -> Result<SimulationSummary, String> {
    if inputs.simulations == 0 {
        return Err("simulations must be at least 1".to_string());
    }
    let annual_receipt_jpy = determine_annual_receipt(
        inputs.program.full_annual_receipt_jpy,
        inputs.years_of_contribution,
    )?;

    let trials = inputs.simulations as usize;
    let mut pension_values = Vec::with_capacity(trials);
    let mut investment_values = Vec::with_capacity(trials);
    let mut pension_better = 0usize;

    for _ in 0..trials {
        let trial = run_trial(inputs, annual_receipt_jpy, rng);
        if trial.pension_present_value > trial.investment_total_value {
            pension_better += 1;
        }
        pension_values.push(trial.pension_present_value);
        investment_values.push(trial.investment_total_value);
    }

    Ok(SimulationSummary {
        mean_pension: mean(&pension_values),
        mean_investment: mean(&investment_values),
        pension_better_ratio: pension_better as f64 / trials as f64,
        pension_bins: freedman_diaconis_bins(&pension_values),
        investment_bins: freedman_diaconis_bins(&investment_values),
        pension_values,
        investment_values,
    })
}

fn run_trial(inputs: &Inputs, annual_receipt_jpy: f64, rng: &mut Rng) -> TrialResult {
    let interest_rate_schedule = sample_schedule(
        inputs.interest_rate_mean,
        inputs.interest_rate_sd,
        inputs.years_to_receive,
        rng,
    );
    let exchange_rate_schedule = sample_schedule(
        inputs.exchange_rate_mean,
        inputs.exchange_rate_sd,
        inputs.years_of_contribution,
        rng,
    );
    let return_rate_schedule = sample_schedule(
        inputs.return_mean,
        inputs.return_sd,
        inputs.years_of_contribution,
        rng,
    );

    // Each year's fixed yen contribution buys foreign currency at that year's
    // sampled rate.
    let annual_contribution_jpy = inputs.program.annual_contribution_jpy();
    let contribution_schedule: Vec<SchedulePoint> = exchange_rate_schedule
        .iter()
        .map(|point| SchedulePoint {
            year: point.year,
            value: convert_currency(annual_contribution_jpy, point.value),
        })
        .collect();

    // Rate at the moment the two outcomes are compared, drawn independently of
    // the per-year schedule.
    let final_exchange_rate = rng.normal(inputs.exchange_rate_mean, inputs.exchange_rate_sd);

    let pension_jpy =
        pension_present_value(annual_receipt_jpy, &interest_rate_schedule, inputs.years_to_receive);
    let investment_foreign = total_investment_return(&contribution_schedule, &return_rate_schedule);

    match inputs.output_currency {
        OutputCurrency::Jpy => TrialResult {
            pension_present_value: pension_jpy,
            investment_total_value: convert_currency(investment_foreign, 1.0 / final_exchange_rate),
        },
        OutputCurrency::Foreign => TrialResult {
            pension_present_value: convert_currency(pension_jpy, final_exchange_rate),
            investment_total_value: investment_foreign,
        },
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Histogram bin count by the Freedman-Diaconis rule. Falls back to a fixed
/// count when the bin width is not positive and finite (zero-variance or
/// otherwise degenerate samples).
pub fn freedman_diaconis_bins(values: &[f64]) -> usize {
    if values.len() < 2 {
        return FALLBACK_BIN_COUNT;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let iqr = percentile_sorted(&sorted, 75.0) - percentile_sorted(&sorted, 25.0);
    let bin_width = 2.0 * iqr * (values.len() as f64).powf(-1.0 / 3.0);
    if !(bin_width > 0.0 && bin_width.is_finite()) {
        return FALLBACK_BIN_COUNT;
    }

    let spread = sorted[sorted.len() - 1] - sorted[0];
    if !spread.is_finite() {
        return FALLBACK_BIN_COUNT;
    }
    (spread / bin_width).ceil() as usize
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

fn entropy_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ ((std::process::id() as u64) << 32)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Seeded xorshift64* stream with Box-Muller normal draws. Owned by exactly
/// one driver run at a time; the cached second normal keeps paired draws on
/// the same stream.
pub struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    pub fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        mean + sd * self.standard_normal()
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PensionProgram;
    use proptest::prelude::{any, prop_assert, prop_assume, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn constant_schedule(years: u32, value: f64) -> Vec<SchedulePoint> {
        (0..years).map(|year| SchedulePoint { year, value }).collect()
    }

    fn sample_inputs() -> Inputs {
        Inputs {
            years_of_contribution: 25,
            years_to_receive: 25,
            interest_rate_mean: 1.0,
            interest_rate_sd: 0.5,
            return_mean: 5.0,
            return_sd: 2.5,
            exchange_rate_mean: 200.0,
            exchange_rate_sd: 20.0,
            output_currency: OutputCurrency::Jpy,
            simulations: 200,
            seed: Some(42),
            program: PensionProgram::FISCAL_2025,
        }
    }

    fn deterministic_inputs() -> Inputs {
        let mut inputs = sample_inputs();
        inputs.interest_rate_mean = 0.0;
        inputs.interest_rate_sd = 0.0;
        inputs.return_mean = 0.0;
        inputs.return_sd = 0.0;
        inputs.exchange_rate_sd = 0.0;
        inputs.simulations = 10;
        inputs
    }

    #[test]
    fn full_contribution_history_earns_the_full_receipt() {
        let receipt = determine_annual_receipt(831_700.0, 40).expect("valid years");
        assert_approx(receipt, 831_700.0);
    }

    #[test]
    fn contribution_history_beyond_forty_years_is_rejected() {
        let err = determine_annual_receipt(831_700.0, 41).expect_err("must reject 41 years");
        assert!(err.contains("exceed 40"));
    }

    #[test]
    fn zero_rate_present_value_is_receipt_times_years() {
        let schedule = constant_schedule(5, 0.0);
        assert_approx(pension_present_value(100.0, &schedule, 5), 500.0);
    }

    #[test]
    fn first_receipt_year_is_undiscounted() {
        let schedule = constant_schedule(2, 5.0);
        assert_approx(
            pension_present_value(100.0, &schedule, 2),
            100.0 + 100.0 / 1.05,
        );
    }

    #[test]
    fn present_value_uses_only_the_receipt_horizon() {
        let schedule = constant_schedule(10, 0.0);
        assert_approx(pension_present_value(100.0, &schedule, 3), 300.0);
    }

    #[test]
    #[should_panic(expected = "at least years to receive")]
    fn present_value_rejects_short_schedule() {
        let schedule = constant_schedule(3, 1.0);
        pension_present_value(100.0, &schedule, 4);
    }

    #[test]
    fn single_contribution_compounds_for_one_period() {
        let contributions = constant_schedule(1, 1_000.0);
        let returns = constant_schedule(1, 5.0);
        assert_approx(total_investment_return(&contributions, &returns), 1_050.0);
    }

    #[test]
    fn first_contribution_compounds_for_the_full_horizon() {
        let mut contributions = constant_schedule(3, 0.0);
        contributions[0].value = 1.0;
        let returns = constant_schedule(3, 10.0);
        assert_approx(
            total_investment_return(&contributions, &returns),
            1.1_f64.powi(3),
        );
    }

    #[test]
    fn final_contribution_compounds_for_exactly_one_period() {
        let mut contributions = constant_schedule(3, 0.0);
        contributions[2].value = 1.0;
        let returns = constant_schedule(3, 10.0);
        assert_approx(total_investment_return(&contributions, &returns), 1.1);
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn mismatched_schedule_lengths_are_a_caller_bug() {
        let contributions = constant_schedule(3, 100.0);
        let returns = constant_schedule(2, 5.0);
        total_investment_return(&contributions, &returns);
    }

    #[test]
    fn schedule_sampling_is_indexed_in_generation_order() {
        let mut rng = Rng::new(7);
        let schedule = sample_schedule(1.0, 0.5, 6, &mut rng);
        assert_eq!(schedule.len(), 6);
        for (expected_year, point) in schedule.iter().enumerate() {
            assert_eq!(point.year, expected_year as u32);
        }
    }

    #[test]
    fn zero_deviation_sampling_yields_a_constant_schedule() {
        let mut rng = Rng::new(7);
        let schedule = sample_schedule(3.5, 0.0, 8, &mut rng);
        assert!(schedule.iter().all(|point| point.value == 3.5));
    }

    #[test]
    fn negative_draws_are_preserved() {
        let mut rng = Rng::new(7);
        let schedule = sample_schedule(-4.0, 0.0, 4, &mut rng);
        assert!(schedule.iter().all(|point| point.value == -4.0));
    }

    #[test]
    fn equal_seeds_draw_equal_schedules() {
        let mut a = Rng::new(1234);
        let mut b = Rng::new(1234);
        assert_eq!(
            sample_schedule(5.0, 2.0, 12, &mut a),
            sample_schedule(5.0, 2.0, 12, &mut b)
        );
    }

    #[test]
    fn degenerate_sample_falls_back_to_fixed_bin_count() {
        let values = vec![7.0; 100];
        assert_eq!(freedman_diaconis_bins(&values), 50);
    }

    #[test]
    fn tiny_samples_fall_back_to_fixed_bin_count() {
        assert_eq!(freedman_diaconis_bins(&[]), 50);
        assert_eq!(freedman_diaconis_bins(&[1.0]), 50);
    }

    #[test]
    fn bin_count_matches_hand_computed_rule() {
        // n = 9, IQR = 4, width = 8 / 9^(1/3), spread 8 -> ceil(2.08) = 3.
        let values: Vec<f64> = (0..9).map(f64::from).collect();
        assert_eq!(freedman_diaconis_bins(&values), 3);
    }

    #[test]
    fn non_finite_samples_fall_back_to_fixed_bin_count() {
        let values = vec![1.0, 2.0, f64::INFINITY, 4.0];
        assert_eq!(freedman_diaconis_bins(&values), 50);
    }

    #[test]
    fn deterministic_scenario_matches_closed_form_in_jpy() {
        let inputs = deterministic_inputs();
        let summary = run_simulation(&inputs).expect("valid inputs");

        // No growth and no variance: the investment is 25 yen contributions
        // round-tripped through the constant 200 rate.
        let contribution_per_year = inputs.program.annual_contribution_jpy();
        assert_approx(summary.mean_investment, contribution_per_year * 25.0);

        // Zero interest: present value is receipt(25) * 25.
        let receipt = determine_annual_receipt(831_700.0, 25).expect("valid years");
        assert_approx(summary.mean_pension, receipt * 25.0);
        assert_approx(summary.mean_pension, 12_995_312.5);
    }

    #[test]
    fn deterministic_scenario_matches_closed_form_in_foreign_currency() {
        let mut inputs = deterministic_inputs();
        inputs.output_currency = OutputCurrency::Foreign;
        let summary = run_simulation(&inputs).expect("valid inputs");

        let contribution_per_year_foreign = inputs.program.annual_contribution_jpy() / 200.0;
        assert_approx(summary.mean_investment, contribution_per_year_foreign * 25.0);
        assert_approx(summary.mean_pension, 12_995_312.5 / 200.0);
    }

    #[test]
    fn ties_count_against_the_pension() {
        // Program tuned so both sides come out to exactly 480 yen: full 40-year
        // accrual of a 480-yen receipt vs 40 years of 12-yen contributions at a
        // unit exchange rate and zero growth.
        let inputs = Inputs {
            years_of_contribution: 40,
            years_to_receive: 1,
            interest_rate_mean: 0.0,
            interest_rate_sd: 0.0,
            return_mean: 0.0,
            return_sd: 0.0,
            exchange_rate_mean: 1.0,
            exchange_rate_sd: 0.0,
            output_currency: OutputCurrency::Jpy,
            simulations: 100,
            seed: Some(1),
            program: PensionProgram {
                monthly_contribution_jpy: 1.0,
                full_annual_receipt_jpy: 480.0,
            },
        };
        let summary = run_simulation(&inputs).expect("valid inputs");
        assert_approx(summary.mean_pension, 480.0);
        assert_approx(summary.mean_investment, 480.0);
        assert_approx(summary.pension_better_ratio, 0.0);
    }

    #[test]
    fn excess_contribution_years_fail_before_any_trials_run() {
        let mut inputs = sample_inputs();
        inputs.years_of_contribution = 41;
        let err = run_simulation(&inputs).expect_err("must reject 41 years");
        assert!(err.contains("exceed 40"));
    }

    #[test]
    fn zero_trials_are_rejected() {
        let mut inputs = sample_inputs();
        inputs.simulations = 0;
        let err = run_simulation(&inputs).expect_err("must reject zero trials");
        assert!(err.contains("at least 1"));
    }

    #[test]
    fn seeded_runs_are_bit_identical() {
        let mut inputs = sample_inputs();
        inputs.simulations = 1_000;
        inputs.seed = Some(9001);

        let first = run_simulation(&inputs).expect("valid inputs");
        let second = run_simulation(&inputs).expect("valid inputs");
        assert_eq!(first.pension_values, second.pension_values);
        assert_eq!(first.investment_values, second.investment_values);
        assert_eq!(first.pension_better_ratio, second.pension_better_ratio);
    }

    #[test]
    fn unseeded_runs_still_produce_a_full_summary() {
        let mut inputs = sample_inputs();
        inputs.seed = None;
        inputs.simulations = 50;
        let summary = run_simulation(&inputs).expect("valid inputs");
        assert_eq!(summary.pension_values.len(), 50);
        assert_eq!(summary.investment_values.len(), 50);
    }

    #[test]
    fn summary_means_match_the_sample_vectors() {
        let summary = run_simulation(&sample_inputs()).expect("valid inputs");
        let by_hand =
            summary.pension_values.iter().sum::<f64>() / summary.pension_values.len() as f64;
        assert_approx(summary.mean_pension, by_hand);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_annual_receipt_is_linear_in_years(years in 0u32..=40) {
            let receipt = determine_annual_receipt(831_700.0, years).expect("valid years");
            let expected = 831_700.0 * years as f64 / 40.0;
            prop_assert!((receipt - expected).abs() <= 1e-9 * 831_700.0);
        }

        #[test]
        fn prop_currency_conversion_round_trips(
            value in -1e9f64..1e9,
            rate in -1000.0f64..1000.0
        ) {
            prop_assume!(rate.abs() > 1e-3);
            let round_tripped = convert_currency(convert_currency(value, rate), 1.0 / rate);
            prop_assert!((round_tripped - value).abs() <= 1e-9 * value.abs().max(1.0));
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_pension_better_ratio_is_a_probability(
            seed in any::<u64>(),
            years_of_contribution in 1u32..=40,
            years_to_receive in 1u32..=40,
            interest_bp in 0u32..=1500,
            interest_sd_bp in 0u32..=1500,
            return_bp in 0u32..=3000,
            return_sd_bp in 0u32..=3000,
            exchange_rate in 50u32..=400,
            exchange_sd in 0u32..=40,
            simulations in 1u32..=64,
            output_in_jpy in any::<bool>()
        ) {
            let inputs = Inputs {
                years_of_contribution,
                years_to_receive,
                interest_rate_mean: interest_bp as f64 / 100.0,
                interest_rate_sd: interest_sd_bp as f64 / 100.0,
                return_mean: return_bp as f64 / 100.0,
                return_sd: return_sd_bp as f64 / 100.0,
                exchange_rate_mean: exchange_rate as f64,
                exchange_rate_sd: exchange_sd as f64,
                output_currency: if output_in_jpy {
                    OutputCurrency::Jpy
                } else {
                    OutputCurrency::Foreign
                },
                simulations,
                seed: Some(seed),
                program: PensionProgram::FISCAL_2025,
            };

            let summary = run_simulation(&inputs).expect("valid inputs");
            prop_assert!((0.0..=1.0).contains(&summary.pension_better_ratio));
            prop_assert!(summary.pension_values.len() == simulations as usize);
            prop_assert!(summary.investment_values.len() == simulations as usize);
            prop_assert!(summary.pension_bins >= 1);
            prop_assert!(summary.investment_bins >= 1);
        }
    }
}
