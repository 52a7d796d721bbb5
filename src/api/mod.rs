use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{Inputs, OutputCurrency, PensionProgram, SimulationSummary, run_simulation};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCurrency {
    Jpy,
    Foreign,
}

impl From<CliCurrency> for OutputCurrency {
    fn from(value: CliCurrency) -> Self {
        match value {
            CliCurrency::Jpy => OutputCurrency::Jpy,
            CliCurrency::Foreign => OutputCurrency::Foreign,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCurrency {
    #[serde(alias = "JPY", alias = "yen")]
    Jpy,
    #[serde(alias = "FOREIGN", alias = "foreign-currency", alias = "foreignCurrency")]
    Foreign,
}

impl From<ApiCurrency> for CliCurrency {
    fn from(value: ApiCurrency) -> Self {
        match value {
            ApiCurrency::Jpy => CliCurrency::Jpy,
            ApiCurrency::Foreign => CliCurrency::Foreign,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ResponseCurrency {
    Jpy,
    Foreign,
}

impl From<OutputCurrency> for ResponseCurrency {
    fn from(value: OutputCurrency) -> Self {
        match value {
            OutputCurrency::Jpy => ResponseCurrency::Jpy,
            OutputCurrency::Foreign => ResponseCurrency::Foreign,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    currency: Option<ApiCurrency>,
    years_of_contribution: Option<u32>,
    years_to_receive: Option<u32>,
    interest_rate: Option<f64>,
    interest_rate_sd: Option<f64>,
    investment_return: Option<f64>,
    investment_return_sd: Option<f64>,
    exchange_rate: Option<f64>,
    exchange_rate_sd: Option<f64>,
    simulations: Option<u32>,
    seed: Option<u64>,
    monthly_contribution: Option<f64>,
    full_annual_receipt: Option<f64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nenkin",
    about = "Monte Carlo comparison of voluntary Japanese national pension enrollment vs investing the contributions abroad"
)]
struct Cli {
    #[arg(
        long,
        value_enum,
        default_value_t = CliCurrency::Jpy,
        help = "Currency the two outcomes are reported in"
    )]
    currency: CliCurrency,
    #[arg(long, default_value_t = 25, help = "Years of pension contributions (1-40)")]
    years_of_contribution: u32,
    #[arg(long, default_value_t = 25, help = "Years of pension receipts (1-40)")]
    years_to_receive: u32,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Mean annual interest rate in percent (domestic for JPY output, foreign otherwise)"
    )]
    interest_rate: f64,
    #[arg(
        long,
        default_value_t = 0.5,
        help = "Interest rate standard deviation in percent"
    )]
    interest_rate_sd: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Mean annual foreign investment return in percent"
    )]
    investment_return: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Investment return standard deviation in percent"
    )]
    investment_return_sd: f64,
    #[arg(
        long,
        default_value_t = 200.0,
        help = "Mean exchange rate in yen per foreign unit"
    )]
    exchange_rate: f64,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Exchange rate standard deviation in yen"
    )]
    exchange_rate_sd: f64,
    #[arg(long, default_value_t = 10_000)]
    simulations: u32,
    #[arg(long, help = "Random seed; omit for a fresh non-reproducible run")]
    seed: Option<u64>,
    #[arg(
        long,
        default_value_t = PensionProgram::FISCAL_2025.monthly_contribution_jpy,
        help = "Monthly pension contribution in yen (defaults to the fiscal-2025 program value)"
    )]
    monthly_contribution: f64,
    #[arg(
        long,
        default_value_t = PensionProgram::FISCAL_2025.full_annual_receipt_jpy,
        help = "Full annual pension receipt in yen (defaults to the fiscal-2025 program value)"
    )]
    full_annual_receipt: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    currency: ResponseCurrency,
    simulations: u32,
    seed: Option<u64>,
    mean_pension: f64,
    mean_investment: f64,
    pension_better_ratio: f64,
    pension_bins: usize,
    investment_bins: usize,
    pension_values: Vec<f64>,
    investment_values: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(cli: Cli) -> Result<Inputs, String> {
    if !(1..=40).contains(&cli.years_of_contribution) {
        return Err("--years-of-contribution must be between 1 and 40".to_string());
    }

    if !(1..=40).contains(&cli.years_to_receive) {
        return Err("--years-to-receive must be between 1 and 40".to_string());
    }

    if !cli.interest_rate.is_finite() || !(0.0..=15.0).contains(&cli.interest_rate) {
        return Err("--interest-rate must be between 0 and 15".to_string());
    }

    if !cli.interest_rate_sd.is_finite() || !(0.0..=15.0).contains(&cli.interest_rate_sd) {
        return Err("--interest-rate-sd must be between 0 and 15".to_string());
    }

    if !cli.investment_return.is_finite() || !(0.0..=30.0).contains(&cli.investment_return) {
        return Err("--investment-return must be between 0 and 30".to_string());
    }

    if !cli.investment_return_sd.is_finite() || !(0.0..=30.0).contains(&cli.investment_return_sd) {
        return Err("--investment-return-sd must be between 0 and 30".to_string());
    }

    if !cli.exchange_rate.is_finite() || cli.exchange_rate <= 0.0 || cli.exchange_rate > 1000.0 {
        return Err("--exchange-rate must be greater than 0 and at most 1000".to_string());
    }

    if !cli.exchange_rate_sd.is_finite() || !(0.0..=1000.0).contains(&cli.exchange_rate_sd) {
        return Err("--exchange-rate-sd must be between 0 and 1000".to_string());
    }

    if cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if !cli.monthly_contribution.is_finite() || cli.monthly_contribution <= 0.0 {
        return Err("--monthly-contribution must be > 0".to_string());
    }

    if !cli.full_annual_receipt.is_finite() || cli.full_annual_receipt <= 0.0 {
        return Err("--full-annual-receipt must be > 0".to_string());
    }

    Ok(Inputs {
        years_of_contribution: cli.years_of_contribution,
        years_to_receive: cli.years_to_receive,
        interest_rate_mean: cli.interest_rate,
        interest_rate_sd: cli.interest_rate_sd,
        return_mean: cli.investment_return,
        return_sd: cli.investment_return_sd,
        exchange_rate_mean: cli.exchange_rate,
        exchange_rate_sd: cli.exchange_rate_sd,
        output_currency: cli.currency.into(),
        simulations: cli.simulations,
        seed: cli.seed,
        program: PensionProgram {
            monthly_contribution_jpy: cli.monthly_contribution,
            full_annual_receipt_jpy: cli.full_annual_receipt,
        },
    })
}

/// Runs one simulation from command-line flags and prints the summary scalars.
pub fn run_cli() -> Result<(), String> {
    run_cli_with(Cli::parse())
}

fn run_cli_with(cli: Cli) -> Result<(), String> {
    let inputs = build_inputs(cli)?;
    let summary = run_simulation(&inputs)?;

    let symbol = match inputs.output_currency {
        OutputCurrency::Jpy => "¥",
        OutputCurrency::Foreign => "$",
    };
    println!("Trials: {}", inputs.simulations);
    println!("Mean pension present value: {symbol}{:.0}", summary.mean_pension);
    println!("Mean investment value:      {symbol}{:.0}", summary.mean_investment);
    println!(
        "Pension beats investment in {:.2}% of trials",
        summary.pension_better_ratio * 100.0
    );
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("Pension simulator HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let summary = match run_simulation(&inputs) {
        Ok(summary) => summary,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    json_response(StatusCode::OK, build_simulate_response(&inputs, summary))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn inputs_from_json(json: &str) -> Result<Inputs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: SimulatePayload) -> Result<Inputs, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.currency {
        cli.currency = v.into();
    }
    if let Some(v) = payload.years_of_contribution {
        cli.years_of_contribution = v;
    }
    if let Some(v) = payload.years_to_receive {
        cli.years_to_receive = v;
    }
    if let Some(v) = payload.interest_rate {
        cli.interest_rate = v;
    }
    if let Some(v) = payload.interest_rate_sd {
        cli.interest_rate_sd = v;
    }
    if let Some(v) = payload.investment_return {
        cli.investment_return = v;
    }
    if let Some(v) = payload.investment_return_sd {
        cli.investment_return_sd = v;
    }
    if let Some(v) = payload.exchange_rate {
        cli.exchange_rate = v;
    }
    if let Some(v) = payload.exchange_rate_sd {
        cli.exchange_rate_sd = v;
    }
    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }
    if let Some(v) = payload.monthly_contribution {
        cli.monthly_contribution = v;
    }
    if let Some(v) = payload.full_annual_receipt {
        cli.full_annual_receipt = v;
    }

    build_inputs(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        currency: CliCurrency::Jpy,
        years_of_contribution: 25,
        years_to_receive: 25,
        interest_rate: 1.0,
        interest_rate_sd: 0.5,
        investment_return: 5.0,
        investment_return_sd: 2.5,
        exchange_rate: 200.0,
        exchange_rate_sd: 20.0,
        simulations: 10_000,
        seed: None,
        monthly_contribution: PensionProgram::FISCAL_2025.monthly_contribution_jpy,
        full_annual_receipt: PensionProgram::FISCAL_2025.full_annual_receipt_jpy,
    }
}

fn build_simulate_response(inputs: &Inputs, summary: SimulationSummary) -> SimulateResponse {
    SimulateResponse {
        currency: inputs.output_currency.into(),
        simulations: inputs.simulations,
        seed: inputs.seed,
        mean_pension: summary.mean_pension,
        mean_investment: summary.mean_investment,
        pension_better_ratio: summary.pension_better_ratio,
        pension_bins: summary.pension_bins,
        investment_bins: summary.investment_bins,
        pension_values: summary.pension_values,
        investment_values: summary.investment_values,
    }
}
