use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Transaction pipeline
    pub static ref TRANSACTION_ACTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("backoffice_transaction_actions_total", "Transaction actions by outcome"),
        &["action", "outcome"]
    ).expect("metric can be created");

    // Provider integrations
    pub static ref PROVIDER_CALLS: IntCounterVec = IntCounterVec::new(
        Opts::new("backoffice_provider_calls_total", "Provider calls by outcome"),
        &["operation", "outcome"]
    ).expect("metric can be created");

    pub static ref PROVIDER_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("backoffice_provider_call_duration_seconds", "Provider call duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"]
    ).expect("metric can be created");

    // Compliance
    pub static ref ALERTS_OPENED: IntCounterVec = IntCounterVec::new(
        Opts::new("backoffice_aml_alerts_opened_total", "AML alerts opened"),
        &["kind", "severity"]
    ).expect("metric can be created");

    pub static ref ONBOARDING_SUBMISSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("backoffice_onboarding_submissions_total", "Submitted onboarding applications"),
        &["kind", "risk_level"]
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(TRANSACTION_ACTIONS.clone()))?;
    registry.register(Box::new(PROVIDER_CALLS.clone()))?;
    registry.register(Box::new(PROVIDER_LATENCY.clone()))?;
    registry.register(Box::new(ALERTS_OPENED.clone()))?;
    registry.register(Box::new(ONBOARDING_SUBMISSIONS.clone()))?;
    Ok(())
}

/// Prometheus text exposition of `registry`
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
