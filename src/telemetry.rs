//! Logging and trace export.
//!
//! Events go to stdout as JSON or pretty text. Audit events from the `auth`
//! and `middleware` modules get their own level so a quiet deployment can
//! still keep its authentication trail. With `otlp_enabled`, spans are also
//! exported to the collector named by the `OTEL_EXPORTER_OTLP_*` variables.

use opentelemetry::{KeyValue, trace::TracerProvider};
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LoggingFormat, TelemetryConfig};

/// Targets of the HTTP stack underneath the service.
const DEPENDENCY_TARGETS: &[&str] = &["axum", "hyper", "h2", "reqwest", "rustls", "tonic"];

/// Targets that emit `audit!` and request audit events.
const AUDIT_TARGETS: &[&str] = &["auth", "middleware"];

/// Flushes and shuts down the tracer provider when dropped.
pub struct OtelGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.as_mut()
            && let Err(err) = provider.shutdown()
        {
            eprintln!("{err:?}");
        }
    }
}

/// Filter directives built from the configured levels, e.g.
/// `info,axum=warn,...,cookbook_api::auth=info,cookbook_api::middleware=info`.
fn filter_directives(config: &TelemetryConfig) -> String {
    let dependency = Level::from(config.dependency_level);
    let audit = Level::from(config.audit_level);

    let mut directives = vec![Level::from(config.level).to_string()];
    directives.extend(
        DEPENDENCY_TARGETS
            .iter()
            .map(|target| format!("{target}={dependency}")),
    );
    directives.extend(
        AUDIT_TARGETS
            .iter()
            .map(|module| format!("{}::{module}={audit}", env!("CARGO_CRATE_NAME"))),
    );
    directives.join(",")
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)))
}

fn resource(name: &str) -> Resource {
    Resource::builder()
        .with_service_name(name.to_string())
        .with_schema_url(
            [
                KeyValue::new(attribute::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(attribute::SERVICE_NAME, name.to_string()),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn init_tracer_provider(name: &str) -> Result<SdkTracerProvider, ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    // Follow the caller's sampling decision; sample every root span.
    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource(name))
        .with_batch_exporter(exporter)
        .build())
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// configured directives.
pub fn init(config: &TelemetryConfig) -> Result<OtelGuard, ExporterBuildError> {
    // Request spans carry the request id; closing them logs the latency.
    let fmt_layer = match config.format {
        LoggingFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .boxed(),
        LoggingFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer);

    let tracer_provider = if config.otlp_enabled {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = init_tracer_provider(&config.service_name)?;
        registry
            .with(tracing_opentelemetry::OpenTelemetryLayer::new(
                provider.tracer(config.service_name.clone()),
            ))
            .init();
        Some(provider)
    } else {
        registry.init();
        None
    };

    Ok(OtelGuard { tracer_provider })
}
