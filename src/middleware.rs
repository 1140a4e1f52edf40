//! Per-request tracing context.
//!
//! [`RequestContextLayer`] continues the caller's trace (W3C `traceparent`),
//! opens a `request` span and makes the endpoint, host, method and request id
//! available to [`with_request_info`] for the lifetime of the request, so
//! authentication audit events can be correlated with the request they
//! belong to.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{extract::Request, http::HeaderMap, response::Response};
use opentelemetry::propagation::Extractor;
use tower::{Layer, Service};
use tracing::{Instrument, debug, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    pub static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub host: String,
    pub method: String,
    pub request_id: String,
}

impl RequestContext {
    fn from_request<B>(req: &Request<B>) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        };

        Self {
            endpoint: req.uri().path().to_string(),
            host: header("x-forwarded-host")
                .or_else(|| header("host"))
                .unwrap_or_default(),
            method: req.method().to_string(),
            request_id: header(REQUEST_ID_HEADER).unwrap_or_default(),
        }
    }
}

/// Runs `f` with the current request's context, or with an empty context
/// outside of a request (startup, background tasks, unit tests).
pub fn with_request_info<F, R>(f: F) -> R
where
    F: Fn(&RequestContext) -> R,
{
    REQUEST_CONTEXT.try_with(|r| f(r)).unwrap_or_else(|_| {
        static DEFAULT_CTX: RequestContext = RequestContext {
            endpoint: String::new(),
            host: String::new(),
            method: String::new(),
            request_id: String::new(),
        };
        f(&DEFAULT_CTX)
    })
}

struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .and_then(|header| header.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|h| h.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RequestContextService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestContextService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    // Boxed because `.instrument()` changes the future's type.
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let parent_context = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor {
                headers: req.headers(),
            })
        });
        let ctx = RequestContext::from_request(&req);

        let span = info_span!(
            "request",
            method = %ctx.method,
            endpoint = %ctx.endpoint,
            request_id = %ctx.request_id,
        );
        if let Err(err) = span.set_parent(parent_context) {
            warn!(
                error = debug(err),
                "unable to set otel parent, span will be new instead"
            );
        } else {
            debug!(traceparent = ?req.headers().get("traceparent"), "trace parent set");
        }

        let fut = self.inner.call(req);
        Box::pin(REQUEST_CONTEXT.scope(ctx, async move {
            let response = fut.instrument(span).await;

            if let Ok(ref res) = response {
                let status = res.status();
                with_request_info(|ctx| {
                    tracing::info!(
                        audit = true,
                        auditType = "request",
                        endpoint = %ctx.endpoint,
                        host = %ctx.host,
                        httpMethod = %ctx.method,
                        requestId = %ctx.request_id,
                        status = %status.as_u16(),
                        "request to {} finished",
                        ctx.endpoint
                    );
                });
            }

            response
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestContextLayer;

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContextService { inner }
    }
}
