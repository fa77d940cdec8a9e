use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_FILTER: &str = "info,gateway=debug,oidc=debug,tower_http=error,hyper=error";

/// Initializes JSON logging to stdout.
///
/// The filter is read from `RUST_LOG`, falling back to a verbose filter for
/// the relying party crates.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Creates a new tracing span for an incoming request.
pub fn new_request_span<B>(request: &http::Request<B>) -> Span {
    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}
