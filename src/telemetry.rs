//! 日志与指标初始化
//!
//! 日志格式由配置决定（生产 json / 开发 pretty）。指标名在这里
//! 统一登记描述，采集端不必猜测各计数器的含义。

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪。
/// 未显式设置 RUST_LOG 时，默认把 sqlx 的语句日志压到 warn，
/// 业务日志用配置里的级别。
pub fn init_telemetry(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn", config.logging.level))
    });

    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 登记指标描述。metrics 0.24 在首次使用时自动创建指标，
/// 这里只补元数据。
pub fn init_metrics() {
    metrics::describe_counter!("http_requests_total", "HTTP requests by status class");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds"
    );

    metrics::describe_counter!("security.logins_total", "Successful logins by realm");
    metrics::describe_counter!(
        "security.login_failures_total",
        "Failed logins by audit reason code"
    );
    metrics::describe_counter!(
        "security.replay_detections_total",
        "Refresh credential replays that revoked a family"
    );
    metrics::describe_counter!(
        "security.rate_limit_threshold_total",
        "Logins over the rate-limit threshold (shadow mode)"
    );
    metrics::describe_counter!(
        "security.seed_bypass_scopes_total",
        "Seed bypass scopes opened"
    );

    metrics::describe_counter!("audit.events_derived_total", "Events derived from audit records");
    metrics::describe_counter!(
        "audit.events_dropped_secret_total",
        "Events dropped because a payload key matched the secret denylist"
    );

    metrics::describe_gauge!("db.pool_connections", "Database pool connections by state");
}
