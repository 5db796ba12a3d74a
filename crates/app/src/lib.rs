#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tandem_api::{ApiState, PresenceRegistry};
use tandem_realtime::broker::{BrokerConfig, GroupBroker};
use tandem_realtime::limiter::{RateLimiter, RateLimiterConfig};
use tandem_storage::{migrate_with_pool, PostgresStorage};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub rate_limit: RateLimiterConfig,
    pub max_connections_per_identity: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(
            std::env::var("LISTEN_ADDR").ok(),
            std::env::var("DATABASE_URL").ok(),
            std::env::var("RATE_LIMIT_MAX_REQUESTS").ok(),
            std::env::var("RATE_LIMIT_PERIOD_SECS").ok(),
            std::env::var("MAX_CONNECTIONS_PER_IDENTITY").ok(),
        )
    }

    fn from_values(
        listen_addr: Option<String>,
        database_url: Option<String>,
        rate_limit_max_requests: Option<String>,
        rate_limit_period_secs: Option<String>,
        max_connections_per_identity: Option<String>,
    ) -> anyhow::Result<Self> {
        let listen_addr = SocketAddr::from_str(listen_addr.as_deref().unwrap_or("0.0.0.0:5380"))?;
        let database_url =
            database_url.ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let defaults = RateLimiterConfig::default();
        let rate_limit = RateLimiterConfig {
            max_requests: parse_positive(rate_limit_max_requests, "RATE_LIMIT_MAX_REQUESTS")?
                .unwrap_or(defaults.max_requests),
            period: parse_positive(rate_limit_period_secs, "RATE_LIMIT_PERIOD_SECS")?
                .map_or(defaults.period, |secs| Duration::from_secs(secs as u64)),
        };
        let max_connections_per_identity = parse_positive(
            max_connections_per_identity,
            "MAX_CONNECTIONS_PER_IDENTITY",
        )?
        .unwrap_or(BrokerConfig::default().max_connections_per_identity);

        Ok(Self {
            listen_addr,
            database_url,
            rate_limit,
            max_connections_per_identity,
        })
    }
}

fn parse_positive(value: Option<String>, name: &str) -> anyhow::Result<Option<usize>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let parsed: usize = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} must be a positive integer, got {raw:?}"))?;
    if parsed == 0 {
        return Err(anyhow::anyhow!("{name} must be a positive integer"));
    }
    Ok(Some(parsed))
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let storage = Arc::new(PostgresStorage::connect(&config.database_url).await?);
    migrate_with_pool(storage.pool()).await?;

    let broker = Arc::new(GroupBroker::new(BrokerConfig {
        max_connections_per_identity: config.max_connections_per_identity,
    }));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let presence = Arc::new(PresenceRegistry::new());

    // Abandoned rate-limit keys are swept once per window.
    let sweeper_limiter = Arc::clone(&limiter);
    let sweep_period = config.rate_limit.period;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sweeper_limiter.sweep_idle().await;
            if removed > 0 {
                tracing::debug!(removed, "swept idle rate-limit keys");
            }
        }
    });

    let api_state = ApiState::new(storage, broker, limiter, presence);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");
    axum::serve(listener, tandem_api::router(api_state)).await?;
    Ok(())
}
