use payrail::PaymentConfig;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_DB_PATH: &str = "./payrail.db";
const DEFAULT_RATE_LIMIT_RPM: u64 = 120;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const MIN_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// SQLite database path
    pub db_path: String,
    /// CORS allowed origins (empty = localhost only)
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute per IP
    pub rate_limit_rpm: u64,
    /// Bearer token for /metrics (None = forbidden unless public metrics)
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
    /// Key for user bearer tokens
    pub auth_secret: Vec<u8>,
    /// Bearer token for admin endpoints (None = admin endpoints disabled)
    pub admin_token: Option<String>,
    pub sweep_interval_secs: u64,
    /// JSON file of plans to upsert at startup
    pub plans_path: Option<String>,
    pub payment: PaymentConfig,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .field("auth_secret", &"[REDACTED]")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("plans_path", &self.plans_path)
            .field("payment", &self.payment)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build from environment-style keys (`PORT`, `CARD_SECRET_KEY`, ...).
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth_secret = get("AUTH_SECRET")
            .ok_or(ConfigError::MissingRequired("AUTH_SECRET"))?
            .into_bytes();
        if auth_secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "AUTH_SECRET is only {} bytes (minimum {MIN_SECRET_LEN} recommended), \
                 use `openssl rand -hex 32` to generate one",
                auth_secret.len()
            );
        }

        let allowed_origins: Vec<String> = get("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::Invalid {
                key: "ALLOWED_ORIGINS",
                value: "wildcard origin is not allowed for payment endpoints".into(),
            });
        }

        let payment = PaymentConfig::from_source(|key| lookup(&key.replace('.', "_").to_uppercase()))?;

        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(DEFAULT_PORT),
            db_path: get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            allowed_origins,
            rate_limit_rpm: parse(&get, "RATE_LIMIT_RPM")?.unwrap_or(DEFAULT_RATE_LIMIT_RPM),
            metrics_token: get("METRICS_TOKEN"),
            public_metrics: get("PAYRAIL_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            auth_secret,
            admin_token: get("ADMIN_TOKEN"),
            sweep_interval_secs: parse(&get, "SWEEP_INTERVAL_SECONDS")?
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1),
            plans_path: get("PLANS_PATH"),
            payment,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error(transparent)]
    Payment(#[from] payrail::ConfigError),
}
