use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, read from the environment (and `.env` via dotenvy in `main`)
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub store_busy_timeout: Duration,
    pub mention_scan_interval: Duration,
    pub mention_cooldown: Duration,
    pub checkin_scan_interval: Duration,
    pub checkin_cooldown: Duration,
    /// Check-in interval given to couple spaces created by accepting a couple request
    pub default_check_in_interval_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8069,
            database_path: "spaces.db".to_string(),
            jwt_secret: "default_jwt_secret_change_me".to_string(),
            store_busy_timeout: Duration::from_millis(5_000),
            mention_scan_interval: Duration::from_secs(3),
            mention_cooldown: Duration::from_secs(120),
            checkin_scan_interval: Duration::from_secs(10),
            checkin_cooldown: Duration::from_secs(300),
            default_check_in_interval_secs: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using default (not secure for production!)");
            defaults.jwt_secret.clone()
        });

        Self {
            port: parse_var("PORT", defaults.port),
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            jwt_secret,
            store_busy_timeout: Duration::from_millis(parse_var(
                "STORE_BUSY_TIMEOUT_MS",
                defaults.store_busy_timeout.as_millis() as u64,
            )),
            mention_scan_interval: Duration::from_secs(parse_var(
                "MENTION_SCAN_INTERVAL_SECS",
                defaults.mention_scan_interval.as_secs(),
            )),
            mention_cooldown: Duration::from_secs(parse_var(
                "MENTION_COOLDOWN_SECS",
                defaults.mention_cooldown.as_secs(),
            )),
            checkin_scan_interval: Duration::from_secs(parse_var(
                "CHECKIN_SCAN_INTERVAL_SECS",
                defaults.checkin_scan_interval.as_secs(),
            )),
            checkin_cooldown: Duration::from_secs(parse_var(
                "CHECKIN_COOLDOWN_SECS",
                defaults.checkin_cooldown.as_secs(),
            )),
            default_check_in_interval_secs: parse_var(
                "DEFAULT_CHECKIN_INTERVAL_SECS",
                defaults.default_check_in_interval_secs,
            ),
        }
    }
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("{} is not a valid value ({:?}), using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
