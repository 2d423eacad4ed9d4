use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub platform_api_url: String,
    pub platform_token_url: String,
    pub daily_quota_budget: u64,
    pub quota_reset_hour_utc: u32,
    pub poll_interval_minutes: u64,
    pub idle_poll_interval_minutes: u64,
    pub sweep_interval_minutes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL is required")?;

        let platform_api_url =
            env::var("PLATFORM_API_URL").map_err(|_| "PLATFORM_API_URL is required")?;

        let platform_token_url =
            env::var("PLATFORM_TOKEN_URL").map_err(|_| "PLATFORM_TOKEN_URL is required")?;

        let bind_addr =
            env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let daily_quota_budget = parse_or("DAILY_QUOTA_BUDGET", 10_000)?;
        let quota_reset_hour_utc = parse_or("QUOTA_RESET_HOUR_UTC", 0)?;
        if quota_reset_hour_utc > 23 {
            return Err("QUOTA_RESET_HOUR_UTC must be between 0 and 23".to_string());
        }
        let poll_interval_minutes = parse_or("POLL_INTERVAL_MINUTES", 30)?;
        let idle_poll_interval_minutes = parse_or("IDLE_POLL_INTERVAL_MINUTES", 120)?;
        let sweep_interval_minutes = parse_or("SWEEP_INTERVAL_MINUTES", 60)?;

        Ok(Self {
            database_url,
            bind_addr,
            platform_api_url,
            platform_token_url,
            daily_quota_budget,
            quota_reset_hour_utc,
            poll_interval_minutes,
            idle_poll_interval_minutes,
            sweep_interval_minutes,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
