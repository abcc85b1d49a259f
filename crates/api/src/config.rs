//! API server configuration loaded from the environment.

/// Runtime configuration for the API server.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; `PORT` is optional and defaults to 8080.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let port = match std::env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|err| anyhow::anyhow!("invalid PORT: {err}"))?,
            Err(_) => 8080,
        };

        Ok(Self { database_url, port })
    }
}
