// src/config.rs

use std::env;

use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without one the service keeps its data in memory.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,
    /// Fixed seed for random jumps, useful to reproduce a learner's path.
    pub rng_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let rng_seed = env::var("RNG_SEED")
            .ok()
            .map(|seed| seed.parse().expect("RNG_SEED must be an unsigned integer"));

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            rng_seed,
        }
    }
}
