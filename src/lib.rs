//! Kurso · AI-assisted course learning backend
//!
//! - Axum HTTP API plus an SSE readiness stream
//! - Optional OpenAI integration (via environment variables)
//! - In-memory stores; chapter unlock progression, points and achievements
//! - A reusable SSE readiness client (`client::ReadinessWatcher`)
//!
//! Important env variables:
//!   PORT          : u16 (default 3000)
//!   OPENAI_API_KEY    : enables OpenAI integration if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL  : default "gpt-4o-mini"
//!   OPENAI_STRONG_MODEL   : default "gpt-4o"
//!   KURSO_CONFIG_PATH  : path to TOML config (prompt templates)
//!   READINESS_TIMEOUT_SECS : SSE readiness budget (default 300)
//!   LOG_LEVEL    : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT    : "pretty" (default) or "json"

pub mod telemetry;
pub mod util;
pub mod domain;
pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod ai;
pub mod state;
pub mod protocol;
pub mod points;
pub mod achievements;
pub mod progression;
pub mod openai;
pub mod client;
pub mod routes;
