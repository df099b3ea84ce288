use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_AI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash-lite";

/// Runtime configuration. Paths come from the CLI, secrets from the
/// environment (a `.env` file is honored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: PathBuf,
    pub media_root: PathBuf,
    pub jwt_secret: String,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Config {
    pub fn from_env(database: PathBuf, media_root: PathBuf) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let jwt_secret =
            dotenvy::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let api_key = dotenvy::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;
        let base_url =
            dotenvy::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_AI_BASE_URL.to_string());
        let model = dotenvy::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_AI_MODEL.to_string());
        Ok(Self {
            database,
            media_root,
            jwt_secret,
            gemini: GeminiConfig {
                api_key,
                base_url,
                model,
            },
        })
    }
}
