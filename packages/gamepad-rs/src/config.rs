use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

/// Coordinator options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    /// Commit the level stores on every fresh step and replay them in
    /// lockstep with history.
    pub magic_json: bool,
    /// Notify step taps of every step the coordinator forwards.
    pub highlight: bool,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            magic_json: true,
            highlight: false,
        }
    }
}

impl GamepadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            magic_json: match lookup("GAMEPAD_MAGIC_JSON") {
                Some(raw) => parse_flag(&raw).context("GAMEPAD_MAGIC_JSON must be a boolean")?,
                None => defaults.magic_json,
            },
            highlight: match lookup("GAMEPAD_HIGHLIGHT") {
                Some(raw) => parse_flag(&raw).context("GAMEPAD_HIGHLIGHT must be a boolean")?,
                None => defaults.highlight,
            },
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("unrecognised flag value {other:?}"),
    }
}
