// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, their defaults, and the [`Config`] loaded
//! from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CARECHAIN_DATA_DIR` | Root directory for audit and chain exports | `./data` |
//! | `CARECHAIN_ANCHOR_TIMEOUT_MS` | Timeout applied to every anchor call | `5000` |
//! | `CARECHAIN_CIPHER_KEY` | Hex key for payload encryption | Unset (normal records only) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::paths::DATA_ROOT;

/// Environment variable name for the export directory.
///
/// Audit streams land in `{dir}/audit/` and custody chains in `{dir}/chains/`.
pub const DATA_DIR_ENV: &str = "CARECHAIN_DATA_DIR";

/// Environment variable name for the anchor call timeout, in milliseconds.
///
/// An anchor call that outlives it is reported as unreachable and nothing
/// is committed.
///
/// # Default
/// `5000`
pub const ANCHOR_TIMEOUT_MS_ENV: &str = "CARECHAIN_ANCHOR_TIMEOUT_MS";

/// Environment variable name for the payload cipher key (hex, at least 32 bytes).
///
/// When unset, only records with `normal` sensitivity can be stored.
pub const CIPHER_KEY_ENV: &str = "CARECHAIN_CIPHER_KEY";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_ANCHOR_TIMEOUT_MS: u64 = 5_000;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` directly, for use before a subscriber exists.
    /// Anything other than `json` means pretty.
    pub fn from_env() -> Self {
        match env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub anchor_timeout: Duration,
    /// Hex-encoded key; validated when the cipher is built.
    pub cipher_key: Option<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_ROOT),
            anchor_timeout: Duration::from_millis(DEFAULT_ANCHOR_TIMEOUT_MS),
            cipher_key: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load through an arbitrary lookup. Invalid values fall back to defaults
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup(DATA_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let anchor_timeout = match lookup(ANCHOR_TIMEOUT_MS_ENV) {
            None => defaults.anchor_timeout,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    tracing::warn!(
                        variable = ANCHOR_TIMEOUT_MS_ENV,
                        value = %raw,
                        default = DEFAULT_ANCHOR_TIMEOUT_MS,
                        "Invalid anchor timeout, using default"
                    );
                    defaults.anchor_timeout
                }
            },
        };

        let cipher_key = lookup(CIPHER_KEY_ENV).filter(|v| !v.trim().is_empty());

        let log_format = match lookup(LOG_FORMAT_ENV).as_deref().map(str::trim) {
            None | Some("") => defaults.log_format,
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Some(other) => {
                tracing::warn!(variable = LOG_FORMAT_ENV, value = other, "Unknown log format, using pretty");
                defaults.log_format
            }
        };

        Self {
            data_dir,
            anchor_timeout,
            cipher_key,
            log_format,
        }
    }
}
