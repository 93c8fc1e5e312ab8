// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Global `tracing` subscriber for hosts that do not install their own.
//!
//! `RUST_LOG` selects the filter (default `info`), `LOG_FORMAT` selects
//! `json` or `pretty` output.

use tracing_subscriber::EnvFilter;

use crate::config::{env_optional, LOG_FORMAT_ENV};

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// Unrecognised values fall back to `Pretty`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Self {
        env_optional(LOG_FORMAT_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.pretty().try_init().is_ok(),
    }
}
