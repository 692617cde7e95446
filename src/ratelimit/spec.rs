// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Parser for the rate-limit textual form:
//! `[@id] <N>/<duration> [burst=N] [block_after=<N>/<duration>] [block_for=<duration>] [advise=<bool>]`
//!
//! A bare duration (`1m`, `30s`) is interpreted as `1/<duration>`.

use std::time::Duration;

use thiserror::Error;

use super::LimitConfig;

/// A parsed limit spec: an optional id plus the [`LimitConfig`] it names.
#[derive(Clone, Debug)]
pub struct NamedLimit {
    /// Optional `@id` tag, used by callers that key limits by name.
    pub id: Option<String>,
    /// The parsed configuration.
    pub config: LimitConfig,
}

/// Errors parsing a rate-limit textual spec.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty rate limit spec")]
    Empty,
    #[error("malformed rate/duration term: {0:?}")]
    BadRate(String),
    #[error("malformed duration: {0:?}")]
    BadDuration(String),
    #[error("malformed burst term: {0:?}")]
    BadBurst(String),
    #[error("malformed block_after term: {0:?}")]
    BadBlockAfter(String),
    #[error("malformed advise term: {0:?}")]
    BadAdvise(String),
}

fn parse_duration(raw: &str) -> Result<Duration, ParseError> {
    let raw = raw.trim();
    let split_at = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ParseError::BadDuration(raw.to_string()))?;
    let (num, unit) = raw.split_at(split_at);
    let n: u64 = num
        .parse()
        .map_err(|_| ParseError::BadDuration(raw.to_string()))?;
    let dur = match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => return Err(ParseError::BadDuration(raw.to_string())),
    };
    Ok(dur)
}

fn parse_rate(raw: &str) -> Result<(u32, Duration), ParseError> {
    match raw.split_once('/') {
        Some((n, dur)) => {
            let n: u32 = n
                .parse()
                .map_err(|_| ParseError::BadRate(raw.to_string()))?;
            Ok((n, parse_duration(dur)?))
        }
        None => Ok((1, parse_duration(raw)?)),
    }
}

/// Parse a single textual rate-limit spec.
pub fn parse(raw: &str) -> Result<NamedLimit, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut tokens = raw.split_whitespace();
    let first = tokens.next().ok_or(ParseError::Empty)?;

    let (id, rate_token) = if let Some(stripped) = first.strip_prefix('@') {
        (
            Some(stripped.to_string()),
            tokens.next().ok_or(ParseError::Empty)?,
        )
    } else {
        (None, first)
    };

    let (limit, period) = parse_rate(rate_token)?;
    let mut config = LimitConfig::simple(limit, period);

    for tok in tokens {
        if let Some(v) = tok.strip_prefix("burst=") {
            config.burst = v
                .parse()
                .map_err(|_| ParseError::BadBurst(tok.to_string()))?;
        } else if let Some(v) = tok.strip_prefix("block_after=") {
            let (n, dur) = parse_rate(v).map_err(|_| ParseError::BadBlockAfter(tok.to_string()))?;
            let for_ = config.block.map(|(_, f)| f).unwrap_or(dur);
            config.block = Some((n, for_));
        } else if let Some(v) = tok.strip_prefix("block_for=") {
            let dur = parse_duration(v).map_err(|_| ParseError::BadBlockAfter(tok.to_string()))?;
            let threshold = config.block.map(|(n, _)| n).unwrap_or(limit);
            config.block = Some((threshold, dur));
        } else if let Some(v) = tok.strip_prefix("advise=") {
            let advise: bool = v
                .parse()
                .map_err(|_| ParseError::BadAdvise(tok.to_string()))?;
            config.no_header = !advise;
        }
    }

    Ok(NamedLimit { id, config })
}
