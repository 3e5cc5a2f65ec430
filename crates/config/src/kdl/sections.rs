//! CA, drive and transport block parsing.

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::settings::*;

use super::helpers::{get_int_entry, get_string_entry, get_string_list, unknown_children};

fn reject_unknown(node: &::kdl::KdlNode, known: &[&str]) -> Result<()> {
    let unknown = unknown_children(node, known);
    if let Some(name) = unknown.first() {
        return Err(anyhow!(
            "Unknown entry '{}' in '{}' block. Valid entries: {}",
            name,
            node.name().value(),
            known.join(", ")
        ));
    }
    Ok(())
}

fn get_u64(node: &::kdl::KdlNode, name: &str) -> Result<Option<u64>> {
    get_int_entry(node, name)
        .map(|v| {
            u64::try_from(v).map_err(|_| anyhow!("'{}' must be a non-negative integer", name))
        })
        .transpose()
}

fn get_u32(node: &::kdl::KdlNode, name: &str) -> Result<Option<u32>> {
    get_int_entry(node, name)
        .map(|v| u32::try_from(v).map_err(|_| anyhow!("'{}' is out of range: {}", name, v)))
        .transpose()
}

/// Parse the `ca` block
pub fn parse_ca(node: &::kdl::KdlNode) -> Result<CaDefaults> {
    trace!("Parsing CA configuration block");
    reject_unknown(node, &["url", "protocol"])?;

    let ca = CaDefaults {
        url: get_string_entry(node, "url"),
        protocol: get_string_entry(node, "protocol").unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
    };

    trace!(url = ?ca.url, protocol = %ca.protocol, "Parsed CA configuration");
    Ok(ca)
}

/// Parse the `drive` block
pub fn parse_drive(node: &::kdl::KdlNode) -> Result<DriveSettings> {
    trace!("Parsing drive configuration block");
    reject_unknown(
        node,
        &[
            "challenges",
            "poll-interval-ms",
            "poll-max-interval-ms",
            "poll-timeout-secs",
            "max-poll-attempts",
            "renew-before-days",
        ],
    )?;

    let challenges = match get_string_list(node, "challenges") {
        Some(names) => names
            .iter()
            .map(|n| n.parse::<ChallengeType>())
            .collect::<Result<Vec<_>, _>>()?,
        None => default_challenges(),
    };

    let settings = DriveSettings {
        challenges,
        poll_interval_ms: get_u64(node, "poll-interval-ms")?
            .unwrap_or_else(default_poll_interval_ms),
        poll_max_interval_ms: get_u64(node, "poll-max-interval-ms")?
            .unwrap_or_else(default_poll_max_interval_ms),
        poll_timeout_secs: get_u64(node, "poll-timeout-secs")?
            .unwrap_or_else(default_poll_timeout_secs),
        max_poll_attempts: get_u32(node, "max-poll-attempts")?
            .unwrap_or_else(default_max_poll_attempts),
        renew_before_days: get_u32(node, "renew-before-days")?
            .unwrap_or_else(default_renew_before_days),
    };

    trace!(
        challenges = settings.challenges.len(),
        poll_interval_ms = settings.poll_interval_ms,
        poll_timeout_secs = settings.poll_timeout_secs,
        "Parsed drive configuration"
    );
    Ok(settings)
}

/// Parse the `transport` block
pub fn parse_transport(node: &::kdl::KdlNode) -> Result<TransportSettings> {
    trace!("Parsing transport configuration block");
    reject_unknown(
        node,
        &[
            "request-timeout-secs",
            "connect-timeout-secs",
            "user-agent",
            "proxy",
        ],
    )?;

    let settings = TransportSettings {
        request_timeout_secs: get_u64(node, "request-timeout-secs")?
            .unwrap_or_else(default_request_timeout_secs),
        connect_timeout_secs: get_u64(node, "connect-timeout-secs")?
            .unwrap_or_else(default_connect_timeout_secs),
        user_agent: get_string_entry(node, "user-agent").unwrap_or_else(default_user_agent),
        proxy: get_string_entry(node, "proxy"),
    };

    trace!(
        request_timeout_secs = settings.request_timeout_secs,
        proxy = ?settings.proxy,
        "Parsed transport configuration"
    );
    Ok(settings)
}
