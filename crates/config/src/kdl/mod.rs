//! KDL document parsing.

mod helpers;
mod sections;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::Config;

use helpers::get_first_arg_string;

/// Parse a complete configuration document
pub fn parse_document(content: &str) -> Result<Config> {
    let doc: ::kdl::KdlDocument = content
        .parse()
        .map_err(|e| anyhow!("KDL parse error: {}", e))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "store" => {
                let dir = get_first_arg_string(node).ok_or_else(|| {
                    anyhow!("'store' requires a path argument, e.g., store \"/var/lib/mdacme\"")
                })?;
                config.store_dir = PathBuf::from(dir);
            }
            "ca" => config.ca = sections::parse_ca(node)?,
            "drive" => config.drive = sections::parse_drive(node)?,
            "transport" => config.transport = sections::parse_transport(node)?,
            other => {
                return Err(anyhow!(
                    "Unknown configuration node '{}'. Valid nodes: store, ca, drive, transport",
                    other
                ));
            }
        }
    }

    trace!(store = %config.store_dir.display(), "Parsed configuration document");
    Ok(config)
}
