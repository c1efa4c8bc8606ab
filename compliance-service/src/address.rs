//! Deposit address format checks per network

use crate::error::{ComplianceError, Result};
use regex::Regex;
use std::sync::OnceLock;

struct NetworkFormat {
    network: &'static str,
    pattern: &'static str,
}

const FORMATS: &[NetworkFormat] = &[
    NetworkFormat {
        network: "ethereum",
        pattern: r"^0x[0-9a-fA-F]{40}$",
    },
    NetworkFormat {
        network: "polygon",
        pattern: r"^0x[0-9a-fA-F]{40}$",
    },
    NetworkFormat {
        network: "tron",
        pattern: r"^T[1-9A-HJ-NP-Za-km-z]{33}$",
    },
    NetworkFormat {
        network: "bitcoin",
        pattern: r"^(bc1[02-9ac-hj-np-z]{11,71}|[13][1-9A-HJ-NP-Za-km-z]{25,34})$",
    },
];

fn compiled() -> &'static Vec<(&'static str, Regex)> {
    static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        FORMATS
            .iter()
            .map(|f| (f.network, Regex::new(f.pattern).expect("static regex")))
            .collect()
    })
}

/// Networks addresses can be validated for
pub fn supported_networks() -> Vec<&'static str> {
    FORMATS.iter().map(|f| f.network).collect()
}

/// Check `address` is well formed for `network`
pub fn validate_address(network: &str, address: &str) -> Result<()> {
    let network = network.to_lowercase();
    let (_, regex) = compiled()
        .iter()
        .find(|(name, _)| *name == network)
        .ok_or_else(|| ComplianceError::UnsupportedNetwork(network.clone()))?;

    if regex.is_match(address) {
        Ok(())
    } else {
        Err(ComplianceError::InvalidAddress {
            network,
            address: address.to_string(),
        })
    }
}
