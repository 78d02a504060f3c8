// Denominations, brands and IBC denom traces

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::error::{OrchestrationError, Result};

/// Chain-local token identifier, e.g. `uatom` or `ibc/27394F...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Denom(String);

/// Opaque asset key handed to us by the value subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Brand(String);

/// Either a local denom or a brand that maps to one
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenomArg {
    Denom(Denom),
    Brand(Brand),
}

impl Denom {
    pub fn new(denom: impl Into<String>) -> Self {
        Self(denom.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ibc/<hash>` vouchers
    pub fn is_ibc(&self) -> bool {
        self.0.starts_with("ibc/")
    }
}

impl Brand {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Denom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Denom {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Denom {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Denom> for DenomArg {
    fn from(denom: Denom) -> Self {
        Self::Denom(denom)
    }
}

impl From<Brand> for DenomArg {
    fn from(brand: Brand) -> Self {
        Self::Brand(brand)
    }
}

impl From<&str> for DenomArg {
    fn from(s: &str) -> Self {
        Self::Denom(Denom::from(s))
    }
}

/// Path of an IBC voucher back to its base denom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomTrace {
    /// `port/channel` pairs, e.g. `transfer/channel-0`
    pub path: String,
    pub base_denom: String,
}

impl DenomTrace {
    /// Split `transfer/channel-0/uatom` into path and base denom
    pub fn from_full_path(full_path: &str) -> Result<Self> {
        let segments: Vec<&str> = full_path.split('/').collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(OrchestrationError::validation(format!("invalid denom path {}", full_path)));
        }
        // port/channel pairs come first; everything after them is the base denom
        let mut pairs = 0;
        while pairs * 2 + 1 < segments.len() - 1 && segments[pairs * 2 + 1].starts_with("channel-") {
            pairs += 1;
        }
        if pairs == 0 {
            return Err(OrchestrationError::validation(format!("denom path {} has no channel", full_path)));
        }
        Ok(Self {
            path: segments[..pairs * 2].join("/"),
            base_denom: segments[pairs * 2..].join("/"),
        })
    }

    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.base_denom.clone()
        } else {
            format!("{}/{}", self.path, self.base_denom)
        }
    }

    /// `ibc/` + uppercase hex SHA-256 of the full path
    pub fn ibc_denom(&self) -> Denom {
        if self.path.is_empty() {
            return Denom::new(self.base_denom.clone());
        }
        let hash = Sha256::digest(self.full_path().as_bytes());
        Denom::new(format!("ibc/{}", hex::encode_upper(hash)))
    }
}

/// Pure lookup from brands and vouchers to canonical per-chain denoms
#[derive(Debug, Clone, Default)]
pub struct DenomResolver {
    brands: HashMap<Brand, HashMap<String, Denom>>,
    traces: HashMap<Denom, DenomTrace>,
}

impl DenomResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register where a brand lives on a chain. `local` is either a native denom
    /// or a full trace path, in which case the voucher denom is derived from it.
    pub fn register(&mut self, brand: Brand, chain_id: &str, local: &str) -> Result<Denom> {
        let denom = if local.contains('/') && !local.starts_with("ibc/") {
            let trace = DenomTrace::from_full_path(local)?;
            let denom = trace.ibc_denom();
            self.traces.insert(denom.clone(), trace);
            denom
        } else {
            Denom::new(local)
        };
        self.brands
            .entry(brand)
            .or_default()
            .insert(chain_id.to_string(), denom.clone());
        Ok(denom)
    }

    /// Resolve a denom argument to the local denom on `chain_id`
    pub fn resolve(&self, arg: &DenomArg, chain_id: &str) -> Result<Denom> {
        match arg {
            DenomArg::Denom(denom) => Ok(denom.clone()),
            DenomArg::Brand(brand) => self
                .brands
                .get(brand)
                .and_then(|chains| chains.get(chain_id))
                .cloned()
                .ok_or_else(|| {
                    OrchestrationError::validation(format!("brand {} has no denom on {}", brand, chain_id))
                }),
        }
    }

    /// Known trace for a voucher denom
    pub fn trace(&self, denom: &Denom) -> Option<&DenomTrace> {
        self.traces.get(denom)
    }

    /// Base denom of the asset, following a known trace
    pub fn base_denom(&self, denom: &Denom) -> Denom {
        self.traces
            .get(denom)
            .map(|t| Denom::new(t.base_denom.clone()))
            .unwrap_or_else(|| denom.clone())
    }

    /// Whether two denoms denote the same underlying asset
    pub fn same_asset(&self, a: &Denom, b: &Denom) -> bool {
        a == b || self.base_denom(a) == self.base_denom(b)
    }
}
