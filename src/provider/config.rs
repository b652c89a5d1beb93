//! Provider configuration records and the backend discriminator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend variant a provider configuration selects.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Machines on the calling host; full reference implementation.
    Local,
    /// Amazon Web Services. Placeholder, not yet implemented.
    Aws,
    /// Hetzner Cloud. Placeholder, not yet implemented.
    Hetzner,
    /// Google Cloud Platform. Placeholder, not yet implemented.
    Gcp,
    /// Microsoft Azure. Placeholder, not yet implemented.
    Azure,
}

impl ProviderKind {
    /// Returns the lowercase discriminator used in stored configurations.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Aws => "aws",
            Self::Hetzner => "hetzner",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "aws" => Ok(Self::Aws),
            "hetzner" => Ok(Self::Hetzner),
            "gcp" => Ok(Self::Gcp),
            "azure" => Ok(Self::Azure),
            other => Err(ProviderKindError::Unknown {
                value: other.to_owned(),
            }),
        }
    }
}

/// Errors raised parsing a provider discriminator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderKindError {
    /// Raised when the stored discriminator names no known backend.
    #[error("unknown provider kind: {value}")]
    Unknown {
        /// Discriminator that failed to parse.
        value: String,
    },
}

/// Stored configuration selecting and parameterising one backend.
///
/// `credentials` and `config` are opaque maps validated only by the
/// backend that consumes them; each backend parses its slice into a typed
/// structure immediately on receipt and never passes the bags deeper.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderConfig {
    /// Opaque unique identifier.
    pub id: String,
    /// Tenant that owns the configuration.
    pub tenant_id: String,
    /// Backend variant that handles machines created under this
    /// configuration.
    pub kind: ProviderKind,
    /// Backend-specific secrets.
    pub credentials: BTreeMap<String, String>,
    /// Backend-specific settings.
    pub config: BTreeMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Creates a configuration with empty credential and settings bags.
    #[must_use]
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            kind,
            credentials: BTreeMap::new(),
            config: BTreeMap::new(),
        }
    }
}
