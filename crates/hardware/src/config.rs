//! Column mapping configuration for inventory files.
//!
//! The default mapping matches the standard inventory header:
//!
//! ```text
//! hostname,bmc_ip,bmc_username,bmc_password,bmc_port,mac,ip_address,netmask,gateway,nameservers,labels,disk
//! ```
//!
//! Sites that export inventory from another system can rename any column
//! with a partial YAML override:
//!
//! ```yaml
//! hostname: name
//! mac: primary_mac
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a column mapping.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The override could not be parsed.
    #[error("Failed to parse column mapping: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The mapping is structurally invalid.
    #[error("Invalid column mapping: {0}")]
    InvalidMapping(String),
}

/// Header name for every machine field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnMapping {
    /// Machine hostname.
    pub hostname: String,
    /// BMC address.
    pub bmc_ip: String,
    /// BMC username.
    pub bmc_username: String,
    /// BMC password.
    pub bmc_password: String,
    /// BMC port. Optional in the inventory file.
    pub bmc_port: String,
    /// Provisioning interface MAC address.
    pub mac: String,
    /// Provisioning interface IP address.
    pub ip_address: String,
    /// Provisioning interface netmask.
    pub netmask: String,
    /// Default gateway.
    pub gateway: String,
    /// DNS servers.
    pub nameservers: String,
    /// Hardware labels.
    pub labels: String,
    /// OS install disk.
    pub disk: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            hostname: "hostname".into(),
            bmc_ip: "bmc_ip".into(),
            bmc_username: "bmc_username".into(),
            bmc_password: "bmc_password".into(),
            bmc_port: "bmc_port".into(),
            mac: "mac".into(),
            ip_address: "ip_address".into(),
            netmask: "netmask".into(),
            gateway: "gateway".into(),
            nameservers: "nameservers".into(),
            labels: "labels".into(),
            disk: "disk".into(),
        }
    }
}

impl ColumnMapping {
    /// Parse a (possibly partial) mapping override from YAML.
    ///
    /// Fields that are not set keep their default header name.
    ///
    /// # Errors
    /// Returns an error if the YAML is malformed, names an unknown field,
    /// or the resulting mapping fails [`ColumnMapping::validate`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mapping: Self = serde_yaml::from_str(yaml)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Check that every header name is non-empty and used only once.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidMapping`] naming the offending column.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (field, column) in self.entries() {
            let normalized = normalize_header(column);
            if normalized.is_empty() {
                return Err(ConfigError::InvalidMapping(format!(
                    "column name for '{field}' is empty"
                )));
            }
            if !seen.insert(normalized) {
                return Err(ConfigError::InvalidMapping(format!(
                    "column '{column}' is mapped more than once"
                )));
            }
        }
        Ok(())
    }

    /// Header names that must be present in every inventory file.
    #[must_use]
    pub fn required_columns(&self) -> Vec<&str> {
        self.entries()
            .into_iter()
            .filter(|(field, _)| *field != "bmc_port")
            .map(|(_, column)| column)
            .collect()
    }

    fn entries(&self) -> [(&'static str, &str); 12] {
        [
            ("hostname", self.hostname.as_str()),
            ("bmc_ip", self.bmc_ip.as_str()),
            ("bmc_username", self.bmc_username.as_str()),
            ("bmc_password", self.bmc_password.as_str()),
            ("bmc_port", self.bmc_port.as_str()),
            ("mac", self.mac.as_str()),
            ("ip_address", self.ip_address.as_str()),
            ("netmask", self.netmask.as_str()),
            ("gateway", self.gateway.as_str()),
            ("nameservers", self.nameservers.as_str()),
            ("labels", self.labels.as_str()),
            ("disk", self.disk.as_str()),
        ]
    }
}

/// Header cells are compared trimmed and ASCII case-insensitively.
pub(crate) fn normalize_header(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
