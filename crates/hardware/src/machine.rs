//! Machine records and cell parsing rules.
//!
//! A [`Machine`] is one fully decoded inventory row. The `parse_*` helpers
//! here implement the syntax of individual cells; the reader attaches row
//! and column context to their errors.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use mac_address::MacAddress;

/// Hardware labels, ordered by key.
pub type Labels = BTreeMap<String, String>;

const MAX_HOSTNAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// One machine from the inventory.
#[derive(Clone, PartialEq, Eq)]
pub struct Machine {
    /// Host name of the provisioned node.
    pub hostname: String,
    /// BMC address (IP literal or host name).
    pub bmc_ip_address: String,
    /// BMC username.
    pub bmc_username: String,
    /// BMC password.
    pub bmc_password: String,
    /// BMC port. `0` means unspecified: the BMC controller applies its own
    /// protocol default.
    pub bmc_port: u16,
    /// Provisioning interface MAC, lower-case colon-hex.
    pub mac_address: String,
    /// Provisioning interface IP address.
    pub ip_address: String,
    /// Provisioning interface netmask.
    pub netmask: String,
    /// Default gateway.
    pub gateway: String,
    /// DNS servers.
    pub nameservers: Vec<String>,
    /// Hardware labels (e.g. `type=cp`).
    pub labels: Labels,
    /// OS install disk.
    pub disk: String,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("hostname", &self.hostname)
            .field("bmc_ip_address", &self.bmc_ip_address)
            .field("bmc_username", &self.bmc_username)
            .field("bmc_password", &"<redacted>")
            .field("bmc_port", &self.bmc_port)
            .field("mac_address", &self.mac_address)
            .field("ip_address", &self.ip_address)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("nameservers", &self.nameservers)
            .field("labels", &self.labels)
            .field("disk", &self.disk)
            .finish()
    }
}

impl Machine {
    /// Check whether the machine carries `key=value`.
    #[must_use]
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// Validate an RFC 1123 host name.
pub(crate) fn parse_hostname(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err("hostname cannot be empty".to_string());
    }
    if value.len() > MAX_HOSTNAME_LENGTH {
        return Err(format!(
            "hostname exceeds maximum of {MAX_HOSTNAME_LENGTH} characters"
        ));
    }
    for label in value.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return Err(format!(
                "hostname label '{label}' must be between 1 and {MAX_LABEL_LENGTH} characters"
            ));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!(
                "hostname label '{label}' may only contain lower-case alphanumerics and hyphens"
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!(
                "hostname label '{label}' cannot start or end with a hyphen"
            ));
        }
    }
    Ok(value.to_string())
}

/// Parse a MAC address into lower-case colon-hex form.
///
/// Accepts `:` or `-` separators in any case.
pub(crate) fn parse_mac(value: &str) -> Result<String, String> {
    if value.len() != 17 {
        return Err(format!("invalid MAC address '{value}'"));
    }
    let mac = MacAddress::from_str(&value.replace('-', ":"))
        .map_err(|e| format!("invalid MAC address '{value}': {e}"))?;
    Ok(mac
        .bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Validate an IP literal.
pub(crate) fn parse_ip(value: &str) -> Result<String, String> {
    IpAddr::from_str(value)
        .map(|ip| ip.to_string())
        .map_err(|_| format!("invalid IP address '{value}'"))
}

/// Validate a dotted IPv4 netmask (contiguous leading ones).
pub(crate) fn parse_netmask(value: &str) -> Result<String, String> {
    let mask = Ipv4Addr::from_str(value).map_err(|_| format!("invalid netmask '{value}'"))?;
    let bits = u32::from(mask);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(format!("netmask '{value}' is not contiguous"));
    }
    Ok(mask.to_string())
}

/// Parse a list of DNS servers separated by `,` or `|`.
pub(crate) fn parse_nameservers(value: &str) -> Result<Vec<String>, String> {
    let servers = split_list(value)
        .map(parse_ip)
        .collect::<Result<Vec<_>, _>>()?;
    if servers.is_empty() {
        return Err("at least one nameserver is required".to_string());
    }
    Ok(servers)
}

/// Parse `key=value` pairs separated by `,` or `|`. An empty cell yields no
/// labels.
pub(crate) fn parse_labels(value: &str) -> Result<Labels, String> {
    let mut labels = Labels::new();
    for pair in split_list(value) {
        let (key, val) = pair
            .split_once('=')
            .ok_or_else(|| format!("label '{pair}' is not in key=value form"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("label '{pair}' has an empty key"));
        }
        if labels.insert(key.to_string(), val.trim().to_string()).is_some() {
            return Err(format!("label key '{key}' is repeated"));
        }
    }
    Ok(labels)
}

/// Validate the OS install disk.
pub(crate) fn parse_disk(value: &str) -> Result<String, String> {
    match value.strip_prefix("/dev/") {
        Some(device) if !device.is_empty() => Ok(value.to_string()),
        _ => Err(format!("disk '{value}' must be a device path under /dev/")),
    }
}

/// Parse the BMC port. Empty means unspecified and yields `0`.
pub(crate) fn parse_bmc_port(value: &str) -> Result<u16, String> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<u16>()
        .map_err(|e| format!("invalid BMC port '{value}': {e}"))
}

/// Require a non-empty cell.
pub(crate) fn parse_required(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(value.to_string())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
