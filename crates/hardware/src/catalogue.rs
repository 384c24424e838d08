//! In-memory catalogue of BMC, credential and hardware records.
//!
//! The catalogue is owned by the caller of an ingestion run and shared by
//! reference with its writers. Every insert takes a single write lock, so
//! the conflict checks and the insert itself are atomic.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::machine::Labels;

/// Errors raised when an insert conflicts with existing entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogueError {
    /// A BMC with the same identity exists with different settings.
    #[error("BMC {name} conflicts with an existing entry: {reason}")]
    BmcConflict { name: String, reason: String },

    /// A different hardware record already uses this hostname.
    #[error("Hardware with hostname {hostname} already exists")]
    DuplicateHostname { hostname: String },

    /// The MAC address already belongs to another machine.
    #[error("MAC address {mac} is already used by {existing}")]
    DuplicateMac { mac: String, existing: String },
}

/// Identity of a BMC: its address, the account used to reach it and the
/// port it listens on.
///
/// Virtual BMCs commonly share one address and differ only by port, so the
/// port is part of the identity. Port `0` is its own identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BmcKey {
    /// BMC address.
    pub address: String,
    /// BMC username.
    pub username: String,
    /// BMC port, `0` when unspecified.
    pub port: u16,
}

impl BmcKey {
    /// Create a key from an address, username and port.
    #[must_use]
    pub fn new(address: impl Into<String>, username: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            port,
        }
    }

    /// Stable object name for the BMC, e.g. `bmc-192-168-0-10-admin-6230`.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "bmc-{}-{}-{}",
            dns_label(&self.address),
            dns_label(&self.username),
            self.port
        )
    }

    /// Name of the secret holding this BMC's credentials.
    #[must_use]
    pub fn secret_name(&self) -> String {
        format!("{}-auth", self.name())
    }
}

/// Lower-case, replace anything outside `[a-z0-9]` with `-`, collapse runs.
fn dns_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Reference to the secret that holds BMC credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Secret name.
    pub name: String,
}

/// How to reach a BMC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// BMC address.
    pub host: String,
    /// BMC port. `0` is passed through untouched so the BMC controller
    /// applies its protocol default (623 for IPMI).
    pub port: u16,
    /// Credentials for the BMC.
    pub credentials_ref: SecretRef,
    /// Skip TLS verification (BMCs ship self-signed certificates).
    pub insecure_tls: bool,
}

/// BMC spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcSpec {
    /// Connection settings.
    pub connection: Connection,
}

/// A BMC connection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bmc {
    /// Object name, derived from the [`BmcKey`].
    pub name: String,
    /// BMC spec.
    pub spec: BmcSpec,
}

/// BMC credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Secret name.
    pub name: String,
    /// BMC username.
    pub username: String,
    /// BMC password.
    pub password: String,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Provisioning network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// MAC address.
    pub mac: String,
    /// IP address.
    pub ip_address: String,
    /// Netmask.
    pub netmask: String,
    /// Default gateway.
    pub gateway: String,
    /// DNS servers.
    pub nameservers: Vec<String>,
}

/// A provisioning target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    /// Object name.
    pub name: String,
    /// Host name of the node.
    pub hostname: String,
    /// Hardware labels.
    pub labels: Labels,
    /// OS install disk.
    pub disk: String,
    /// Provisioning interface.
    pub interface: NetworkInterface,
    /// Name of the BMC that controls this machine.
    pub bmc_ref: String,
}

/// BMC, secret and hardware derived from one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// BMC identity.
    pub key: BmcKey,
    /// BMC entry.
    pub bmc: Bmc,
    /// BMC credentials.
    pub secret: Secret,
    /// Hardware entry.
    pub hardware: Hardware,
}

#[derive(Debug, Default)]
struct State {
    bmcs: HashMap<BmcKey, Bmc>,
    secrets: HashMap<String, Secret>,
    hardware: HashMap<String, Hardware>,
    /// MAC -> hostname.
    macs: HashMap<String, String>,
}

impl State {
    /// `Ok(true)` if an identical BMC exists, `Ok(false)` if there is none.
    fn check_bmc(
        &self,
        key: &BmcKey,
        bmc: &Bmc,
        secret: &Secret,
    ) -> Result<bool, CatalogueError> {
        let Some(existing) = self.bmcs.get(key) else {
            // Distinct identities can normalise to the same object name.
            if self.secrets.contains_key(&secret.name)
                || self.bmcs.values().any(|b| b.name == bmc.name)
            {
                return Err(CatalogueError::BmcConflict {
                    name: bmc.name.clone(),
                    reason: "name is already used by a BMC with a different identity".to_string(),
                });
            }
            return Ok(false);
        };

        let same_credentials = self
            .secrets
            .get(&existing.spec.connection.credentials_ref.name)
            .is_some_and(|s| s.username == secret.username && s.password == secret.password);
        if !same_credentials {
            return Err(CatalogueError::BmcConflict {
                name: existing.name.clone(),
                reason: "credentials differ from existing entry".to_string(),
            });
        }

        if existing != bmc {
            return Err(CatalogueError::BmcConflict {
                name: existing.name.clone(),
                reason: "connection settings differ from existing entry".to_string(),
            });
        }

        Ok(true)
    }

    /// `Ok(true)` if an identical hardware record exists, `Ok(false)` if the
    /// hostname and MAC are both free.
    fn check_hardware(&self, hardware: &Hardware) -> Result<bool, CatalogueError> {
        if let Some(existing) = self.hardware.get(&hardware.hostname) {
            if existing == hardware {
                return Ok(true);
            }
            return Err(CatalogueError::DuplicateHostname {
                hostname: hardware.hostname.clone(),
            });
        }

        if let Some(owner) = self.macs.get(&hardware.interface.mac) {
            return Err(CatalogueError::DuplicateMac {
                mac: hardware.interface.mac.clone(),
                existing: owner.clone(),
            });
        }

        Ok(false)
    }

    fn put_bmc(&mut self, key: BmcKey, bmc: Bmc, secret: Secret) {
        self.secrets.insert(secret.name.clone(), secret);
        self.bmcs.insert(key, bmc);
    }

    fn put_hardware(&mut self, hardware: Hardware) {
        self.macs
            .insert(hardware.interface.mac.clone(), hardware.hostname.clone());
        self.hardware.insert(hardware.hostname.clone(), hardware);
    }
}

/// Deduplicated store of BMC, secret and hardware entries.
#[derive(Debug, Default)]
pub struct Catalogue {
    state: RwLock<State>,
}

impl Catalogue {
    /// Create an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer never leaves partial state behind: all checks run
    // before the first mutation.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a BMC and its credentials.
    ///
    /// Inserting an identical BMC again is a no-op.
    ///
    /// # Errors
    /// Returns [`CatalogueError::BmcConflict`] if an entry with the same
    /// identity has different credentials or connection settings, or if
    /// another identity already uses the same object name.
    pub fn insert_bmc(
        &self,
        key: BmcKey,
        bmc: Bmc,
        secret: Secret,
    ) -> Result<(), CatalogueError> {
        let mut state = self.write();
        let exists = state
            .check_bmc(&key, &bmc, &secret)
            .inspect_err(log_conflict)?;
        if !exists {
            state.put_bmc(key, bmc, secret);
        }
        Ok(())
    }

    /// Insert a hardware record.
    ///
    /// Inserting an identical record again is a no-op.
    ///
    /// # Errors
    /// Returns [`CatalogueError::DuplicateHostname`] or
    /// [`CatalogueError::DuplicateMac`] if the record clashes with an
    /// existing one.
    pub fn insert_hardware(&self, hardware: Hardware) -> Result<(), CatalogueError> {
        let mut state = self.write();
        let exists = state.check_hardware(&hardware).inspect_err(log_conflict)?;
        if !exists {
            state.put_hardware(hardware);
        }
        Ok(())
    }

    /// Insert the BMC, secret and hardware for one machine atomically.
    ///
    /// # Errors
    /// Returns the first conflict found. Nothing is inserted on error.
    pub fn insert_projection(&self, projection: Projection) -> Result<(), CatalogueError> {
        let Projection {
            key,
            bmc,
            secret,
            hardware,
        } = projection;

        let mut state = self.write();
        let bmc_exists = state
            .check_bmc(&key, &bmc, &secret)
            .inspect_err(log_conflict)?;
        let hardware_exists = state.check_hardware(&hardware).inspect_err(log_conflict)?;

        if !bmc_exists {
            state.put_bmc(key, bmc, secret);
        }
        if !hardware_exists {
            state.put_hardware(hardware);
        }
        Ok(())
    }

    /// Snapshot of all BMC entries. Order is unspecified.
    #[must_use]
    pub fn all_bmcs(&self) -> Vec<Bmc> {
        self.read().bmcs.values().cloned().collect()
    }

    /// Snapshot of all BMC credential secrets. Order is unspecified.
    #[must_use]
    pub fn all_secrets(&self) -> Vec<Secret> {
        self.read().secrets.values().cloned().collect()
    }

    /// Snapshot of all hardware entries. Order is unspecified.
    #[must_use]
    pub fn all_hardware(&self) -> Vec<Hardware> {
        self.read().hardware.values().cloned().collect()
    }

    /// Look up a BMC by object name.
    #[must_use]
    pub fn bmc(&self, name: &str) -> Option<Bmc> {
        self.read().bmcs.values().find(|b| b.name == name).cloned()
    }

    /// Look up a BMC by identity.
    #[must_use]
    pub fn bmc_by_key(&self, key: &BmcKey) -> Option<Bmc> {
        self.read().bmcs.get(key).cloned()
    }

    /// Look up a secret by name.
    #[must_use]
    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.read().secrets.get(name).cloned()
    }

    /// Look up hardware by hostname.
    #[must_use]
    pub fn hardware_by_hostname(&self, hostname: &str) -> Option<Hardware> {
        self.read().hardware.get(hostname).cloned()
    }

    /// Look up hardware by MAC address (lower-case colon-hex).
    #[must_use]
    pub fn hardware_by_mac(&self, mac: &str) -> Option<Hardware> {
        let state = self.read();
        state
            .macs
            .get(mac)
            .and_then(|hostname| state.hardware.get(hostname))
            .cloned()
    }

    /// All hardware carrying `key=value`. Order is unspecified.
    #[must_use]
    pub fn hardware_with_label(&self, key: &str, value: &str) -> Vec<Hardware> {
        self.read()
            .hardware
            .values()
            .filter(|h| h.labels.get(key).is_some_and(|v| v == value))
            .cloned()
            .collect()
    }

    /// Number of BMC entries.
    #[must_use]
    pub fn bmc_count(&self) -> usize {
        self.read().bmcs.len()
    }

    /// Number of hardware entries.
    #[must_use]
    pub fn hardware_count(&self) -> usize {
        self.read().hardware.len()
    }
}

fn log_conflict(error: &CatalogueError) {
    warn!(error = %error, "Rejected conflicting catalogue entry");
}
