//! Projection of machines into the catalogue.

use thiserror::Error;
use tracing::{debug, info};

use crate::catalogue::{
    Bmc, BmcKey, BmcSpec, Catalogue, CatalogueError, Connection, Hardware, NetworkInterface,
    Projection, Secret, SecretRef,
};
use crate::machine::Machine;
use crate::reader::ReadError;

/// Errors raised by [`translate_all`].
#[derive(Error, Debug)]
pub enum IngestError {
    /// The inventory could not be read.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// A machine could not be written.
    #[error("Failed to write machine {hostname}: {source}")]
    Write {
        hostname: String,
        #[source]
        source: CatalogueError,
    },
}

/// Destination for decoded machines.
pub trait MachineWriter {
    /// Write one machine.
    ///
    /// # Errors
    /// Returns an error if the machine conflicts with what was already
    /// written. A failed write has no effect.
    fn write(&mut self, machine: &Machine) -> Result<(), CatalogueError>;
}

/// Writes machines into a [`Catalogue`] as BMC, secret and hardware entries.
#[derive(Debug, Clone, Copy)]
pub struct CatalogueWriter<'a> {
    catalogue: &'a Catalogue,
}

impl<'a> CatalogueWriter<'a> {
    /// Bind a writer to a catalogue.
    #[must_use]
    pub fn new(catalogue: &'a Catalogue) -> Self {
        Self { catalogue }
    }

    /// Build the catalogue entries for a machine without inserting them.
    ///
    /// The BMC port is copied verbatim; `0` stays `0`.
    #[must_use]
    pub fn project(machine: &Machine) -> Projection {
        let key = BmcKey::new(
            &machine.bmc_ip_address,
            &machine.bmc_username,
            machine.bmc_port,
        );
        let bmc_name = key.name();

        let secret = Secret {
            name: key.secret_name(),
            username: machine.bmc_username.clone(),
            password: machine.bmc_password.clone(),
        };

        let bmc = Bmc {
            name: bmc_name.clone(),
            spec: BmcSpec {
                connection: Connection {
                    host: machine.bmc_ip_address.clone(),
                    port: machine.bmc_port,
                    credentials_ref: SecretRef {
                        name: secret.name.clone(),
                    },
                    insecure_tls: true,
                },
            },
        };

        let hardware = Hardware {
            name: machine.hostname.clone(),
            hostname: machine.hostname.clone(),
            labels: machine.labels.clone(),
            disk: machine.disk.clone(),
            interface: NetworkInterface {
                mac: machine.mac_address.clone(),
                ip_address: machine.ip_address.clone(),
                netmask: machine.netmask.clone(),
                gateway: machine.gateway.clone(),
                nameservers: machine.nameservers.clone(),
            },
            bmc_ref: bmc_name,
        };

        Projection {
            key,
            bmc,
            secret,
            hardware,
        }
    }
}

impl MachineWriter for CatalogueWriter<'_> {
    fn write(&mut self, machine: &Machine) -> Result<(), CatalogueError> {
        let projection = Self::project(machine);
        let bmc = projection.bmc.name.clone();
        self.catalogue.insert_projection(projection)?;
        debug!(
            hostname = %machine.hostname,
            bmc = %bmc,
            bmc_port = machine.bmc_port,
            "Wrote machine to catalogue"
        );
        Ok(())
    }
}

/// Write every machine from `machines` into `writer`, in order.
///
/// Stops at the first read or write failure; machines written before the
/// failure stay written.
///
/// # Errors
/// Returns [`IngestError::Read`] if a row cannot be decoded and
/// [`IngestError::Write`] if a machine conflicts with the catalogue.
pub fn translate_all<I, W>(machines: I, writer: &mut W) -> Result<usize, IngestError>
where
    I: IntoIterator<Item = Result<Machine, ReadError>>,
    W: MachineWriter + ?Sized,
{
    let mut written = 0;
    for machine in machines {
        let machine = machine?;
        writer
            .write(&machine)
            .map_err(|source| IngestError::Write {
                hostname: machine.hostname.clone(),
                source,
            })?;
        written += 1;
    }
    info!(machines = written, "Translated inventory");
    Ok(written)
}
