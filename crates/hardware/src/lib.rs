//! Bare metal hardware inventory ingestion.
//!
//! This crate reads a CSV description of bare metal machines and projects
//! every row into a [`Catalogue`] of BMC connection specs, BMC credentials
//! and provisioning hardware records. The catalogue is consumed by the
//! controller that drives out-of-band power and boot operations.
//!
//! # Example
//!
//! ```rust
//! use hardware::{translate_all, Catalogue, CatalogueWriter, CsvReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let inventory = "\
//! hostname,bmc_ip,bmc_username,bmc_password,mac,ip_address,netmask,gateway,nameservers,labels,disk
//! worker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda";
//!
//! let catalogue = Catalogue::new();
//! let reader = CsvReader::new(inventory.as_bytes(), None)?;
//! let mut writer = CatalogueWriter::new(&catalogue);
//!
//! let written = translate_all(reader, &mut writer)?;
//! assert_eq!(written, 1);
//!
//! // Port 0 means the BMC controller picks its own protocol default.
//! assert_eq!(catalogue.all_bmcs()[0].spec.connection.port, 0);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalogue;
pub mod config;
pub mod machine;
pub mod manifest;
pub mod reader;
pub mod writer;

pub use catalogue::{
    Bmc, BmcKey, BmcSpec, Catalogue, CatalogueError, Connection, Hardware, NetworkInterface,
    Projection, Secret, SecretRef,
};
pub use config::{ColumnMapping, ConfigError};
pub use machine::{Labels, Machine};
pub use manifest::render_yaml;
pub use reader::{CsvReader, ReadError};
pub use writer::{translate_all, CatalogueWriter, IngestError, MachineWriter};
