//! Streaming CSV inventory reader.
//!
//! [`CsvReader`] reads the header once at construction and then decodes one
//! record per [`CsvReader::read`] call, so callers can write each machine to
//! the catalogue before the next row is pulled from the stream.

use std::collections::HashMap;
use std::io::Read;
use std::iter::FusedIterator;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{normalize_header, ColumnMapping, ConfigError};
use crate::machine::{
    parse_bmc_port, parse_disk, parse_hostname, parse_ip, parse_labels, parse_mac,
    parse_nameservers, parse_netmask, parse_required, Machine,
};

/// Errors raised while reading an inventory.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The column mapping override is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The header row could not be read.
    #[error("Failed to read inventory header: {0}")]
    Header(#[source] csv::Error),

    /// The header names the same column twice.
    #[error("Inventory header contains column '{column}' more than once")]
    DuplicateColumn { column: String },

    /// Required columns are missing from the header.
    #[error("Inventory is missing required columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    /// A record is structurally broken (wrong field count, bad encoding).
    #[error("Row {row}: malformed record: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },

    /// A cell failed validation.
    #[error("Row {row}, column '{column}': {message}")]
    Decode {
        row: usize,
        column: String,
        message: String,
    },
}

impl ReadError {
    /// 1-based data row the error refers to, if any.
    #[must_use]
    pub fn row(&self) -> Option<usize> {
        match self {
            Self::Csv { row, .. } | Self::Decode { row, .. } => Some(*row),
            _ => None,
        }
    }
}

/// Position of every mapped column in the header.
#[derive(Debug, Clone, Copy)]
struct Columns {
    hostname: usize,
    bmc_ip: usize,
    bmc_username: usize,
    bmc_password: usize,
    bmc_port: Option<usize>,
    mac: usize,
    ip_address: usize,
    netmask: usize,
    gateway: usize,
    nameservers: usize,
    labels: usize,
    disk: usize,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord, mapping: &ColumnMapping) -> Result<Self, ReadError> {
        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            let name = normalize_header(header);
            if name.is_empty() {
                continue;
            }
            if index.insert(name, i).is_some() {
                return Err(ReadError::DuplicateColumn {
                    column: header.trim().to_string(),
                });
            }
        }

        let position = |column: &str| index.get(&normalize_header(column)).copied();

        let missing: Vec<String> = mapping
            .required_columns()
            .into_iter()
            .filter(|&column| position(column).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ReadError::MissingColumns { columns: missing });
        }

        let required = |column: &str| position(column).unwrap_or_default();
        Ok(Self {
            hostname: required(mapping.hostname.as_str()),
            bmc_ip: required(mapping.bmc_ip.as_str()),
            bmc_username: required(mapping.bmc_username.as_str()),
            bmc_password: required(mapping.bmc_password.as_str()),
            bmc_port: position(mapping.bmc_port.as_str()),
            mac: required(mapping.mac.as_str()),
            ip_address: required(mapping.ip_address.as_str()),
            netmask: required(mapping.netmask.as_str()),
            gateway: required(mapping.gateway.as_str()),
            nameservers: required(mapping.nameservers.as_str()),
            labels: required(mapping.labels.as_str()),
            disk: required(mapping.disk.as_str()),
        })
    }
}

/// Pull-based reader producing one [`Machine`] per data row, in file order.
///
/// The reader is forward-only. After the first error it is exhausted and
/// every further read returns `Ok(None)`.
pub struct CsvReader<R> {
    reader: csv::Reader<R>,
    mapping: ColumnMapping,
    columns: Columns,
    record: csv::StringRecord,
    rows: usize,
    done: bool,
}

impl<R: Read> CsvReader<R> {
    /// Create a reader and consume the header row.
    ///
    /// `mapping` overrides the header name of any field; `None` uses the
    /// standard names. The `bmc_port` column may be absent.
    ///
    /// # Errors
    /// Returns an error if the mapping is invalid, the header cannot be read,
    /// or any required column is missing. No data row is read.
    pub fn new(reader: R, mapping: Option<ColumnMapping>) -> Result<Self, ReadError> {
        let mapping = mapping.unwrap_or_default();
        mapping.validate()?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers().map_err(ReadError::Header)?;
        let columns = Columns::resolve(headers, &mapping)?;

        info!(
            columns = headers.len(),
            bmc_port_column = columns.bmc_port.is_some(),
            "Accepted inventory header"
        );

        Ok(Self {
            reader,
            mapping,
            columns,
            record: csv::StringRecord::new(),
            rows: 0,
            done: false,
        })
    }

    /// Read the next machine, or `None` at end of input.
    ///
    /// # Errors
    /// Returns [`ReadError::Csv`] for a structurally broken record and
    /// [`ReadError::Decode`] for an invalid cell. The reader is exhausted
    /// afterwards.
    pub fn read(&mut self) -> Result<Option<Machine>, ReadError> {
        if self.done {
            return Ok(None);
        }

        let row = self.rows + 1;
        let result = self.read_row(row);
        match result {
            Ok(Some(_)) => self.rows = row,
            _ => self.done = true,
        }
        result
    }

    /// Whether the header carries the optional BMC port column.
    #[must_use]
    pub fn has_bmc_port_column(&self) -> bool {
        self.columns.bmc_port.is_some()
    }

    /// Number of machines decoded so far.
    #[must_use]
    pub fn rows_read(&self) -> usize {
        self.rows
    }

    fn read_row(&mut self, row: usize) -> Result<Option<Machine>, ReadError> {
        let has_record = self
            .reader
            .read_record(&mut self.record)
            .map_err(|source| ReadError::Csv { row, source })?;
        if !has_record {
            return Ok(None);
        }

        let machine = self.decode(row)?;
        debug!(
            row,
            hostname = %machine.hostname,
            bmc_port = machine.bmc_port,
            "Decoded inventory row"
        );
        Ok(Some(machine))
    }

    fn decode(&self, row: usize) -> Result<Machine, ReadError> {
        let c = &self.columns;
        let m = &self.mapping;

        let bmc_port = match c.bmc_port {
            Some(index) => self.cell(row, index, &m.bmc_port, parse_bmc_port)?,
            None => 0,
        };

        Ok(Machine {
            hostname: self.cell(row, c.hostname, &m.hostname, parse_hostname)?,
            bmc_ip_address: self.cell(row, c.bmc_ip, &m.bmc_ip, parse_required)?,
            bmc_username: self.cell(row, c.bmc_username, &m.bmc_username, parse_required)?,
            bmc_password: self.cell(row, c.bmc_password, &m.bmc_password, parse_required)?,
            bmc_port,
            mac_address: self.cell(row, c.mac, &m.mac, parse_mac)?,
            ip_address: self.cell(row, c.ip_address, &m.ip_address, parse_ip)?,
            netmask: self.cell(row, c.netmask, &m.netmask, parse_netmask)?,
            gateway: self.cell(row, c.gateway, &m.gateway, parse_ip)?,
            nameservers: self.cell(row, c.nameservers, &m.nameservers, parse_nameservers)?,
            labels: self.cell(row, c.labels, &m.labels, parse_labels)?,
            disk: self.cell(row, c.disk, &m.disk, parse_disk)?,
        })
    }

    fn cell<T>(
        &self,
        row: usize,
        index: usize,
        column: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<T, ReadError> {
        parse(self.record.get(index).unwrap_or_default()).map_err(|message| ReadError::Decode {
            row,
            column: column.to_string(),
            message,
        })
    }
}

impl<R: Read> Iterator for CsvReader<R> {
    type Item = Result<Machine, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

impl<R: Read> FusedIterator for CsvReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "hostname,bmc_ip,bmc_username,bmc_password,mac,ip_address,netmask,gateway,nameservers,labels,disk";
    const HEADER_WITH_PORT: &str = "hostname,bmc_ip,bmc_username,bmc_password,bmc_port,mac,ip_address,netmask,gateway,nameservers,labels,disk";

    fn reader(data: &str) -> CsvReader<&[u8]> {
        CsvReader::new(data.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_port_column_absent() {
        let data = format!(
            "{HEADER}\nworker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda"
        );
        let mut reader = reader(&data);
        assert!(!reader.has_bmc_port_column());

        let machine = reader.read().unwrap().unwrap();
        assert_eq!(machine.bmc_port, 0, "BMC port defaults to 0 without the column");
        assert_eq!(machine.bmc_ip_address, "192.168.0.10");
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_port_cell_empty() {
        let data = format!(
            "{HEADER_WITH_PORT}\nworker1,192.168.0.10,Admin,admin,,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda"
        );
        let machine = reader(&data).read().unwrap().unwrap();
        assert_eq!(machine.bmc_port, 0, "BMC port defaults to 0 for an empty cell");
    }

    #[test]
    fn test_port_cell_value() {
        let data = format!(
            "{HEADER_WITH_PORT}\nworker1,192.168.0.10,Admin,admin,6230,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda"
        );
        let machine = reader(&data).read().unwrap().unwrap();
        assert_eq!(machine.bmc_port, 6230);
        assert_eq!(machine.bmc_ip_address, "192.168.0.10");
    }

    #[test]
    fn test_port_cell_not_numeric() {
        let data = format!(
            "{HEADER_WITH_PORT}\nworker1,192.168.0.10,Admin,admin,abc,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda"
        );
        let err = reader(&data).read().unwrap_err();
        match err {
            ReadError::Decode { row, column, .. } => {
                assert_eq!(row, 1);
                assert_eq!(column, "bmc_port");
            }
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn test_decodes_all_fields() {
        let data = format!(
            "{HEADER}\ncp-0,10.0.0.5,root,calvin,AA-BB-CC-DD-EE-FF,10.10.10.10,255.255.255.0,10.10.10.1,\"1.1.1.1,8.8.8.8\",\"type=cp,rack=r1\",/dev/nvme0n1"
        );
        let machine = reader(&data).read().unwrap().unwrap();
        assert_eq!(machine.hostname, "cp-0");
        assert_eq!(machine.bmc_username, "root");
        assert_eq!(machine.bmc_password, "calvin");
        assert_eq!(machine.mac_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(machine.netmask, "255.255.255.0");
        assert_eq!(machine.gateway, "10.10.10.1");
        assert_eq!(machine.nameservers, vec!["1.1.1.1", "8.8.8.8"]);
        assert!(machine.has_label("type", "cp"));
        assert!(machine.has_label("rack", "r1"));
        assert_eq!(machine.disk, "/dev/nvme0n1");
    }

    #[test]
    fn test_columns_in_any_order() {
        let data = "disk,labels,nameservers,gateway,netmask,ip_address,mac,bmc_port,bmc_password,bmc_username,bmc_ip,hostname\n\
                    /dev/sda,type=worker,1.1.1.1,10.10.10.1,255.255.255.0,10.10.10.11,00:00:00:00:00:02,623,admin,Admin,192.168.0.11,worker2";
        let machine = reader(data).read().unwrap().unwrap();
        assert_eq!(machine.hostname, "worker2");
        assert_eq!(machine.bmc_port, 623);
        assert_eq!(machine.mac_address, "00:00:00:00:00:02");
    }

    #[test]
    fn test_header_case_and_whitespace_ignored() {
        let data = "Hostname, BMC_IP ,bmc_username,bmc_password,mac,ip_address,netmask,gateway,nameservers,labels,DISK\n\
                    worker1, 192.168.0.10 ,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda";
        let machine = reader(data).read().unwrap().unwrap();
        assert_eq!(machine.bmc_ip_address, "192.168.0.10");
    }

    #[test]
    fn test_missing_required_columns() {
        let data = "hostname,bmc_ip,bmc_username,bmc_password,ip_address,netmask,gateway,nameservers,labels\n";
        let err = CsvReader::new(data.as_bytes(), None).err().unwrap();
        match err {
            ReadError::MissingColumns { columns } => assert_eq!(columns, vec!["mac", "disk"]),
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_is_schema_error() {
        let err = CsvReader::new("".as_bytes(), None).err().unwrap();
        match err {
            ReadError::MissingColumns { columns } => assert_eq!(columns.len(), 11),
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_header_column() {
        let data = format!("{HEADER},mac\n");
        let err = CsvReader::new(data.as_bytes(), None).err().unwrap();
        assert!(matches!(err, ReadError::DuplicateColumn { column } if column == "mac"));
    }

    #[test]
    fn test_invalid_required_cells() {
        let cases = [
            (",192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda", "hostname"),
            ("worker1,192.168.0.10,Admin,admin,00:00:00:00:00,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda", "mac"),
            ("worker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type,/dev/sda", "labels"),
            ("worker1,192.168.0.10,,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda", "bmc_username"),
            ("worker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.300,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda", "ip_address"),
        ];

        for (row, expected) in cases {
            let data = format!("{HEADER}\n{row}");
            let err = reader(&data).read().unwrap_err();
            match err {
                ReadError::Decode { row, column, .. } => {
                    assert_eq!(row, 1);
                    assert_eq!(column, expected);
                }
                other => panic!("expected Decode for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_error_names_row_and_stops_reader() {
        let data = format!(
            "{HEADER}\n\
             worker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda\n\
             worker2,192.168.0.11,Admin,admin,zz:00:00:00:00:02,10.10.10.11,255.255.255.0,10.10.10.1,1.1.1.1,type=worker,/dev/sda\n\
             worker3,192.168.0.12,Admin,admin,00:00:00:00:00:03,10.10.10.12,255.255.255.0,10.10.10.1,1.1.1.1,type=worker,/dev/sda"
        );
        let mut reader = reader(&data);
        assert!(reader.read().unwrap().is_some());

        let err = reader.read().unwrap_err();
        assert_eq!(err.row(), Some(2));
        assert!(err.to_string().contains("Row 2"));

        assert!(reader.read().unwrap().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.rows_read(), 1);
    }

    #[test]
    fn test_wrong_field_count() {
        let data = format!("{HEADER}\nworker1,192.168.0.10,Admin");
        let err = reader(&data).read().unwrap_err();
        assert!(matches!(err, ReadError::Csv { row: 1, .. }));
    }

    #[test]
    fn test_iterator_yields_rows_in_order() {
        let data = format!(
            "{HEADER}\n\
             worker1,192.168.0.10,Admin,admin,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda\n\
             worker2,192.168.0.11,Admin,admin,00:00:00:00:00:02,10.10.10.11,255.255.255.0,10.10.10.1,1.1.1.1,type=worker,/dev/sda\n"
        );
        let hostnames: Vec<String> = reader(&data).map(|m| m.unwrap().hostname).collect();
        assert_eq!(hostnames, vec!["worker1", "worker2"]);
    }

    #[test]
    fn test_custom_mapping() {
        let mapping = ColumnMapping::from_yaml_str("hostname: name\nbmc_port: ipmi_port\n").unwrap();
        let data = "name,bmc_ip,bmc_username,bmc_password,ipmi_port,mac,ip_address,netmask,gateway,nameservers,labels,disk\n\
                    worker1,192.168.0.10,Admin,admin,6230,00:00:00:00:00:01,10.10.10.10,255.255.255.0,10.10.10.1,1.1.1.1,type=cp,/dev/sda";
        let mut reader = CsvReader::new(data.as_bytes(), Some(mapping)).unwrap();
        let machine = reader.read().unwrap().unwrap();
        assert_eq!(machine.hostname, "worker1");
        assert_eq!(machine.bmc_port, 6230);
    }

    #[test]
    fn test_custom_mapping_missing_column_uses_mapped_name() {
        let mapping = ColumnMapping::from_yaml_str("hostname: name\n").unwrap();
        let err = CsvReader::new(format!("{HEADER}\n").as_bytes(), Some(mapping))
            .err()
            .unwrap();
        assert!(matches!(err, ReadError::MissingColumns { columns } if columns == vec!["name"]));
    }
}
