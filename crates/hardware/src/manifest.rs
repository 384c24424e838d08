//! YAML manifest rendering for a catalogue.
//!
//! Output is a multi-document YAML stream: BMC credentials first, then BMCs,
//! then hardware, each group sorted by name so the same catalogue always
//! renders the same bytes.

use serde::Serialize;

use crate::catalogue::{Bmc, Catalogue, Hardware, Secret};

#[derive(Serialize)]
#[serde(tag = "kind")]
enum Document<'a> {
    Secret(&'a Secret),
    Bmc(&'a Bmc),
    Hardware(&'a Hardware),
}

/// Render every catalogue entry as YAML documents separated by `---`.
///
/// # Errors
/// Returns an error if an entry cannot be serialized.
pub fn render_yaml(catalogue: &Catalogue) -> Result<String, serde_yaml::Error> {
    let mut secrets = catalogue.all_secrets();
    secrets.sort_by(|a, b| a.name.cmp(&b.name));
    let mut bmcs = catalogue.all_bmcs();
    bmcs.sort_by(|a, b| a.name.cmp(&b.name));
    let mut hardware = catalogue.all_hardware();
    hardware.sort_by(|a, b| a.name.cmp(&b.name));

    let documents = secrets
        .iter()
        .map(Document::Secret)
        .chain(bmcs.iter().map(Document::Bmc))
        .chain(hardware.iter().map(Document::Hardware));

    let mut out = String::new();
    for document in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&document)?);
    }
    Ok(out)
}
