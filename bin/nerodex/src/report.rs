//! Terminal tables for deployment records and verification reports.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use nerodex_deploy::{
    DeploymentRecord, NetworkConfig, Registry, VerificationOutcome, VerificationReport,
};

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// One row per recorded unit, plus the registry units still missing.
pub fn record_table(
    record: &DeploymentRecord,
    registry: &Registry,
    network: &NetworkConfig,
) -> Table {
    let with_links = network
        .explorer
        .as_ref()
        .is_some_and(|explorer| explorer.browser_url.is_some());

    let mut header = vec!["Unit", "Contract", "Address", "Constructor arguments"];
    if with_links {
        header.push("Explorer");
    }
    let mut table = table(header);

    for entry in record.entries() {
        let args = entry
            .args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let mut row = vec![
            Cell::new(&entry.unit),
            Cell::new(&entry.contract),
            Cell::new(entry.address),
            Cell::new(args),
        ];
        if with_links {
            row.push(Cell::new(network.address_url(&entry.address).unwrap_or_default()));
        }
        table.add_row(row);
    }

    for unit in registry.iter().filter(|unit| !record.contains(&unit.name)) {
        table.add_row(vec![
            Cell::new(&unit.name),
            Cell::new(&unit.contract),
            Cell::new("not deployed").fg(Color::Yellow),
            Cell::new(""),
        ]);
    }

    table
}

pub fn verification_table(report: &VerificationReport) -> Table {
    let mut table = table(vec!["Unit", "Verification"]);

    for (unit, outcome) in report.iter() {
        let color = match outcome {
            VerificationOutcome::Verified | VerificationOutcome::AlreadyVerified => Color::Green,
            VerificationOutcome::Failed(_) => Color::Red,
            VerificationOutcome::Skipped => Color::Yellow,
        };
        table.add_row(vec![Cell::new(unit), Cell::new(outcome).fg(color)]);
    }

    table
}
