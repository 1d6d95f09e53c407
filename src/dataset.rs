use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::record::BusinessRecord;

/// Census columns carried through the pipeline, in file order.
pub const CENSUS_COLUMNS: [&str; 16] = [
    "DOT_NUMBER",
    "LEGAL_NAME",
    "DBA_NAME",
    "COMPANY_OFFICER_1",
    "COMPANY_OFFICER_2",
    "TRUCK_UNITS",
    "POWER_UNITS",
    "TOTAL_CDL",
    "TOTAL_DRIVERS",
    "PHY_STREET",
    "PHY_CITY",
    "PHY_STATE",
    "PHY_ZIP",
    "PHY_CNTY",
    "EMAIL_ADDRESS",
    "CRGO_DRIVETOW",
];

const TARGET_STATES: &[&str] = &["ME", "NH", "VT", "MA", "RI", "CT", "NY"];
const MIN_DRIVERS: f64 = 5.0;
const DRIVETOW_FLAG: &str = "X";

/// Read every record from a census-shaped CSV. Rows that do not parse are
/// logged and dropped; an unreadable file is an error.
pub fn load_records(path: &Path) -> Result<Vec<BusinessRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;

    let mut records = Vec::new();
    let mut bad = 0usize;
    for (i, row) in reader.deserialize::<BusinessRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => {
                bad += 1;
                if bad <= 5 {
                    warn!("Skipping dataset row {}: {}", i + 2, e);
                }
            }
        }
    }
    if bad > 0 {
        warn!("{} unparseable rows skipped in {}", bad, path.display());
    }
    Ok(records)
}

/// Whether a carrier belongs in the verification set: enough drivers, the
/// drive-tow cargo flag, and a target state.
pub fn is_candidate(record: &BusinessRecord) -> bool {
    let drivers_ok = record
        .total_drivers
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .map(|d| d >= MIN_DRIVERS)
        .unwrap_or(false);
    let drivetow = record.cargo_drivetow.as_deref().map(str::trim) == Some(DRIVETOW_FLAG);
    let state_ok = TARGET_STATES.contains(&record.state().trim());
    drivers_ok && drivetow && state_ok
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareStats {
    pub read: usize,
    pub kept: usize,
}

/// Filter the raw census down to candidates and write them as a flat CSV.
pub fn prepare(census: &Path, out: &Path) -> Result<PrepareStats> {
    let records = load_records(census)?;
    let read = records.len();

    let kept: Vec<BusinessRecord> = records.into_par_iter().filter(is_candidate).collect();

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    if kept.is_empty() {
        writer.write_record(CENSUS_COLUMNS)?;
    }
    for record in &kept {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!("Prepared {} of {} census rows -> {}", kept.len(), read, out.display());
    Ok(PrepareStats {
        read,
        kept: kept.len(),
    })
}
