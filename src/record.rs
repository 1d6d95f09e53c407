use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel stored in `WEBSITE_URL` for records approved on their name alone.
pub const AUTO_APPROVED: &str = "AUTO_APPROVED";

/// One carrier row from the census extract.
///
/// Only the identifier, names, and address fields feed matching; the rest is
/// carried through to the results file untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    #[serde(rename = "DOT_NUMBER")]
    pub dot_number: u64,
    #[serde(rename = "LEGAL_NAME", default)]
    pub legal_name: String,
    #[serde(rename = "DBA_NAME", default)]
    pub dba_name: Option<String>,
    #[serde(rename = "COMPANY_OFFICER_1", default)]
    pub officer_1: Option<String>,
    #[serde(rename = "COMPANY_OFFICER_2", default)]
    pub officer_2: Option<String>,
    #[serde(rename = "TRUCK_UNITS", default)]
    pub truck_units: Option<String>,
    #[serde(rename = "POWER_UNITS", default)]
    pub power_units: Option<String>,
    #[serde(rename = "TOTAL_CDL", default)]
    pub total_cdl: Option<String>,
    #[serde(rename = "TOTAL_DRIVERS", default)]
    pub total_drivers: Option<String>,
    #[serde(rename = "PHY_STREET", default)]
    pub street: Option<String>,
    #[serde(rename = "PHY_CITY", default)]
    pub city: Option<String>,
    #[serde(rename = "PHY_STATE", default)]
    pub state: Option<String>,
    #[serde(rename = "PHY_ZIP", default)]
    pub postal_code: Option<String>,
    #[serde(rename = "PHY_CNTY", default)]
    pub county: Option<String>,
    #[serde(rename = "EMAIL_ADDRESS", default)]
    pub email: Option<String>,
    #[serde(rename = "CRGO_DRIVETOW", default)]
    pub cargo_drivetow: Option<String>,
}

impl BusinessRecord {
    /// Minimal record for callers that only care about the matching fields.
    pub fn new(dot_number: u64, legal_name: &str) -> Self {
        BusinessRecord {
            dot_number,
            legal_name: legal_name.to_string(),
            dba_name: None,
            officer_1: None,
            officer_2: None,
            truck_units: None,
            power_units: None,
            total_cdl: None,
            total_drivers: None,
            street: None,
            city: None,
            state: None,
            postal_code: None,
            county: None,
            email: None,
            cargo_drivetow: None,
        }
    }

    pub fn city(&self) -> &str {
        self.city.as_deref().unwrap_or("")
    }

    pub fn state(&self) -> &str {
        self.state.as_deref().unwrap_or("")
    }

    pub fn postal_code(&self) -> &str {
        self.postal_code.as_deref().unwrap_or("")
    }

    pub fn street(&self) -> &str {
        self.street.as_deref().unwrap_or("")
    }

    pub fn dba_name(&self) -> Option<&str> {
        self.dba_name.as_deref().filter(|n| !n.trim().is_empty())
    }
}

/// A record that reached `FOUND` or `AUTO_APPROVED`. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub record: BusinessRecord,
    pub website_url: String,
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn found(record: BusinessRecord, url: &str) -> Self {
        VerificationResult {
            record,
            website_url: url.to_string(),
            verified_at: Utc::now(),
        }
    }

    pub fn auto_approved(record: BusinessRecord) -> Self {
        Self::found(record, AUTO_APPROVED)
    }

    pub fn is_auto_approved(&self) -> bool {
        self.website_url == AUTO_APPROVED
    }

    pub fn dot_number(&self) -> u64 {
        self.record.dot_number
    }
}

/// Flat on-disk shape of a `VerificationResult`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "DOT_NUMBER")]
    dot_number: u64,
    #[serde(rename = "LEGAL_NAME", default)]
    legal_name: String,
    #[serde(rename = "DBA_NAME", default)]
    dba_name: Option<String>,
    #[serde(rename = "COMPANY_OFFICER_1", default)]
    officer_1: Option<String>,
    #[serde(rename = "COMPANY_OFFICER_2", default)]
    officer_2: Option<String>,
    #[serde(rename = "TRUCK_UNITS", default)]
    truck_units: Option<String>,
    #[serde(rename = "POWER_UNITS", default)]
    power_units: Option<String>,
    #[serde(rename = "TOTAL_CDL", default)]
    total_cdl: Option<String>,
    #[serde(rename = "TOTAL_DRIVERS", default)]
    total_drivers: Option<String>,
    #[serde(rename = "PHY_STREET", default)]
    street: Option<String>,
    #[serde(rename = "PHY_CITY", default)]
    city: Option<String>,
    #[serde(rename = "PHY_STATE", default)]
    state: Option<String>,
    #[serde(rename = "PHY_ZIP", default)]
    postal_code: Option<String>,
    #[serde(rename = "PHY_CNTY", default)]
    county: Option<String>,
    #[serde(rename = "EMAIL_ADDRESS", default)]
    email: Option<String>,
    #[serde(rename = "CRGO_DRIVETOW", default)]
    cargo_drivetow: Option<String>,
    #[serde(rename = "WEBSITE_URL")]
    website_url: String,
    #[serde(rename = "VERIFIED_AT", deserialize_with = "deserialize_timestamp")]
    verified_at: DateTime<Utc>,
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339, or an offset-less local timestamp as older results files carry.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(raw.trim())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid VERIFIED_AT timestamp: {:?}", raw)))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?;
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    )
}

impl From<&VerificationResult> for ResultRow {
    fn from(v: &VerificationResult) -> Self {
        let r = v.record.clone();
        ResultRow {
            dot_number: r.dot_number,
            legal_name: r.legal_name,
            dba_name: r.dba_name,
            officer_1: r.officer_1,
            officer_2: r.officer_2,
            truck_units: r.truck_units,
            power_units: r.power_units,
            total_cdl: r.total_cdl,
            total_drivers: r.total_drivers,
            street: r.street,
            city: r.city,
            state: r.state,
            postal_code: r.postal_code,
            county: r.county,
            email: r.email,
            cargo_drivetow: r.cargo_drivetow,
            website_url: v.website_url.clone(),
            verified_at: v.verified_at,
        }
    }
}

impl From<ResultRow> for VerificationResult {
    fn from(row: ResultRow) -> Self {
        VerificationResult {
            record: BusinessRecord {
                dot_number: row.dot_number,
                legal_name: row.legal_name,
                dba_name: row.dba_name,
                officer_1: row.officer_1,
                officer_2: row.officer_2,
                truck_units: row.truck_units,
                power_units: row.power_units,
                total_cdl: row.total_cdl,
                total_drivers: row.total_drivers,
                street: row.street,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                county: row.county,
                email: row.email,
                cargo_drivetow: row.cargo_drivetow,
            },
            website_url: row.website_url,
            verified_at: row.verified_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_dba_is_absent() {
        let mut r = BusinessRecord::new(1, "Acme");
        r.dba_name = Some("   ".into());
        assert_eq!(r.dba_name(), None);
        r.dba_name = Some("Acme Recovery".into());
        assert_eq!(r.dba_name(), Some("Acme Recovery"));
    }

    #[test]
    fn auto_approved_uses_sentinel() {
        let v = VerificationResult::auto_approved(BusinessRecord::new(7, "Joe's Towing"));
        assert!(v.is_auto_approved());
        assert_eq!(v.website_url, AUTO_APPROVED);
        assert_eq!(v.dot_number(), 7);
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        let utc = parse_timestamp("2024-03-05T14:22:10.123456+00:00").unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-03-05T14:22:10.123456+00:00");

        let naive = NaiveDateTime::parse_from_str("2024-03-05T14:22:10.123456", NAIVE_TIMESTAMP_FORMATS[0]).unwrap();
        let local = parse_timestamp("2024-03-05T14:22:10.123456").unwrap();
        assert_eq!(local.with_timezone(&Local).naive_local(), naive);
        assert!(parse_timestamp("2024-03-05 14:22:10").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
