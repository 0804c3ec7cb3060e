use crate::core::aggregator::AggregateReport;
use crate::domain::model::PartnerRecord;
use crate::utils::error::{EtlError, Result};

pub const PARTNER_HEADERS: [&str; 10] = [
    "Country",
    "State",
    "City",
    "Partner Level",
    "Company Name",
    "Telephone",
    "Website",
    "Address",
    "Partner ID",
    "Locations",
];

pub const FAILURE_HEADERS: [&str; 5] = ["Kind", "Location", "Line", "Attempts", "Reason"];

/// One row per merged partner, in first-seen order.
pub fn partners_csv(records: &[PartnerRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PARTNER_HEADERS)?;

    for record in records {
        let locations = record
            .locations
            .iter()
            .map(|k| k.cache_id())
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([
            record.country.as_str(),
            record.state.as_str(),
            record.city.as_deref().unwrap_or(""),
            record.partner_level.as_str(),
            record.company_name.as_str(),
            record.telephone.as_str(),
            record.website.as_str(),
            record.address.as_str(),
            record.partner_id.as_str(),
            locations.as_str(),
        ])?;
    }

    into_bytes(writer)
}

/// Skipped input rows, failed keys and (for cancelled runs) keys never attempted.
pub fn failures_csv(report: &AggregateReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(FAILURE_HEADERS)?;

    for row in &report.skipped {
        writer.write_record([
            "skipped_row",
            "",
            row.line.to_string().as_str(),
            "0",
            row.reason.as_str(),
        ])?;
    }
    for failure in &report.failures {
        writer.write_record([
            failure.kind.as_str(),
            failure.key.to_string().as_str(),
            "",
            failure.attempts.to_string().as_str(),
            failure.reason.as_str(),
        ])?;
    }
    for key in &report.not_attempted {
        writer.write_record(["not_attempted", key.to_string().as_str(), "", "0", "run cancelled"])?;
    }

    into_bytes(writer)
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| EtlError::IoError(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::RunStats;
    use crate::domain::model::{FailureKind, KeyFailure, LocationKey, SkippedRow};

    fn key(city: Option<&str>) -> LocationKey {
        LocationKey::new("Australia", "AU", "New South Wales", "NSW", city).unwrap()
    }

    #[test]
    fn test_partners_csv_layout() {
        let record = PartnerRecord {
            partner_id: "555".to_string(),
            company_name: "Harbour Comms, Pty".to_string(),
            partner_level: "Titanium Partners".to_string(),
            telephone: "+61 2 0000".to_string(),
            website: "www.harbour.example".to_string(),
            address: "1 George St".to_string(),
            country: "Australia".to_string(),
            state: "New South Wales".to_string(),
            city: Some("Sydney".to_string()),
            locations: vec![key(Some("Sydney")), key(None)],
        };

        let csv = String::from_utf8(partners_csv(&[record]).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "Country,State,City,Partner Level,Company Name,Telephone,Website,Address,Partner ID,Locations"
        );
        assert_eq!(
            lines[1],
            "Australia,New South Wales,Sydney,Titanium Partners,\"Harbour Comms, Pty\",+61 2 0000,www.harbour.example,1 George St,555,AU_NSW_Sydney;AU_NSW_"
        );
    }

    #[test]
    fn test_failures_csv_lists_every_problem() {
        let report = AggregateReport {
            records: vec![],
            failures: vec![KeyFailure {
                key: key(Some("Newcastle")),
                kind: FailureKind::Transient,
                attempts: 3,
                reason: "HTTP 503 Service Unavailable".to_string(),
            }],
            not_attempted: vec![key(None)],
            skipped: vec![SkippedRow {
                line: 4,
                reason: "region_code is blank".to_string(),
            }],
            statuses: vec![],
            stats: RunStats::default(),
            cancelled: true,
        };

        let csv = String::from_utf8(failures_csv(&report).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Kind,Location,Line,Attempts,Reason");
        assert_eq!(lines[1], "skipped_row,,4,0,region_code is blank");
        assert_eq!(
            lines[2],
            "transient,Australia - New South Wales - Newcastle,,3,HTTP 503 Service Unavailable"
        );
        assert_eq!(lines[3], "not_attempted,Australia - New South Wales,,0,run cancelled");
    }
}
