// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Output-schema enforcement.
//!
//! The gateway is the authoritative enforcement point for the export schema;
//! earlier stages never apply the allow-list (only the PII guard is
//! duplicated upstream, at the classifier).

use fbc_pdata::MetricPayload;

/// Record kinds the export schema admits.
const KNOWN_KINDS: [&str; 5] = ["counter", "sum", "gauge", "histogram", "summary"];

/// Checks required fields and type-correctness of well-known attributes.
pub fn validate_payload(payload: &MetricPayload) -> Result<(), String> {
    for (i, record) in payload.records.iter().enumerate() {
        if record.name.is_empty() {
            return Err(format!("record {i}: empty metric name"));
        }
        if !KNOWN_KINDS.contains(&record.kind.as_str()) {
            return Err(format!(
                "record {i} ({}): unknown kind `{}`",
                record.name, record.kind
            ));
        }
        if record.timestamp_unix_nanos == 0 {
            return Err(format!("record {i} ({}): missing timestamp", record.name));
        }
        if !record.value.is_finite() {
            return Err(format!(
                "record {i} ({}): non-finite value",
                record.name
            ));
        }
        if let Some(pid) = record.attributes.get("pid") {
            if pid.parse::<u32>().is_err() {
                return Err(format!(
                    "record {i} ({}): attribute `pid` is not numeric",
                    record.name
                ));
            }
        }
    }
    Ok(())
}

/// Applies the schema-level allow-lists in place. Empty lists admit
/// everything.
pub fn apply_allow_list(
    payload: &mut MetricPayload,
    allowed_metric_names: &[String],
    allowed_attributes: &[String],
) {
    if !allowed_metric_names.is_empty() {
        payload
            .records
            .retain(|r| allowed_metric_names.iter().any(|n| n == &r.name));
    }
    if !allowed_attributes.is_empty() {
        for record in &mut payload.records {
            record
                .attributes
                .retain(|k, _| allowed_attributes.iter().any(|a| a == k));
        }
        payload
            .resource
            .retain(|k, _| allowed_attributes.iter().any(|a| a == k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_pdata::MetricRecord;
    use std::collections::BTreeMap;

    fn record(name: &str, kind: &str) -> MetricRecord {
        MetricRecord {
            name: name.to_owned(),
            kind: kind.to_owned(),
            value: 1.0,
            unit: None,
            attributes: BTreeMap::new(),
            source: None,
            host_name: None,
            pid: None,
            process_start_time_ns: None,
            boot_id_ref: None,
            timestamp_unix_nanos: 1,
        }
    }

    #[test]
    fn valid_payload_passes() {
        let payload = MetricPayload {
            resource: BTreeMap::new(),
            records: vec![record("http.requests", "counter")],
        };
        validate_payload(&payload).unwrap();
    }

    #[test]
    fn unknown_kind_and_missing_fields_are_rejected() {
        let mut bad_kind = MetricPayload::default();
        bad_kind.records.push(record("m", "exotic"));
        assert!(validate_payload(&bad_kind).is_err());

        let mut no_name = MetricPayload::default();
        no_name.records.push(record("", "counter"));
        assert!(validate_payload(&no_name).is_err());

        let mut no_ts = MetricPayload::default();
        let mut r = record("m", "counter");
        r.timestamp_unix_nanos = 0;
        no_ts.records.push(r);
        assert!(validate_payload(&no_ts).is_err());
    }

    #[test]
    fn non_numeric_pid_attribute_is_rejected() {
        let mut payload = MetricPayload::default();
        let mut r = record("m", "counter");
        let _ = r.attributes.insert("pid".to_owned(), "not-a-pid".to_owned());
        payload.records.push(r);
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn allow_list_filters_names_and_attributes() {
        let mut payload = MetricPayload::default();
        let mut keep = record("http.requests", "counter");
        let _ = keep.attributes.insert("region".to_owned(), "eu".to_owned());
        let _ = keep.attributes.insert("debug.blob".to_owned(), "x".to_owned());
        payload.records.push(keep);
        payload.records.push(record("internal.junk", "counter"));

        apply_allow_list(
            &mut payload,
            &["http.requests".to_owned()],
            &["region".to_owned()],
        );
        assert_eq!(payload.records.len(), 1);
        assert_eq!(payload.records[0].name, "http.requests");
        assert!(payload.records[0].attributes.contains_key("region"));
        assert!(!payload.records[0].attributes.contains_key("debug.blob"));
    }
}
