//! The printer resource and its list view.

use crate::core::{Record, Result, Sorter};
use crate::view::ViewConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RESOURCE: &str = "printer";

/// Preferences namespace of the printer list. Bumped whenever the stored
/// shape changes incompatibly.
pub const LIST_NAMESPACE: &str = "printerList-v2";

/// Dedicated key of the "show archived" toggle.
pub const SHOW_ARCHIVED_KEY: &str = "printerList-showArchived";

pub const COLUMNS: [&str; 7] = [
    "id",
    "printer_id",
    "printer_ip",
    "status",
    "ams_unit_count",
    "last_mqtt_message",
    "last_mqtt_ams_message",
];

const HIDDEN_BY_DEFAULT: [&str; 2] = ["printer_ip", "status"];

/// A printer as reported by the API. The access code is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    pub id: i64,
    pub printer_id: String,
    pub printer_ip: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ams_unit_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ams_active_spools_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mqtt_message: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mqtt_ams_message: Option<DateTime<Utc>>,
}

impl Printer {
    pub fn to_record(&self) -> Result<Record> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(record)?)?)
    }
}

/// The printer list: every column, IP and status hidden until chosen,
/// sorted by id.
pub fn list_config() -> ViewConfig {
    ViewConfig::new(RESOURCE, LIST_NAMESPACE)
        .columns(COLUMNS)
        .default_columns(
            COLUMNS
                .into_iter()
                .filter(|column| !HIDDEN_BY_DEFAULT.contains(column)),
        )
        .default_sorters(vec![Sorter::asc("id")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RecordId, Value};
    use chrono::TimeZone;

    #[test]
    fn test_record_conversion() {
        let printer = Printer {
            id: 1,
            printer_id: "X1PXXAXXXXXXXXX".into(),
            printer_ip: "192.168.0.1".into(),
            status: "connected".into(),
            ams_unit_count: Some(2),
            ams_active_spools_count: None,
            last_mqtt_message: Some(Utc.with_ymd_and_hms(2025, 1, 9, 16, 17, 12).unwrap()),
            last_mqtt_ams_message: None,
        };

        let record = printer.to_record().unwrap();
        assert_eq!(record.id, RecordId::Int(1));
        assert_eq!(record.get("status"), Some(Value::from("connected")));
        assert!(record.get("ams_active_spools_count").is_none());

        assert_eq!(Printer::from_record(&record).unwrap(), printer);
    }

    #[test]
    fn test_list_defaults_hide_ip_and_status() {
        let preferences = list_config().default_preferences();
        assert_eq!(preferences.visible_columns.len(), 5);
        assert!(!preferences.visible_columns.contains("printer_ip"));
        assert!(!preferences.visible_columns.contains("status"));
        assert_eq!(preferences.sorters, vec![Sorter::asc("id")]);
        assert_eq!(preferences.pagination.page_size, 20);
    }
}
