//! Normalization of raw station status snapshots.
//!
//! Renders epoch timestamps as local time strings and drops station fields
//! that carry no information of their own: a `last_reported` equal to the
//! snapshot's `last_updated`, and availability flags that are truthy on
//! every station of the snapshot.

use std::fmt::Display;

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Format of every rendered timestamp, e.g. `2023-11-14 23:13:20`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-station availability flags eligible for uniform removal.
pub const STATION_FLAGS: [&str; 3] = ["is_renting", "is_returning", "is_installed"];

const LAST_UPDATED: &str = "last_updated";
const LAST_REPORTED: &str = "last_reported";

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("snapshot must be a JSON object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("data.stations must be an array")]
    StationsNotArray,
    #[error("station at index {index} must be a JSON object")]
    StationNotObject { index: usize },
    #[error("invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: String, value: Value },
}

/// Snapshot-wide aggregates: `true` when the flag is present and truthy on
/// every station. An empty station list makes all three vacuously `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UniformFlags {
    pub is_renting: bool,
    pub is_returning: bool,
    pub is_installed: bool,
}

impl UniformFlags {
    pub fn from_stations(stations: &[Value]) -> Self {
        let all = |flag: &str| {
            stations
                .iter()
                .all(|station| station.get(flag).is_some_and(is_truthy))
        };

        UniformFlags {
            is_renting: all("is_renting"),
            is_returning: all("is_returning"),
            is_installed: all("is_installed"),
        }
    }

    /// Names of the flags to strip from every station.
    pub fn removable(&self) -> impl Iterator<Item = &'static str> + '_ {
        STATION_FLAGS.into_iter().filter(move |flag| match *flag {
            "is_renting" => self.is_renting,
            "is_returning" => self.is_returning,
            _ => self.is_installed,
        })
    }
}

/// What a normalization pass did to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub last_updated: Option<String>,
    pub stations: usize,
    pub uniform_flags: UniformFlags,
    pub dropped_last_reported: usize,
}

/// Everything the mutation step needs, computed without touching the input.
struct Plan {
    last_updated: Option<String>,
    uniform_flags: UniformFlags,
    last_reported: Vec<Option<String>>,
}

/// Renders timestamps in `Tz` and strips redundant station fields.
#[derive(Debug, Clone)]
pub struct SnapshotNormalizer<Tz: TimeZone> {
    tz: Tz,
}

impl SnapshotNormalizer<Local> {
    /// Normalizer using the timezone of the running process.
    pub fn local() -> Self {
        Self::new(Local)
    }
}

impl Default for SnapshotNormalizer<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Tz> SnapshotNormalizer<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Normalizes `raw` and hands the same document back.
    pub fn normalize(&self, mut raw: Value) -> Result<Value, NormalizeError> {
        self.normalize_in_place(&mut raw)?;
        Ok(raw)
    }

    /// Single-pass in-place normalization.
    ///
    /// All validation and timestamp rendering happen before the first
    /// mutation, so on error `raw` is left exactly as it was passed in.
    pub fn normalize_in_place(&self, raw: &mut Value) -> Result<NormalizeSummary, NormalizeError> {
        let plan = self.plan(raw)?;
        apply(raw, plan)
    }

    /// Renders an epoch-seconds value as [`TIMESTAMP_FORMAT`].
    ///
    /// Fractional seconds are floored. A string already in the rendered
    /// format is returned unchanged, which keeps normalization idempotent.
    pub fn render(&self, field: &str, value: &Value) -> Result<String, NormalizeError> {
        let invalid = || NormalizeError::InvalidTimestamp {
            field: field.to_string(),
            value: value.clone(),
        };

        match value {
            Value::Number(number) => {
                let secs = match number.as_i64() {
                    Some(secs) => secs,
                    None => {
                        let secs = number.as_f64().filter(|f| f.is_finite()).ok_or_else(invalid)?;
                        secs.floor() as i64
                    }
                };
                let time = self.tz.timestamp_opt(secs, 0).single().ok_or_else(invalid)?;
                Ok(time.format(TIMESTAMP_FORMAT).to_string())
            }
            Value::String(text) if NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).is_ok() => {
                Ok(text.clone())
            }
            _ => Err(invalid()),
        }
    }

    fn plan(&self, raw: &Value) -> Result<Plan, NormalizeError> {
        let object = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

        let last_updated = object
            .get(LAST_UPDATED)
            .map(|value| self.render(LAST_UPDATED, value))
            .transpose()?;

        let stations = stations(object)?;
        let uniform_flags = UniformFlags::from_stations(stations);

        let last_reported = stations
            .iter()
            .enumerate()
            .map(|(index, station)| {
                let fields = station
                    .as_object()
                    .ok_or(NormalizeError::StationNotObject { index })?;
                fields
                    .get(LAST_REPORTED)
                    .map(|value| {
                        self.render(&format!("data.stations[{index}].{LAST_REPORTED}"), value)
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Plan {
            last_updated,
            uniform_flags,
            last_reported,
        })
    }
}

/// Normalizes `raw` in the process's local timezone.
pub fn normalize(raw: Value) -> Result<Value, NormalizeError> {
    SnapshotNormalizer::local().normalize(raw)
}

/// JSON truthiness: `false`, `null`, zero and empty values are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn stations(object: &Map<String, Value>) -> Result<&Vec<Value>, NormalizeError> {
    object
        .get("data")
        .ok_or(NormalizeError::MissingField("data"))?
        .get("stations")
        .ok_or(NormalizeError::MissingField("data.stations"))?
        .as_array()
        .ok_or(NormalizeError::StationsNotArray)
}

fn stations_mut(object: &mut Map<String, Value>) -> Result<&mut Vec<Value>, NormalizeError> {
    object
        .get_mut("data")
        .ok_or(NormalizeError::MissingField("data"))?
        .get_mut("stations")
        .ok_or(NormalizeError::MissingField("data.stations"))?
        .as_array_mut()
        .ok_or(NormalizeError::StationsNotArray)
}

fn apply(raw: &mut Value, plan: Plan) -> Result<NormalizeSummary, NormalizeError> {
    let object = raw.as_object_mut().ok_or(NormalizeError::NotAnObject)?;

    if let Some(rendered) = &plan.last_updated {
        object.insert(LAST_UPDATED.to_string(), Value::String(rendered.clone()));
    }

    let stations = stations_mut(object)?;
    let mut dropped_last_reported = 0;

    for (index, (station, rendered)) in stations.iter_mut().zip(plan.last_reported).enumerate() {
        let fields = station
            .as_object_mut()
            .ok_or(NormalizeError::StationNotObject { index })?;

        if let Some(rendered) = rendered {
            if plan.last_updated.as_deref() == Some(rendered.as_str()) {
                fields.shift_remove(LAST_REPORTED);
                dropped_last_reported += 1;
            } else {
                fields.insert(LAST_REPORTED.to_string(), Value::String(rendered));
            }
        }

        for flag in plan.uniform_flags.removable() {
            fields.shift_remove(flag);
        }
    }

    Ok(NormalizeSummary {
        last_updated: plan.last_updated,
        stations: stations.len(),
        uniform_flags: plan.uniform_flags,
        dropped_last_reported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use serde_json::json;

    fn utc() -> SnapshotNormalizer<Utc> {
        SnapshotNormalizer::new(Utc)
    }

    fn snapshot(last_updated: Value, stations: Value) -> Value {
        json!({
            "last_updated": last_updated,
            "ttl": 0,
            "data": { "stations": stations }
        })
    }

    #[test]
    fn test_worked_example() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "A", "last_reported": 1700000000, "is_renting": true, "is_installed": true},
                {"station_id": "B", "last_reported": 1699999000, "is_renting": true, "is_installed": false}
            ]),
        );

        let normalized = utc().normalize(raw).unwrap();

        assert_eq!(
            normalized,
            snapshot(
                json!("2023-11-14 22:13:20"),
                json!([
                    {"station_id": "A", "is_installed": true},
                    {"station_id": "B", "last_reported": "2023-11-14 21:56:40", "is_installed": false}
                ]),
            )
        );
    }

    #[test]
    fn test_uniform_renting_removed_everywhere() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "1", "is_renting": true, "is_returning": false},
                {"station_id": "2", "is_renting": true, "is_returning": true},
                {"station_id": "3", "is_renting": true}
            ]),
        );

        let normalized = utc().normalize(raw).unwrap();

        for station in normalized["data"]["stations"].as_array().unwrap() {
            assert!(station.get("is_renting").is_none());
        }
        assert_eq!(normalized["data"]["stations"][0]["is_returning"], json!(false));
        assert_eq!(normalized["data"]["stations"][1]["is_returning"], json!(true));
    }

    #[test]
    fn test_absent_flag_blocks_removal() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "1", "is_installed": true},
                {"station_id": "2"}
            ]),
        );

        let mut document = raw;
        let summary = utc().normalize_in_place(&mut document).unwrap();

        assert!(!summary.uniform_flags.is_installed);
        assert_eq!(document["data"]["stations"][0]["is_installed"], json!(true));
    }

    #[test]
    fn test_last_reported_one_second_apart_is_kept() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "same", "last_reported": 1700000000},
                {"station_id": "later", "last_reported": 1700000001}
            ]),
        );

        let mut document = raw;
        let summary = utc().normalize_in_place(&mut document).unwrap();

        assert_eq!(summary.dropped_last_reported, 1);
        assert!(document["data"]["stations"][0].get("last_reported").is_none());
        assert_eq!(
            document["data"]["stations"][1]["last_reported"],
            json!("2023-11-14 22:13:21")
        );
    }

    #[test]
    fn test_empty_stations_only_renders_last_updated() {
        let mut document = snapshot(json!(1700000000), json!([]));

        let summary = utc().normalize_in_place(&mut document).unwrap();

        assert_eq!(document, snapshot(json!("2023-11-14 22:13:20"), json!([])));
        // An empty scan counts as "all stations agree".
        assert_eq!(
            summary.uniform_flags,
            UniformFlags {
                is_renting: true,
                is_returning: true,
                is_installed: true,
            }
        );
        assert_eq!(summary.stations, 0);
    }

    #[test]
    fn test_missing_last_updated_keeps_rendered_last_reported() {
        let raw = json!({
            "data": { "stations": [{"station_id": "A", "last_reported": 1700000000}] }
        });

        let normalized = utc().normalize(raw).unwrap();

        assert!(normalized.get("last_updated").is_none());
        assert_eq!(
            normalized["data"]["stations"][0]["last_reported"],
            json!("2023-11-14 22:13:20")
        );
    }

    #[test]
    fn test_station_without_last_reported_untouched() {
        let raw = snapshot(
            json!(1700000000),
            json!([{"station_id": "A", "num_bikes_available": 4, "is_renting": false}]),
        );

        let normalized = utc().normalize(raw).unwrap();

        assert_eq!(
            normalized["data"]["stations"][0],
            json!({"station_id": "A", "num_bikes_available": 4, "is_renting": false})
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "A", "last_reported": 1700000000, "is_renting": true, "is_returning": 1},
                {"station_id": "B", "last_reported": 1699990000, "is_renting": true, "is_returning": 0}
            ]),
        );

        let once = utc().normalize(raw).unwrap();
        let twice = utc().normalize(once.clone()).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_boolean_truthiness() {
        let raw = snapshot(
            json!(1700000000),
            json!([
                {"is_renting": 1, "is_returning": "yes", "is_installed": 0},
                {"is_renting": 2.5, "is_returning": "", "is_installed": true}
            ]),
        );

        let normalized = utc().normalize(raw).unwrap();

        assert_eq!(
            normalized["data"]["stations"],
            json!([
                {"is_returning": "yes", "is_installed": 0},
                {"is_returning": "", "is_installed": true}
            ])
        );
    }

    #[test]
    fn test_fractional_timestamps_are_floored() {
        let raw = snapshot(
            json!(1700000000.9),
            json!([{"last_reported": 1700000000.2}]),
        );

        let normalized = utc().normalize(raw).unwrap();

        assert_eq!(normalized["last_updated"], json!("2023-11-14 22:13:20"));
        assert!(normalized["data"]["stations"][0].get("last_reported").is_none());
    }

    #[test]
    fn test_renders_in_normalizer_timezone() {
        let vienna_winter = FixedOffset::east_opt(3600).unwrap();
        let normalizer = SnapshotNormalizer::new(vienna_winter);

        assert_eq!(
            normalizer.render("last_updated", &json!(1700000000)).unwrap(),
            "2023-11-14 23:13:20"
        );
    }

    #[test]
    fn test_preserves_field_order_and_unknown_fields() {
        let raw = json!({
            "last_updated": 1700000000,
            "ttl": 0,
            "version": "2.3",
            "data": { "stations": [
                {"station_id": "A", "last_reported": 1699999999, "num_docks_available": 3, "vehicle_types_available": []}
            ]}
        });

        let normalized = utc().normalize(raw).unwrap();

        let keys: Vec<_> = normalized.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["last_updated", "ttl", "version", "data"]);
        let station_keys: Vec<_> = normalized["data"]["stations"][0]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(
            station_keys,
            ["station_id", "last_reported", "num_docks_available", "vehicle_types_available"]
        );
    }

    #[test]
    fn test_rejects_non_object_snapshot() {
        assert_eq!(utc().normalize(json!([1, 2])), Err(NormalizeError::NotAnObject));
    }

    #[test]
    fn test_rejects_missing_stations() {
        assert_eq!(
            utc().normalize(json!({"last_updated": 1700000000})),
            Err(NormalizeError::MissingField("data"))
        );
        assert_eq!(
            utc().normalize(json!({"data": {}})),
            Err(NormalizeError::MissingField("data.stations"))
        );
        assert_eq!(
            utc().normalize(json!({"data": {"stations": {}}})),
            Err(NormalizeError::StationsNotArray)
        );
    }

    #[test]
    fn test_rejects_non_object_station() {
        let raw = snapshot(json!(1700000000), json!([{"station_id": "A"}, "B"]));

        assert_eq!(
            utc().normalize(raw),
            Err(NormalizeError::StationNotObject { index: 1 })
        );
    }

    #[test]
    fn test_invalid_timestamp_leaves_input_untouched() {
        let mut document = snapshot(
            json!(1700000000),
            json!([
                {"station_id": "A", "last_reported": 1700000000, "is_renting": true},
                {"station_id": "B", "last_reported": "yesterday", "is_renting": true}
            ]),
        );
        let before = document.clone();

        let err = utc().normalize_in_place(&mut document).unwrap_err();

        assert_eq!(
            err,
            NormalizeError::InvalidTimestamp {
                field: "data.stations[1].last_reported".to_string(),
                value: json!("yesterday"),
            }
        );
        assert_eq!(document, before);
    }

    #[test]
    fn test_null_last_updated_is_rejected() {
        let raw = snapshot(Value::Null, json!([]));

        assert!(matches!(
            utc().normalize(raw),
            Err(NormalizeError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!([0])));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!({})));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_local_normalize_renders_strings() {
        let normalized = normalize(snapshot(json!(1700000000), json!([]))).unwrap();

        let rendered = normalized["last_updated"].as_str().unwrap();
        assert!(NaiveDateTime::parse_from_str(rendered, TIMESTAMP_FORMAT).is_ok());
    }
}
