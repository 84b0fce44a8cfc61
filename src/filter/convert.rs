//! Where-clause type conversion.
//!
//! Strings that look like 24-hex identifiers become `$oid` values, ISO-8601-like strings become
//! `$date` values, and relative-time tokens (`$7dago`, `$2Hfromnow`) expand to absolute dates
//! when they appear directly under a comparison operator.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::store::value::{date_value, is_extended, oid_value};

pub const COMPARISON_OPS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"];

static HEX_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").unwrap());
static RELATIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$(\d+)([SMHdwmy])(ago|fromnow)$").unwrap());

#[derive(Clone, Copy)]
enum DateShape {
    Rfc3339,
    NaiveT,
    NaiveSpace,
    DateOnly,
}

static DATE_PATTERNS: Lazy<Vec<(Regex, DateShape)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,9})?(Z|[+-]\d{2}:\d{2})$").unwrap(), DateShape::Rfc3339),
        (Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d{1,9})?)?$").unwrap(), DateShape::NaiveT),
        (Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap(), DateShape::NaiveSpace),
        (Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap(), DateShape::DateOnly),
    ]
});

/// Seconds per relative-time unit. Upper case: S/M/H; lower case: d/w/m/y.
pub fn unit_seconds(unit: char) -> Option<i64> {
    match unit {
        'S' => Some(1),
        'M' => Some(60),
        'H' => Some(3_600),
        'd' => Some(86_400),
        'w' => Some(7 * 86_400),
        'm' => Some(30 * 86_400),
        'y' => Some(365 * 86_400),
        _ => None,
    }
}

pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let (_, shape) = DATE_PATTERNS.iter().find(|(rx, _)| rx.is_match(s))?;
    match shape {
        DateShape::Rfc3339 => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
        DateShape::NaiveT => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
            .ok()
            .map(|n| n.and_utc()),
        DateShape::NaiveSpace => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok().map(|n| n.and_utc()),
        DateShape::DateOnly => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()),
    }
}

/// Expand `$<N><unit>ago` / `$<N><unit>fromnow` relative to `now`.
pub fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RELATIVE.captures(s)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().chars().next()?;
    let secs = n.checked_mul(unit_seconds(unit)?)?;
    let delta = Duration::try_seconds(secs)?;
    match caps.get(3)?.as_str() {
        "ago" => now.checked_sub_signed(delta),
        _ => now.checked_add_signed(delta),
    }
}

/// Converts where clauses against a fixed evaluation instant.
#[derive(Debug, Clone, Copy)]
pub struct WhereConverter {
    now: DateTime<Utc>,
}

impl WhereConverter {
    pub fn new(now: DateTime<Utc>) -> Self { Self { now } }

    pub fn convert(&self, where_: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(where_.len());
        for (k, v) in where_ {
            out.insert(k.clone(), self.convert_value(v, COMPARISON_OPS.contains(&k.as_str())));
        }
        out
    }

    fn convert_value(&self, v: &Value, in_comparison: bool) -> Value {
        match v {
            Value::String(s) => self.convert_string(s, in_comparison).unwrap_or_else(|| v.clone()),
            Value::Array(items) => Value::Array(items.iter().map(|i| self.convert_value(i, in_comparison)).collect()),
            Value::Object(m) if is_extended(m) => v.clone(),
            Value::Object(m) => {
                let mut out = Map::with_capacity(m.len());
                for (k, child) in m {
                    // regex bodies are patterns, not values
                    if k == "$regex" || k == "$options" {
                        out.insert(k.clone(), child.clone());
                        continue;
                    }
                    out.insert(k.clone(), self.convert_value(child, COMPARISON_OPS.contains(&k.as_str())));
                }
                Value::Object(out)
            }
            _ => v.clone(),
        }
    }

    fn convert_string(&self, s: &str, in_comparison: bool) -> Option<Value> {
        if HEX_ID.is_match(s) { return Some(oid_value(s)); }
        if in_comparison {
            if let Some(ts) = parse_relative(s, self.now) { return Some(date_value(ts)); }
        }
        parse_date(s).map(date_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::value::as_date;
    use chrono::TimeZone;
    use serde_json::json;

    fn conv(v: Value) -> Value {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        Value::Object(WhereConverter::new(now).convert(v.as_object().unwrap()))
    }

    #[test]
    fn hex_ids_become_oids_everywhere() {
        let out = conv(json!({"ownerId": "5F1D7A2B3C4D5E6F70819203", "tags": {"$in": ["5f1d7a2b3c4d5e6f70819204", "x"]}}));
        assert_eq!(out["ownerId"], json!({"$oid": "5f1d7a2b3c4d5e6f70819203"}));
        assert_eq!(out["tags"]["$in"][0], json!({"$oid": "5f1d7a2b3c4d5e6f70819204"}));
        assert_eq!(out["tags"]["$in"][1], json!("x"));
    }

    #[test]
    fn date_shapes() {
        for s in ["2024-01-02", "2024-01-02 03:04:05", "2024-01-02T03:04", "2024-01-02T03:04:05.250Z", "2024-01-02T03:04:05+02:00"] {
            assert!(parse_date(s).is_some(), "expected {} to parse", s);
        }
        assert!(parse_date("02/01/2024").is_none());
        let out = conv(json!({"created": "2024-01-02"}));
        assert_eq!(out["created"], json!({"$date": "2024-01-02T00:00:00.000Z"}));
    }

    #[test]
    fn relative_tokens_only_under_comparisons() {
        let out = conv(json!({"created": {"$gte": "$7dago"}, "label": "$7dago"}));
        let ts = as_date(&out["created"]["$gte"]).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap());
        assert_eq!(out["label"], json!("$7dago"));
    }

    #[test]
    fn unit_case_matters() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_relative("$5Mfromnow", now).unwrap(), now + Duration::minutes(5));
        assert_eq!(parse_relative("$5mfromnow", now).unwrap(), now + Duration::days(150));
        assert!(parse_relative("$5Dago", now).is_none());
    }

    #[test]
    fn extended_values_and_regex_untouched() {
        let out = conv(json!({"_id": {"$oid": "5f1d7a2b3c4d5e6f70819203"}, "name": {"$regex": "2024-01-02"}}));
        assert_eq!(out["_id"], json!({"$oid": "5f1d7a2b3c4d5e6f70819203"}));
        assert_eq!(out["name"]["$regex"], json!("2024-01-02"));
    }
}
