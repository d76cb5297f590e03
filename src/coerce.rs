// ABOUTME: Value coercion from grid cells to destination column values
// ABOUTME: Best-effort parsing with sentinel substitution for unresolved reals and timestamps

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::destination::{ColumnKind, DestinationColumn};
use crate::grid::GridValue;

/// Marker for "numeric value intentionally unresolved".
pub const UNRESOLVED_REAL: f64 = -1.7E308;

/// Magnitude written for the infinity glyphs (`∞` / `-∞`).
pub const INFINITY_MAGNITUDE: f64 = 1.7E308;

/// Default output pattern for rendered timestamps.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker for "timestamp intentionally unresolved": 9999-12-31 00:00:00.
pub fn unresolved_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .unwrap_or(NaiveDate::MAX)
        .and_time(NaiveTime::default())
}

/// A value ready to be staged into a destination column.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl CoercedValue {
    /// Locale-invariant text form; timestamps use `date_format`.
    pub fn render(&self, date_format: &str) -> String {
        match self {
            CoercedValue::Integer(i) => i.to_string(),
            CoercedValue::Real(r) => format_real(*r),
            CoercedValue::Boolean(b) => b.to_string(),
            CoercedValue::Timestamp(ts) => ts.format(date_format).to_string(),
            CoercedValue::Text(s) => s.clone(),
        }
    }
}

/// Plain decimals for everyday magnitudes, `1.7E308`-style exponents for the rest.
fn format_real(value: f64) -> String {
    let magnitude = value.abs();
    if value == 0.0 {
        "0".to_string()
    } else if !(1e-5..1e15).contains(&magnitude) {
        format!("{:E}", value)
    } else {
        format!("{}", value)
    }
}

/// Converts grid cells into values for a specific destination column.
///
/// Coercion never fails: malformed input degrades to a default or a sentinel
/// so that one bad cell does not abort a whole batch.
#[derive(Debug, Clone)]
pub struct ValueCoercer {
    date_format: String,
}

impl Default for ValueCoercer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl ValueCoercer {
    pub fn new(date_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
        }
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Render a coerced value with the configured date pattern.
    pub fn render(&self, value: &CoercedValue) -> String {
        value.render(&self.date_format)
    }

    /// Coerce one cell for `column`. `None` means SQL NULL.
    ///
    /// * `raw` - the host's normalized string; `None` when no value was supplied
    /// * `native` - the host's typed value, preferred for reals and timestamps
    pub fn coerce(
        &self,
        raw: Option<&str>,
        native: Option<&GridValue>,
        column: &DestinationColumn,
    ) -> Option<CoercedValue> {
        let raw = match raw {
            Some(raw) => raw,
            None if column.nullable => return None,
            None => "",
        };
        let kind = column.kind();

        if kind.is_integer() {
            Some(CoercedValue::Integer(self.coerce_integer(raw, native)))
        } else if kind.is_real() {
            self.coerce_real(raw, native, column.nullable)
        } else if kind.is_temporal() {
            self.coerce_timestamp(raw, native, column.nullable)
        } else if kind == ColumnKind::Boolean {
            Some(CoercedValue::Boolean(parse_bool(raw).unwrap_or(false)))
        } else {
            Some(CoercedValue::Text(raw.to_string()))
        }
    }

    fn coerce_integer(&self, raw: &str, native: Option<&GridValue>) -> i64 {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return value;
        }
        match native {
            Some(GridValue::Integer(i)) => *i,
            Some(GridValue::Real(r)) if r.is_finite() => r.trunc() as i64,
            Some(GridValue::Boolean(b)) => i64::from(*b),
            _ => {
                if !trimmed.is_empty() {
                    tracing::trace!("Unparseable integer '{}', using 0", trimmed);
                }
                0
            }
        }
    }

    fn coerce_real(
        &self,
        raw: &str,
        native: Option<&GridValue>,
        nullable: bool,
    ) -> Option<CoercedValue> {
        let unresolved = || {
            if nullable {
                None
            } else {
                Some(CoercedValue::Real(UNRESOLVED_REAL))
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
            return unresolved();
        }

        match trimmed {
            "∞" | "+∞" | "Infinity" | "+Infinity" => {
                return Some(CoercedValue::Real(INFINITY_MAGNITUDE))
            }
            "-∞" | "-Infinity" => return Some(CoercedValue::Real(-INFINITY_MAGNITUDE)),
            _ => {}
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Some(CoercedValue::Real(1.0));
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Some(CoercedValue::Real(0.0));
        }

        let value = match native {
            Some(GridValue::Real(r)) => *r,
            Some(GridValue::Integer(i)) => *i as f64,
            _ => trimmed.parse::<f64>().unwrap_or_else(|_| {
                tracing::trace!("Unparseable real '{}', using 0", trimmed);
                0.0
            }),
        };

        if value.is_nan() {
            unresolved()
        } else if value.is_infinite() {
            Some(CoercedValue::Real(INFINITY_MAGNITUDE.copysign(value)))
        } else {
            Some(CoercedValue::Real(value))
        }
    }

    fn coerce_timestamp(
        &self,
        raw: &str,
        native: Option<&GridValue>,
        nullable: bool,
    ) -> Option<CoercedValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return if nullable {
                None
            } else {
                Some(CoercedValue::Timestamp(unresolved_timestamp()))
            };
        }

        let value = match native {
            Some(GridValue::Timestamp(ts)) => *ts,
            _ => parse_timestamp(trimmed, Some(&self.date_format)).unwrap_or_else(|| {
                tracing::trace!("Unparseable timestamp '{}', using sentinel date", trimmed);
                unresolved_timestamp()
            }),
        };
        Some(CoercedValue::Timestamp(self.apply_pattern(value)))
    }

    /// Truncate `value` to what the output pattern can express.
    ///
    /// The value is rendered with the pattern and read back with it, so a
    /// date-only pattern writes midnight. Patterns that cannot be read back
    /// (e.g. time of day only) leave the value unchanged.
    fn apply_pattern(&self, value: NaiveDateTime) -> NaiveDateTime {
        let rendered = value.format(&self.date_format).to_string();
        NaiveDateTime::parse_from_str(&rendered, &self.date_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(&rendered, &self.date_format)
                    .ok()
                    .map(|date| date.and_time(NaiveTime::default()))
            })
            .unwrap_or_else(|| {
                tracing::trace!(
                    "date_format '{}' cannot be read back, keeping {}",
                    self.date_format,
                    value
                );
                value
            })
    }
}

/// Parse a boolean the way grid hosts usually spell them.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a timestamp with locale-invariant rules.
///
/// Accepts RFC 3339 (normalized to UTC), ISO-8601 with `T` or a space, the
/// invariant `MM/dd/yyyy` forms, bare dates (midnight), and finally `pattern`.
pub fn parse_timestamp(raw: &str, pattern: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.and_time(NaiveTime::default()));
        }
    }

    let pattern = pattern?;
    NaiveDateTime::parse_from_str(raw, pattern).ok().or_else(|| {
        NaiveDate::parse_from_str(raw, pattern)
            .ok()
            .map(|date| date.and_time(NaiveTime::default()))
    })
}
