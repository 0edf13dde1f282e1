use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure that terminates a party process.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy, Deserialize)]
#[repr(C)]
pub enum SnniErrorKind {
    /// A protocol primitive or the host environment failed.
    RuntimeError,
    /// A caller handed the layer inconsistent shapes or scales.
    PreconditionViolation,
}

mod utc_seconds_format {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT)
            .map_err(serde::de::Error::custom)
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// Structured description of a fatal error, printed by `execute_main`
/// right before the party process exits.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnniErrorBody {
    pub kind: SnniErrorKind,
    pub message: String,
    pub module: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(with = "utc_seconds_format")]
    pub utc_date_time: DateTime<Utc>,
    #[serde(skip)]
    pub backtrace: String,
}

impl fmt::Display for SnniErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        write!(f, "{}\n{}", json, self.backtrace)
    }
}

pub trait ErrorWithBody {
    fn get_body(self) -> Box<SnniErrorBody>;
}

#[doc(hidden)]
#[macro_export]
macro_rules! error_body {
    ($kind: expr, $($x: expr),*) => {
        $crate::errors::SnniErrorBody {
            kind: $kind,
            message: format!($($x,)*),
            module: module_path!().to_owned(),
            file: file!().to_owned(),
            line: line!(),
            column: column!(),
            utc_date_time: chrono::Utc::now(),
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! runtime_error_body {
    ($($x: expr),*) => {
        $crate::error_body!($crate::errors::SnniErrorKind::RuntimeError, $($x),*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros() {
        let e = runtime_error_body!("Party {} lost its peer", 2);
        assert_eq!(e.kind, SnniErrorKind::RuntimeError);
        assert_eq!(e.message, "Party 2 lost its peer");

        let e = error_body!(SnniErrorKind::PreconditionViolation, "sf {} != {}", 12, 13);
        assert_eq!(e.kind, SnniErrorKind::PreconditionViolation);
        assert_eq!(e.message, "sf 12 != 13");
    }

    #[test]
    fn test_body_serialization() {
        let e = runtime_error_body!("barrier timed out");
        let json = serde_json::to_string(&e).unwrap();
        let restored: SnniErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.message, "barrier timed out");
        assert_eq!(restored.kind, SnniErrorKind::RuntimeError);
        assert!(restored.backtrace.is_empty());
        assert!(e.to_string().contains("barrier timed out"));
    }
}
