use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timestamped;

/// A billable paid-ad interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Click,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
        }
    }

    /// Cumulative counter on the paid ad document.
    pub fn ad_counter(&self) -> &'static str {
        match self {
            EventType::View => "vistas",
            EventType::Click => "clicks",
        }
    }

    /// Counter on the daily stat document.
    pub fn stat_counter(&self) -> &'static str {
        match self {
            EventType::View => "views",
            EventType::Click => "clicks",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "click" => Ok(EventType::Click),
            other => Err(format!(
                "invalid type '{}': must be \"view\" or \"click\"",
                other
            )),
        }
    }
}

/// The `type` attribute of a log record. The `logs` collection also receives
/// non-ad entries, so anything unrecognised decodes as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    View,
    Click,
    Error,
    #[default]
    #[serde(other)]
    Other,
}

impl From<EventType> for LogKind {
    fn from(t: EventType) -> Self {
        match t {
            EventType::View => LogKind::View,
            EventType::Click => LogKind::Click,
        }
    }
}

/// One immutable impression/click record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "anuncioPagoId", default, skip_serializing_if = "Option::is_none")]
    pub paid_ad_id: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: LogKind,

    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "deviceType", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "residencialId", default, skip_serializing_if = "Option::is_none")]
    pub residential_id: Option<String>,

    /// Credits charged when the event was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl LogEvent {
    pub fn is_error(&self) -> bool {
        self.kind == LogKind::Error || self.level.as_deref() == Some("error")
    }

    pub fn is_paid(&self) -> bool {
        self.paid_ad_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

impl Timestamped for LogEvent {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("view".parse::<EventType>().unwrap(), EventType::View);
        assert_eq!("click".parse::<EventType>().unwrap(), EventType::Click);
        assert!("hover".parse::<EventType>().is_err());
        assert!("VIEW".parse::<EventType>().is_err());
    }

    #[test]
    fn test_unknown_log_kinds_decode_as_other() {
        let log: LogEvent = serde_json::from_value(json!({ "type": "pageview" })).unwrap();
        assert_eq!(log.kind, LogKind::Other);

        let err: LogEvent = serde_json::from_value(json!({ "type": "error" })).unwrap();
        assert!(err.is_error());

        let leveled: LogEvent =
            serde_json::from_value(json!({ "type": "view", "level": "error" })).unwrap();
        assert!(leveled.is_error());
    }

    #[test]
    fn test_serializes_store_attribute_names() {
        let log = LogEvent {
            paid_ad_id: Some("ad1".into()),
            kind: EventType::Click.into(),
            session_id: Some("s1".into()),
            residential_id: Some("r1".into()),
            cost: Some(5.0),
            ..Default::default()
        };
        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["anuncioPagoId"], "ad1");
        assert_eq!(v["type"], "click");
        assert_eq!(v["sessionId"], "s1");
        assert_eq!(v["residencialId"], "r1");
        assert!(v.get("level").is_none());
    }
}
