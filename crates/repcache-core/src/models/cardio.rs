use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of live cardio activity tracked by the session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardioKind {
    Running,
    Walking,
    Cycling,
    Swimming,
    Rowing,
    Elliptical,
    Other,
}

impl CardioKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            CardioKind::Running => "Running",
            CardioKind::Walking => "Walking",
            CardioKind::Cycling => "Cycling",
            CardioKind::Swimming => "Swimming",
            CardioKind::Rowing => "Rowing",
            CardioKind::Elliptical => "Elliptical",
            CardioKind::Other => "Other",
        }
    }
}

impl fmt::Display for CardioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for CardioKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "running" | "run" => Ok(CardioKind::Running),
            "walking" | "walk" => Ok(CardioKind::Walking),
            "cycling" | "bike" => Ok(CardioKind::Cycling),
            "swimming" | "swim" => Ok(CardioKind::Swimming),
            "rowing" | "row" => Ok(CardioKind::Rowing),
            "elliptical" => Ok(CardioKind::Elliptical),
            "other" => Ok(CardioKind::Other),
            other => Err(anyhow::anyhow!("Unknown cardio kind: {}", other)),
        }
    }
}

/// Payload submitted to the server when a timed cardio session is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardioLogRequest {
    pub student_id: i64,
    pub kind: CardioKind,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardio_kind_from_str() {
        assert_eq!("Run".parse::<CardioKind>().unwrap(), CardioKind::Running);
        assert_eq!(" cycling ".parse::<CardioKind>().unwrap(), CardioKind::Cycling);
        assert!("yoga".parse::<CardioKind>().is_err());
    }

    #[test]
    fn test_cardio_log_skips_empty_fields() {
        let request = CardioLogRequest {
            student_id: 1,
            kind: CardioKind::Rowing,
            started_at: Utc::now(),
            duration_seconds: 600,
            distance_km: None,
            calories: Some(120),
            notes: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "rowing");
        assert_eq!(json["durationSeconds"], 600);
        assert!(json.get("distanceKm").is_none());
    }
}
