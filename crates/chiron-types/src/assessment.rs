//! Emergency assessment records.
//!
//! An `Assessment` is created when a triage action completes and later updated
//! as follow-up analysis fills in guidance fields. This layer never deletes
//! assessments; history is append/update only.

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::EntityId;

/// How severe the injury is, as judged by triage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    Critical,
    Serious,
    Moderate,
    Minor,
    #[default]
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Serious => "serious",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
            Severity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an assessment is in the triage pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum TriageStatus {
    #[default]
    Pending,
    Analyzed,
    #[strum(serialize = "completed", serialize = "complete", serialize = "done")]
    Completed,
}

impl TriageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriageStatus::Pending => "pending",
            TriageStatus::Analyzed => "analyzed",
            TriageStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TriageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geolocation captured alongside an assessment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy: f64,
    /// Capture time as Unix milliseconds.
    pub captured_at: u64,
}

/// A single emergency assessment.
///
/// Optional fields serialize as absent rather than `null`, so a local
/// round-trip reproduces the original value exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub immediate_actions: Vec<String>,
    #[serde(default)]
    pub assessment_steps: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub triage_status: TriageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoSnapshot>,
    /// Creation time as Unix milliseconds. History is ordered by this, newest first.
    pub created_at: u64,
    /// Raw AI response payload, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub injury_types: Vec<String>,
}

impl Assessment {
    /// A new, unassigned assessment stamped with the current time.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: EntityId::unassigned(),
            description: description.into(),
            immediate_actions: Vec::new(),
            assessment_steps: Vec::new(),
            red_flags: Vec::new(),
            next_steps: Vec::new(),
            severity: Severity::Unknown,
            triage_status: TriageStatus::Pending,
            location: None,
            created_at: crate::now_millis(),
            ai_response: None,
            photo_url: None,
            injury_types: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_location(mut self, location: GeoSnapshot) -> Self {
        self.location = Some(location);
        self
    }
}

/// Sort assessments newest first by creation time.
///
/// Stable: assessments sharing a timestamp keep their relative order.
pub fn sort_newest_first(history: &mut [Assessment]) {
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn full() -> Assessment {
        Assessment {
            id: EntityId::new("a-1"),
            description: "deep cut on forearm".into(),
            immediate_actions: vec!["apply pressure".into(), "elevate".into()],
            assessment_steps: vec!["check bleeding".into()],
            red_flags: vec!["spurting blood".into()],
            next_steps: vec!["seek care".into()],
            severity: Severity::Serious,
            triage_status: TriageStatus::Analyzed,
            location: Some(GeoSnapshot {
                latitude: 47.6,
                longitude: -122.3,
                accuracy: 12.5,
                captured_at: 1_700_000_000_000,
            }),
            created_at: 1_700_000_000_500,
            ai_response: Some("{\"raw\":true}".into()),
            photo_url: None,
            injury_types: vec!["laceration".into()],
        }
    }

    #[test]
    fn test_optional_fields_are_absent_not_null() {
        let a = Assessment::new("bruise").with_id("a-2");
        let json = serde_json::to_value(&a).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("location"));
        assert!(!obj.contains_key("aiResponse"));
        assert!(!obj.contains_key("photoUrl"));
        assert!(!obj.contains_key("injuryTypes"));
        assert_eq!(obj["triageStatus"], "pending");
        assert_eq!(obj["severity"], "unknown");
    }

    #[test]
    fn test_nested_fields_survive_json() {
        let a = full();
        let json = serde_json::to_string(&a).unwrap();
        let parsed: Assessment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(Severity::from_str("CRITICAL").unwrap(), Severity::Critical);
        assert_eq!(TriageStatus::from_str("done").unwrap(), TriageStatus::Completed);
        assert!(Severity::from_str("fatal").is_err());
        assert_eq!(Severity::Minor.to_string(), "minor");
    }

    #[test]
    fn test_sort_newest_first() {
        let mut history = vec![
            Assessment::new("t1").with_id("1").with_created_at(10),
            Assessment::new("t3").with_id("3").with_created_at(30),
            Assessment::new("t2").with_id("2").with_created_at(20),
        ];
        sort_newest_first(&mut history);
        let ids: Vec<&str> = history.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }
}
