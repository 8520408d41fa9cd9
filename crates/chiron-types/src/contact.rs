//! Emergency contacts and chat messages.

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// A person to reach in an emergency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: EntityId,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// A contact as entered by the user, before any identifier exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDraft {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

impl ContactDraft {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            relationship: None,
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }

    /// Attach an identifier, producing a full contact.
    pub fn into_contact(self, id: EntityId) -> Contact {
        Contact {
            id,
            name: self.name,
            phone: self.phone,
            relationship: self.relationship,
        }
    }
}

/// A follow-up question and its answer, attached to an assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: EntityId,
    pub assessment_id: EntityId,
    pub message: String,
    pub response: String,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl ChatMessage {
    pub fn new(
        assessment_id: EntityId,
        message: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            id: EntityId::unassigned(),
            assessment_id,
            message: message.into(),
            response: response.into(),
            created_at: crate::now_millis(),
        }
    }
}
