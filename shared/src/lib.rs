use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authenticated identity as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Access token expiry, if the provider reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            expires_at: None,
        }
    }

    /// A session without an expiry never lapses on its own
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

/// A child registered by a parent (row of the `children` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub birth_date: String, // ISO 8601 date format (YYYY-MM-DD)
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: String, // RFC 3339 timestamp
}

/// Row of the `medications` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    /// Times of day, free-form ("08:00", "after lunch")
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: String,
}

impl Medication {
    pub fn status_label(&self) -> &'static str {
        if self.active {
            "Ativo"
        } else {
            "Inativo"
        }
    }
}

/// Closed set of document categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentCategory {
    #[serde(rename = "prescription", alias = "receita")]
    Prescription,
    #[serde(rename = "test-order", alias = "exame")]
    TestOrder,
    #[serde(rename = "test-result", alias = "resultado")]
    TestResult,
}

impl DocumentCategory {
    pub const ALL: [DocumentCategory; 3] = [
        DocumentCategory::Prescription,
        DocumentCategory::TestOrder,
        DocumentCategory::TestResult,
    ];

    /// Canonical wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Prescription => "prescription",
            DocumentCategory::TestOrder => "test-order",
            DocumentCategory::TestResult => "test-result",
        }
    }

    /// Label shown to the user
    pub fn label(&self) -> &'static str {
        match self {
            DocumentCategory::Prescription => "Receita",
            DocumentCategory::TestOrder => "Pedido de Exame",
            DocumentCategory::TestResult => "Resultado de Exame",
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = DocumentCategoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "prescription" | "receita" => Ok(DocumentCategory::Prescription),
            "test-order" | "exame" => Ok(DocumentCategory::TestOrder),
            "test-result" | "resultado" => Ok(DocumentCategory::TestResult),
            other => Err(DocumentCategoryError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCategoryError {
    Unknown(String),
}

impl fmt::Display for DocumentCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentCategoryError::Unknown(value) => {
                write!(f, "Unknown document category: {}", value)
            }
        }
    }
}

impl std::error::Error for DocumentCategoryError {}

/// Row of the `documents` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub child_id: String,
    #[serde(rename = "type")]
    pub category: DocumentCategory,
    pub title: String,
    pub file_url: String,
    pub date: String, // YYYY-MM-DD
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: String,
}

/// Row of the `appointments` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub child_id: String,
    /// Free-form label ("Consulta", "Terapia", ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub date: String, // YYYY-MM-DD
    pub time: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Owned by the external reminder process
    #[serde(default)]
    pub reminder_sent: bool,
    pub created_at: String,
}

impl Appointment {
    pub fn reminder_pending(&self) -> bool {
        !self.reminder_sent
    }
}

/// Insert shape for `children`; id and created_at are assigned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChild {
    pub user_id: String,
    pub name: String,
    pub birth_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Insert shape for `medications`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMedication {
    pub child_id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub times: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub active: bool,
}

/// Insert shape for `documents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub child_id: String,
    #[serde(rename = "type")]
    pub category: DocumentCategory,
    pub title: String,
    pub file_url: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Insert shape for `appointments`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub child_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub date: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub reminder_sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_document_category_wire_values() {
        for category in DocumentCategory::ALL {
            let json = serde_json::to_value(category).unwrap();
            assert_eq!(json, serde_json::Value::String(category.as_str().to_string()));
        }
    }

    #[test]
    fn test_document_category_accepts_legacy_values() {
        let legacy: DocumentCategory = serde_json::from_str("\"receita\"").unwrap();
        assert_eq!(legacy, DocumentCategory::Prescription);

        let legacy: DocumentCategory = serde_json::from_str("\"exame\"").unwrap();
        assert_eq!(legacy, DocumentCategory::TestOrder);

        assert_eq!("resultado".parse::<DocumentCategory>().unwrap(), DocumentCategory::TestResult);
        assert!(serde_json::from_str::<DocumentCategory>("\"x-ray\"").is_err());
    }

    #[test]
    fn test_document_category_from_str_rejects_unknown() {
        let err = "invoice".parse::<DocumentCategory>().unwrap_err();
        assert_eq!(err, DocumentCategoryError::Unknown("invoice".to_string()));
        assert_eq!(err.to_string(), "Unknown document category: invoice");
    }

    #[test]
    fn test_document_row_uses_type_column() {
        let row = serde_json::json!({
            "id": "d1",
            "child_id": "c1",
            "type": "test-result",
            "title": "Hemograma",
            "file_url": "https://files.example/d1.pdf",
            "date": "2024-03-02",
            "notes": null,
            "created_at": "2024-03-02T10:00:00Z"
        });

        let document: Document = serde_json::from_value(row).unwrap();
        assert_eq!(document.category, DocumentCategory::TestResult);
        assert_eq!(document.notes, None);
    }

    #[test]
    fn test_new_child_omits_absent_optionals() {
        let row = NewChild {
            user_id: "u1".to_string(),
            name: "Maria Silva".to_string(),
            birth_date: "2018-05-15".to_string(),
            photo_url: None,
            notes: None,
        };

        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("notes").is_none());
        assert!(json.get("photo_url").is_none());
        assert_eq!(json["name"], "Maria Silva");
    }

    #[test]
    fn test_appointment_reminder_defaults_to_pending() {
        let row = serde_json::json!({
            "id": "a1",
            "child_id": "c1",
            "type": "Consulta",
            "title": "Neuropediatra",
            "date": "2024-04-10",
            "time": "14:30",
            "created_at": "2024-03-01T09:00:00Z"
        });

        let appointment: Appointment = serde_json::from_value(row).unwrap();
        assert!(!appointment.reminder_sent);
        assert!(appointment.reminder_pending());
    }

    #[test]
    fn test_session_validity() {
        let now = Utc::now();
        let mut session = Session::new("u1");
        assert!(session.is_valid_at(now));

        session.expires_at = Some(now - Duration::seconds(1));
        assert!(!session.is_valid_at(now));

        session.expires_at = Some(now + Duration::minutes(5));
        assert!(session.is_valid_at(now));
    }

    #[test]
    fn test_medication_status_label() {
        let mut medication = Medication {
            id: "m1".to_string(),
            child_id: "c1".to_string(),
            name: "Risperidona".to_string(),
            dosage: "1mg".to_string(),
            frequency: "2x ao dia".to_string(),
            times: vec!["08:00".to_string(), "20:00".to_string()],
            notes: None,
            active: true,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(medication.status_label(), "Ativo");

        medication.active = false;
        assert_eq!(medication.status_label(), "Inativo");
    }
}
