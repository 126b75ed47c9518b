//! Create commands submitted by the dashboard forms.
//!
//! Each command validates its required field before anything touches the
//! network, then turns into the insert shape of its table. Blank optional
//! text is stored as absent rather than as an empty string.

use shared::{DocumentCategory, NewAppointment, NewChild, NewDocument, NewMedication};

use crate::error::ValidationError;

/// Input for registering a child under the signed-in parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateChildCommand {
    pub name: String,
    pub birth_date: String,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
}

impl CreateChildCommand {
    pub fn new(name: impl Into<String>, birth_date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            birth_date: birth_date.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyChildName);
        }
        Ok(())
    }

    pub fn into_new_child(self, user_id: &str) -> Result<NewChild, ValidationError> {
        self.validate()?;
        Ok(NewChild {
            user_id: user_id.to_string(),
            name: self.name.trim().to_string(),
            birth_date: self.birth_date.trim().to_string(),
            photo_url: non_blank(self.photo_url),
            notes: non_blank(self.notes),
        })
    }
}

/// Input for adding a medication to the selected child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMedicationCommand {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    /// Comma-separated times as typed, e.g. `"08:00, 20:00"`
    pub times_input: String,
    pub notes: Option<String>,
}

impl CreateMedicationCommand {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyMedicationName);
        }
        Ok(())
    }

    /// New medications are always active
    pub fn into_new_medication(self, child_id: &str) -> Result<NewMedication, ValidationError> {
        self.validate()?;
        Ok(NewMedication {
            child_id: child_id.to_string(),
            name: self.name.trim().to_string(),
            dosage: self.dosage.trim().to_string(),
            frequency: self.frequency.trim().to_string(),
            times: parse_times(&self.times_input),
            notes: non_blank(self.notes),
            active: true,
        })
    }
}

/// Input for attaching a document record to the selected child.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateDocumentCommand {
    /// Category as chosen in the form; legacy Portuguese values are accepted
    pub category: String,
    pub title: String,
    pub date: String,
    pub notes: Option<String>,
    /// Storage reference of an uploaded file, if the upload happened already
    pub file_url: Option<String>,
}

/// A fresh form starts on the prescription category
impl Default for CreateDocumentCommand {
    fn default() -> Self {
        Self {
            category: DocumentCategory::Prescription.as_str().to_string(),
            title: String::new(),
            date: String::new(),
            notes: None,
            file_url: None,
        }
    }
}

impl CreateDocumentCommand {
    pub fn category(&self) -> Result<DocumentCategory, ValidationError> {
        self.category
            .parse()
            .map_err(|_| ValidationError::UnknownDocumentCategory(self.category.trim().to_string()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyDocumentTitle);
        }
        self.category().map(|_| ())
    }

    /// Without an uploaded file the record points at `placeholder_url`
    pub fn into_new_document(self, child_id: &str, placeholder_url: &str) -> Result<NewDocument, ValidationError> {
        self.validate()?;
        let category = self.category()?;
        Ok(NewDocument {
            child_id: child_id.to_string(),
            category,
            title: self.title.trim().to_string(),
            file_url: non_blank(self.file_url).unwrap_or_else(|| placeholder_url.to_string()),
            date: self.date.trim().to_string(),
            notes: non_blank(self.notes),
        })
    }
}

/// Input for scheduling an appointment for the selected child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateAppointmentCommand {
    /// Free-text kind, e.g. "Consulta" or "Terapia"
    pub kind: String,
    pub title: String,
    pub date: String,
    pub time: String,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl CreateAppointmentCommand {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyAppointmentTitle);
        }
        Ok(())
    }

    /// Reminders are delivered elsewhere; a new appointment has none sent
    pub fn into_new_appointment(self, child_id: &str) -> Result<NewAppointment, ValidationError> {
        self.validate()?;
        Ok(NewAppointment {
            child_id: child_id.to_string(),
            kind: self.kind.trim().to_string(),
            title: self.title.trim().to_string(),
            date: self.date.trim().to_string(),
            time: self.time.trim().to_string(),
            location: non_blank(self.location),
            notes: non_blank(self.notes),
            reminder_sent: false,
        })
    }
}

/// Split a comma-separated list of times, dropping blank segments
pub fn parse_times(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
