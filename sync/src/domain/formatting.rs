//! Display helpers for dashboard cards (pt-BR conventions).

use chrono::NaiveDate;
use shared::{Appointment, Medication};

/// `2024-03-10` -> `10/03/2024`. Input that is not an ISO date is returned as is.
pub fn format_display_date(iso_date: &str) -> String {
    match NaiveDate::parse_from_str(iso_date.trim(), "%Y-%m-%d") {
        Ok(date) => date.format("%d/%m/%Y").to_string(),
        Err(_) => iso_date.to_string(),
    }
}

/// Card subtitle, e.g. `1mg - 2x ao dia`
pub fn medication_summary(medication: &Medication) -> String {
    match (medication.dosage.is_empty(), medication.frequency.is_empty()) {
        (false, false) => format!("{} - {}", medication.dosage, medication.frequency),
        (false, true) => medication.dosage.clone(),
        (true, false) => medication.frequency.clone(),
        (true, true) => String::new(),
    }
}

pub fn appointment_schedule(appointment: &Appointment) -> String {
    let date = format_display_date(&appointment.date);
    if appointment.time.is_empty() {
        date
    } else {
        format!("{} às {}", date, appointment.time)
    }
}

pub fn reminder_badge(appointment: &Appointment) -> Option<&'static str> {
    appointment.reminder_pending().then_some("Lembrete ativo")
}
