//! End-to-end behavior of the sync engine against the in-memory gateway.

use azulcare_sync::domain::{CollectionOutcome, EntityKind, LoadStatus, ScreenState};
use azulcare_sync::io::Table;
use azulcare_sync::storage::ChildCollections;
use azulcare_sync::{
    BackendConfig, ChildrenLoad, CreateAppointmentCommand, CreateChildCommand, CreateDocumentCommand,
    CreateMedicationCommand, InMemoryGateway, Route, SignOut, StoreSnapshot, SyncConfig, SyncEngine, SyncError,
    TransportError, ValidationError,
};
use serde_json::json;
use shared::{DocumentCategory, Session};
use std::sync::Arc;

fn configured() -> SyncConfig {
    let mut config = SyncConfig::with_backend(BackendConfig::new("https://test.supabase.co", "anon-key"));
    config.retry_backoff_ms = 5;
    config
}

fn child_row(id: &str, owner: &str, name: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": owner,
        "name": name,
        "birth_date": "2017-09-01",
        "photo_url": null,
        "notes": null,
        "created_at": created_at
    })
}

fn medication_row(id: &str, child_id: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "child_id": child_id,
        "name": format!("Med {}", id),
        "dosage": "5mg",
        "frequency": "1x ao dia",
        "times": ["21:00"],
        "notes": null,
        "active": true,
        "created_at": created_at
    })
}

fn document_row(id: &str, child_id: &str, category: &str, date: &str) -> serde_json::Value {
    json!({
        "id": id,
        "child_id": child_id,
        "type": category,
        "title": format!("Doc {}", id),
        "file_url": "https://files.example/doc.pdf",
        "date": date,
        "notes": null,
        "created_at": "2024-01-01T00:00:00Z"
    })
}

fn appointment_row(id: &str, child_id: &str, date: &str, time: &str) -> serde_json::Value {
    json!({
        "id": id,
        "child_id": child_id,
        "type": "Terapia",
        "title": format!("Appt {}", id),
        "date": date,
        "time": time,
        "location": null,
        "notes": null,
        "reminder_sent": false,
        "created_at": "2024-01-01T00:00:00Z"
    })
}

/// Two children for `u1`; Ana is the newest, so she is selected first
fn family() -> Arc<InMemoryGateway> {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.seed(Table::Children, child_row("bruno", "u1", "Bruno", "2024-01-01T00:00:00Z"));
    gateway.seed(Table::Children, child_row("ana", "u1", "Ana", "2024-02-01T00:00:00Z"));
    gateway.seed(Table::Children, child_row("other", "u2", "Someone else", "2024-03-01T00:00:00Z"));

    gateway.seed(Table::Medications, medication_row("ana-m1", "ana", "2024-02-02T00:00:00Z"));
    gateway.seed(Table::Medications, medication_row("bruno-m1", "bruno", "2024-01-02T00:00:00Z"));
    gateway.seed(Table::Documents, document_row("ana-d1", "ana", "receita", "2024-02-10"));
    gateway.seed(Table::Documents, document_row("ana-d2", "ana", "test-result", "2024-03-10"));
    gateway.seed(Table::Appointments, appointment_row("ana-a1", "ana", "2024-06-01", "09:00"));
    gateway.seed(Table::Appointments, appointment_row("ana-a2", "ana", "2024-06-10", "09:00"));
    gateway
}

async fn signed_in_engine(gateway: &Arc<InMemoryGateway>) -> SyncEngine<InMemoryGateway> {
    let engine = SyncEngine::new(gateway.clone(), configured());
    gateway.sign_in(Session::new("u1"));
    engine.load_children().await.expect("children load");
    engine
}

fn ids<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    ids.map(String::as_str).collect()
}

#[tokio::test]
async fn test_dashboard_loads_only_the_users_children() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let snapshot = engine.store_snapshot();
    assert_eq!(ids(snapshot.children.iter().map(|c| &c.id)), vec!["ana", "bruno"]);
    assert_eq!(snapshot.selected.as_deref(), Some("ana"));
    assert_eq!(ids(snapshot.current.documents.iter().map(|d| &d.id)), vec!["ana-d2", "ana-d1"]);
    assert_eq!(snapshot.current.documents[1].category, DocumentCategory::Prescription);
    assert_eq!(ids(snapshot.current.appointments.iter().map(|a| &a.id)), vec!["ana-a1", "ana-a2"]);
    assert_eq!(engine.route(), Route::Dashboard);
}

#[tokio::test]
async fn test_create_child_prepends_and_selects_it() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let maria = engine
        .create_child(CreateChildCommand::new("Maria Silva", "2018-05-15"))
        .await
        .unwrap();

    let snapshot = engine.store_snapshot();
    assert_eq!(maria.user_id, "u1");
    assert_eq!(ids(snapshot.children.iter().map(|c| &c.id)), vec![maria.id.as_str(), "ana", "bruno"]);
    assert_eq!(snapshot.selected.as_deref(), Some(maria.id.as_str()));
    assert_eq!(snapshot.current, ChildCollections::default());

    let view = engine.view();
    let ScreenState::WithChildren(selection) = &view.screen else {
        panic!("expected a selected child");
    };
    assert_eq!(selection.child_id, maria.id);
    assert_eq!(selection.medications, LoadStatus::Loaded);
}

#[tokio::test]
async fn test_create_medication_splits_times_and_prepends() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    let before = engine.store_snapshot();

    let medication = engine
        .create_medication(CreateMedicationCommand {
            name: "Risperidona".to_string(),
            dosage: "1mg".to_string(),
            frequency: "2x ao dia".to_string(),
            times_input: "08:00, 20:00".to_string(),
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(medication.times, vec!["08:00", "20:00"]);
    assert!(medication.active);
    assert_eq!(medication.child_id, "ana");

    let after = engine.store_snapshot();
    assert_eq!(
        ids(after.current.medications.iter().map(|m| &m.id)),
        vec![medication.id.as_str(), "ana-m1"]
    );
    assert_eq!(after.current.documents, before.current.documents);
    assert_eq!(after.current.appointments, before.current.appointments);
    assert_eq!(after.children, before.children);
}

#[tokio::test]
async fn test_create_document_lands_at_its_date_position() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let document = engine
        .create_document(CreateDocumentCommand {
            category: "test-order".to_string(),
            title: "Pedido de EEG".to_string(),
            date: "2024-02-20".to_string(),
            ..CreateDocumentCommand::default()
        })
        .await
        .unwrap();

    assert_eq!(document.file_url, engine.config().document_placeholder_url);
    let snapshot = engine.store_snapshot();
    assert_eq!(
        ids(snapshot.current.documents.iter().map(|d| &d.id)),
        vec!["ana-d2", document.id.as_str(), "ana-d1"]
    );
}

#[tokio::test]
async fn test_create_appointment_lands_in_soonest_first_order() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let appointment = engine
        .create_appointment(CreateAppointmentCommand {
            kind: "Consulta".to_string(),
            title: "Neuropediatra".to_string(),
            date: "2024-06-05".to_string(),
            time: "10:30".to_string(),
            location: Some("Clínica Azul".to_string()),
            notes: None,
        })
        .await
        .unwrap();

    assert!(appointment.reminder_pending());
    let snapshot = engine.store_snapshot();
    assert_eq!(
        ids(snapshot.current.appointments.iter().map(|a| &a.id)),
        vec!["ana-a1", appointment.id.as_str(), "ana-a2"]
    );
}

#[tokio::test]
async fn test_invalid_creates_make_no_network_call() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    let before = engine.store_snapshot();

    let child = engine.create_child(CreateChildCommand::new("  ", "2018-05-15")).await;
    let medication = engine.create_medication(CreateMedicationCommand::default()).await;
    let document = engine
        .create_document(CreateDocumentCommand {
            category: "x-ray".to_string(),
            title: "Raio X".to_string(),
            date: "2024-01-01".to_string(),
            ..CreateDocumentCommand::default()
        })
        .await;
    let appointment = engine.create_appointment(CreateAppointmentCommand::default()).await;

    assert_eq!(child, Err(SyncError::Validation(ValidationError::EmptyChildName)));
    assert_eq!(medication, Err(SyncError::Validation(ValidationError::EmptyMedicationName)));
    assert_eq!(
        document,
        Err(SyncError::Validation(ValidationError::UnknownDocumentCategory("x-ray".to_string())))
    );
    assert_eq!(appointment, Err(SyncError::Validation(ValidationError::EmptyAppointmentTitle)));
    assert_eq!(gateway.insert_count(), 0);
    assert_eq!(engine.store_snapshot(), before);
}

#[tokio::test]
async fn test_failed_insert_leaves_store_unchanged() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    let before = engine.store_snapshot();
    gateway.fail_table(Table::Medications);

    let result = engine
        .create_medication(CreateMedicationCommand {
            name: "Melatonina".to_string(),
            ..CreateMedicationCommand::default()
        })
        .await;

    assert!(matches!(result, Err(SyncError::Transport(TransportError::Remote(_)))));
    assert_eq!(engine.store_snapshot(), before);
    let view = engine.view();
    assert!(view.last_error.is_some());
    assert!(!view.is_submitting(EntityKind::Medication));
}

#[tokio::test]
async fn test_failed_children_reload_keeps_cache() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    let before = engine.store_snapshot();
    gateway.fail_table(Table::Children);

    let result = engine.load_children().await;

    assert!(matches!(result, Err(SyncError::Transport(_))));
    assert_eq!(engine.store_snapshot(), before);
    assert!(engine.view().last_error.is_some());
}

#[tokio::test]
async fn test_failed_first_load_settles_with_retry() {
    let gateway = family();
    let engine = SyncEngine::new(gateway.clone(), configured());
    gateway.sign_in(Session::new("u1"));
    gateway.fail_table(Table::Children);

    let result = engine.load_children().await;

    assert!(matches!(result, Err(SyncError::Transport(TransportError::Remote(_)))));
    assert_eq!(engine.view().screen, ScreenState::LoadFailed);
    assert!(engine.view().last_error.is_some());

    gateway.heal_table(Table::Children);
    engine.load_children().await.unwrap();
    assert_eq!(engine.view().selected_child(), Some("ana"));
    assert_eq!(engine.view().last_error, None);
}

#[tokio::test]
async fn test_reload_selects_the_newest_child() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    engine.select_child("bruno").await.unwrap();
    assert_eq!(engine.store_snapshot().selected.as_deref(), Some("bruno"));

    let outcome = engine.load_children().await.unwrap();

    assert!(matches!(outcome, ChildrenLoad::Loaded { ref selected, .. } if selected == "ana"));
    let snapshot = engine.store_snapshot();
    assert_eq!(snapshot.selected.as_deref(), Some("ana"));
    assert_eq!(ids(snapshot.current.documents.iter().map(|d| &d.id)), vec!["ana-d2", "ana-d1"]);
    assert_eq!(engine.view().selected_child(), Some("ana"));
}

#[tokio::test]
async fn test_zero_children_means_no_child_data_queries() {
    let gateway = Arc::new(InMemoryGateway::new());
    let engine = SyncEngine::new(gateway.clone(), configured());
    gateway.sign_in(Session::new("u1"));

    let outcome = engine.load_children().await.unwrap();

    assert_eq!(outcome, ChildrenLoad::Empty);
    assert_eq!(gateway.query_count(), 1);
    assert_eq!(engine.store_snapshot().selected, None);
    assert_eq!(engine.view().screen, ScreenState::NoChildren);
}

#[tokio::test]
async fn test_late_response_for_previous_selection_is_discarded() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    engine.select_child("bruno").await.unwrap();

    let hold = gateway.hold_queries_for("bruno");
    let (bruno_load, ana_load) = tokio::join!(engine.load_child_data("bruno"), async {
        let report = engine.select_child("ana").await;
        hold.release();
        report
    });

    let bruno_load = bruno_load.unwrap();
    assert_eq!(bruno_load.medications, CollectionOutcome::Discarded);
    assert_eq!(bruno_load.documents, CollectionOutcome::Discarded);
    assert_eq!(bruno_load.appointments, CollectionOutcome::Discarded);
    assert!(ana_load.unwrap().all_applied());

    let snapshot = engine.store_snapshot();
    assert_eq!(snapshot.selected.as_deref(), Some("ana"));
    assert_eq!(ids(snapshot.current.medications.iter().map(|m| &m.id)), vec!["ana-m1"]);
    assert_eq!(engine.view().selected_child(), Some("ana"));
}

#[tokio::test]
async fn test_session_change_mid_load_discards_result() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let hold = gateway.hold_queries_for("ana");
    let (load, _) = tokio::join!(engine.load_child_data("ana"), async {
        gateway.expire_session();
        hold.release();
    });

    let report = load.unwrap();
    assert_eq!(report.medications, CollectionOutcome::Discarded);
    assert_eq!(engine.store_snapshot(), StoreSnapshot::default());
    assert_eq!(engine.route(), Route::Login);
}

#[tokio::test]
async fn test_switching_user_evicts_previous_users_data() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    gateway.sign_in(Session::new("u2"));
    assert_eq!(engine.store_snapshot(), StoreSnapshot::default());

    engine.load_children().await.unwrap();
    let snapshot = engine.store_snapshot();
    assert_eq!(ids(snapshot.children.iter().map(|c| &c.id)), vec!["other"]);
    assert_eq!(snapshot.owner.as_deref(), Some("u2"));
}

#[tokio::test]
async fn test_end_session_clears_everything_even_offline() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    gateway.set_offline(true);

    let outcome = engine.end_session().await.unwrap();

    assert!(matches!(outcome, SignOut::LocalOnly(TransportError::Unreachable(_))));
    assert_eq!(engine.store_snapshot(), StoreSnapshot::default());
    assert!(!engine.session().is_authenticated());
    assert_eq!(engine.view().screen, ScreenState::Unauthenticated);
}

#[tokio::test]
async fn test_end_session_confirmed_by_backend() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;

    let outcome = engine.end_session().await.unwrap();

    assert_eq!(outcome, SignOut::Confirmed);
    assert_eq!(gateway.sign_out_count(), 1);
    assert_eq!(engine.store_snapshot(), StoreSnapshot::default());
    assert_eq!(engine.route(), Route::Login);
}

#[tokio::test]
async fn test_unconfigured_engine_is_inert() {
    let gateway = family();
    gateway.sign_in(Session::new("u1"));
    let engine = SyncEngine::new(gateway.clone(), SyncConfig::default());

    assert_eq!(engine.route(), Route::SetupRequired);
    assert_eq!(engine.restore_session().await, Err(SyncError::Configuration));
    assert_eq!(engine.load_children().await, Err(SyncError::Configuration));
    assert_eq!(engine.select_child("ana").await, Err(SyncError::Configuration));
    assert_eq!(
        engine
            .create_child(CreateChildCommand::new("Maria Silva", "2018-05-15"))
            .await,
        Err(SyncError::Configuration)
    );
    assert_eq!(engine.end_session().await, Err(SyncError::Configuration));

    // Blank forms are rejected the same way whichever form it is
    assert_eq!(
        engine.create_child(CreateChildCommand::new("  ", "2018-05-15")).await,
        Err(SyncError::Validation(ValidationError::EmptyChildName))
    );
    assert_eq!(
        engine.create_medication(CreateMedicationCommand::default()).await,
        Err(SyncError::Validation(ValidationError::EmptyMedicationName))
    );

    assert_eq!(gateway.query_count(), 0);
    assert_eq!(gateway.insert_count(), 0);
    assert_eq!(gateway.sign_out_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_insert_releases_the_form() {
    let gateway = family();
    let engine = signed_in_engine(&gateway).await;
    let before = engine.store_snapshot();
    gateway.stall_inserts(true);

    let command = CreateAppointmentCommand {
        kind: "Consulta".to_string(),
        title: "Retorno".to_string(),
        date: "2024-07-01".to_string(),
        time: "08:00".to_string(),
        location: None,
        notes: None,
    };
    let result = engine.create_appointment(command.clone()).await;

    assert!(matches!(
        result,
        Err(SyncError::Transport(TransportError::Timeout { operation: "insert", .. }))
    ));
    assert_eq!(gateway.insert_count(), 1);
    assert_eq!(engine.store_snapshot(), before);
    assert!(!engine.view().is_submitting(EntityKind::Appointment));

    gateway.stall_inserts(false);
    assert!(engine.create_appointment(command).await.is_ok());
}

#[tokio::test]
async fn test_restore_session_picks_up_existing_sign_in() {
    let gateway = family();
    // Signed in before the engine subscribed, so only a refresh can see it
    gateway.sign_in(Session::new("u1"));
    let engine = SyncEngine::new(gateway.clone(), configured());
    assert_eq!(engine.route(), Route::Login);

    let state = engine.restore_session().await.unwrap();

    assert!(state.is_authenticated());
    assert!(!state.degraded);
    assert_eq!(engine.route(), Route::Dashboard);
    assert_eq!(engine.view().screen, ScreenState::Loading);
}
