//! # Entity Store
//!
//! In-memory cache of the entity graph owned by the signed-in user:
//! children, and per child three collections.
//!
//! ## Ordering
//!
//! | Collection | Order |
//! |---|---|
//! | children | most recently created first |
//! | medications | most recently created first |
//! | documents | `date` descending |
//! | appointments | `date`, then `time`, ascending (soonest first) |
//!
//! Inserts land where the ordering rule puts them, so a confirmed insert and
//! a later re-fetch agree on position.
//!
//! The store is a plain value; the sync engine owns it behind a lock and is
//! its only writer.

use shared::{Appointment, Child, Document, Medication};
use std::collections::HashMap;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildCollections {
    pub medications: Vec<Medication>,
    pub documents: Vec<Document>,
    pub appointments: Vec<Appointment>,
}

/// Cloned read model handed to the UI for rendering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub owner: Option<String>,
    pub children: Vec<Child>,
    pub selected: Option<String>,
    /// Collections of the selected child, if any were cached
    pub current: ChildCollections,
}

impl StoreSnapshot {
    pub fn selected_child(&self) -> Option<&Child> {
        let selected = self.selected.as_deref()?;
        self.children.iter().find(|child| child.id == selected)
    }
}

#[derive(Debug, Default)]
pub struct EntityStore {
    owner: Option<String>,
    children: Vec<Child>,
    selected: Option<String>,
    child_data: HashMap<String, ChildCollections>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_child(&self) -> Option<&Child> {
        let selected = self.selected.as_deref()?;
        self.find_child(selected)
    }

    pub fn find_child(&self, child_id: &str) -> Option<&Child> {
        self.children.iter().find(|child| child.id == child_id)
    }

    pub fn collections(&self, child_id: &str) -> Option<&ChildCollections> {
        self.child_data.get(child_id)
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.children.is_empty() && self.selected.is_none() && self.child_data.is_empty()
    }

    /// Replace every child of `owner`. Data of children that disappeared is
    /// dropped, and so is a selection pointing at one of them.
    pub fn replace_children(&mut self, owner: &str, children: Vec<Child>) {
        if self.owner.as_deref() != Some(owner) {
            self.child_data.clear();
            self.selected = None;
        }
        self.owner = Some(owner.to_string());
        self.children = children;

        let known = &self.children;
        self.child_data.retain(|child_id, _| known.iter().any(|child| &child.id == child_id));
        let selection_vanished = self
            .selected
            .as_ref()
            .is_some_and(|selected| !self.children.iter().any(|child| &child.id == selected));
        if selection_vanished {
            self.selected = None;
        }
    }

    pub fn replace_child_data(
        &mut self,
        child_id: &str,
        medications: Vec<Medication>,
        documents: Vec<Document>,
        appointments: Vec<Appointment>,
    ) -> Result<(), StoreError> {
        self.ensure_child(child_id)?;
        let mut collections = ChildCollections {
            medications,
            documents,
            appointments,
        };
        sort_documents(&mut collections.documents);
        sort_appointments(&mut collections.appointments);
        self.child_data.insert(child_id.to_string(), collections);
        Ok(())
    }

    pub fn replace_medications(&mut self, child_id: &str, medications: Vec<Medication>) -> Result<(), StoreError> {
        self.collections_mut(child_id)?.medications = medications;
        Ok(())
    }

    pub fn replace_documents(&mut self, child_id: &str, mut documents: Vec<Document>) -> Result<(), StoreError> {
        sort_documents(&mut documents);
        self.collections_mut(child_id)?.documents = documents;
        Ok(())
    }

    pub fn replace_appointments(&mut self, child_id: &str, mut appointments: Vec<Appointment>) -> Result<(), StoreError> {
        sort_appointments(&mut appointments);
        self.collections_mut(child_id)?.appointments = appointments;
        Ok(())
    }

    /// Prepend a newly created child
    pub fn insert_child(&mut self, child: Child) -> Result<usize, StoreError> {
        match self.owner.as_deref() {
            Some(owner) if owner != child.user_id => {
                return Err(StoreError::OwnerMismatch {
                    child_id: child.id,
                    child_owner: child.user_id,
                    store_owner: owner.to_string(),
                });
            }
            Some(_) => {}
            None => self.owner = Some(child.user_id.clone()),
        }
        self.child_data.entry(child.id.clone()).or_default();
        self.children.insert(0, child);
        Ok(0)
    }

    pub fn insert_medication(&mut self, medication: Medication) -> Result<usize, StoreError> {
        let collections = self.collections_mut(&medication.child_id)?;
        collections.medications.insert(0, medication);
        Ok(0)
    }

    /// Newest date first; a document sharing its date with others goes ahead of them
    pub fn insert_document(&mut self, document: Document) -> Result<usize, StoreError> {
        let collections = self.collections_mut(&document.child_id)?;
        let index = collections
            .documents
            .partition_point(|existing| existing.date > document.date);
        collections.documents.insert(index, document);
        Ok(index)
    }

    /// Soonest first; an appointment at the same date and time goes after the existing ones
    pub fn insert_appointment(&mut self, appointment: Appointment) -> Result<usize, StoreError> {
        let collections = self.collections_mut(&appointment.child_id)?;
        let key = appointment_key(&appointment);
        let index = collections
            .appointments
            .partition_point(|existing| appointment_key(existing) <= key);
        collections.appointments.insert(index, appointment);
        Ok(index)
    }

    /// Mark `child_id` as the active child. Cached data is untouched.
    pub fn select(&mut self, child_id: &str) -> Result<(), StoreError> {
        self.ensure_child(child_id)?;
        self.selected = Some(child_id.to_string());
        Ok(())
    }

    /// Evict everything, including the owner
    pub fn clear(&mut self) {
        self.owner = None;
        self.children.clear();
        self.selected = None;
        self.child_data.clear();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let current = self
            .selected
            .as_deref()
            .and_then(|selected| self.child_data.get(selected))
            .cloned()
            .unwrap_or_default();

        StoreSnapshot {
            owner: self.owner.clone(),
            children: self.children.clone(),
            selected: self.selected.clone(),
            current,
        }
    }

    fn ensure_child(&self, child_id: &str) -> Result<(), StoreError> {
        if self.find_child(child_id).is_some() {
            Ok(())
        } else {
            Err(StoreError::UnknownChild(child_id.to_string()))
        }
    }

    fn collections_mut(&mut self, child_id: &str) -> Result<&mut ChildCollections, StoreError> {
        self.ensure_child(child_id)?;
        Ok(self.child_data.entry(child_id.to_string()).or_default())
    }
}

fn appointment_key(appointment: &Appointment) -> (&str, &str) {
    (appointment.date.as_str(), appointment.time.as_str())
}

fn sort_documents(documents: &mut [Document]) {
    documents.sort_by(|a, b| b.date.cmp(&a.date));
}

fn sort_appointments(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| appointment_key(a).cmp(&appointment_key(b)));
}
