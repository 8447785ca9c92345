//! Resource schemas: validation and normalization of document bodies, plus
//! the per-resource read rules (hidden fields, default scope, population).

pub mod booking;
pub mod review;
pub mod tour;
pub mod user;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::database::CollectionSpec;
use crate::filter::FilterWhereInfo;

pub use booking::BookingSchema;
pub use review::ReviewSchema;
pub use tour::TourSchema;
pub use user::UserSchema;

/// Field name → message. Ordered so error bodies are stable.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid input data. {}", join_messages(.0))]
    Invalid(FieldErrors),

    #[error("{0}")]
    Rejected(String),
}

fn join_messages(errors: &FieldErrors) -> String {
    errors.values().cloned().collect::<Vec<_>>().join(". ")
}

impl SchemaError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), message.into());
        SchemaError::Invalid(errors)
    }
}

/// How a stored reference is expanded on read.
#[derive(Debug, Clone, PartialEq)]
pub enum Populate {
    /// Replaces the id (or id list) stored at `path` with the referenced
    /// documents, minus `hidden` fields.
    Reference {
        path: &'static str,
        collection: &'static str,
        hidden: &'static [&'static str],
    },
    /// Attaches under `path` every document of `collection` whose
    /// `foreign_field` holds this document's id. `populate` lists references
    /// resolved on the attached documents.
    Virtual {
        path: &'static str,
        collection: &'static str,
        foreign_field: &'static str,
        hidden: &'static [&'static str],
        populate: &'static [Populate],
    },
}

/// Static description of a resource the generic handler operates on.
pub trait ResourceSchema: Send + Sync + 'static {
    fn collection(&self) -> CollectionSpec;

    /// Validates a complete document and fills defaults and derived fields.
    fn normalize(&self, data: Map<String, Value>) -> Result<Map<String, Value>, SchemaError>;

    fn validate_create(&self, body: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        self.normalize(strip_identity(body))
    }

    /// Merges `patch` over the stored data and re-validates the result.
    fn validate_update(
        &self,
        existing: &Map<String, Value>,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>, SchemaError> {
        let mut merged = existing.clone();
        for (k, v) in strip_identity(patch) {
            merged.insert(k, v);
        }
        self.normalize(merged)
    }

    /// Fields never rendered in responses.
    fn hidden_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Conditions applied to every read.
    fn default_scope(&self) -> Vec<FilterWhereInfo> {
        vec![]
    }

    /// Population applied to every single-document read.
    fn populate(&self) -> Vec<Populate> {
        vec![]
    }
}

/// Identity fields are owned by the store.
pub fn strip_identity(mut body: Map<String, Value>) -> Map<String, Value> {
    body.remove("id");
    body.remove("_id");
    body.remove("__v");
    body
}

pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Bare dates and date-times are read as UTC
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Field-by-field rule runner over a document body. Errors accumulate so a
/// single response lists every invalid field.
pub struct Rules {
    data: Map<String, Value>,
    errors: FieldErrors,
}

impl Rules {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data, errors: FieldErrors::new() }
    }

    /// Drops unknown fields.
    pub fn known(mut self, fields: &[&str]) -> Self {
        self.data.retain(|k, _| fields.contains(&k.as_str()));
        self
    }

    pub fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.data.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.data.remove(field)
    }

    pub fn default(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        if self.get(field).is_none() {
            self.set(field, value);
        }
        self
    }

    pub fn required(&mut self, field: &str, message: &str) -> &mut Self {
        let present = match self.get(field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
            None => false,
        };
        if !present {
            self.fail(field, message);
        }
        self
    }

    /// Strings are trimmed when `trim` is set; wrong types fail.
    pub fn string(&mut self, field: &str, trim: bool) -> &mut Self {
        match self.get(field).cloned() {
            Some(Value::String(s)) if trim => self.set(field, s.trim()),
            Some(Value::String(_)) | None => {}
            Some(_) => self.fail(field, format!("{} must be a string", field)),
        }
        self
    }

    pub fn length(&mut self, field: &str, min: usize, max: usize, too_short: &str, too_long: &str) -> &mut Self {
        let len = match self.get(field) {
            Some(Value::String(s)) => Some(s.chars().count()),
            _ => None,
        };
        if let Some(len) = len {
            if len < min {
                self.fail(field, too_short);
            } else if len > max {
                self.fail(field, too_long);
            }
        }
        self
    }

    pub fn number(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field) {
            if !v.is_number() {
                self.fail(field, format!("{} must be a number", field));
            }
        }
        self
    }

    pub fn range(&mut self, field: &str, min: f64, max: f64, below: &str, above: &str) -> &mut Self {
        if let Some(x) = self.get(field).and_then(Value::as_f64) {
            if x < min {
                self.fail(field, below);
            } else if x > max {
                self.fail(field, above);
            }
        }
        self
    }

    pub fn boolean(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field) {
            if !v.is_boolean() {
                self.fail(field, format!("{} must be true or false", field));
            }
        }
        self
    }

    pub fn one_of(&mut self, field: &str, allowed: &[&str], message: &str) -> &mut Self {
        if let Some(v) = self.get(field) {
            if !v.as_str().is_some_and(|s| allowed.contains(&s)) {
                self.fail(field, message);
            }
        }
        self
    }

    /// A document reference: an id string, normalized to hyphenated form.
    pub fn reference(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            match v.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                Some(id) => self.set(field, id.to_string()),
                None => self.fail(field, format!("Invalid {}: {}", field, v)),
            }
        }
        self
    }

    pub fn reference_list(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            let ids: Option<Vec<Value>> = v.as_array().and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(|id| id.to_string().into()))
                    .collect()
            });
            match ids {
                Some(ids) => self.set(field, Value::Array(ids)),
                None => self.fail(field, format!("Invalid {}: expected a list of ids", field)),
            }
        }
        self
    }

    pub fn string_list(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field) {
            let ok = v.as_array().is_some_and(|items| items.iter().all(Value::is_string));
            if !ok {
                self.fail(field, format!("{} must be a list of strings", field));
            }
        }
        self
    }

    /// Timestamps are stored as RFC 3339 UTC with millisecond precision so
    /// they compare correctly as strings.
    pub fn timestamp(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            match v.as_str().and_then(parse_timestamp) {
                Some(dt) => self.set(field, timestamp(dt)),
                None => self.fail(field, format!("Invalid date for {}: {}", field, v)),
            }
        }
        self
    }

    pub fn timestamp_list(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            let dates: Option<Vec<Value>> = v.as_array().and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().and_then(parse_timestamp).map(|dt| timestamp(dt).into()))
                    .collect()
            });
            match dates {
                Some(dates) => self.set(field, Value::Array(dates)),
                None => self.fail(field, format!("Invalid dates for {}", field)),
            }
        }
        self
    }

    /// GeoJSON point: `{ type: "Point", coordinates: [lng, lat], ... }`.
    pub fn point(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            match normalize_point(v) {
                Some(point) => self.set(field, point),
                None => self.fail(field, format!("{} must be a GeoJSON point with [lng, lat] coordinates", field)),
            }
        }
        self
    }

    pub fn point_list(&mut self, field: &str) -> &mut Self {
        if let Some(v) = self.get(field).cloned() {
            let points: Option<Vec<Value>> = v.as_array().and_then(|items| items.iter().cloned().map(normalize_point).collect());
            match points {
                Some(points) => self.set(field, Value::Array(points)),
                None => self.fail(field, format!("{} must be a list of GeoJSON points", field)),
            }
        }
        self
    }

    pub fn finish(self) -> Result<Map<String, Value>, SchemaError> {
        if self.errors.is_empty() {
            Ok(self.data)
        } else {
            Err(SchemaError::Invalid(self.errors))
        }
    }
}

fn normalize_point(value: Value) -> Option<Value> {
    let mut point = value.as_object()?.clone();
    match point.get("type") {
        None | Some(Value::Null) => {
            point.insert("type".to_string(), Value::from("Point"));
        }
        Some(Value::String(t)) if t == "Point" => {}
        Some(_) => return None,
    }
    let coordinates = point.get("coordinates")?.as_array()?;
    if coordinates.len() != 2 {
        return None;
    }
    let lng = coordinates[0].as_f64()?;
    let lat = coordinates[1].as_f64()?;
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return None;
    }
    Some(Value::Object(point))
}
