//! Record Binder - writes one record's fields into bound scene elements

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::{Bindable, Scene};
use crate::source::{FieldSelector, Record};
use crate::symbology::{validate_qr, PayloadError};

/// One element fed from one field of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub element: String,
    pub source: String,
    pub field: FieldSelector,
}

impl Binding {
    pub fn new(element: impl Into<String>, source: impl Into<String>, field: impl Into<FieldSelector>) -> Self {
        Self {
            element: element.into(),
            source: source.into(),
            field: field.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("element '{0}' does not exist in the scene")]
    ElementMissing(String),

    #[error("element type {type_name} does not support data application")]
    Unsupported { element: String, type_name: String },

    #[error("field {field} is missing from source '{source_id}'")]
    MissingField { source_id: String, field: FieldSelector },

    #[error("invalid payload {value:?} for element '{element}': {error}")]
    InvalidPayload {
        element: String,
        value: String,
        #[source]
        error: PayloadError,
    },
}

impl BindError {
    pub fn element(&self) -> Option<&str> {
        match self {
            BindError::ElementMissing(id) => Some(id),
            BindError::Unsupported { element, .. } | BindError::InvalidPayload { element, .. } => Some(element),
            BindError::MissingField { .. } => None,
        }
    }
}

/// Applies bindings to a working scene.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBinder;

impl RecordBinder {
    pub fn new() -> Self {
        Self
    }

    /// Write the bound field of `record` into the target element. Barcode and
    /// QR payloads are validated first; a rejected payload leaves the
    /// element unchanged.
    pub fn apply(&self, record: &Record, binding: &Binding, scene: &mut Scene) -> Result<(), BindError> {
        let value = record
            .get(&binding.field)
            .ok_or_else(|| BindError::MissingField {
                source_id: binding.source.clone(),
                field: binding.field.clone(),
            })?
            .trim();

        let element = scene
            .element_mut(&binding.element)
            .ok_or_else(|| BindError::ElementMissing(binding.element.clone()))?;
        let type_name = element.type_name();

        let invalid = |error: PayloadError| BindError::InvalidPayload {
            element: binding.element.clone(),
            value: value.to_string(),
            error,
        };

        match element.bindable() {
            Some(Bindable::Text(content)) => {
                *content = value.to_string();
            }
            Some(Bindable::Barcode { payload, symbology }) => {
                symbology.validate(value).map_err(invalid)?;
                *payload = value.to_string();
            }
            Some(Bindable::QrCode { payload, ec_level }) => {
                validate_qr(value, ec_level).map_err(invalid)?;
                *payload = value.to_string();
            }
            None => {
                return Err(BindError::Unsupported {
                    element: binding.element.clone(),
                    type_name: type_name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Apply every binding in order, stopping at the first failure.
    pub fn apply_all<'a, F>(&self, bindings: &[Binding], mut record_for: F, scene: &mut Scene) -> Result<(), BindError>
    where
        F: FnMut(&str) -> Option<&'a Record>,
    {
        for binding in bindings {
            let record = record_for(&binding.source).ok_or_else(|| BindError::MissingField {
                source_id: binding.source.clone(),
                field: binding.field.clone(),
            })?;
            self.apply(record, binding, scene)?;
        }
        Ok(())
    }
}
