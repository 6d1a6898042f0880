use serde::Deserialize;
use serde_json::Value;

use crate::document_store::Document;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hospital {
    #[serde(default)]
    pub name: String,
}

/// A matchable doctor as stored in the `doctors` collection.
///
/// Only the fields used for embedding and scoring are read; everything else
/// in the stored document is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRecord {
    #[serde(skip)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub speciality: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub about: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub languages_known: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accepted_insurances: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hospitals: Vec<Hospital>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DoctorRecord {
    pub fn from_document(document: &Document) -> serde_json::Result<Self> {
        Self::from_value(document.id.clone(), &document.body)
    }

    pub fn from_value(id: String, body: &Value) -> serde_json::Result<Self> {
        let mut record = DoctorRecord::deserialize(body)?;
        record.id = id;
        Ok(record)
    }

    /// Text fed to the embedding model for this doctor.
    ///
    /// Labeled fields in a fixed order, empty ones left out entirely.
    pub fn composite_text(&self) -> String {
        let hospital_names: Vec<&str> = self
            .hospitals
            .iter()
            .map(|h| h.name.as_str())
            .filter(|n| !n.is_empty())
            .collect();

        let fields = [
            ("Speciality", self.speciality.clone()),
            ("About", self.about.clone()),
            ("Languages", join_non_empty(&self.languages_known)),
            ("Insurances", join_non_empty(&self.accepted_insurances)),
            ("Hospitals", hospital_names.join(", ")),
        ];

        fields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(label, value)| format!("{label}: {value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn join_non_empty(values: &[String]) -> String {
    values
        .iter()
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
