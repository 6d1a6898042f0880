use serde_json::Value;
use std::collections::HashMap;

use super::version::canonical_json;

/// Renders one document of a collection into embedding text.
pub type RenderFn = fn(&Value) -> String;

/// Collection name → text renderer.
///
/// Collections without a registered renderer fall back to the document's
/// canonical JSON.
#[derive(Clone)]
pub struct RendererRegistry {
    renderers: HashMap<String, RenderFn>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("doctors", render_doctor);
        registry.register("hospitals", render_hospital);
        registry.register("appointments", render_appointment);
        registry.register("insurances", render_insurance);
        registry.register("medicalreports", render_medical_report);
        registry.register("reviews", render_review);
        registry.register("symptomhistories", render_symptom_history);
        registry.register("users", render_user);
        registry
    }
}

impl RendererRegistry {
    pub fn empty() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    pub fn register(&mut self, collection: impl Into<String>, render: RenderFn) {
        self.renderers.insert(collection.into(), render);
    }

    pub fn render(&self, collection: &str, document: &Value) -> String {
        match self.renderers.get(collection) {
            Some(render) => render(document),
            None => canonical_json(document),
        }
    }
}

/// String form of a field: strings as-is, missing/null as empty, anything
/// else as compact JSON.
fn field(document: &Value, key: &str) -> String {
    match document.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn string_list(document: &Value, key: &str) -> String {
    document
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn render_doctor(doc: &Value) -> String {
    [
        format!("Doctor: {}", field(doc, "name")),
        format!("Speciality: {}", field(doc, "speciality")),
        format!("About: {}", field(doc, "about")),
        format!("Languages: {}", string_list(doc, "languagesKnown")),
        format!("Insurances: {}", string_list(doc, "acceptedInsurances")),
    ]
    .join(" ")
}

fn render_hospital(doc: &Value) -> String {
    format!(
        "Hospital: {} {} Services: {}",
        field(doc, "name"),
        field(doc, "location"),
        field(doc, "services")
    )
}

fn render_appointment(doc: &Value) -> String {
    format!(
        "Appointment with {} on {} at {}",
        field(doc, "doctorName"),
        field(doc, "date"),
        field(doc, "time")
    )
}

fn render_insurance(doc: &Value) -> String {
    format!(
        "Insurance: {} coverage: {}",
        field(doc, "provider"),
        field(doc, "coverage")
    )
}

fn render_medical_report(doc: &Value) -> String {
    format!(
        "Medical report for {} - {} Results: {}",
        field(doc, "patientName"),
        field(doc, "type"),
        field(doc, "results")
    )
}

fn render_review(doc: &Value) -> String {
    format!(
        "Review by {} for {}: {}",
        field(doc, "user"),
        field(doc, "doctor"),
        field(doc, "content")
    )
}

fn render_symptom_history(doc: &Value) -> String {
    format!(
        "Symptoms: {} Diagnosis: {}",
        field(doc, "symptoms"),
        field(doc, "diagnosis")
    )
}

fn render_user(doc: &Value) -> String {
    format!(
        "User {} email {} role {}",
        field(doc, "name"),
        field(doc, "email"),
        field(doc, "role")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doctor_renderer() {
        let registry = RendererRegistry::default();
        let text = registry.render(
            "doctors",
            &json!({
                "name": "Dr. Rao",
                "speciality": "Dermatology",
                "about": "Skin care",
                "languagesKnown": ["English", "Hindi"],
                "acceptedInsurances": ["Cigna"],
            }),
        );
        assert_eq!(
            text,
            "Doctor: Dr. Rao Speciality: Dermatology About: Skin care \
             Languages: English, Hindi Insurances: Cigna"
        );
    }

    #[test]
    fn test_simple_renderers() {
        let registry = RendererRegistry::default();
        assert_eq!(
            registry.render("hospitals", &json!({"name": "Mercy", "location": "Austin", "services": "ER"})),
            "Hospital: Mercy Austin Services: ER"
        );
        assert_eq!(
            registry.render("symptomhistories", &json!({"symptoms": "cough", "diagnosis": "flu"})),
            "Symptoms: cough Diagnosis: flu"
        );
        assert_eq!(
            registry.render("users", &json!({"name": "Ana", "email": "a@x.io", "role": "patient"})),
            "User Ana email a@x.io role patient"
        );
    }

    #[test]
    fn test_non_string_fields_render_as_json() {
        let registry = RendererRegistry::default();
        assert_eq!(
            registry.render("insurances", &json!({"provider": "Aetna", "coverage": 80})),
            "Insurance: Aetna coverage: 80"
        );
        assert_eq!(
            registry.render("appointments", &json!({"doctorName": "Dr. Lee", "date": null})),
            "Appointment with Dr. Lee on  at "
        );
    }

    #[test]
    fn test_unknown_collection_falls_back_to_canonical_json() {
        let registry = RendererRegistry::default();
        assert_eq!(registry.render("audit", &json!({"b": 2, "a": 1})), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_custom_renderer_overrides_default() {
        fn shout(doc: &Value) -> String {
            field(doc, "name").to_uppercase()
        }
        let mut registry = RendererRegistry::default();
        registry.register("doctors", shout);
        assert_eq!(registry.render("doctors", &json!({"name": "rao"})), "RAO");
    }
}
