//! Per-kind payload validation.
//!
//! The workflow treats payloads as opaque JSON. Field rules live here and run
//! only when a version is created or a draft is updated; transitions never
//! look inside the payload.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Result, WorkflowError};
use crate::types::EntityKind;

/// Checks a payload for one entity kind and reports every problem found.
pub trait PayloadValidator: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Returns human-readable problems; empty means valid.
    fn problems(&self, payload: &Value) -> Vec<String>;
}

/// Validators keyed by entity kind.
pub struct ValidatorRegistry {
    validators: HashMap<EntityKind, Box<dyn PayloadValidator>>,
}

impl ValidatorRegistry {
    /// A registry with no kind-specific rules; payloads only need to be objects.
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    pub fn register(&mut self, validator: Box<dyn PayloadValidator>) {
        self.validators.insert(validator.kind(), validator);
    }

    pub fn validate(&self, kind: EntityKind, payload: &Value) -> Result<()> {
        if !payload.is_object() {
            return Err(WorkflowError::validation(format!(
                "{} payload must be a JSON object",
                kind
            )));
        }

        let Some(validator) = self.validators.get(&kind) else {
            return Ok(());
        };

        let problems = validator.problems(payload);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::validation(format!(
                "{} payload: {}",
                kind,
                problems.join("; ")
            )))
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(BoreholeLogValidator));
        registry.register(Box::new(LabTestValidator));
        registry
    }
}

/// `total_depth` (positive number) is required; each entry of the optional
/// `layers` array needs `top < bottom`, both within the total depth.
pub struct BoreholeLogValidator;

impl PayloadValidator for BoreholeLogValidator {
    fn kind(&self) -> EntityKind {
        EntityKind::BoreholeLog
    }

    fn problems(&self, payload: &Value) -> Vec<String> {
        let mut problems = Vec::new();

        let total_depth = match payload.get("total_depth").and_then(Value::as_f64) {
            Some(depth) if depth > 0.0 => Some(depth),
            Some(depth) => {
                problems.push(format!("total_depth must be positive, got {}", depth));
                None
            }
            None => {
                problems.push("total_depth is required and must be a number".to_string());
                None
            }
        };

        match payload.get("layers") {
            None | Some(Value::Null) => {}
            Some(Value::Array(layers)) => {
                for (idx, layer) in layers.iter().enumerate() {
                    let top = layer.get("top").and_then(Value::as_f64);
                    let bottom = layer.get("bottom").and_then(Value::as_f64);
                    match (top, bottom) {
                        (Some(top), Some(bottom)) => {
                            if top < 0.0 {
                                problems.push(format!("layers[{}].top must not be negative", idx));
                            }
                            if top >= bottom {
                                problems.push(format!(
                                    "layers[{}] top {} must be above bottom {}",
                                    idx, top, bottom
                                ));
                            }
                            if let Some(total) = total_depth {
                                if bottom > total {
                                    problems.push(format!(
                                        "layers[{}].bottom {} exceeds total_depth {}",
                                        idx, bottom, total
                                    ));
                                }
                            }
                        }
                        _ => problems.push(format!("layers[{}] needs numeric top and bottom", idx)),
                    }
                }
            }
            Some(_) => problems.push("layers must be an array".to_string()),
        }

        problems
    }
}

/// `test_type` and `sample_id` are required non-empty strings; `results`,
/// when present, must be an object.
pub struct LabTestValidator;

impl PayloadValidator for LabTestValidator {
    fn kind(&self) -> EntityKind {
        EntityKind::LabTest
    }

    fn problems(&self, payload: &Value) -> Vec<String> {
        let mut problems = Vec::new();
        for field in ["test_type", "sample_id"] {
            match payload.get(field).and_then(Value::as_str) {
                Some(value) if !value.trim().is_empty() => {}
                _ => problems.push(format!("{} is required", field)),
            }
        }
        if let Some(results) = payload.get("results") {
            if !results.is_object() && !results.is_null() {
                problems.push("results must be an object".to_string());
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_borehole_payload_accepted() {
        let registry = ValidatorRegistry::default();
        let payload = json!({
            "total_depth": 30.0,
            "layers": [
                {"top": 0.0, "bottom": 2.5, "description": "topsoil"},
                {"top": 2.5, "bottom": 30.0, "description": "clay"}
            ]
        });
        registry.validate(EntityKind::BoreholeLog, &payload).unwrap();
    }

    #[test]
    fn test_borehole_layer_problems_are_all_reported() {
        let registry = ValidatorRegistry::default();
        let payload = json!({
            "total_depth": 10.0,
            "layers": [{"top": 5.0, "bottom": 4.0}, {"top": 1.0, "bottom": 12.0}]
        });
        let err = registry
            .validate(EntityKind::BoreholeLog, &payload)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("layers[0] top 5 must be above bottom 4"), "{}", msg);
        assert!(msg.contains("layers[1].bottom 12 exceeds total_depth 10"), "{}", msg);
    }

    #[test]
    fn test_borehole_requires_depth() {
        let registry = ValidatorRegistry::default();
        assert!(registry
            .validate(EntityKind::BoreholeLog, &json!({"layers": []}))
            .is_err());
        assert!(registry
            .validate(EntityKind::BoreholeLog, &json!({"total_depth": -1}))
            .is_err());
    }

    #[test]
    fn test_lab_test_required_fields() {
        let registry = ValidatorRegistry::default();
        registry
            .validate(
                EntityKind::LabTest,
                &json!({"test_type": "atterberg", "sample_id": "S-12", "results": {"ll": 41}}),
            )
            .unwrap();
        let err = registry
            .validate(EntityKind::LabTest, &json!({"test_type": " "}))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_non_object_payload_rejected_even_without_rules() {
        let registry = ValidatorRegistry::empty();
        assert!(registry.validate(EntityKind::LabTest, &json!([1, 2])).is_err());
        registry.validate(EntityKind::LabTest, &json!({})).unwrap();
    }
}
