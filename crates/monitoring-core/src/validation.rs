//! Predicados de validación aplicados por `save` antes de escribir.
//!
//! Un registro inválido no se escribe y `save` devuelve `Ok(false)`.

use crate::record::MonitoringRecord;

pub trait RecordValidator: Send + Sync {
    /// `Err` con la lista de problemas si el registro no debe persistirse.
    fn validate(&self, record: &MonitoringRecord) -> Result<(), Vec<String>>;
}

impl<F> RecordValidator for F where F: Fn(&MonitoringRecord) -> Result<(), Vec<String>> + Send + Sync
{
    fn validate(&self, record: &MonitoringRecord) -> Result<(), Vec<String>> {
        self(record)
    }
}

/// Validador por defecto: la clave natural no puede estar vacía.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptyNaturalKey;

impl RecordValidator for NonEmptyNaturalKey {
    fn validate(&self, record: &MonitoringRecord) -> Result<(), Vec<String>> {
        if record.delivery_execution_id.trim().is_empty() {
            Err(vec!["delivery_execution_id is empty".to_string()])
        } else {
            Ok(())
        }
    }
}

/// Exige clave natural y un conjunto de atributos presentes y no vacíos.
#[derive(Debug, Default, Clone)]
pub struct RequiredAttributes(pub Vec<String>);

impl RecordValidator for RequiredAttributes {
    fn validate(&self, record: &MonitoringRecord) -> Result<(), Vec<String>> {
        let mut problems = NonEmptyNaturalKey.validate(record).err().unwrap_or_default();
        for key in &self.0 {
            match record.get(key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => problems.push(format!("required attribute '{key}' is missing")),
            }
        }
        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_key_must_not_be_blank() {
        assert!(NonEmptyNaturalKey.validate(&MonitoringRecord::new("de-1")).is_ok());
        assert!(NonEmptyNaturalKey.validate(&MonitoringRecord::new("  ")).is_err());
    }

    #[test]
    fn required_attributes_report_every_problem() {
        let v = RequiredAttributes(vec!["status".into(), "test_taker".into()]);
        let errs = v.validate(&MonitoringRecord::new("").with("status", "active")).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(v.validate(&MonitoringRecord::new("de").with("status", "a").with("test_taker", "tt")).is_ok());
    }

    #[test]
    fn closures_are_validators() {
        let only_active = |r: &MonitoringRecord| match r.get("status") {
            Some("active") => Ok(()),
            _ => Err(vec!["not active".to_string()]),
        };
        assert!(only_active.validate(&MonitoringRecord::new("x").with("status", "active")).is_ok());
        assert!(only_active.validate(&MonitoringRecord::new("x")).is_err());
    }
}
