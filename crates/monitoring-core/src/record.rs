//! Registro de monitoreo de una ejecución de entrega.
//!
//! Un `MonitoringRecord` lleva:
//! - `id`: clave subrogada asignada por el almacén (sólo tras el primer
//!   `save`).
//! - `delivery_execution_id`: clave natural asignada por el llamador, única
//!   e inmutable.
//! - `attributes`: mapa mixto de atributos fijos y dinámicos en forma de
//!   texto. La clasificación fijo/dinámico NO la decide el registro: la
//!   decide el `TableSchema` del almacén en el momento de guardar.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Nombres de columnas fijas conocidas del esquema por defecto.
///
/// Sólo son atajos para el código llamador; el conjunto real de columnas
/// fijas lo determina el `TableSchema` inyectado.
pub mod columns {
    pub const ID: &str = "id";
    pub const DELIVERY_EXECUTION_ID: &str = "delivery_execution_id";
    pub const STATUS: &str = "status";
    pub const CURRENT_ASSESSMENT_ITEM: &str = "current_assessment_item";
    pub const TEST_TAKER: &str = "test_taker";
    pub const TEST_TAKER_FIRST_NAME: &str = "test_taker_first_name";
    pub const TEST_TAKER_LAST_NAME: &str = "test_taker_last_name";
    pub const AUTHORIZED_BY: &str = "authorized_by";
    pub const DELIVERY_ID: &str = "delivery_id";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const REMAINING_TIME: &str = "remaining_time";
    pub const EXTRA_TIME: &str = "extra_time";
    pub const CONSUMED_EXTRA_TIME: &str = "consumed_extra_time";
    pub const LAST_TEST_TAKER_ACTIVITY: &str = "last_test_taker_activity";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringRecord {
    pub id: Option<i64>,
    pub delivery_execution_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl MonitoringRecord {
    pub fn new(delivery_execution_id: impl Into<String>) -> Self {
        Self { id: None,
               delivery_execution_id: delivery_execution_id.into(),
               attributes: BTreeMap::new() }
    }

    /// Variante encadenable de `set`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    /// Reemplaza el conjunto completo de atributos. `save` no fusiona
    /// atributos dinámicos: lo que no esté aquí desaparece al guardar.
    pub fn replace_attributes<I, K, V>(&mut self, attributes: I)
        where I: IntoIterator<Item = (K, V)>,
              K: Into<String>,
              V: Into<String>
    {
        self.attributes = attributes.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_and_overrides_attributes() {
        let mut r = MonitoringRecord::new("de-1").with(columns::STATUS, "active").with("tool", "calc");
        assert_eq!(r.get(columns::STATUS), Some("active"));
        r.set(columns::STATUS, "paused");
        assert_eq!(r.get(columns::STATUS), Some("paused"));
        assert_eq!(r.remove("tool"), Some("calc".to_string()));
        assert_eq!(r.id, None);
    }

    #[test]
    fn replace_attributes_drops_previous_keys() {
        let mut r = MonitoringRecord::new("de-2").with("a", "1").with("b", "2");
        r.replace_attributes([("c", "3")]);
        assert_eq!(r.attributes.len(), 1);
        assert_eq!(r.get("c"), Some("3"));
    }
}
