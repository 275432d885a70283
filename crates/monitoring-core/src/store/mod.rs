//! Trait `MonitoringStore` y backend en memoria.

mod eval;
mod memory;

pub use eval::like_match;
pub use memory::InMemoryMonitoringStore;

use crate::criteria::Criteria;
use crate::errors::MonitoringError;
use crate::options::FindOptions;
use crate::record::MonitoringRecord;
use crate::schema::TableSchema;

/// Almacén de registros de monitoreo.
///
/// Contrato común a todos los backends:
/// - `find`: filas principales distintas que cumplen `criteria`, en el orden
///   de `options`. Con `together` cada registro incluye sus atributos
///   dinámicos; sin él sólo los fijos.
/// - `save`: valida, decide alta/modificación por consulta de la clave
///   natural y reescribe por completo los atributos dinámicos. En alta
///   escribe la clave subrogada en `record.id`. `Ok(false)` si la validación
///   falla (sin escrituras).
/// - `delete`: borra la fila principal y todas sus filas secundarias.
///   `Ok(false)` si el registro no existe.
pub trait MonitoringStore {
    type Error: std::error::Error + From<MonitoringError>;

    /// Esquema con el que el almacén clasifica atributos.
    fn schema(&self) -> &TableSchema;

    fn find(&self,
            criteria: &Criteria,
            options: &FindOptions,
            together: bool)
            -> Result<Vec<MonitoringRecord>, Self::Error>;

    fn count(&self, criteria: &Criteria) -> Result<u64, Self::Error>;

    fn save(&self, record: &mut MonitoringRecord) -> Result<bool, Self::Error>;

    fn delete(&self, record: &mut MonitoringRecord) -> Result<bool, Self::Error>;

    /// Busca un registro por clave natural.
    fn find_by_delivery_execution(&self,
                                  delivery_execution_id: &str,
                                  together: bool)
                                  -> Result<Option<MonitoringRecord>, Self::Error> {
        let criteria = Criteria::eq(self.schema().natural_key_column(), delivery_execution_id);
        let mut found = self.find(&criteria, &FindOptions::default().limit(1), together)?;
        Ok(found.pop())
    }
}
