//! monitoring-core: modelo y contratos del almacén de monitoreo de
//! ejecuciones de entrega (delivery executions).
//!
//! Módulos:
//! - `record`: `MonitoringRecord` (clave natural + atributos fijos/dinámicos).
//! - `schema`: descriptor inmutable de columnas fijas (`TableSchema`).
//! - `criteria`: árbol de expresiones booleanas y parser de la gramática
//!   posicional heredada (`[{k: v}, "OR", {k: v}]`).
//! - `options`: opciones de `find` (orden, offset, límite).
//! - `store`: trait `MonitoringStore` y backend en memoria (paridad).
//! - `validation`: predicados de validación previos a `save`.
//! - `reports`: programación de reportes de irregularidades sobre una cola
//!   de tareas externa.
pub mod criteria;
pub mod errors;
pub mod options;
pub mod record;
pub mod reports;
pub mod schema;
pub mod store;
pub mod validation;

pub use criteria::{Criteria, Operator};
pub use errors::MonitoringError;
pub use options::{FindOptions, OrderItem};
pub use record::MonitoringRecord;
pub use reports::{InMemoryTaskQueue, IrregularityReportRequest, ReportScheduler, TaskHandle, TaskQueue};
pub use schema::{parse_numeric, ColumnKind, TableSchema};
pub use store::{InMemoryMonitoringStore, MonitoringStore};
pub use validation::{NonEmptyNaturalKey, RecordValidator, RequiredAttributes};
