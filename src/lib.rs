//! delivery-monitoring
//!
//! Fachada del almacén de monitoreo de ejecuciones de entrega:
//! - `monitoring_core`: registros, criterios, esquema, trait del almacén y
//!   backend en memoria.
//! - `monitoring_persistence`: backend Postgres (Diesel + r2d2).
//!
//! `connect_from_env` arma el backend Postgres a partir de `.env`.

pub use monitoring_core;
pub use monitoring_persistence;

use log::info;
use monitoring_persistence::pg::{PgMonitoringStore, PoolProvider, SchemaIntrospector};
use monitoring_persistence::{build_dev_pool_from_env, PersistenceError};

pub mod prelude {
    pub use monitoring_core::{Criteria, FindOptions, InMemoryMonitoringStore, MonitoringRecord, MonitoringStore,
                              Operator, TableSchema};
    pub use monitoring_persistence::{PersistenceError, PgMonitoringStore, PoolProvider};
}

/// Pool migrado + esquema introspectado de `delivery_monitoring`.
pub fn connect_from_env() -> Result<PgMonitoringStore<PoolProvider>, PersistenceError> {
    let pool = build_dev_pool_from_env()?;
    let store = PgMonitoringStore::introspected(PoolProvider { pool }, &SchemaIntrospector::new())?;
    info!("delivery_monitoring store ready");
    Ok(store)
}
