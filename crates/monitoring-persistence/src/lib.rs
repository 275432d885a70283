//! monitoring-persistence
//!
//! Backend Postgres (Diesel + r2d2) del almacén de monitoreo de ejecuciones
//! de entrega.
//!
//! Módulos:
//! - `pg`: `PgMonitoringStore`, compilador de criterios a SQL,
//!   introspección de esquema y utilidades de pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel para las consultas tipadas.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, build_pool_from_config, ConnectionProvider, PgMonitoringStore, PgPool,
             PoolProvider, SchemaIntrospector};
