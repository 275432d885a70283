#![allow(dead_code)]

use monitoring_persistence::config::DbConfig;
use monitoring_persistence::pg::{build_pool_from_config, PgMonitoringStore, PgPool, PoolProvider, SchemaIntrospector};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env().ok()?;
    // 1x1 estable para tests
    match build_pool_from_config(&DbConfig { min_connections: 1, max_connections: 2, ..cfg }) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
    where F: FnOnce(&PgPool) -> R
{
    TEST_POOL.as_ref().map(f)
}

/// Almacén Postgres con esquema introspectado, o `None` sin DATABASE_URL.
pub fn pg_store() -> Option<PgMonitoringStore<PoolProvider>> {
    with_pool(|pool| {
        let provider = PoolProvider { pool: pool.clone() };
        PgMonitoringStore::introspected(provider, &SchemaIntrospector::new()).expect("introspect delivery_monitoring")
    })
}

/// Prefijo único por test: evita choques entre ejecuciones sobre la misma base.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}
