//! Implementación Postgres (Diesel) de `MonitoringStore`.
//!
//! - `find`/`count`: SQL compilado desde `Criteria` (ver `compiler`), con un
//!   LEFT JOIN a `kv_delivery_monitoring` por cada clave dinámica.
//! - `save`/`delete`: una transacción `read_write` por llamada, serializada
//!   por clave natural con `pg_advisory_xact_lock`.
//! - Errores transitorios (pool, serialización, desconexión) se reintentan
//!   con backoff corto (`with_retry`).

pub mod compiler;
pub mod introspection;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{BigInt, Jsonb, Nullable, Text};
use log::{debug, warn};
use monitoring_core::{Criteria, FindOptions, MonitoringRecord, MonitoringStore, NonEmptyNaturalKey, RecordValidator,
                      TableSchema};
use serde_json::Value;

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::kv_delivery_monitoring;

pub use compiler::{CompiledSql, Postgres, QueryCompiler, SqlDialect, KV_TABLE};
pub use introspection::{schema_from_columns, SchemaIntrospector};

/// Pool r2d2 de conexiones Postgres. `build_pool` corre las migraciones
/// pendientes al construirlo.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones: un pool real en producción o un
/// proveedor ad hoc en tests.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de `find`: la fila principal completa como JSON.
#[derive(QueryableByName, Debug)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    data: Value,
}

#[derive(QueryableByName, Debug)]
struct IdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(QueryableByName, Debug)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Queryable, Debug)]
struct KvRow {
    parent_id: i64,
    monitoring_key: String,
    monitoring_value: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = kv_delivery_monitoring)]
struct NewKvRow<'a> {
    parent_id: i64,
    monitoring_key: &'a str,
    monitoring_value: &'a str,
}

/// Errores que vale la pena reintentar.
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        // Algunos errores del driver sólo llegan como texto.
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Reintenta `f` hasta 3 veces ante errores transitorios (15ms, 30ms, 45ms).
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn boxed_query(compiled: &CompiledSql) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    let mut query = diesel::sql_query(compiled.sql.clone()).into_boxed::<Pg>();
    for value in &compiled.binds {
        query = query.bind::<Nullable<Text>, _>(value.clone());
    }
    query
}

/// Serializa escrituras concurrentes sobre la misma clave natural hasta el
/// fin de la transacción.
fn lock_natural_key(conn: &mut PgConnection, natural_key: &str) -> Result<(), PersistenceError> {
    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))").bind::<Text, _>(natural_key.to_string())
                                                                    .execute(conn)?;
    Ok(())
}

fn lookup_id(conn: &mut PgConnection, lookup: &CompiledSql) -> Result<Option<i64>, PersistenceError> {
    let rows: Vec<IdRow> = boxed_query(lookup).load(conn)?;
    Ok(rows.first().map(|r| r.id))
}

/// Reemplaza el conjunto completo de filas clave/valor de un registro.
fn replace_dynamic(conn: &mut PgConnection, id: i64, dynamic: &BTreeMap<&str, &str>) -> Result<(), PersistenceError> {
    use kv_delivery_monitoring::dsl as kv;
    diesel::delete(kv::kv_delivery_monitoring.filter(kv::parent_id.eq(id))).execute(conn)?;
    if dynamic.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewKvRow<'_>> = dynamic.iter()
                                         .map(|(key, value)| NewKvRow { parent_id: id,
                                                                        monitoring_key: key,
                                                                        monitoring_value: value })
                                         .collect();
    diesel::insert_into(kv::kv_delivery_monitoring).values(&rows).execute(conn)?;
    Ok(())
}

/// Convierte la fila JSON de la tabla principal en un registro. Números y
/// booleanos pasan a texto; los NULL se omiten.
fn record_from_json(schema: &TableSchema, data: Value) -> Result<MonitoringRecord, PersistenceError> {
    let map = match data {
        Value::Object(map) => map,
        other => return Err(PersistenceError::RowShape(format!("expected JSON object, got {other}"))),
    };
    let mut id = None;
    let mut record = MonitoringRecord::new(String::new());
    for (column, value) in map {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s,
            other => other.to_string(),
        };
        if column == schema.id_column() {
            id = Some(text.parse::<i64>()
                          .map_err(|e| PersistenceError::RowShape(format!("id '{text}': {e}")))?);
        } else if column == schema.natural_key_column() {
            record.delivery_execution_id = text;
        } else {
            record.attributes.insert(column, text);
        }
    }
    record.id = Some(id.ok_or_else(|| PersistenceError::RowShape(format!("row without '{}'", schema.id_column())))?);
    Ok(record)
}

/// Almacén Postgres de registros de monitoreo.
pub struct PgMonitoringStore<P: ConnectionProvider> {
    provider: P,
    schema: Arc<TableSchema>,
    validator: Box<dyn RecordValidator>,
}

impl<P: ConnectionProvider> PgMonitoringStore<P> {
    pub fn new(provider: P, schema: Arc<TableSchema>) -> Self {
        Self { provider, schema, validator: Box::new(NonEmptyNaturalKey) }
    }

    /// Construye el almacén descubriendo las columnas fijas de
    /// `delivery_monitoring` en la base.
    pub fn introspected(provider: P, introspector: &SchemaIntrospector) -> Result<Self, PersistenceError> {
        let schema = introspector.introspect(&provider, "delivery_monitoring")?;
        Ok(Self::new(provider, schema))
    }

    pub fn with_validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(&self.schema)
    }

    /// Adjunta los atributos dinámicos de todos los registros con una sola
    /// consulta.
    fn attach_dynamic(&self, records: &mut [MonitoringRecord]) -> Result<(), PersistenceError> {
        use kv_delivery_monitoring::dsl as kv;
        let ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let rows: Vec<KvRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            kv::kv_delivery_monitoring.filter(kv::parent_id.eq_any(ids.clone()))
                                      .select((kv::parent_id, kv::monitoring_key, kv::monitoring_value))
                                      .load::<KvRow>(&mut conn)
                                      .map_err(PersistenceError::from)
        })?;
        let mut by_parent: BTreeMap<i64, Vec<KvRow>> = BTreeMap::new();
        for row in rows {
            by_parent.entry(row.parent_id).or_default().push(row);
        }
        for record in records.iter_mut() {
            let Some(kv_rows) = record.id.and_then(|id| by_parent.remove(&id)) else {
                continue;
            };
            for row in kv_rows {
                if let Some(value) = row.monitoring_value {
                    record.attributes.insert(row.monitoring_key, value);
                }
            }
        }
        Ok(())
    }
}

impl<P: ConnectionProvider> MonitoringStore for PgMonitoringStore<P> {
    type Error = PersistenceError;

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn find(&self,
            criteria: &Criteria,
            options: &FindOptions,
            together: bool)
            -> Result<Vec<MonitoringRecord>, PersistenceError> {
        let compiled = self.compiler().find(criteria, options)?;
        debug!("find:sql {} binds={}", compiled.sql, compiled.binds.len());
        let rows: Vec<JsonRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            boxed_query(&compiled).load(&mut conn).map_err(PersistenceError::from)
        })?;
        let mut records = rows.into_iter()
                              .map(|row| record_from_json(&self.schema, row.data))
                              .collect::<Result<Vec<_>, _>>()?;
        if together {
            self.attach_dynamic(&mut records)?;
        }
        debug!("find:done count={} together={together}", records.len());
        Ok(records)
    }

    fn count(&self, criteria: &Criteria) -> Result<u64, PersistenceError> {
        let compiled = self.compiler().count(criteria);
        let row: CountRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            boxed_query(&compiled).get_result(&mut conn).map_err(PersistenceError::from)
        })?;
        Ok(row.count.max(0) as u64)
    }

    fn save(&self, record: &mut MonitoringRecord) -> Result<bool, PersistenceError> {
        if let Err(problems) = self.validator.validate(record) {
            warn!("save rejected: de={} problems={problems:?}", record.delivery_execution_id);
            return Ok(false);
        }
        let natural_key = record.delivery_execution_id.as_str();
        let classified = self.schema.classify(&record.attributes);
        let compiler = self.compiler();
        let lookup = compiler.lookup_id(natural_key);
        let insert = compiler.insert(natural_key, &classified.fixed);
        let update = compiler.update(natural_key, &classified.fixed);

        // Some(id) si la fila principal quedó escrita (insert o update).
        let written: Option<i64> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx_conn| {
                                                     lock_natural_key(tx_conn, natural_key)?;
                                                     let id = match lookup_id(tx_conn, &lookup)? {
                                                         Some(id) => {
                                                             if let Some(update) = &update {
                                                                 boxed_query(update).execute(tx_conn)?;
                                                             }
                                                             id
                                                         }
                                                         None => {
                                                             let inserted: Vec<IdRow> =
                                                                 boxed_query(&insert).load(tx_conn)?;
                                                             match inserted.as_slice() {
                                                                 [row] => row.id,
                                                                 _ => return Ok(None),
                                                             }
                                                         }
                                                     };
                                                     replace_dynamic(tx_conn, id, &classified.dynamic)?;
                                                     Ok::<_, PersistenceError>(Some(id))
                                                 })
        })?;
        debug!("save: de={} id={written:?}", record.delivery_execution_id);
        match written {
            Some(id) => {
                record.id = Some(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, record: &mut MonitoringRecord) -> Result<bool, PersistenceError> {
        use kv_delivery_monitoring::dsl as kv;
        let natural_key = record.delivery_execution_id.as_str();
        let compiler = self.compiler();
        let lookup = compiler.lookup_id(natural_key);
        let delete = compiler.delete(natural_key);
        let removed: bool = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx_conn| {
                                                     lock_natural_key(tx_conn, natural_key)?;
                                                     let Some(id) = lookup_id(tx_conn, &lookup)? else {
                                                         return Ok(false);
                                                     };
                                                     diesel::delete(kv::kv_delivery_monitoring.filter(kv::parent_id.eq(id)))
                                                         .execute(tx_conn)?;
                                                     let affected = boxed_query(&delete).execute(tx_conn)?;
                                                     Ok::<_, PersistenceError>(affected == 1)
                                                 })
        })?;
        debug!("delete: de={} removed={removed}", record.delivery_execution_id);
        if removed {
            record.id = None;
        }
        Ok(removed)
    }
}

/// Construye un pool y corre las migraciones pendientes.
///
/// `min_size`/`max_size` en 0 se elevan a 1; si `min > max` se usa `max`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    build_pool_with_timeout(database_url, min_size, max_size, Duration::from_secs(30))
}

pub fn build_pool_with_timeout(database_url: &str,
                               min_size: u32,
                               max_size: u32,
                               connect_timeout: Duration)
                               -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .connection_timeout(connect_timeout)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_pool_from_config(cfg: &DbConfig) -> Result<PgPool, PersistenceError> {
    build_pool_with_timeout(&cfg.url, cfg.min_connections, cfg.max_connections, cfg.connect_timeout)
}

/// Carga `.env`, lee la configuración y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = DbConfig::from_env()?;
    build_pool_from_config(&cfg)
}
