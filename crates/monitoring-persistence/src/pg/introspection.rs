//! Descubrimiento de columnas fijas vía `information_schema.columns`.
//!
//! El resultado por tabla se cachea en un `DashMap` compartible entre hilos.
//! Dos llamadores que introspectan la misma tabla a la vez pueden consultar
//! ambos, pero el primero en insertar gana y ambos reciben el mismo `Arc`.

use std::sync::Arc;

use dashmap::DashMap;
use diesel::prelude::*;
use diesel::sql_types::Text;
use log::debug;
use monitoring_core::{ColumnKind, TableSchema};

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;

const COLUMNS_SQL: &str = "SELECT column_name::text AS column_name, data_type::text AS data_type \
                           FROM information_schema.columns \
                           WHERE table_schema = current_schema() AND table_name = $1 \
                           ORDER BY ordinal_position";

#[derive(QueryableByName, Debug)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
    #[diesel(sql_type = Text)]
    data_type: String,
}

#[derive(Debug, Default)]
pub struct SchemaIntrospector {
    cache: DashMap<String, Arc<TableSchema>>,
}

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Esquema de `table` (clave subrogada `id`, clave natural
    /// `delivery_execution_id`). Falla con `Schema` si la tabla no existe o
    /// carece de alguna de las dos claves.
    pub fn introspect<P: ConnectionProvider>(&self, provider: &P, table: &str) -> Result<Arc<TableSchema>, PersistenceError> {
        if let Some(hit) = self.cache.get(table) {
            return Ok(Arc::clone(hit.value()));
        }
        let rows: Vec<ColumnRow> = with_retry(|| {
            let mut conn = provider.connection()?;
            diesel::sql_query(COLUMNS_SQL).bind::<Text, _>(table.to_string())
                                          .load(&mut conn)
                                          .map_err(PersistenceError::from)
        })?;
        let schema = schema_from_columns(table, rows.iter().map(|r| (r.column_name.as_str(), r.data_type.as_str())))?;
        debug!("introspected table={table} columns={}", schema.columns().count());
        let cached = self.cache.entry(table.to_string()).or_insert_with(|| Arc::new(schema));
        Ok(Arc::clone(cached.value()))
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.len()
    }
}

/// Construye un `TableSchema` a partir de pares (columna, tipo SQL).
pub fn schema_from_columns<'a>(table: &str,
                               columns: impl IntoIterator<Item = (&'a str, &'a str)>)
                               -> Result<TableSchema, PersistenceError> {
    let mut builder = TableSchema::builder(table);
    for (name, data_type) in columns {
        builder = builder.column(name, ColumnKind::from_sql_type(data_type));
    }
    builder.build().map_err(|e| PersistenceError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_information_schema_types() {
        let schema = schema_from_columns("delivery_monitoring",
                                         [("id", "bigint"),
                                          ("delivery_execution_id", "text"),
                                          ("start_time", "bigint"),
                                          ("extra_time", "double precision"),
                                          ("meta", "jsonb")]).expect("schema");
        assert_eq!(schema.kind_of("start_time"), Some(ColumnKind::Integer));
        assert_eq!(schema.kind_of("extra_time"), Some(ColumnKind::Float));
        assert_eq!(schema.kind_of("meta"), Some(ColumnKind::Other));
        assert_eq!(schema.columns().map(|(n, _)| n).collect::<Vec<_>>(),
                   vec!["id", "delivery_execution_id", "start_time", "extra_time", "meta"]);
    }

    #[test]
    fn missing_table_is_a_schema_error() {
        let err = schema_from_columns("nope", std::iter::empty()).unwrap_err();
        assert!(matches!(err, PersistenceError::Schema(_)));
    }
}
