//! Descriptor inmutable del esquema de la tabla principal.
//!
//! Sustituye a la introspección "en caliente": el almacén recibe en su
//! construcción un `TableSchema` con el conjunto ordenado de columnas fijas,
//! de modo que la clasificación fijo/dinámico sea determinista y testeable
//! sin base de datos. El backend Postgres lo construye por introspección
//! (`information_schema.columns`) una única vez.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::MonitoringError;
use crate::record::columns;

/// Clase de tipo de una columna fija. Determina cómo se castean los valores
/// (siempre transportados como texto) al comparar y escribir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Other,
}

impl ColumnKind {
    /// Mapea `information_schema.columns.data_type` a una clase.
    pub fn from_sql_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" | "name" => Self::Text,
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => Self::Integer,
            "real" | "double precision" | "numeric" | "decimal" | "float4" | "float8" => Self::Float,
            "boolean" | "bool" => Self::Boolean,
            "timestamp with time zone" | "timestamp without time zone" | "timestamptz" | "timestamp" | "date" => {
                Self::Timestamp
            }
            _ => Self::Other,
        }
    }

    /// `true` si las comparaciones deben ser numéricas.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// Valor numérico finito de un literal de criterio. Un literal que no pasa
/// este filtro se compara como texto aun contra columnas numéricas.
pub fn parse_numeric(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Atributos de un registro partidos según el esquema.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClassifiedAttributes<'a> {
    pub fixed: BTreeMap<&'a str, &'a str>,
    pub dynamic: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    id_column: String,
    natural_key_column: String,
    columns: IndexMap<String, ColumnKind>,
}

impl TableSchema {
    pub fn builder(table: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder { table: table.into(),
                             id_column: columns::ID.to_string(),
                             natural_key_column: columns::DELIVERY_EXECUTION_ID.to_string(),
                             columns: IndexMap::new() }
    }

    /// Esquema de `delivery_monitoring` tal como lo crean las migraciones.
    /// Útil para el backend en memoria y para tests.
    pub fn delivery_monitoring() -> Self {
        use ColumnKind::*;
        let cols = [(columns::ID, Integer),
                    (columns::DELIVERY_EXECUTION_ID, Text),
                    (columns::STATUS, Text),
                    (columns::CURRENT_ASSESSMENT_ITEM, Text),
                    (columns::TEST_TAKER, Text),
                    (columns::TEST_TAKER_FIRST_NAME, Text),
                    (columns::TEST_TAKER_LAST_NAME, Text),
                    (columns::AUTHORIZED_BY, Text),
                    (columns::DELIVERY_ID, Text),
                    (columns::START_TIME, Integer),
                    (columns::END_TIME, Integer),
                    (columns::REMAINING_TIME, Integer),
                    (columns::EXTRA_TIME, Float),
                    (columns::CONSUMED_EXTRA_TIME, Float),
                    (columns::LAST_TEST_TAKER_ACTIVITY, Integer)];
        let mut builder = Self::builder("delivery_monitoring");
        for (name, kind) in cols {
            builder = builder.column(name, kind);
        }
        Self { table: builder.table,
               id_column: builder.id_column,
               natural_key_column: builder.natural_key_column,
               columns: builder.columns }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn natural_key_column(&self) -> &str {
        &self.natural_key_column
    }

    pub fn is_fixed(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }

    pub fn kind_of(&self, key: &str) -> Option<ColumnKind> {
        self.columns.get(key).copied()
    }

    /// Columnas en el orden reportado por el motor.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Columnas fijas escribibles por `save`: todas salvo la clave subrogada
    /// y la clave natural.
    pub fn writable_columns(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.columns().filter(move |(name, _)| *name != self.id_column && *name != self.natural_key_column)
    }

    /// Separa atributos en fijos y dinámicos. Las claves que coinciden con la
    /// clave subrogada o la natural se ignoran: esos valores viajan en los
    /// campos propios del registro.
    pub fn classify<'a>(&self, attributes: &'a BTreeMap<String, String>) -> ClassifiedAttributes<'a> {
        let mut out = ClassifiedAttributes::default();
        for (key, value) in attributes {
            if *key == self.id_column || *key == self.natural_key_column {
                continue;
            }
            if self.is_fixed(key) {
                out.fixed.insert(key.as_str(), value.as_str());
            } else {
                out.dynamic.insert(key.as_str(), value.as_str());
            }
        }
        out
    }
}

pub struct TableSchemaBuilder {
    table: String,
    id_column: String,
    natural_key_column: String,
    columns: IndexMap<String, ColumnKind>,
}

impl TableSchemaBuilder {
    pub fn id_column(mut self, name: impl Into<String>) -> Self {
        self.id_column = name.into();
        self
    }

    pub fn natural_key_column(mut self, name: impl Into<String>) -> Self {
        self.natural_key_column = name.into();
        self
    }

    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.insert(name.into(), kind);
        self
    }

    /// Valida que la clave subrogada y la natural formen parte del esquema.
    pub fn build(self) -> Result<TableSchema, MonitoringError> {
        if self.columns.is_empty() {
            return Err(MonitoringError::Schema(format!("table '{}' has no columns", self.table)));
        }
        for required in [&self.id_column, &self.natural_key_column] {
            if !self.columns.contains_key(required.as_str()) {
                return Err(MonitoringError::Schema(format!("table '{}' lacks column '{}'", self.table, required)));
            }
        }
        Ok(TableSchema { table: self.table,
                         id_column: self.id_column,
                         natural_key_column: self.natural_key_column,
                         columns: self.columns })
    }
}
