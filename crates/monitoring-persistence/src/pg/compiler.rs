//! Compilador de `Criteria` y de las escrituras de `save`/`delete` a SQL
//! parametrizado.
//!
//! Todos los valores viajan como texto (`Nullable<Text>`) y se castean en el
//! SQL según la clase de la columna fija (`ColumnKind`). En las escrituras el
//! cast es al tipo de la columna; en las comparaciones contra columnas
//! numéricas el literal se castea a `NUMERIC` (`start_time > '1000.5'`) y,
//! si no es numérico, la columna se compara como texto.
//!
//! Forma de la consulta de `find`:
//!
//! ```sql
//! SELECT to_jsonb(t) AS data FROM "delivery_monitoring" t
//! WHERE t."id" IN (
//!     SELECT p."id" FROM "delivery_monitoring" p
//!     LEFT JOIN kv_delivery_monitoring kv0
//!         ON kv0.parent_id = p."id" AND kv0.monitoring_key = $1
//!     WHERE (p."status" = $2 AND kv0.monitoring_value > $3)
//! )
//! ORDER BY t."id" ASC LIMIT 10 OFFSET 0
//! ```
//!
//! Cada clave dinámica distinta referenciada obtiene su propio LEFT JOIN
//! restringido a esa clave: un registro sin fila para la clave ve `NULL` y
//! no satisface ninguna comparación, y varias claves dinámicas pueden
//! combinarse con AND. El `IN (subconsulta)` garantiza filas principales
//! distintas.

use std::collections::BTreeMap;

use monitoring_core::{parse_numeric, ColumnKind, Criteria, FindOptions, MonitoringError, Operator, TableSchema};

/// Tabla secundaria clave/valor.
pub const KV_TABLE: &str = "kv_delivery_monitoring";

/// Particularidades de sintaxis del motor.
pub trait SqlDialect {
    fn quote_ident(&self, ident: &str) -> String;
    fn placeholder(&self, index: usize) -> String;
    fn limit_offset(&self, limit: Option<u64>, offset: u64) -> String;
    /// Expresión que convierte un parámetro de texto al tipo de la columna.
    fn cast_param(&self, placeholder: &str, kind: ColumnKind) -> String;
    /// Parámetro como decimal exacto, para comparar contra cualquier columna
    /// numérica.
    fn numeric_param(&self, placeholder: &str) -> String;
    /// Expresión de texto de una columna (para `LIKE` sobre no-texto).
    fn as_text(&self, column_expr: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn limit_offset(&self, limit: Option<u64>, offset: u64) -> String {
        match limit {
            Some(l) => format!(" LIMIT {l} OFFSET {offset}"),
            None => format!(" OFFSET {offset}"),
        }
    }

    fn cast_param(&self, placeholder: &str, kind: ColumnKind) -> String {
        match kind {
            ColumnKind::Text | ColumnKind::Other => placeholder.to_string(),
            ColumnKind::Integer => format!("CAST({placeholder} AS BIGINT)"),
            ColumnKind::Float => format!("CAST({placeholder} AS DOUBLE PRECISION)"),
            ColumnKind::Boolean => format!("CAST({placeholder} AS BOOLEAN)"),
            ColumnKind::Timestamp => format!("CAST({placeholder} AS TIMESTAMPTZ)"),
        }
    }

    fn numeric_param(&self, placeholder: &str) -> String {
        format!("CAST({placeholder} AS NUMERIC)")
    }

    fn as_text(&self, column_expr: &str) -> String {
        format!("CAST({column_expr} AS TEXT)")
    }
}

/// SQL listo para ejecutar: texto + parámetros posicionales (`$1..$n`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSql {
    pub sql: String,
    pub binds: Vec<Option<String>>,
}

pub struct QueryCompiler<'a, D: SqlDialect = Postgres> {
    schema: &'a TableSchema,
    dialect: D,
}

impl<'a> QueryCompiler<'a, Postgres> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema, dialect: Postgres }
    }
}

impl<'a, D: SqlDialect> QueryCompiler<'a, D> {
    pub fn with_dialect(schema: &'a TableSchema, dialect: D) -> Self {
        Self { schema, dialect }
    }

    fn table(&self) -> String {
        self.dialect.quote_ident(self.schema.table())
    }

    fn col(&self, alias: &str, column: &str) -> String {
        format!("{alias}.{}", self.dialect.quote_ident(column))
    }

    fn id_as_bigint(&self, alias: &str) -> String {
        format!("CAST({} AS BIGINT)", self.col(alias, self.schema.id_column()))
    }

    /// Subconsulta de ids que cumplen el criterio. Devuelve el texto y
    /// acumula los parámetros en `params`.
    fn matching_ids(&self, criteria: &Criteria, params: &mut Params<'_, D>) -> String {
        let mut joins = Joins::default();
        let predicate = self.predicate(criteria, params, &mut joins);
        let id = self.col("p", self.schema.id_column());
        let join_sql: String = joins.aliases
                                    .iter()
                                    .map(|(alias, ph)| {
                                        format!(" LEFT JOIN {KV_TABLE} {alias} ON {alias}.parent_id = {id} AND {alias}.monitoring_key = {ph}")
                                    })
                                    .collect();
        format!("SELECT {id} FROM {} p{join_sql} WHERE {predicate}", self.table())
    }

    fn predicate(&self, criteria: &Criteria, params: &mut Params<'_, D>, joins: &mut Joins) -> String {
        match criteria {
            Criteria::And(items) => self.connective(items, "AND", "TRUE", params, joins),
            Criteria::Or(items) => self.connective(items, "OR", "FALSE", params, joins),
            Criteria::Compare { key, op, value } => match self.schema.kind_of(key) {
                Some(kind) => self.fixed_compare(key, kind, *op, value.as_deref(), params),
                None => {
                    let alias = joins.alias_for(key, params);
                    let column = format!("{alias}.monitoring_value");
                    compare_sql(&column, &column, *op, value.as_deref(), |ph| ph.to_string(), params)
                }
            },
        }
    }

    fn connective(&self,
                  items: &[Criteria],
                  joiner: &str,
                  empty: &str,
                  params: &mut Params<'_, D>,
                  joins: &mut Joins)
                  -> String {
        if items.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = items.iter().map(|c| self.predicate(c, params, joins)).collect();
        format!("({})", parts.join(&format!(" {joiner} ")))
    }

    fn fixed_compare(&self, key: &str, kind: ColumnKind, op: Operator, value: Option<&str>, params: &mut Params<'_, D>) -> String {
        let column = self.col("p", key);
        let text_column = match kind {
            ColumnKind::Text => column.clone(),
            _ => self.dialect.as_text(&column),
        };
        match kind {
            ColumnKind::Integer | ColumnKind::Float => match value.map(parse_numeric) {
                Some(None) => compare_sql(&text_column, &text_column, op, value, |ph| ph.to_string(), params),
                _ => compare_sql(&column, &text_column, op, value, |ph| self.dialect.numeric_param(ph), params),
            },
            ColumnKind::Other => compare_sql(&text_column, &text_column, op, value, |ph| ph.to_string(), params),
            _ => compare_sql(&column, &text_column, op, value, |ph| self.dialect.cast_param(ph, kind), params),
        }
    }

    pub fn find(&self, criteria: &Criteria, options: &FindOptions) -> Result<CompiledSql, MonitoringError> {
        let order = options.order_items(self.schema)?;
        let mut params = Params::new(&self.dialect);
        let ids = self.matching_ids(criteria, &mut params);
        let order_sql = order.iter()
                             .map(|item| {
                                 format!("{} {}", self.col("t", &item.column), if item.descending { "DESC" } else { "ASC" })
                             })
                             .chain(order.iter()
                                         .all(|item| item.column != self.schema.id_column())
                                         .then(|| format!("{} ASC", self.col("t", self.schema.id_column()))))
                             .collect::<Vec<_>>()
                             .join(", ");
        let sql = format!("SELECT to_jsonb(t) AS data FROM {} t WHERE {} IN ({ids}) ORDER BY {order_sql}{}",
                          self.table(),
                          self.col("t", self.schema.id_column()),
                          self.dialect.limit_offset(options.limit, options.offset));
        Ok(CompiledSql { sql, binds: params.binds })
    }

    pub fn count(&self, criteria: &Criteria) -> CompiledSql {
        let mut params = Params::new(&self.dialect);
        let ids = self.matching_ids(criteria, &mut params);
        let sql = format!("SELECT COUNT(*) AS count FROM {} t WHERE {} IN ({ids})",
                          self.table(),
                          self.col("t", self.schema.id_column()));
        CompiledSql { sql, binds: params.binds }
    }

    /// Busca la clave subrogada por clave natural.
    pub fn lookup_id(&self, natural_key: &str) -> CompiledSql {
        let mut params = Params::new(&self.dialect);
        let ph = params.push(Some(natural_key.to_string()));
        let sql = format!("SELECT {} AS id FROM {} t WHERE {} = {ph}",
                          self.id_as_bigint("t"),
                          self.table(),
                          self.col("t", self.schema.natural_key_column()));
        CompiledSql { sql, binds: params.binds }
    }

    /// INSERT de la clave natural y de los atributos fijos presentes (en el
    /// orden del esquema), devolviendo la clave subrogada.
    pub fn insert(&self, natural_key: &str, fixed: &BTreeMap<&str, &str>) -> CompiledSql {
        let mut params = Params::new(&self.dialect);
        let mut columns = vec![self.dialect.quote_ident(self.schema.natural_key_column())];
        let mut values = vec![params.push(Some(natural_key.to_string()))];
        for (name, kind) in self.schema.writable_columns() {
            if let Some(value) = fixed.get(name) {
                columns.push(self.dialect.quote_ident(name));
                let ph = params.push(Some(value.to_string()));
                values.push(self.dialect.cast_param(&ph, kind));
            }
        }
        let sql = format!("INSERT INTO {} ({}) VALUES ({}) RETURNING CAST({} AS BIGINT) AS id",
                          self.table(),
                          columns.join(", "),
                          values.join(", "),
                          self.dialect.quote_ident(self.schema.id_column()));
        CompiledSql { sql, binds: params.binds }
    }

    /// UPDATE de todas las columnas fijas escribibles (las ausentes pasan a
    /// NULL) por clave natural. `None` si el esquema no tiene columnas
    /// escribibles.
    pub fn update(&self, natural_key: &str, fixed: &BTreeMap<&str, &str>) -> Option<CompiledSql> {
        let mut params = Params::new(&self.dialect);
        let key_ph = params.push(Some(natural_key.to_string()));
        let assignments: Vec<String> = self.schema
                                           .writable_columns()
                                           .map(|(name, kind)| {
                                               let ph = params.push(fixed.get(name).map(|v| v.to_string()));
                                               format!("{} = {}", self.dialect.quote_ident(name), self.dialect.cast_param(&ph, kind))
                                           })
                                           .collect();
        if assignments.is_empty() {
            return None;
        }
        let sql = format!("UPDATE {} SET {} WHERE {} = {key_ph}",
                          self.table(),
                          assignments.join(", "),
                          self.dialect.quote_ident(self.schema.natural_key_column()));
        Some(CompiledSql { sql, binds: params.binds })
    }

    pub fn delete(&self, natural_key: &str) -> CompiledSql {
        let mut params = Params::new(&self.dialect);
        let ph = params.push(Some(natural_key.to_string()));
        let sql = format!("DELETE FROM {} WHERE {} = {ph}",
                          self.table(),
                          self.dialect.quote_ident(self.schema.natural_key_column()));
        CompiledSql { sql, binds: params.binds }
    }
}

struct Params<'d, D: SqlDialect> {
    dialect: &'d D,
    binds: Vec<Option<String>>,
}

impl<'d, D: SqlDialect> Params<'d, D> {
    fn new(dialect: &'d D) -> Self {
        Self { dialect, binds: Vec::new() }
    }

    fn push(&mut self, value: Option<String>) -> String {
        self.binds.push(value);
        self.dialect.placeholder(self.binds.len())
    }
}

/// Alias de LEFT JOIN por clave dinámica: (alias, placeholder de la clave).
#[derive(Default)]
struct Joins {
    keys: BTreeMap<String, usize>,
    aliases: Vec<(String, String)>,
}

impl Joins {
    fn alias_for<D: SqlDialect>(&mut self, key: &str, params: &mut Params<'_, D>) -> String {
        if let Some(idx) = self.keys.get(key) {
            return self.aliases[*idx].0.clone();
        }
        let alias = format!("kv{}", self.aliases.len());
        let ph = params.push(Some(key.to_string()));
        self.keys.insert(key.to_string(), self.aliases.len());
        self.aliases.push((alias.clone(), ph));
        alias
    }
}

/// Comparación genérica. `column` se usa para operadores relacionales,
/// `text_column` para LIKE; `cast` adapta el placeholder al tipo.
fn compare_sql<D: SqlDialect>(column: &str,
                              text_column: &str,
                              op: Operator,
                              value: Option<&str>,
                              cast: impl Fn(&str) -> String,
                              params: &mut Params<'_, D>)
                              -> String {
    let Some(value) = value else {
        return match op {
            Operator::Eq | Operator::Like => format!("{column} IS NULL"),
            Operator::NotEq | Operator::NotLike => format!("{column} IS NOT NULL"),
            _ => "FALSE".to_string(),
        };
    };
    let ph = params.push(Some(value.to_string()));
    match op {
        Operator::Like | Operator::NotLike => format!("{text_column} {} {ph}", op.as_sql()),
        _ => format!("{column} {} {}", op.as_sql(), cast(&ph)),
    }
}
