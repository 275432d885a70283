//! Opciones de `find`: orden, offset y límite.
//!
//! `order` se acepta como fragmento textual (`"start_time DESC, id"`) por
//! compatibilidad con los llamadores, pero se valida: sólo columnas fijas
//! del esquema con dirección opcional `ASC`/`DESC`. Nada de SQL crudo.

use serde::{Deserialize, Serialize};

use crate::errors::MonitoringError;
use crate::schema::TableSchema;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    pub order: Option<String>,
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resuelve el orden contra el esquema. Sin `order` (o vacío) ordena por
    /// la clave subrogada ascendente.
    pub fn order_items(&self, schema: &TableSchema) -> Result<Vec<OrderItem>, MonitoringError> {
        match self.order.as_deref().map(str::trim) {
            None | Some("") => Ok(vec![OrderItem { column: schema.id_column().to_string(), descending: false }]),
            Some(raw) => parse_order(raw, schema),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub column: String,
    pub descending: bool,
}

fn parse_order(raw: &str, schema: &TableSchema) -> Result<Vec<OrderItem>, MonitoringError> {
    raw.split(',')
       .map(|part| {
           let mut tokens = part.split_whitespace();
           let column = tokens.next().ok_or_else(|| MonitoringError::InvalidOrder(format!("empty item in '{raw}'")))?;
           let descending = match tokens.next() {
               None => false,
               Some(dir) if dir.eq_ignore_ascii_case("ASC") => false,
               Some(dir) if dir.eq_ignore_ascii_case("DESC") => true,
               Some(dir) => return Err(MonitoringError::InvalidOrder(format!("unknown direction '{dir}'"))),
           };
           if let Some(extra) = tokens.next() {
               return Err(MonitoringError::InvalidOrder(format!("unexpected token '{extra}'")));
           }
           if !schema.is_fixed(column) {
               return Err(MonitoringError::InvalidOrder(format!("'{column}' is not a column of {}", schema.table())));
           }
           Ok(OrderItem { column: column.to_string(), descending })
       })
       .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_is_id_ascending() {
        let schema = TableSchema::delivery_monitoring();
        let items = FindOptions::default().order_items(&schema).expect("order");
        assert_eq!(items, vec![OrderItem { column: "id".into(), descending: false }]);
        let items = FindOptions::default().order("  ").order_items(&schema).expect("order");
        assert_eq!(items[0].column, "id");
    }

    #[test]
    fn parses_multiple_items_with_directions() {
        let schema = TableSchema::delivery_monitoring();
        let items = FindOptions::default().order("start_time desc, id ASC").order_items(&schema).expect("order");
        assert_eq!(items,
                   vec![OrderItem { column: "start_time".into(), descending: true },
                        OrderItem { column: "id".into(), descending: false }]);
    }

    #[test]
    fn rejects_unknown_columns_and_injection() {
        let schema = TableSchema::delivery_monitoring();
        for bad in ["calculator", "id; DROP TABLE x", "id DESC NULLS", "id sideways", "id,,status"] {
            let res = FindOptions::default().order(bad).order_items(&schema);
            assert!(matches!(res, Err(MonitoringError::InvalidOrder(_))), "order={bad}");
        }
    }
}
