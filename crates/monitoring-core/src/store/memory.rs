use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use super::eval::{compare_nullable, matches, RowView};
use super::MonitoringStore;
use crate::criteria::Criteria;
use crate::errors::MonitoringError;
use crate::options::FindOptions;
use crate::record::MonitoringRecord;
use crate::schema::{ColumnKind, TableSchema};
use crate::validation::{NonEmptyNaturalKey, RecordValidator};

#[derive(Debug, Clone)]
struct PrimaryRow {
    delivery_execution_id: String,
    fixed: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    primary: BTreeMap<i64, PrimaryRow>,
    /// Tabla secundaria: parent_id -> (clave -> valor).
    kv: BTreeMap<i64, BTreeMap<String, String>>,
}

impl State {
    fn id_of(&self, delivery_execution_id: &str) -> Option<i64> {
        self.primary.iter().find(|(_, row)| row.delivery_execution_id == delivery_execution_id).map(|(id, _)| *id)
    }
}

/// Backend en memoria con la misma semántica que el backend Postgres.
///
/// Mantiene dos "tablas" (principal + clave/valor) bajo un único `Mutex`,
/// por lo que `save` y `delete` son atómicos frente a otros llamadores.
pub struct InMemoryMonitoringStore {
    schema: Arc<TableSchema>,
    validator: Box<dyn RecordValidator>,
    state: Mutex<State>,
}

impl Default for InMemoryMonitoringStore {
    fn default() -> Self {
        Self::new(TableSchema::delivery_monitoring())
    }
}

impl InMemoryMonitoringStore {
    pub fn new(schema: TableSchema) -> Self {
        Self { schema: Arc::new(schema),
               validator: Box::new(NonEmptyNaturalKey),
               state: Mutex::new(State { next_id: 1, ..State::default() }) }
    }

    pub fn with_validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Número de filas secundarias de un registro (diagnóstico/tests).
    pub fn kv_rows_of(&self, id: i64) -> Result<usize, MonitoringError> {
        Ok(self.lock()?.kv.get(&id).map(BTreeMap::len).unwrap_or(0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, MonitoringError> {
        self.state.lock().map_err(|_| MonitoringError::Storage("in-memory state poisoned".into()))
    }

    fn matching_ids(&self, state: &State, criteria: &Criteria) -> Vec<i64> {
        state.primary
             .iter()
             .filter(|(id, row)| {
                 let view = RowView { id: **id,
                                      natural_key: &row.delivery_execution_id,
                                      fixed: &row.fixed,
                                      dynamic: state.kv.get(id) };
                 matches(criteria, &self.schema, &view)
             })
             .map(|(id, _)| *id)
             .collect()
    }
}

impl MonitoringStore for InMemoryMonitoringStore {
    type Error = MonitoringError;

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn find(&self,
            criteria: &Criteria,
            options: &FindOptions,
            together: bool)
            -> Result<Vec<MonitoringRecord>, MonitoringError> {
        let order = options.order_items(&self.schema)?;
        let state = self.lock()?;
        let mut ids = self.matching_ids(&state, criteria);
        ids.sort_by(|a, b| {
               let (ra, rb) = (&state.primary[a], &state.primary[b]);
               for item in &order {
                   let kind = self.schema.kind_of(&item.column).unwrap_or(ColumnKind::Text);
                   let va = RowView { id: *a, natural_key: &ra.delivery_execution_id, fixed: &ra.fixed, dynamic: None }
                       .fixed_value(&self.schema, &item.column);
                   let vb = RowView { id: *b, natural_key: &rb.delivery_execution_id, fixed: &rb.fixed, dynamic: None }
                       .fixed_value(&self.schema, &item.column);
                   let mut ord = compare_nullable(kind, va.as_deref(), vb.as_deref());
                   if item.descending {
                       ord = ord.reverse();
                   }
                   if ord.is_ne() {
                       return ord;
                   }
               }
               a.cmp(b)
           });
        let records: Vec<MonitoringRecord> =
            ids.into_iter()
               .skip(options.offset as usize)
               .take(options.limit.map(|l| l as usize).unwrap_or(usize::MAX))
               .map(|id| {
                   let row = &state.primary[&id];
                   let mut attributes = row.fixed.clone();
                   if together {
                       if let Some(kv) = state.kv.get(&id) {
                           attributes.extend(kv.iter().map(|(k, v)| (k.clone(), v.clone())));
                       }
                   }
                   MonitoringRecord { id: Some(id), delivery_execution_id: row.delivery_execution_id.clone(), attributes }
               })
               .collect();
        debug!("memory find: count={} together={together}", records.len());
        Ok(records)
    }

    fn count(&self, criteria: &Criteria) -> Result<u64, MonitoringError> {
        let state = self.lock()?;
        Ok(self.matching_ids(&state, criteria).len() as u64)
    }

    fn save(&self, record: &mut MonitoringRecord) -> Result<bool, MonitoringError> {
        if let Err(problems) = self.validator.validate(record) {
            debug!("memory save rejected: de={} problems={problems:?}", record.delivery_execution_id);
            return Ok(false);
        }
        let classified = self.schema.classify(&record.attributes);
        let fixed: BTreeMap<String, String> =
            classified.fixed.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let dynamic: BTreeMap<String, String> =
            classified.dynamic.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let mut state = self.lock()?;
        let id = match state.id_of(&record.delivery_execution_id) {
            Some(id) => {
                if let Some(row) = state.primary.get_mut(&id) {
                    row.fixed = fixed;
                }
                id
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.primary.insert(id, PrimaryRow { delivery_execution_id: record.delivery_execution_id.clone(), fixed });
                id
            }
        };
        if dynamic.is_empty() {
            state.kv.remove(&id);
        } else {
            state.kv.insert(id, dynamic);
        }
        record.id = Some(id);
        Ok(true)
    }

    fn delete(&self, record: &mut MonitoringRecord) -> Result<bool, MonitoringError> {
        let mut state = self.lock()?;
        let Some(id) = state.id_of(&record.delivery_execution_id) else {
            return Ok(false);
        };
        state.kv.remove(&id);
        let removed = state.primary.remove(&id).is_some();
        if removed {
            record.id = None;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Operator;
    use serde_json::json;

    fn seeded() -> InMemoryMonitoringStore {
        let store = InMemoryMonitoringStore::default();
        let rows = [("de-1", "active", "500", "calc"),
                    ("de-2", "active", "1500", "none"),
                    ("de-3", "finished", "2500", "calc"),
                    ("de-4", "paused", "3500", "ruler")];
        for (de, status, start, tool) in rows {
            let mut r = MonitoringRecord::new(de).with("status", status).with("start_time", start).with("tool", tool);
            assert!(store.save(&mut r).expect("save"));
        }
        store
    }

    fn ids(records: &[MonitoringRecord]) -> Vec<&str> {
        records.iter().map(|r| r.delivery_execution_id.as_str()).collect()
    }

    #[test]
    fn save_assigns_ids_and_find_returns_fixed_only_by_default() {
        let store = seeded();
        let found = store.find(&Criteria::eq("delivery_execution_id", "de-2"), &FindOptions::default(), false)
                         .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(2));
        assert_eq!(found[0].get("status"), Some("active"));
        assert_eq!(found[0].get("tool"), None);
        let together = store.find_by_delivery_execution("de-2", true).expect("find").expect("present");
        assert_eq!(together.get("tool"), Some("none"));
    }

    #[test]
    fn implicit_and_versus_or() {
        let store = seeded();
        let and = Criteria::parse(&json!([{"status": "active"}, {"start_time": ">1000"}]));
        assert_eq!(ids(&store.find(&and, &FindOptions::default(), false).expect("find")), vec!["de-2"]);
        let or = Criteria::parse(&json!([{"status": "active"}, "OR", {"start_time": ">1000"}]));
        assert_eq!(ids(&store.find(&or, &FindOptions::default(), false).expect("find")),
                   vec!["de-1", "de-2", "de-3", "de-4"]);
    }

    #[test]
    fn dynamic_predicates_require_a_row() {
        let store = seeded();
        let mut bare = MonitoringRecord::new("de-5").with("status", "active");
        store.save(&mut bare).expect("save");
        for op in [Operator::Eq, Operator::NotEq, Operator::Lt, Operator::Gt, Operator::Like, Operator::NotLike] {
            let c = Criteria::compare("tool", op, "zzz");
            let found = store.find(&c, &FindOptions::default(), false).expect("find");
            assert!(!ids(&found).contains(&"de-5"), "op={op:?}");
        }
        let absent = store.find(&Criteria::is_null("tool"), &FindOptions::default(), false).expect("find");
        assert_eq!(ids(&absent), vec!["de-5"]);
    }

    #[test]
    fn order_offset_limit() {
        let store = seeded();
        let opts = FindOptions::default().order("start_time DESC").offset(1).limit(2);
        assert_eq!(ids(&store.find(&Criteria::all_records(), &opts, false).expect("find")), vec!["de-3", "de-2"]);
        let bad = FindOptions::default().order("tool");
        assert!(matches!(store.find(&Criteria::all_records(), &bad, false), Err(MonitoringError::InvalidOrder(_))));
    }

    #[test]
    fn update_rewrites_dynamic_attributes() {
        let store = seeded();
        let mut r = MonitoringRecord::new("de-1").with("status", "paused").with("bookmark", "q7");
        assert!(store.save(&mut r).expect("save"));
        assert_eq!(r.id, Some(1));
        let found = store.find_by_delivery_execution("de-1", true).expect("find").expect("present");
        assert_eq!(found.get("status"), Some("paused"));
        assert_eq!(found.get("bookmark"), Some("q7"));
        assert_eq!(found.get("tool"), None);
        assert_eq!(found.get("start_time"), None);
        assert_eq!(store.kv_rows_of(1).expect("kv"), 1);
    }

    #[test]
    fn invalid_records_are_not_written() {
        let store = InMemoryMonitoringStore::default();
        let mut r = MonitoringRecord::new("").with("status", "active");
        assert!(!store.save(&mut r).expect("save"));
        assert_eq!(r.id, None);
        assert_eq!(store.count(&Criteria::all_records()).expect("count"), 0);
    }

    #[test]
    fn delete_cascades_and_reports_absence() {
        let store = seeded();
        let mut never = MonitoringRecord::new("nope");
        assert!(!store.delete(&mut never).expect("delete"));
        let mut r = store.find_by_delivery_execution("de-3", true).expect("find").expect("present");
        assert!(store.delete(&mut r).expect("delete"));
        assert_eq!(r.id, None);
        assert_eq!(store.kv_rows_of(3).expect("kv"), 0);
        assert_eq!(store.count(&Criteria::all_records()).expect("count"), 3);
        assert!(!store.delete(&mut r).expect("delete twice"));
    }
}
