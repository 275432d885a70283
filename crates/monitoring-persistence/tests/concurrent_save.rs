use std::sync::{Arc, Barrier};
use std::thread;

use diesel::sql_types::Text;
use diesel::{QueryableByName, RunQueryDsl};
use monitoring_core::{Criteria, MonitoringRecord, MonitoringStore};
use monitoring_persistence::config::DbConfig;
use monitoring_persistence::pg::{build_pool_from_config, PgMonitoringStore, PoolProvider, SchemaIntrospector};
mod test_support;
use test_support::unique;

#[derive(QueryableByName)]
struct Count {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

// Varios hilos crean la misma clave natural a la vez: todos deben terminar
// con la misma clave subrogada y una sola fila principal.
#[test]
fn concurrent_creates_of_one_key_serialize() {
    let Ok(cfg) = DbConfig::from_env() else {
        eprintln!("skip (no DATABASE_URL)");
        return;
    };
    let threads: usize = std::env::var("STRESS_THREADS").ok()
                                                        .and_then(|v| v.parse().ok())
                                                        .unwrap_or(8);
    // una conexión por hilo para que compitan en la base, no en el pool
    let pool = build_pool_from_config(&DbConfig { min_connections: 1,
                                                  max_connections: threads as u32,
                                                  ..cfg }).expect("pool");
    let store = Arc::new(PgMonitoringStore::introspected(PoolProvider { pool: pool.clone() },
                                                         &SchemaIntrospector::new()).expect("introspect"));
    let key = unique("race");
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads).map(|i| {
                                          let store = Arc::clone(&store);
                                          let barrier = Arc::clone(&barrier);
                                          let key = key.clone();
                                          thread::spawn(move || {
                                              let mut record = MonitoringRecord::new(key).with("status", "active")
                                                                                          .with("tool", format!("t{i}"));
                                              barrier.wait();
                                              let saved = store.save(&mut record).map_err(|e| e.to_string());
                                              (saved, record.id)
                                          })
                                      })
                                      .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    for (saved, _) in &results {
        assert_eq!(saved, &Ok(true));
    }
    let first = results[0].1;
    assert!(first.is_some());
    assert!(results.iter().all(|(_, id)| *id == first), "ids: {:?}", results.iter().map(|r| r.1).collect::<Vec<_>>());

    assert_eq!(store.count(&Criteria::eq("delivery_execution_id", key.as_str())).expect("count"), 1);
    let mut conn = pool.get().expect("conn");
    let rows: Vec<Count> = diesel::sql_query("SELECT COUNT(*) AS count FROM delivery_monitoring WHERE delivery_execution_id = $1")
        .bind::<Text, _>(key.as_str())
        .load(&mut conn)
        .expect("raw count");
    assert_eq!(rows[0].count, 1);
    // el último en escribir deja exactamente su conjunto dinámico
    let found = store.find_by_delivery_execution(&key, true).expect("find").expect("present");
    assert!(found.get("tool").is_some_and(|t| t.starts_with('t')));
}
