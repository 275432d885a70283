//! Tablas Diesel de las consultas tipadas. La tabla principal se maneja con
//! SQL dinámico (`pg::compiler`) porque sus columnas fijas se descubren por
//! introspección.

diesel::table! {
    kv_delivery_monitoring (parent_id, monitoring_key) {
        parent_id -> BigInt,
        monitoring_key -> Text,
        monitoring_value -> Nullable<Text>,
    }
}
