//! Parser de la gramática posicional heredada.
//!
//! Gramática (sobre `serde_json::Value`):
//! - `{"clave": "valor"}`: comparación; el operador puede ir embebido al
//!   inicio del valor (`">1000"`). Un objeto con varios pares es un AND.
//! - `"AND"` / `"OR"` (sin distinguir mayúsculas) entre dos hermanos.
//! - `[expr, expr, ...]`: lista implícitamente parentizada; entre hermanos
//!   sin operador explícito se asume AND. `[[...]]` equivale a `[...]`.
//!
//! Dentro de una lista AND liga más fuerte que OR (precedencia SQL):
//! `[a, "OR", b, c]` es `a OR (b AND c)`.
//!
//! Las formas no reconocidas no producen error: se descartan con un `warn!`
//! y el predicado resultante queda parcial o vacío.

use log::warn;
use serde_json::Value;

use super::types::{Criteria, Operator};

impl Criteria {
    /// Atajo de `parse_legacy`.
    pub fn parse(value: &Value) -> Criteria {
        parse_legacy(value)
    }
}

pub fn parse_legacy(value: &Value) -> Criteria {
    match value {
        Value::Array(items) => parse_list(items),
        Value::Object(_) => parse_object(value).unwrap_or_default(),
        Value::Null => Criteria::default(),
        other => {
            warn!("criteria: ignoring top-level {other}");
            Criteria::default()
        }
    }
}

fn parse_list(items: &[Value]) -> Criteria {
    if let [inner @ Value::Array(_)] = items {
        return parse_legacy(inner);
    }
    let mut groups: Vec<Vec<Criteria>> = Vec::new();
    let mut current: Vec<Criteria> = Vec::new();
    for item in items {
        match item {
            Value::String(token) if token.trim().eq_ignore_ascii_case("AND") => {}
            Value::String(token) if token.trim().eq_ignore_ascii_case("OR") => {
                groups.push(std::mem::take(&mut current));
            }
            Value::Array(_) | Value::Object(_) => {
                let parsed = match item {
                    Value::Array(sub) => Some(parse_list(sub)),
                    _ => parse_object(item),
                };
                match parsed {
                    Some(c) if !c.is_empty() => current.push(c),
                    _ => {}
                }
            }
            other => warn!("criteria: ignoring list element {other}"),
        }
    }
    groups.push(current);

    let mut alternatives: Vec<Criteria> = groups.into_iter()
                                                .filter(|g| !g.is_empty())
                                                .map(|mut g| if g.len() == 1 { g.remove(0) } else { Criteria::And(g) })
                                                .collect();
    match alternatives.len() {
        0 => Criteria::default(),
        1 => alternatives.remove(0),
        _ => Criteria::Or(alternatives),
    }
}

fn parse_object(value: &Value) -> Option<Criteria> {
    let map = value.as_object()?;
    let mut compares: Vec<Criteria> = map.iter().filter_map(|(key, v)| parse_pair(key, v)).collect();
    match compares.len() {
        0 => None,
        1 => Some(compares.remove(0)),
        _ => Some(Criteria::And(compares)),
    }
}

fn parse_pair(key: &str, value: &Value) -> Option<Criteria> {
    match value {
        Value::String(s) => Some(Criteria::from_encoded(key, s)),
        Value::Null => Some(Criteria::is_null(key)),
        Value::Number(n) => Some(Criteria::compare(key, Operator::Eq, n.to_string())),
        Value::Bool(b) => Some(Criteria::compare(key, Operator::Eq, b.to_string())),
        other => {
            warn!("criteria: ignoring non-scalar value for key '{key}': {other}");
            None
        }
    }
}
