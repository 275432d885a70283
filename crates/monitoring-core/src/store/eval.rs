//! Evaluación de `Criteria` sobre filas en memoria, con la misma semántica
//! que el SQL compilado por el backend Postgres:
//! - columnas numéricas comparan como números si el literal es numérico,
//!   el resto como texto;
//! - un valor ausente (NULL) nunca satisface una comparación;
//! - un atributo dinámico sin fila nunca coincide, salvo en `IS NULL`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::criteria::{Criteria, Operator};
use crate::schema::{parse_numeric, ColumnKind, TableSchema};

pub(crate) struct RowView<'a> {
    pub id: i64,
    pub natural_key: &'a str,
    pub fixed: &'a BTreeMap<String, String>,
    pub dynamic: Option<&'a BTreeMap<String, String>>,
}

impl RowView<'_> {
    pub fn fixed_value(&self, schema: &TableSchema, key: &str) -> Option<String> {
        if key == schema.id_column() {
            Some(self.id.to_string())
        } else if key == schema.natural_key_column() {
            Some(self.natural_key.to_string())
        } else {
            self.fixed.get(key).cloned()
        }
    }
}

pub(crate) fn matches(criteria: &Criteria, schema: &TableSchema, row: &RowView<'_>) -> bool {
    match criteria {
        Criteria::And(items) => items.iter().all(|c| matches(c, schema, row)),
        Criteria::Or(items) => items.iter().any(|c| matches(c, schema, row)),
        Criteria::Compare { key, op, value } => {
            let (kind, actual) = match schema.kind_of(key) {
                Some(kind) => (kind, row.fixed_value(schema, key)),
                None => (ColumnKind::Text, row.dynamic.and_then(|d| d.get(key).cloned())),
            };
            compare(kind, actual.as_deref(), *op, value.as_deref())
        }
    }
}

fn compare(kind: ColumnKind, actual: Option<&str>, op: Operator, expected: Option<&str>) -> bool {
    let (actual, expected) = match (actual, expected) {
        (a, None) => {
            return match op {
                Operator::Eq | Operator::Like => a.is_none(),
                Operator::NotEq | Operator::NotLike => a.is_some(),
                _ => false,
            };
        }
        (None, Some(_)) => return false,
        (Some(a), Some(e)) => (a, e),
    };
    match op {
        Operator::Like => like_match(actual, expected),
        Operator::NotLike => !like_match(actual, expected),
        _ => {
            let ord = compare_scalars(kind, actual, expected);
            match op {
                Operator::Eq => ord == Ordering::Equal,
                Operator::NotEq => ord != Ordering::Equal,
                Operator::Lt => ord == Ordering::Less,
                Operator::Le => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                Operator::Ge => ord != Ordering::Less,
                Operator::Like | Operator::NotLike => false,
            }
        }
    }
}

pub(crate) fn compare_scalars(kind: ColumnKind, a: &str, b: &str) -> Ordering {
    if kind.is_numeric() {
        if let (Some(x), Some(y)) = (parse_numeric(a), parse_numeric(b)) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    a.cmp(b)
}

/// Orden de Postgres: NULL es mayor que cualquier valor (último en ASC,
/// primero en DESC).
pub(crate) fn compare_nullable(kind: ColumnKind, a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_scalars(kind, x, y),
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Tok {
    Any,
    One,
    Lit(char),
}

/// `LIKE` de SQL: `%` cualquier secuencia, `_` un carácter, `\` escapa.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '%' => Tok::Any,
            '_' => Tok::One,
            '\\' => Tok::Lit(chars.next().unwrap_or('\\')),
            other => Tok::Lit(other),
        });
    }
    let text: Vec<char> = text.chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < text.len() {
        match toks.get(pi) {
            Some(Tok::One) => {
                ti += 1;
                pi += 1;
            }
            Some(Tok::Lit(c)) if *c == text[ti] => {
                ti += 1;
                pi += 1;
            }
            Some(Tok::Any) => {
                backtrack = Some((pi, ti));
                pi += 1;
            }
            _ => match backtrack {
                Some((star, mark)) => {
                    pi = star + 1;
                    ti = mark + 1;
                    backtrack = Some((star, mark + 1));
                }
                None => return false,
            },
        }
    }
    toks[pi..].iter().all(|t| *t == Tok::Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards() {
        assert!(like_match("item-12", "item-%"));
        assert!(like_match("item-12", "%-1_"));
        assert!(like_match("abc", "%"));
        assert!(like_match("", "%"));
        assert!(!like_match("abc", "a_"));
        assert!(like_match("a%c", "a\\%c"));
        assert!(!like_match("abc", "a\\%c"));
        assert!(like_match("aXbXc", "a%b%c"));
        assert!(!like_match("acb", "a%bc"));
    }

    #[test]
    fn numeric_columns_compare_as_numbers() {
        assert_eq!(compare_scalars(ColumnKind::Integer, "900", "1000"), Ordering::Less);
        assert_eq!(compare_scalars(ColumnKind::Text, "900", "1000"), Ordering::Greater);
        assert_eq!(compare_scalars(ColumnKind::Integer, "1500", "1000.5"), Ordering::Greater);
        // literal no numérico: orden de texto
        assert_eq!(compare_scalars(ColumnKind::Integer, "1500", "abc"), Ordering::Less);
        assert!(!compare(ColumnKind::Integer, Some("1500"), Operator::Eq, Some("abc")));
    }

    #[test]
    fn null_semantics() {
        assert!(compare(ColumnKind::Text, None, Operator::Eq, None));
        assert!(!compare(ColumnKind::Text, Some("x"), Operator::Eq, None));
        assert!(compare(ColumnKind::Text, Some("x"), Operator::NotEq, None));
        assert!(!compare(ColumnKind::Text, None, Operator::NotEq, Some("x")));
        assert!(!compare(ColumnKind::Integer, None, Operator::Gt, None));
    }
}
