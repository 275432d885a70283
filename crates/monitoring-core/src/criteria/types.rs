use serde::{Deserialize, Serialize};

/// Operadores relacionales soportados en una comparación.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }

    /// Extrae el operador codificado al inicio de un valor (convención
    /// heredada: `">1000"`, `"LIKE %abc%"`). Devuelve el operador y el resto
    /// del valor sin espacios iniciales; sin prefijo reconocido el operador
    /// es `=` y el valor queda intacto.
    ///
    /// Los operadores de palabra (`LIKE`, `NOT LIKE`) no distinguen
    /// mayúsculas y deben ir seguidos de espacio o del fin del valor, para no
    /// confundir valores como `"likeable"`.
    pub fn split_value(raw: &str) -> (Operator, &str) {
        const SYMBOLS: [(&str, Operator); 6] = [("<>", Operator::NotEq),
                                                ("<=", Operator::Le),
                                                (">=", Operator::Ge),
                                                ("<", Operator::Lt),
                                                (">", Operator::Gt),
                                                ("=", Operator::Eq)];
        for (token, op) in SYMBOLS {
            if let Some(rest) = raw.strip_prefix(token) {
                return (op, rest.trim_start());
            }
        }
        if let Some(rest) = strip_word(raw, "NOT") {
            if let Some(rest) = strip_word(rest, "LIKE") {
                return (Operator::NotLike, rest);
            }
        }
        if let Some(rest) = strip_word(raw, "LIKE") {
            return (Operator::Like, rest);
        }
        (Operator::Eq, raw)
    }
}

fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    let head = s.get(..word.len())?;
    if !head.eq_ignore_ascii_case(word) {
        return None;
    }
    let rest = &s[word.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() => Some(rest.trim_start()),
        Some(_) => None,
    }
}

/// Expresión booleana sobre atributos de monitoreo.
///
/// `Compare.value == None` representa un test de nulidad (`IS NULL` con
/// `Eq`/`Like`, `IS NOT NULL` con `NotEq`/`NotLike`; el resto nunca
/// coincide). `And(vec![])` coincide con todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criteria {
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Compare { key: String, op: Operator, value: Option<String> },
}

impl Default for Criteria {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Criteria {
    /// Criterio vacío: coincide con todos los registros.
    pub fn all_records() -> Self {
        Self::default()
    }

    pub fn compare(key: impl Into<String>, op: Operator, value: impl Into<String>) -> Self {
        Self::Compare { key: key.into(), op, value: Some(value.into()) }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(key, Operator::Eq, value)
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Self::Compare { key: key.into(), op: Operator::Eq, value: None }
    }

    pub fn is_not_null(key: impl Into<String>) -> Self {
        Self::Compare { key: key.into(), op: Operator::NotEq, value: None }
    }

    /// Construye una comparación a partir de un valor con operador embebido
    /// (`">1000"`).
    pub fn from_encoded(key: impl Into<String>, encoded: &str) -> Self {
        let (op, value) = Operator::split_value(encoded);
        Self::compare(key, op, value)
    }

    pub fn all<I: IntoIterator<Item = Criteria>>(items: I) -> Self {
        Self::And(items.into_iter().collect())
    }

    pub fn any<I: IntoIterator<Item = Criteria>>(items: I) -> Self {
        Self::Or(items.into_iter().collect())
    }

    pub fn and(self, other: Criteria) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Criteria) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// `true` si el criterio no restringe nada.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::And(items) if items.iter().all(Criteria::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_value_recognises_every_operator() {
        let cases = [("<>x", Operator::NotEq, "x"),
                     ("<=5", Operator::Le, "5"),
                     (">= 5", Operator::Ge, "5"),
                     ("<5", Operator::Lt, "5"),
                     (">1000", Operator::Gt, "1000"),
                     ("=a", Operator::Eq, "a"),
                     ("LIKE %abc%", Operator::Like, "%abc%"),
                     ("like %abc", Operator::Like, "%abc"),
                     ("NOT LIKE a%", Operator::NotLike, "a%"),
                     ("not   like a%", Operator::NotLike, "a%"),
                     ("active", Operator::Eq, "active")];
        for (raw, op, value) in cases {
            assert_eq!(Operator::split_value(raw), (op, value), "raw={raw}");
        }
    }

    #[test]
    fn default_operator_is_equality() {
        assert_eq!(Operator::default(), Operator::Eq);
        assert_eq!(Operator::default().as_sql(), "=");
    }

    #[test]
    fn word_operators_need_a_separator() {
        assert_eq!(Operator::split_value("likeable"), (Operator::Eq, "likeable"));
        assert_eq!(Operator::split_value("nothing"), (Operator::Eq, "nothing"));
        assert_eq!(Operator::split_value("NOT x"), (Operator::Eq, "NOT x"));
    }

    #[test]
    fn builders_flatten_same_connective() {
        let c = Criteria::eq("a", "1").and(Criteria::eq("b", "2")).and(Criteria::eq("c", "3"));
        assert!(matches!(&c, Criteria::And(items) if items.len() == 3));
        assert!(matches!(&c, Criteria::And(items) if matches!(&items[2], Criteria::Compare { key, .. } if key == "c")));
        let o = Criteria::eq("a", "1").or(Criteria::eq("b", "2"));
        assert!(matches!(o, Criteria::Or(items) if items.len() == 2));
    }

    #[test]
    fn empty_detection() {
        assert!(Criteria::all_records().is_empty());
        assert!(Criteria::all([Criteria::all([])]).is_empty());
        assert!(!Criteria::any([]).is_empty());
        assert!(!Criteria::is_null("x").is_empty());
    }
}
