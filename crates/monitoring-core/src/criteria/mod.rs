//! Criterios de búsqueda: árbol de expresiones y parser de la gramática
//! posicional heredada.

mod parser;
mod types;

pub use parser::parse_legacy;
pub use types::{Criteria, Operator};
