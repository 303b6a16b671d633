//! Cache keys and statement shape.
//!
//! An implicit key is the SQL text plus everything that changes what the
//! driver prepares for it: statement kind, cursor type, cursor concurrency and
//! the generated-key columns requested at prepare time. An explicit key is a
//! caller-chosen string and ignores the SQL text entirely.

use std::fmt;
use std::sync::Arc;

/// Scrollability of the cursor a statement opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether rows of the cursor can be updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Plain prepared statement or stored-procedure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatementKind {
    #[default]
    Prepared,
    Callable,
}

/// Everything besides the SQL text that identifies a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatementShape {
    pub kind: StatementKind,
    pub result_set_type: ResultSetType,
    pub concurrency: Concurrency,
    /// Columns returned as generated keys after an insert.
    pub generated_key_columns: Vec<String>,
}

impl StatementShape {
    /// Shape of a plain prepared statement with the given cursor.
    pub fn cursor(result_set_type: ResultSetType, concurrency: Concurrency) -> Self {
        Self {
            result_set_type,
            concurrency,
            ..Self::default()
        }
    }

    /// Shape of a plain prepared statement returning generated keys.
    pub fn returning<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            generated_key_columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Shape of a stored-procedure call.
    pub fn callable() -> Self {
        Self {
            kind: StatementKind::Callable,
            ..Self::default()
        }
    }

    pub fn is_callable(&self) -> bool {
        self.kind == StatementKind::Callable
    }
}

/// Identity of a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Derived from SQL text and shape.
    Implicit {
        sql: Arc<str>,
        shape: StatementShape,
    },
    /// Caller-assigned, used verbatim.
    Explicit(Arc<str>),
}

impl CacheKey {
    pub fn implicit(sql: &str, shape: &StatementShape) -> Self {
        Self::Implicit {
            sql: Arc::from(sql),
            shape: shape.clone(),
        }
    }

    pub fn explicit(key: &str) -> Self {
        Self::Explicit(Arc::from(key))
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Implicit { sql, shape } => write!(
                f,
                "{sql} [{:?}/{:?}/{:?}]",
                shape.kind, shape.result_set_type, shape.concurrency
            ),
            CacheKey::Explicit(key) => write!(f, "{key}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    const QUERY: &str = "select * from dual where dummy = ? connect by rownum <= 10";

    fn hash_of(key: &CacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_implicit_key_is_deterministic() {
        let shape = StatementShape::cursor(
            ResultSetType::ScrollInsensitive,
            Concurrency::Updatable,
        );
        let a = CacheKey::implicit(QUERY, &shape);
        let b = CacheKey::implicit(QUERY, &shape);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_cursor_shape_separates_slots() {
        let scroll = StatementShape::cursor(
            ResultSetType::ScrollInsensitive,
            Concurrency::Updatable,
        );
        let forward = StatementShape::default();
        let read_only =
            StatementShape::cursor(ResultSetType::ScrollInsensitive, Concurrency::ReadOnly);

        assert_ne!(CacheKey::implicit(QUERY, &scroll), CacheKey::implicit(QUERY, &forward));
        assert_ne!(CacheKey::implicit(QUERY, &scroll), CacheKey::implicit(QUERY, &read_only));
    }

    #[test]
    fn test_signature_separates_slots() {
        let sql = "insert into t1(c2) values (?)";
        let plain = CacheKey::implicit(sql, &StatementShape::default());
        let returning = CacheKey::implicit(sql, &StatementShape::returning(&["C1"]));
        let call = CacheKey::implicit(sql, &StatementShape::callable());

        assert_ne!(plain, returning);
        assert_ne!(plain, call);
    }

    #[test]
    fn test_explicit_key_ignores_sql() {
        assert_eq!(CacheKey::explicit("junit-test"), CacheKey::explicit("junit-test"));
        assert!(CacheKey::explicit("junit-test").is_explicit());
        assert_eq!(CacheKey::explicit("junit-test").to_string(), "junit-test");
    }
}
