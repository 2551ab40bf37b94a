//! Dynamic SQL value bridging SQLite reads and PostgreSQL writes.
//!
//! SQLite is dynamically typed, so a ported row is a vector of [`SqlValue`]s
//! read straight out of the source page. On the destination side the actual
//! column types are only known to PostgreSQL, so the `ToSql` impl adapts each
//! value to the type the prepared statement asks for (a SQLite integer lands
//! as smallint/int/bigint/bool/text depending on the target column).

use bytes::BytesMut;
use rusqlite::types::ValueRef;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};

/// A single column value in transit between the two stores.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Convert a borrowed SQLite value into an owned [`SqlValue`].
    pub fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL truthiness of the value, used for boolean coercion.
    pub fn is_truthy(&self) -> bool {
        match self {
            SqlValue::Null => false,
            SqlValue::Bool(b) => *b,
            SqlValue::Integer(v) => *v != 0,
            SqlValue::Real(v) => *v != 0.0,
            SqlValue::Text(s) => !s.is_empty(),
            SqlValue::Blob(b) => !b.is_empty(),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        // Domains (e.g. information_schema's sql_identifier) encode as their
        // base type.
        let ty = base_type(ty);
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    (*b as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*b as i32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    (*b as i64).to_sql(ty, out)
                } else {
                    Err(format!("cannot encode bool as {}", ty).into())
                }
            }
            SqlValue::Integer(v) => {
                if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if is_text_like(ty) {
                    v.to_string().to_sql(ty, out)
                } else {
                    Err(format!("cannot encode integer as {}", ty).into())
                }
            }
            SqlValue::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    v.to_sql(ty, out)
                } else if is_text_like(ty) {
                    v.to_string().to_sql(ty, out)
                } else {
                    Err(format!("cannot encode real as {}", ty).into())
                }
            }
            SqlValue::Text(s) => {
                if is_text_like(ty) {
                    s.to_sql(ty, out)
                } else {
                    Err(format!("cannot encode text as {}", ty).into())
                }
            }
            SqlValue::Blob(b) => {
                if *ty == Type::BYTEA {
                    b.as_slice().to_sql(ty, out)
                } else {
                    Err(format!("cannot encode blob as {}", ty).into())
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Compatibility is decided per value in to_sql; a mismatch surfaces
        // as an encode error carrying the offending type.
        true
    }

    to_sql_checked!();
}

fn base_type(ty: &Type) -> &Type {
    match ty.kind() {
        Kind::Domain(inner) => base_type(inner),
        _ => ty,
    }
}

fn is_text_like(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_sqlite_maps_all_storage_classes() {
        assert_eq!(SqlValue::from_sqlite(ValueRef::Null), SqlValue::Null);
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Integer(7)),
            SqlValue::Integer(7)
        );
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Real(1.5)),
            SqlValue::Real(1.5)
        );
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Text(b"hi")),
            SqlValue::Text("hi".into())
        );
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Blob(&[1, 2])),
            SqlValue::Blob(vec![1, 2])
        );
    }

    #[test]
    fn truthiness_follows_sql_semantics() {
        assert!(!SqlValue::Null.is_truthy());
        assert!(!SqlValue::Integer(0).is_truthy());
        assert!(SqlValue::Integer(-3).is_truthy());
        assert!(SqlValue::Text("x".into()).is_truthy());
        assert!(!SqlValue::Text(String::new()).is_truthy());
    }

    #[test]
    fn integer_encodes_as_bool_and_int8() {
        let mut buf = BytesMut::new();
        let v = SqlValue::Integer(1);
        assert!(matches!(
            v.to_sql(&Type::BOOL, &mut buf),
            Ok(IsNull::No)
        ));
        buf.clear();
        assert!(matches!(v.to_sql(&Type::INT8, &mut buf), Ok(IsNull::No)));
    }

    #[test]
    fn blob_rejects_text_column() {
        let mut buf = BytesMut::new();
        let v = SqlValue::Blob(vec![0xde, 0xad]);
        assert!(v.to_sql(&Type::TEXT, &mut buf).is_err());
    }
}
