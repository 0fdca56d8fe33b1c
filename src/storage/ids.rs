//! Strongly typed row identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A row id tagged with the kind of row it points to.
///
/// Negative values are invalid. An invalid id never equals anything, not even
/// another invalid id, so callers must check [`InternalId::is_valid`] instead
/// of comparing against a default.
pub struct InternalId<T> {
    id: i64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InternalId<T> {
    pub const INVALID: i64 = -1;

    pub fn new(id: i64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn invalid() -> Self {
        Self::new(Self::INVALID)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id >= 0
    }
}

impl<T> Clone for InternalId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for InternalId<T> {}

impl<T> Default for InternalId<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> PartialEq for InternalId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.is_valid() && other.is_valid()
    }
}

impl<T> PartialOrd for InternalId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.id.cmp(&other.id) {
            Ordering::Equal if !self.is_valid() => None,
            ordering => Some(ordering),
        }
    }
}

impl<T> fmt::Debug for InternalId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", tag_name::<T>(), self.id)
    }
}

impl<T> fmt::Display for InternalId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn tag_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// Invalid ids are bound as NULL.
impl<T> ToSql for InternalId<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        if self.is_valid() {
            Ok(ToSqlOutput::from(self.id))
        } else {
            Ok(ToSqlOutput::from(rusqlite::types::Null))
        }
    }
}

impl<T> FromSql for InternalId<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self::invalid()),
            value => i64::column_result(value).map(Self::new),
        }
    }
}

impl<T> Serialize for InternalId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.id)
    }
}

impl<'de, T> Deserialize<'de> for InternalId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::new)
    }
}

pub enum TypeTag {}
pub enum PropertyDeclarationTag {}
pub enum FunctionDeclarationTag {}
pub enum SignalDeclarationTag {}
pub enum EnumerationDeclarationTag {}
pub enum SourceContextTag {}
pub enum SourceTag {}

pub type TypeId = InternalId<TypeTag>;
pub type TypeIds = Vec<TypeId>;
pub type PropertyDeclarationId = InternalId<PropertyDeclarationTag>;
pub type FunctionDeclarationId = InternalId<FunctionDeclarationTag>;
pub type SignalDeclarationId = InternalId<SignalDeclarationTag>;
pub type EnumerationDeclarationId = InternalId<EnumerationDeclarationTag>;
pub type SourceContextId = InternalId<SourceContextTag>;
pub type SourceId = InternalId<SourceTag>;
pub type SourceIds = Vec<SourceId>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_valid_ids_compare_by_value() {
        assert_eq!(TypeId::new(3), TypeId::new(3));
        assert_ne!(TypeId::new(3), TypeId::new(4));
        assert!(TypeId::new(3) < TypeId::new(4));
    }

    #[test]
    fn test_invalid_ids_never_equal() {
        assert!(!TypeId::invalid().is_valid());
        assert_ne!(TypeId::invalid(), TypeId::invalid());
        assert_ne!(TypeId::default(), TypeId::new(-1));
        assert_eq!(TypeId::invalid().partial_cmp(&TypeId::invalid()), None);
        assert!(TypeId::invalid() < TypeId::new(0));
    }

    #[test]
    fn test_sql_round_trip_maps_invalid_to_null() {
        let conn = Connection::open_in_memory().unwrap();

        let is_null: bool = conn
            .query_row("SELECT ?1 IS NULL", [TypeId::invalid()], |row| row.get(0))
            .unwrap();
        assert!(is_null);

        let id: TypeId = conn
            .query_row("SELECT ?1", [TypeId::new(42)], |row| row.get(0))
            .unwrap();
        assert_eq!(id, TypeId::new(42));

        let id: TypeId = conn.query_row("SELECT NULL", [], |row| row.get(0)).unwrap();
        assert!(!id.is_valid());
    }

    #[test]
    fn test_debug_names_the_tag() {
        assert_eq!(format!("{:?}", SourceId::new(7)), "SourceTag(7)");
        assert_eq!(SourceId::new(7).to_string(), "7");
    }
}
