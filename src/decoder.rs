//! Decoding rows into typed objects through an ordered key list.
//!
//! Keys are [`Property`] values. The position of a key in the list is the
//! position of the column it reads, and every key names the type that owns
//! it. A [`TableDecoder`] is built once per result set and hands out a cheap
//! [`Row`] view for each row the handle steps onto.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use rusqlite::types::{FromSql, Type, ValueRef};

use crate::error::{Error, Result};
use crate::handle::HandleStatement;

/// Storage class a key expects its column to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    /// NULL is accepted for every key; optionality is the target field's call.
    fn accepts(self, stored: Type) -> bool {
        matches!(
            (self, stored),
            (_, Type::Null)
                | (ColumnType::Integer, Type::Integer)
                | (ColumnType::Real, Type::Real | Type::Integer)
                | (ColumnType::Text, Type::Text)
                | (ColumnType::Blob, Type::Blob)
        )
    }
}

/// A decoded object with its concrete type erased.
pub type AnyObject = Box<dyn Any + Send>;

pub(crate) type DecodeFn = fn(&Row<'_>) -> Result<AnyObject>;

/// The type a key belongs to.
#[derive(Clone, Copy)]
pub struct Owner {
    type_id: TypeId,
    type_name: &'static str,
    decode: Option<DecodeFn>,
}

impl Owner {
    /// An owner that can construct itself from a row.
    pub fn of<T: TableDecodable>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            decode: Some(decode_erased::<T>),
        }
    }

    /// An owner that cannot be decoded into.
    pub fn opaque<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            decode: None,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_decodable(&self) -> bool {
        self.decode.is_some()
    }

    pub(crate) fn decode_fn(&self) -> Option<DecodeFn> {
        self.decode
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("type_name", &self.type_name)
            .field("decodable", &self.is_decodable())
            .finish()
    }
}

fn decode_erased<T: TableDecodable>(row: &Row<'_>) -> Result<AnyObject> {
    Ok(Box::new(T::decode(row)?))
}

/// A typed key mapping one column onto a field of its owner.
#[derive(Debug, Clone)]
pub struct Property {
    name: &'static str,
    column_type: ColumnType,
    owner: Owner,
}

impl Property {
    pub fn new(name: &'static str, column_type: ColumnType, owner: Owner) -> Self {
        Self {
            name,
            column_type,
            owner,
        }
    }

    /// Shorthand for a key owned by the decodable type `T`.
    pub fn of<T: TableDecodable>(name: &'static str, column_type: ColumnType) -> Self {
        Self::new(name, column_type, Owner::of::<T>())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Whether this key is part of `T`'s declared key set.
    pub fn belongs_to<T: TableDecodable>(&self) -> bool {
        self.owner.type_id == TypeId::of::<T>()
            && T::properties().iter().any(|declared| declared.name == self.name)
    }
}

/// Types that can be constructed from one result row.
pub trait TableDecodable: Sized + Send + 'static {
    /// The declared key set, in the column order `decode` expects by default.
    fn properties() -> Vec<Property>;

    fn decode(row: &Row<'_>) -> Result<Self>;
}

/// Reusable mapping from an ordered key list to column positions.
#[derive(Debug, Clone)]
pub struct TableDecoder {
    keys: Vec<Property>,
    positions: HashMap<&'static str, usize>,
}

impl TableDecoder {
    pub fn new(keys: Vec<Property>) -> Self {
        let mut positions = HashMap::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            // First occurrence wins if a caller repeats a key.
            positions.entry(key.name).or_insert(index);
        }
        Self { keys, positions }
    }

    pub fn keys(&self) -> &[Property] {
        &self.keys
    }

    /// View `handle`'s current row through these keys.
    pub fn row<'a>(&'a self, handle: &'a HandleStatement) -> Row<'a> {
        Row {
            decoder: self,
            handle,
        }
    }
}

/// The current row of a handle, read through a [`TableDecoder`].
///
/// Holds no data of its own; every call reads through to the handle.
pub struct Row<'a> {
    decoder: &'a TableDecoder,
    handle: &'a HandleStatement,
}

impl Row<'_> {
    pub fn keys(&self) -> &[Property] {
        self.decoder.keys()
    }

    /// Decode the column bound to the key called `name`.
    pub fn decode<T: FromSql>(&self, name: &str) -> Result<T> {
        let index = *self.decoder.positions.get(name).ok_or_else(|| Error::Decode {
            column: name.to_string(),
            message: "no such key in this result set".to_string(),
        })?;
        self.decode_at(index)
    }

    /// Decode the column at `index`, checked against the key at that position.
    pub fn decode_at<T: FromSql>(&self, index: usize) -> Result<T> {
        let key = self.decoder.keys.get(index).ok_or_else(|| Error::Decode {
            column: format!("#{}", index),
            message: "no key at this position".to_string(),
        })?;
        let value = self
            .handle
            .column_value(index)
            .ok_or_else(|| decode_error(key, "column out of range".to_string()))?;
        convert(key, value)
    }
}

fn convert<T: FromSql>(key: &Property, value: ValueRef<'_>) -> Result<T> {
    let stored = value.data_type();
    if !key.column_type.accepts(stored) {
        return Err(decode_error(
            key,
            format!("expected {:?}, found {}", key.column_type, stored),
        ));
    }
    T::column_result(value).map_err(|e| decode_error(key, e.to_string()))
}

fn decode_error(key: &Property, message: String) -> Error {
    Error::Decode {
        column: key.name.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::statement::Statement;

    #[derive(Debug, PartialEq)]
    struct Item {
        id: i64,
        label: Option<String>,
    }

    impl TableDecodable for Item {
        fn properties() -> Vec<Property> {
            vec![
                Property::of::<Item>("id", ColumnType::Integer),
                Property::of::<Item>("label", ColumnType::Text),
            ]
        }

        fn decode(row: &Row<'_>) -> Result<Self> {
            Ok(Item {
                id: row.decode("id")?,
                label: row.decode("label")?,
            })
        }
    }

    #[test]
    fn decodes_by_name_and_position() {
        let db = Database::open_in_memory().unwrap();
        let mut handle = db.prepare(&Statement::query("SELECT 4, NULL")).unwrap();
        assert!(handle.raw_mut().step().unwrap());

        let decoder = TableDecoder::new(Item::properties());
        let row = decoder.row(handle.raw());
        assert_eq!(Item::decode(&row).unwrap(), Item { id: 4, label: None });
        assert_eq!(row.decode_at::<i32>(0).unwrap(), 4);
    }

    #[test]
    fn storage_class_mismatch_is_a_decode_error() {
        let db = Database::open_in_memory().unwrap();
        let mut handle = db.prepare(&Statement::query("SELECT 'four', 'x'")).unwrap();
        assert!(handle.raw_mut().step().unwrap());

        let decoder = TableDecoder::new(Item::properties());
        let err = Item::decode(&decoder.row(handle.raw())).unwrap_err();
        assert!(matches!(err, Error::Decode { ref column, .. } if column == "id"));

        let err = decoder.row(handle.raw()).decode::<i64>("missing").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn null_into_non_optional_field_fails() {
        let db = Database::open_in_memory().unwrap();
        let mut handle = db.prepare(&Statement::query("SELECT NULL, 'x'")).unwrap();
        assert!(handle.raw_mut().step().unwrap());

        let decoder = TableDecoder::new(Item::properties());
        assert!(matches!(
            Item::decode(&decoder.row(handle.raw())),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn key_membership() {
        struct Other;
        let foreign = Property::new("id", ColumnType::Integer, Owner::opaque::<Other>());
        assert!(Property::of::<Item>("id", ColumnType::Integer).belongs_to::<Item>());
        assert!(!Property::of::<Item>("extra", ColumnType::Integer).belongs_to::<Item>());
        assert!(!foreign.belongs_to::<Item>());
        assert!(!foreign.owner().is_decodable());
    }
}
