//! Read path: step through a query's rows and decode them into objects.

use std::any::type_name;

use crate::database::{Database, RecyclableHandle, Tag};
use crate::decoder::{AnyObject, Property, Row, TableDecodable, TableDecoder};
use crate::error::{Error, Result};
use crate::handle::HandleStatement;
use crate::statement::Statement;
use crate::value::Value;

impl Database {
    /// Prepare a read query whose columns map, in order, onto `keys`.
    ///
    /// Nothing touches the engine until the query is first executed or stepped.
    pub fn prepare_select(
        &self,
        keys: Vec<Property>,
        sql: impl Into<String>,
        values: Vec<Value>,
    ) -> SelectSql {
        SelectSql {
            handle: LazyHandle {
                database: self.clone(),
                statement: Statement::query(sql),
                slot: None,
            },
            decoder: TableDecoder::new(keys),
            values,
            bound: false,
            exhausted: false,
        }
    }

    /// Prepare a read query decoded with every key `T` declares.
    pub fn prepare_select_of<T: TableDecodable>(
        &self,
        sql: impl Into<String>,
        values: Vec<Value>,
    ) -> SelectSql {
        self.prepare_select(T::properties(), sql, values)
    }
}

/// Handle slot filled on first use and kept for the executor's lifetime.
struct LazyHandle {
    database: Database,
    statement: Statement,
    slot: Option<RecyclableHandle>,
}

impl LazyHandle {
    fn get(&mut self) -> Result<&mut HandleStatement> {
        let handle = match self.slot.take() {
            Some(handle) => handle,
            None => self.database.prepare(&self.statement)?,
        };
        Ok(self.slot.insert(handle).raw_mut())
    }

    fn current(&self) -> Option<&HandleStatement> {
        self.slot.as_ref().map(RecyclableHandle::raw)
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut handle) = self.slot.take() {
            handle.raw_mut().finalize()?;
        }
        Ok(())
    }
}

/// A prepared read query.
///
/// Parameters are bound once per instance. Once the rows run out, or a step
/// fails, the query stays exhausted; prepare a new one to run it again.
pub struct SelectSql {
    handle: LazyHandle,
    decoder: TableDecoder,
    values: Vec<Value>,
    bound: bool,
    exhausted: bool,
}

impl SelectSql {
    pub fn statement(&self) -> &Statement {
        &self.handle.statement
    }

    pub fn keys(&self) -> &[Property] {
        self.decoder.keys()
    }

    /// Bind the values this query was prepared with. Later calls are no-ops.
    ///
    /// `step` calls this itself before the first row, so calling it
    /// explicitly is only needed to surface bind errors early.
    pub fn execute(&mut self) -> Result<()> {
        if self.bound || self.exhausted || self.values.is_empty() {
            return Ok(());
        }
        let handle = self.handle.get()?;
        for (index, value) in self.values.iter().enumerate() {
            handle.bind(value, index + 1)?;
        }
        self.bound = true;
        Ok(())
    }

    /// Advance to the next row; `false` once the result set is exhausted.
    ///
    /// A failed step finalizes the handle before the error is returned.
    pub fn step(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.execute()?;
        match self.handle.get().and_then(HandleStatement::step) {
            Ok(true) => Ok(true),
            Ok(false) => {
                log::trace!("`{}` exhausted", self.handle.statement);
                self.exhausted = true;
                Ok(false)
            }
            Err(e) => {
                if let Err(cleanup) = self.finalize() {
                    log::debug!("ignoring finalize error after failed step: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Decode every remaining row as the owner type of the first key.
    pub fn all_objects(&mut self) -> Result<Vec<AnyObject>> {
        let root = self
            .decoder
            .keys()
            .first()
            .map(|key| *key.owner())
            .ok_or_else(|| Error::ContractViolation("no keys to decode with".to_string()))?;
        let decode = root.decode_fn().ok_or_else(|| {
            Error::ContractViolation(format!(
                "{} must implement TableDecodable",
                root.type_name()
            ))
        })?;

        self.execute()?;
        let mut objects = Vec::new();
        while self.step()? {
            objects.push(self.decode_current(decode)?);
        }
        Ok(objects)
    }

    /// Decode every remaining row as `T`.
    ///
    /// Every key must belong to `T`'s declared key set; this is checked
    /// before any row is fetched.
    pub fn all_objects_of<T: TableDecodable>(&mut self) -> Result<Vec<T>> {
        if let Some(key) = self.decoder.keys().iter().find(|key| !key.belongs_to::<T>()) {
            return Err(Error::ContractViolation(format!(
                "key `{}` of {} does not belong to {}",
                key.name(),
                key.owner().type_name(),
                type_name::<T>()
            )));
        }

        self.execute()?;
        let mut objects = Vec::new();
        while self.step()? {
            objects.push(self.decode_current(T::decode)?);
        }
        Ok(objects)
    }

    /// Release the handle. Safe to call repeatedly; the query is exhausted afterwards.
    pub fn finalize(&mut self) -> Result<()> {
        self.exhausted = true;
        self.handle.finalize()
    }

    fn decode_current<R>(&self, decode: impl FnOnce(&Row<'_>) -> Result<R>) -> Result<R> {
        let handle = self.handle.current().ok_or_else(|| Error::Decode {
            column: String::new(),
            message: "no current row".to_string(),
        })?;
        decode(&self.decoder.row(handle))
    }

    /// The tag of the related database.
    pub fn tag(&self) -> Option<Tag> {
        self.handle.database.tag()
    }

    /// The path of the related database.
    pub fn path(&self) -> &str {
        self.handle.database.path()
    }
}

impl Drop for SelectSql {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::debug!("ignoring finalize error on drop: {}", e);
        }
    }
}
