//! Realized columnar data.
//!
//! A [`Table`] is the opaque container the planner hands back from
//! `materialize`. It is an ordered list of named [`Column`]s of equal length.
//! Columns are immutable and shared by `Arc`, so the same column can sit in
//! several tables (and in several source nodes) without being copied; this is
//! what lets the planner reuse an already realized column instead of
//! recomputing it.
//!
//! [`ColumnBlock`] is the unit the executor streams between operators and
//! hands to write callbacks.

use crate::error::{QueryError, ensure_contract};
use crate::value::Value;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// One immutable, shared column of values.
#[derive(Clone, Debug, Default)]
pub struct Column {
    values: Arc<Vec<Value>>,
}

impl Column {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Number of rows in the column.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Copy out rows `[begin, end)`, clamped to the column length.
    #[must_use]
    pub fn slice(&self, begin: usize, end: usize) -> Vec<Value> {
        let end = end.min(self.size());
        let begin = begin.min(end);
        self.values[begin..end].to_vec()
    }

    /// True if both handles point at the same underlying storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl From<Vec<Value>> for Column {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.values == other.values
    }
}

/// Default name for the `i`-th (zero based) output column.
#[must_use]
pub fn default_column_name(i: usize) -> String {
    format!("X{}", i + 1)
}

/// An ordered set of named, equal-length columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    names: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct TableFile {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from named columns.
    ///
    /// # Errors
    ///
    /// Returns a contract error if the name count differs from the column count
    /// or the columns have different lengths.
    pub fn new(names: Vec<String>, columns: Vec<Column>) -> Result<Self> {
        ensure_contract!(
            names.len() == columns.len(),
            "{} column names supplied for {} columns",
            names.len(),
            columns.len()
        );
        if let Some(first) = columns.first() {
            let n = first.size();
            ensure_contract!(
                columns.iter().all(|c| c.size() == n),
                "columns of a table must have equal length"
            );
        }
        Ok(Self { columns, names })
    }

    /// Build a table with default `X1..Xn` names.
    ///
    /// # Errors
    ///
    /// Fails if the columns have different lengths.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let names = (0..columns.len()).map(default_column_name).collect();
        Self::new(names, columns)
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::size)
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// A shared handle to column `i`.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range index.
    pub fn select_column(&self, i: usize) -> Result<Column> {
        self.columns
            .get(i)
            .cloned()
            .ok_or_else(|| self.out_of_range(i))
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index.
    pub fn column_name(&self, i: usize) -> Result<&str> {
        self.names
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| self.out_of_range(i))
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index.
    pub fn set_column_name(&mut self, i: usize, name: impl Into<String>) -> Result<()> {
        match self.names.get_mut(i) {
            Some(slot) => {
                *slot = name.into();
                Ok(())
            }
            None => Err(self.out_of_range(i)),
        }
    }

    fn out_of_range(&self, i: usize) -> anyhow::Error {
        QueryError::contract(format!(
            "column index {i} out of range for {} columns",
            self.num_columns()
        ))
        .into()
    }

    /// Rename every column.
    ///
    /// # Errors
    ///
    /// Fails if `names.len()` differs from the column count.
    pub fn rename_all(&mut self, names: &[String]) -> Result<()> {
        ensure_contract!(
            names.len() == self.num_columns(),
            "{} output column names supplied for {} columns",
            names.len(),
            self.num_columns()
        );
        self.names = names.to_vec();
        Ok(())
    }

    /// A new table made of the given columns (shared, not copied).
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range index.
    pub fn select_columns(&self, indices: &[usize]) -> Result<Self> {
        let mut names = Vec::with_capacity(indices.len());
        let mut columns = Vec::with_capacity(indices.len());
        for &i in indices {
            ensure_contract!(
                i < self.num_columns(),
                "column index {i} out of range for {} columns",
                self.num_columns()
            );
            names.push(self.names[i].clone());
            columns.push(self.columns[i].clone());
        }
        Ok(Self { columns, names })
    }

    /// Row-major copy of rows `[begin, end)`.
    #[must_use]
    pub fn rows(&self, begin: usize, end: usize) -> Vec<Vec<Value>> {
        let end = end.min(self.num_rows());
        (begin.min(end)..end)
            .map(|r| self.columns.iter().map(|c| c.values()[r].clone()).collect())
            .collect()
    }

    /// Row-wise concatenation. Names are taken from `self`.
    ///
    /// # Errors
    ///
    /// Fails if the column counts differ.
    pub fn append(&self, other: &Self) -> Result<Self> {
        if self.num_columns() == 0 {
            return Ok(other.clone());
        }
        if other.num_columns() == 0 {
            return Ok(self.clone());
        }
        ensure_contract!(
            self.num_columns() == other.num_columns(),
            "cannot append a table of {} columns to one of {}",
            other.num_columns(),
            self.num_columns()
        );
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| {
                let mut v = Vec::with_capacity(a.size() + b.size());
                v.extend_from_slice(a.values());
                v.extend_from_slice(b.values());
                Column::new(v)
            })
            .collect();
        Ok(Self {
            columns,
            names: self.names.clone(),
        })
    }

    /// Persist the table as JSON at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// I/O and encoding failures are returned as [`QueryError::Io`] and
    /// [`QueryError::Serialization`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(QueryError::from)?;
        }
        let file = TableFile {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.values().to_vec()).collect(),
        };
        let mut w = BufWriter::new(File::create(path).map_err(QueryError::from)?);
        serde_json::to_writer(&mut w, &file).map_err(QueryError::from)?;
        w.flush().map_err(QueryError::from)?;
        Ok(())
    }

    /// Load a table written by [`Table::save`].
    ///
    /// # Errors
    ///
    /// I/O, decoding, and shape errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let r = BufReader::new(File::open(path).map_err(QueryError::from)?);
        let file: TableFile = serde_json::from_reader(r).map_err(QueryError::from)?;
        Self::new(file.names, file.columns.into_iter().map(Column::new).collect())
    }
}

/// A columnar chunk of consecutive rows streamed through the executor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnBlock {
    pub columns: Vec<Vec<Value>>,
}

impl ColumnBlock {
    #[must_use]
    pub fn new(columns: Vec<Vec<Value>>) -> Self {
        Self { columns }
    }

    /// An empty block with `n` columns.
    #[must_use]
    pub fn with_columns(n: usize) -> Self {
        Self {
            columns: vec![Vec::new(); n],
        }
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Copy of row `r` across all columns.
    #[must_use]
    pub fn row(&self, r: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[r].clone()).collect()
    }

    /// Remove and return the first `n` rows.
    pub fn take_front(&mut self, n: usize) -> Self {
        let n = n.min(self.num_rows());
        let columns = self
            .columns
            .iter_mut()
            .map(|c| {
                let rest = c.split_off(n);
                std::mem::replace(c, rest)
            })
            .collect();
        Self { columns }
    }

    /// Append another block's rows. Column counts must match.
    pub fn extend(&mut self, other: Self) {
        if self.columns.is_empty() {
            self.columns = other.columns;
            return;
        }
        for (c, o) in self.columns.iter_mut().zip(other.columns) {
            c.extend(o);
        }
    }
}
