//! Columns that `@column` and `@entire` references read from.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use records_model::escape::quoted_if_needed;
use records_model::{
    check_index, load_cell, ColumnId, DataType, ExplanationLocation, ListEx, LoadedValue,
    RecordsError, RecordsResult, TableId, Value,
};

/// One stored column: its type and a value per row.
pub trait ColumnData: Send + Sync {
    fn table(&self) -> &TableId;
    fn column(&self) -> &ColumnId;
    fn data_type(&self) -> &DataType;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with a user error for rows out of range and for cells that could not be loaded.
    fn get(&self, row: usize) -> RecordsResult<Value>;

    fn location(&self, row: usize) -> ExplanationLocation {
        ExplanationLocation {
            table: Some(self.table().clone()),
            column: self.column().clone(),
            row: Some(row),
        }
    }
}

pub type ColumnRef = Arc<dyn ColumnData>;

/// A column as written in an expression: `Name` or `Table\Name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnReference {
    pub table: Option<TableId>,
    pub column: ColumnId,
}

impl fmt::Display for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}\\", quoted_if_needed(table.raw()))?;
        }
        f.write_str(&quoted_if_needed(self.column.raw()))
    }
}

/// Resolves column references during type checking and evaluation.
pub trait ColumnLookup: Send + Sync {
    /// `table` is `None` for a reference to the table the expression belongs to.
    fn get_column(&self, table: Option<&TableId>, column: &ColumnId) -> Option<ColumnRef>;

    /// Every reference an expression could make, for suggestions.
    fn available_column_references(&self) -> Vec<ColumnReference>;
}

/// A whole column as an array value, for `@entire`.
pub struct ColumnList {
    column: ColumnRef,
}

impl ColumnList {
    pub fn new(column: ColumnRef) -> Self {
        Self { column }
    }
}

impl ListEx for ColumnList {
    fn size(&self) -> RecordsResult<usize> {
        Ok(self.column.len())
    }

    fn get(&self, index: usize) -> RecordsResult<Value> {
        self.column.get(index)
    }

    fn location(&self, index: usize) -> Option<ExplanationLocation> {
        Some(self.column.location(index))
    }
}

#[derive(Clone, Debug)]
struct StoredColumn {
    table: TableId,
    column: ColumnId,
    data_type: DataType,
    cells: Vec<LoadedValue>,
}

impl ColumnData for StoredColumn {
    fn table(&self) -> &TableId {
        &self.table
    }

    fn column(&self) -> &ColumnId {
        &self.column
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    fn get(&self, row: usize) -> RecordsResult<Value> {
        check_index(row, self.cells.len())?;
        match &self.cells[row] {
            LoadedValue::Valid(value) => Ok(value.clone()),
            LoadedValue::Invalid(raw) => Err(RecordsError::user(format!(
                "row {} of {} holds unreadable text: {raw}",
                row + 1,
                self.column
            ))),
        }
    }
}

/// A table held in memory, column by column.
#[derive(Clone, Debug)]
pub struct Table {
    id: TableId,
    columns: Vec<Arc<StoredColumn>>,
    column_index: HashMap<ColumnId, usize>,
    row_count: usize,
}

impl Table {
    pub fn new(id: TableId, columns: Vec<(ColumnId, DataType)>) -> RecordsResult<Self> {
        let mut column_index = HashMap::with_capacity(columns.len());
        let mut stored = Vec::with_capacity(columns.len());
        for (idx, (column, data_type)) in columns.into_iter().enumerate() {
            if column_index.insert(column.clone(), idx).is_some() {
                return Err(RecordsError::user(format!(
                    "duplicate column {column} in table {id}"
                )));
            }
            stored.push(Arc::new(StoredColumn {
                table: id.clone(),
                column,
                data_type,
                cells: Vec::new(),
            }));
        }
        Ok(Self {
            id,
            columns: stored,
            column_index,
            row_count: 0,
        })
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.iter().map(|c| &c.column)
    }

    pub fn column(&self, column: &ColumnId) -> Option<ColumnRef> {
        let idx = *self.column_index.get(column)?;
        let stored: ColumnRef = self.columns[idx].clone();
        Some(stored)
    }

    pub fn push_row(&mut self, row: Vec<LoadedValue>) -> RecordsResult<()> {
        if row.len() != self.columns.len() {
            return Err(RecordsError::user(format!(
                "table {} has {} column(s) but the row has {} value(s)",
                self.id,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, cell) in self.columns.iter_mut().zip(row) {
            Arc::make_mut(column).cells.push(cell);
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn push_values(&mut self, row: Vec<Value>) -> RecordsResult<()> {
        self.push_row(row.into_iter().map(LoadedValue::Valid).collect())
    }

    /// Loads a row of saved cell text. Unreadable cells are kept as invalid values.
    pub fn load_row(&mut self, cells: &[&str]) -> RecordsResult<()> {
        let row = self
            .columns
            .iter()
            .zip(cells)
            .map(|(column, text)| load_cell(&column.data_type, text))
            .collect::<Vec<_>>();
        if row.len() != cells.len() {
            return Err(RecordsError::user(format!(
                "table {} has {} column(s) but the row has {} value(s)",
                self.id,
                self.columns.len(),
                cells.len()
            )));
        }
        self.push_row(row)
    }
}

/// Tables held in memory. References without a table name go to the current table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTables {
    tables: Vec<Table>,
    table_index: HashMap<TableId, usize>,
    current: Option<TableId>,
}

impl InMemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> RecordsResult<()> {
        if self.table_index.contains_key(table.id()) {
            return Err(RecordsError::user(format!("duplicate table: {}", table.id())));
        }
        if self.current.is_none() {
            self.current = Some(table.id().clone());
        }
        self.table_index.insert(table.id().clone(), self.tables.len());
        self.tables.push(table);
        Ok(())
    }

    pub fn set_current(&mut self, table: &TableId) -> RecordsResult<()> {
        if !self.table_index.contains_key(table) {
            return Err(RecordsError::user(format!("unknown table: {table}")));
        }
        self.current = Some(table.clone());
        Ok(())
    }

    pub fn table(&self, table: &TableId) -> Option<&Table> {
        self.table_index.get(table).map(|idx| &self.tables[*idx])
    }

    pub fn current_table(&self) -> Option<&Table> {
        self.current.as_ref().and_then(|id| self.table(id))
    }
}

impl ColumnLookup for InMemoryTables {
    fn get_column(&self, table: Option<&TableId>, column: &ColumnId) -> Option<ColumnRef> {
        let table = match table {
            Some(id) => self.table(id)?,
            None => self.current_table()?,
        };
        table.column(column)
    }

    fn available_column_references(&self) -> Vec<ColumnReference> {
        let mut references = Vec::new();
        for table in &self.tables {
            let is_current = self.current.as_ref() == Some(table.id());
            for column in table.column_ids() {
                references.push(ColumnReference {
                    table: (!is_current).then(|| table.id().clone()),
                    column: column.clone(),
                });
            }
        }
        references
    }
}
