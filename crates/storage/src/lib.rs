#![forbid(unsafe_code)]

mod error;

pub use error::StoreError;

use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use sdb_core::ColumnValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema shipped with the crate; deployments may provide their own script
/// as long as it defines the five pipeline tables.
pub const DEFAULT_SCHEMA: &str = include_str!("schema.sql");

/// A fetched or to-be-written row: ordered column/value map.
pub type Row = BTreeMap<String, ColumnValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

/// One conjunct of a WHERE clause. `Null` values compare with `IS` /
/// `IS NOT` since SQL equality never matches NULL.
#[derive(Clone, Debug)]
pub struct Filter {
    pub column: String,
    pub op: Op,
    pub value: ColumnValue,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: ColumnValue) -> Self {
        Self {
            column: column.into(),
            op: Op::Eq,
            value,
        }
    }

    pub fn ne(column: impl Into<String>, value: ColumnValue) -> Self {
        Self {
            column: column.into(),
            op: Op::Ne,
            value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
        }
    }
}

/// A targeted, key-scoped update: non-key values to set plus the key
/// predicate selecting exactly one logical row.
#[derive(Clone, Debug)]
pub struct RowUpdate {
    pub values: Row,
    pub key: Row,
}

/// Generic gateway over the SQLite store: schema install and wipe,
/// primary-key introspection, predicate lookup, natural-key upsert, and
/// key-scoped updates. One gateway per run; access is not synchronized
/// across connections, so concurrent writers on the same natural key must
/// be serialized by the caller.
#[derive(Debug)]
pub struct Gateway {
    conn: Connection,
    db_path: PathBuf,
    pk_cache: BTreeMap<String, Vec<String>>,
}

impl Gateway {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            db_path,
            pk_cache: BTreeMap::new(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Executes the schema script once. Scripts are expected to use
    /// `CREATE TABLE IF NOT EXISTS`, making repeat runs harmless.
    pub fn install_schema(&mut self, script: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(script)?;
        self.pk_cache.clear();
        Ok(())
    }

    /// Drops every user table, leaving an empty database file. Foreign-key
    /// enforcement is suspended so the drop order does not matter.
    pub fn wipe(&mut self) -> Result<(), StoreError> {
        let tables = self.user_tables()?;
        self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = (|| {
            let tx = self.conn.transaction()?;
            for table in &tables {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
            }
            tx.commit()
        })();
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        result?;
        self.pk_cache.clear();
        Ok(())
    }

    /// Primary-key column names of `table`, in key order, introspected once
    /// and cached for the life of the gateway.
    pub fn primary_keys_of(&mut self, table: &str) -> Result<Vec<String>, StoreError> {
        let table = ensure_identifier(table)?;
        if let Some(cached) = self.pk_cache.get(table) {
            return Ok(cached.clone());
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
        let mut rows = stmt.query([])?;
        let mut keyed = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let pk_index: i64 = row.get(5)?;
            if pk_index > 0 {
                keyed.push((pk_index, name));
            }
        }
        drop(rows);
        drop(stmt);

        keyed.sort();
        let keys: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();
        self.pk_cache.insert(table.to_string(), keys.clone());
        Ok(keys)
    }

    /// Conjunctive predicate lookup. Zero matches is a normal
    /// `(empty, false)` result, never an error.
    pub fn find_rows(&self, table: &str, filters: &[Filter]) -> Result<(Vec<Row>, bool), StoreError> {
        let table = ensure_identifier(table)?;
        let (where_sql, params) = build_where(filters)?;
        let sql = if where_sql.is_empty() {
            format!("SELECT * FROM \"{table}\"")
        } else {
            format!("SELECT * FROM \"{table}\" WHERE {where_sql}")
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), column_value(row.get_ref(index)?));
            }
            out.push(record);
        }

        let exists = !out.is_empty();
        Ok((out, exists))
    }

    /// Full-table read for the reconciler's batch stages.
    pub fn load_table(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        let (rows, _) = self.find_rows(table, &[])?;
        Ok(rows)
    }

    /// Natural-key upsert: existence is decided by the introspected
    /// primary-key columns only. Built from SELECT + INSERT/UPDATE rather
    /// than a native UPSERT, so it is not atomic against a concurrent
    /// writer racing on the same key.
    pub fn upsert(
        &mut self,
        table: &str,
        values: &Row,
        allow_update: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        let table = ensure_identifier(table)?.to_string();
        let primary_keys = self.primary_keys_of(&table)?;
        if primary_keys.is_empty() {
            return Err(StoreError::NoPrimaryKey(table));
        }

        let mut key_filters = Vec::new();
        let mut non_key = Row::new();
        for (column, value) in values {
            if primary_keys.iter().any(|pk| pk == column) {
                key_filters.push(Filter::eq(column.clone(), value.clone()));
            } else {
                non_key.insert(column.clone(), value.clone());
            }
        }
        if key_filters.is_empty() {
            return Err(StoreError::InvalidInput(
                "upsert values carry no primary-key columns",
            ));
        }

        let (_, exists) = self.find_rows(&table, &key_filters)?;
        if !exists {
            let columns: Vec<&str> = values.keys().map(String::as_str).collect();
            for column in &columns {
                ensure_identifier(column)?;
            }
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO \"{table}\" ({}) VALUES ({})",
                columns
                    .iter()
                    .map(|c| format!("\"{c}\""))
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders.join(", ")
            );
            let params: Vec<SqlValue> = values.values().map(sql_value).collect();
            self.conn
                .execute(&sql, rusqlite::params_from_iter(params))?;
            return Ok(UpsertOutcome::Inserted);
        }

        if !allow_update || non_key.is_empty() {
            return Ok(UpsertOutcome::AlreadyExists);
        }

        let key: Row = key_filters
            .iter()
            .map(|filter| (filter.column.clone(), filter.value.clone()))
            .collect();
        execute_update(&self.conn, &table, &non_key, &key)?;
        Ok(UpsertOutcome::Updated)
    }

    /// Applies a batch of key-scoped updates inside one transaction: the
    /// reconciler's critical section for a stage.
    pub fn update_rows(&mut self, table: &str, updates: &[RowUpdate]) -> Result<usize, StoreError> {
        let table = ensure_identifier(table)?.to_string();
        let tx = self.conn.transaction()?;
        let mut changed = 0usize;
        for update in updates {
            changed += execute_update(&tx, &table, &update.values, &update.key)?;
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Post-load data check: row count per user table.
    pub fn row_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let tables = self.user_tables()?;
        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let count = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM \"{table}\""),
                [],
                |row| row.get::<_, i64>(0),
            )?;
            counts.push((table, count));
        }
        Ok(counts)
    }

    fn user_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let mut rows = stmt.query([])?;
        let mut tables = Vec::new();
        while let Some(row) = rows.next()? {
            tables.push(row.get::<_, String>(0)?);
        }
        Ok(tables)
    }
}

/// Left-to-right chained JOIN clause over ordered tables, one join column
/// pair per step.
pub fn join_clause(
    tables: &[&str],
    join_columns: &[(&str, &str)],
    join_type: JoinType,
) -> Result<String, StoreError> {
    if tables.len() < 2 || join_columns.len() != tables.len() - 1 {
        return Err(StoreError::InvalidInput(
            "join needs n tables and n-1 column pairs",
        ));
    }
    for table in tables {
        ensure_identifier(table)?;
    }

    let mut clause = String::from(tables[0]);
    for (step, (left_column, right_column)) in join_columns.iter().enumerate() {
        ensure_identifier(left_column)?;
        ensure_identifier(right_column)?;
        let left_table = tables[step];
        let right_table = tables[step + 1];
        clause.push_str(&format!(
            " {} JOIN {right_table} ON {left_table}.{left_column} = {right_table}.{right_column}",
            join_type.as_sql()
        ));
    }
    Ok(clause)
}

fn execute_update(
    conn: &Connection,
    table: &str,
    values: &Row,
    key: &Row,
) -> Result<usize, StoreError> {
    if values.is_empty() {
        return Ok(0);
    }
    if key.is_empty() {
        return Err(StoreError::InvalidInput("update requires a key predicate"));
    }

    let mut sql = format!("UPDATE \"{table}\" SET ");
    let mut params: Vec<SqlValue> = Vec::new();
    let mut set_parts = Vec::new();
    for (column, value) in values {
        ensure_identifier(column)?;
        params.push(sql_value(value));
        set_parts.push(format!("\"{column}\" = ?{}", params.len()));
    }
    sql.push_str(&set_parts.join(", "));

    let mut where_parts = Vec::new();
    for (column, value) in key {
        ensure_identifier(column)?;
        if value.is_null() {
            where_parts.push(format!("\"{column}\" IS NULL"));
        } else {
            params.push(sql_value(value));
            where_parts.push(format!("\"{column}\" = ?{}", params.len()));
        }
    }
    sql.push_str(" WHERE ");
    sql.push_str(&where_parts.join(" AND "));

    Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?)
}

fn build_where(filters: &[Filter]) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut parts = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    for filter in filters {
        ensure_identifier(&filter.column)?;
        let column = &filter.column;
        if filter.value.is_null() {
            match filter.op {
                Op::Eq => parts.push(format!("\"{column}\" IS NULL")),
                Op::Ne => parts.push(format!("\"{column}\" IS NOT NULL")),
            }
        } else {
            params.push(sql_value(&filter.value));
            let sign = match filter.op {
                Op::Eq => "=",
                Op::Ne => "!=",
            };
            parts.push(format!("\"{column}\" {sign} ?{}", params.len()));
        }
    }
    Ok((parts.join(" AND "), params))
}

/// Table and column names cannot be bound as parameters; restrict them to
/// bare identifiers before splicing into SQL text.
fn ensure_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn sql_value(value: &ColumnValue) -> SqlValue {
    match value {
        ColumnValue::Null => SqlValue::Null,
        ColumnValue::Integer(i) => SqlValue::Integer(*i),
        ColumnValue::Real(r) => SqlValue::Real(*r),
        ColumnValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn column_value(value: ValueRef<'_>) -> ColumnValue {
    match value {
        ValueRef::Null => ColumnValue::Null,
        ValueRef::Integer(i) => ColumnValue::Integer(i),
        ValueRef::Real(r) => ColumnValue::Real(r),
        ValueRef::Text(bytes) => ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => ColumnValue::Null,
    }
}
