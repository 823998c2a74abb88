// ==============================================================================
// output.rs - Destination Table Writers
// ==============================================================================
// Description: Writes typed variant rows into per-destination tables (SQLite or
//              in memory) and exposes count/sum queries for validation
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-13
// Version: 0.3.0
// ==============================================================================
// SQLite layout per destination:
//   reference_name, start_position, end_position, reference_bases,
//   alternate_bases (JSON), names (JSON), <INFO columns>, call (JSON array),
//   [merge_conflicts]
// Repeated INFO values are stored as JSON arrays. Nested call fields are
// queried with json_each/json_extract.
// ==============================================================================

use anyhow::{bail, Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::encoder::{CellValue, VariantRow};
use crate::sample_info::SampleInfoRow;
use crate::schema::{FieldType, Schema};

/// Sink for the rows of a run
///
/// Every destination is created before any row is written; rows are only
/// written to destinations that were created.
pub trait RowWriter: Send {
    fn create_destination(
        &mut self,
        name: &str,
        schema: &Schema,
        annotate_merge_conflicts: bool,
    ) -> Result<()>;

    fn write_rows(&mut self, destination: &str, rows: &[VariantRow]) -> Result<()>;

    fn write_sample_info(&mut self, table: &str, rows: &[SampleInfoRow]) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType, repeated: bool) -> &'static str {
    if repeated {
        return "TEXT";
    }
    match field_type {
        FieldType::Flag | FieldType::Integer => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::String => "TEXT",
    }
}

fn to_sql_value(cell: &CellValue) -> Result<Value> {
    Ok(match cell {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Integer(i64::from(*b)),
        CellValue::Integer(v) => Value::Integer(*v),
        CellValue::Float(v) => Value::Real(*v),
        CellValue::String(s) => Value::Text(s.clone()),
        CellValue::List(_) => {
            Value::Text(serde_json::to_string(cell).context("Failed to encode list value")?)
        }
    })
}

#[derive(Debug, Clone)]
struct TableLayout {
    info_columns: Vec<String>,
    annotate_merge_conflicts: bool,
    insert_sql: String,
}

/// SQLite-backed writer; one table per destination
pub struct SqliteWriter {
    conn: Connection,
    tables: HashMap<String, TableLayout>,
}

impl SqliteWriter {
    /// Open (or create) a database file for bulk loading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite output: {:?}", path);
        let conn = Connection::open(path).context("Failed to create SQLite database")?;

        // One-shot bulk load; durability is restored in finish()
        conn.execute_batch(
            "PRAGMA journal_mode = OFF;
             PRAGMA synchronous = OFF;
             PRAGMA temp_store = MEMORY;",
        )
        .context("Failed to set SQLite bulk load settings")?;

        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            tables: HashMap::new(),
        }
    }

    /// Run a query returning one numeric value (NULL -> None)
    pub fn query_scalar(&self, sql: &str) -> Result<Option<f64>> {
        self.conn
            .query_row(sql, [], |row| row.get::<_, Option<f64>>(0))
            .with_context(|| format!("Failed to run validation query: {}", sql))
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        Ok(self.query_scalar(&sql)?.unwrap_or(0.0) as u64)
    }

    /// Rows where an INFO column is not NULL
    pub fn count_non_null(&self, table: &str, column: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT({}) FROM {}",
            quote_identifier(column),
            quote_identifier(table)
        );
        Ok(self.query_scalar(&sql)?.unwrap_or(0.0) as u64)
    }

    pub fn sum_column(&self, table: &str, column: &str) -> Result<f64> {
        let sql = format!(
            "SELECT SUM({}) FROM {}",
            quote_identifier(column),
            quote_identifier(table)
        );
        Ok(self.query_scalar(&sql)?.unwrap_or(0.0))
    }

    /// Sum of a FORMAT field over every call, list items included
    pub fn sum_call_field(&self, table: &str, column: &str) -> Result<f64> {
        let sql = format!(
            "SELECT SUM(v.value) FROM {t}, json_each({t}.call) AS c, json_each(c.value, '$.{col}') AS v",
            t = quote_identifier(table),
            col = column
        );
        Ok(self.query_scalar(&sql)?.unwrap_or(0.0))
    }

    /// Table names in the database
    pub fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .context("Failed to list tables")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

impl RowWriter for SqliteWriter {
    fn create_destination(
        &mut self,
        name: &str,
        schema: &Schema,
        annotate_merge_conflicts: bool,
    ) -> Result<()> {
        let table = quote_identifier(name);
        let mut columns = vec![
            "reference_name TEXT NOT NULL".to_string(),
            "start_position INTEGER NOT NULL".to_string(),
            "end_position INTEGER NOT NULL".to_string(),
            "reference_bases TEXT NOT NULL".to_string(),
            "alternate_bases TEXT NOT NULL".to_string(),
            "names TEXT NOT NULL".to_string(),
        ];
        let mut info_columns = Vec::new();
        for definition in schema.info_fields() {
            let column = definition.column_name();
            columns.push(format!(
                "{} {}",
                quote_identifier(&column),
                sql_type(definition.field_type, definition.cardinality.is_repeated())
            ));
            info_columns.push(column);
        }
        columns.push("call TEXT NOT NULL".to_string());
        if annotate_merge_conflicts {
            columns.push("merge_conflicts INTEGER NOT NULL".to_string());
        }

        // A destination is rewritten from scratch by each run
        self.conn
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {table};
                 CREATE TABLE {table} ({columns});",
                table = table,
                columns = columns.join(", ")
            ))
            .with_context(|| format!("Failed to create table {}", name))?;

        let mut insert_columns: Vec<String> = [
            "reference_name",
            "start_position",
            "end_position",
            "reference_bases",
            "alternate_bases",
            "names",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        insert_columns.extend(info_columns.iter().map(|c| quote_identifier(c)));
        insert_columns.push("call".to_string());
        if annotate_merge_conflicts {
            insert_columns.push("merge_conflicts".to_string());
        }
        let placeholders: Vec<String> = (1..=insert_columns.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            insert_columns.join(", "),
            placeholders.join(", ")
        );

        debug!("Created destination {} ({} INFO columns)", name, info_columns.len());
        self.tables.insert(
            name.to_string(),
            TableLayout {
                info_columns,
                annotate_merge_conflicts,
                insert_sql,
            },
        );
        Ok(())
    }

    fn write_rows(&mut self, destination: &str, rows: &[VariantRow]) -> Result<()> {
        let Some(layout) = self.tables.get(destination) else {
            bail!("Destination {} was not created before writing", destination);
        };

        let tx = self
            .conn
            .transaction()
            .context("Failed to start SQLite transaction")?;
        {
            let mut stmt = tx
                .prepare(&layout.insert_sql)
                .context("Failed to prepare variants insert statement")?;

            for row in rows {
                let mut values = vec![
                    Value::Text(row.reference_name.clone()),
                    Value::Integer(row.start_position),
                    Value::Integer(row.end_position),
                    Value::Text(row.reference_bases.clone()),
                    Value::Text(serde_json::to_string(&row.alternate_bases)?),
                    Value::Text(serde_json::to_string(&row.names)?),
                ];
                for column in &layout.info_columns {
                    values.push(to_sql_value(row.info.get(column).unwrap_or(&CellValue::Null))?);
                }
                values.push(Value::Text(
                    serde_json::to_string(&row.calls).context("Failed to encode calls")?,
                ));
                if layout.annotate_merge_conflicts {
                    values.push(Value::Integer(i64::from(row.merge_conflicts.unwrap_or(0))));
                }

                stmt.execute(params_from_iter(values.iter()))
                    .context("Failed to insert variant row")?;
            }
        }
        tx.commit().context("Failed to commit variant rows")?;
        Ok(())
    }

    fn write_sample_info(&mut self, table: &str, rows: &[SampleInfoRow]) -> Result<()> {
        let quoted = quote_identifier(table);
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    sample_id INTEGER NOT NULL,
                    sample_name TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    ingestion_datetime TEXT NOT NULL
                );",
                quoted
            ))
            .context("Failed to create sample info table")?;

        let tx = self
            .conn
            .transaction()
            .context("Failed to start sample info transaction")?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (sample_id, sample_name, file_path, ingestion_datetime)
                     VALUES (?1, ?2, ?3, ?4)",
                    quoted
                ))
                .context("Failed to prepare sample info insert")?;
            for row in rows {
                stmt.execute(params![
                    row.sample_id,
                    row.sample_name,
                    row.file_path,
                    row.ingestion_datetime,
                ])
                .context("Failed to insert sample info row")?;
            }
        }
        tx.commit().context("Failed to commit sample info")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut names: Vec<&String> = self.tables.keys().collect();
        names.sort();
        for name in names {
            let index = quote_identifier(&format!("idx_{}_position", name));
            self.conn
                .execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {}(reference_name, start_position)",
                        index,
                        quote_identifier(name)
                    ),
                    [],
                )
                .with_context(|| format!("Failed to index {}", name))?;
        }

        self.conn
            .execute_batch(
                "PRAGMA journal_mode = DELETE;
                 PRAGMA synchronous = FULL;",
            )
            .context("Failed to restore SQLite durability settings")?;

        info!("SQLite output finalized ({} destinations)", self.tables.len());
        Ok(())
    }
}

/// In-memory writer with aggregate helpers for validation
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: BTreeMap<String, Vec<VariantRow>>,
    sample_info: BTreeMap<String, Vec<SampleInfoRow>>,
    finished: bool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Created destinations, sorted by name
    pub fn destinations(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn rows(&self, destination: &str) -> &[VariantRow] {
        self.tables.get(destination).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self, destination: &str) -> usize {
        self.rows(destination).len()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Rows where an INFO column is not NULL
    pub fn count_non_null(&self, destination: &str, column: &str) -> usize {
        self.rows(destination)
            .iter()
            .filter(|row| row.info.get(column).is_some_and(|cell| !cell.is_null()))
            .count()
    }

    /// Sum of a FORMAT field over every call, list items included
    pub fn sum_call_field(&self, destination: &str, column: &str) -> f64 {
        self.rows(destination)
            .iter()
            .flat_map(|row| &row.calls)
            .filter_map(|call| call.fields.get(column))
            .map(CellValue::numeric_sum)
            .sum()
    }

    pub fn sum_start(&self, destination: &str) -> i64 {
        self.rows(destination).iter().map(|row| row.start_position).sum()
    }

    pub fn sum_end(&self, destination: &str) -> i64 {
        self.rows(destination).iter().map(|row| row.end_position).sum()
    }

    pub fn sample_info(&self, table: &str) -> &[SampleInfoRow] {
        self.sample_info.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl RowWriter for MemoryWriter {
    fn create_destination(&mut self, name: &str, _schema: &Schema, _annotate: bool) -> Result<()> {
        self.tables.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn write_rows(&mut self, destination: &str, rows: &[VariantRow]) -> Result<()> {
        let Some(table) = self.tables.get_mut(destination) else {
            bail!("Destination {} was not created before writing", destination);
        };
        table.extend_from_slice(rows);
        Ok(())
    }

    fn write_sample_info(&mut self, table: &str, rows: &[SampleInfoRow]) -> Result<()> {
        self.sample_info
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::CallRow;
    use crate::models::RawValue;
    use crate::schema::{FieldCategory, SchemaAccumulator};
    use tempfile::TempDir;

    fn schema() -> Schema {
        let mut acc = SchemaAccumulator::new();
        acc.observe("DP", FieldCategory::Info, &RawValue::parse("14"));
        acc.observe("AF", FieldCategory::Info, &RawValue::parse("0.5,0.5"));
        acc.observe("DB", FieldCategory::Info, &RawValue::Flag);
        acc.observe("HQ", FieldCategory::Format, &RawValue::parse("51,51"));
        acc.finalize().unwrap()
    }

    fn row(start: i64, dp: CellValue, hq: Vec<CellValue>) -> VariantRow {
        let mut info = BTreeMap::new();
        info.insert("DP".to_string(), dp);
        info.insert("AF".to_string(), CellValue::List(vec![CellValue::Float(0.5)]));
        info.insert("DB".to_string(), CellValue::Null);

        let mut fields = BTreeMap::new();
        fields.insert("HQ".to_string(), CellValue::List(hq));

        VariantRow {
            reference_name: "chr20".to_string(),
            start_position: start,
            end_position: start + 1,
            reference_bases: "G".to_string(),
            alternate_bases: vec!["A".to_string()],
            names: Vec::new(),
            info,
            calls: vec![CallRow {
                sample_id: 1,
                name: "NA00001".to_string(),
                genotype: vec![0, 1],
                phased: true,
                fields,
            }],
            merge_conflicts: Some(2),
        }
    }

    fn rows() -> Vec<VariantRow> {
        vec![
            row(14_369, CellValue::Integer(14), vec![CellValue::Integer(10), CellValue::Integer(15)]),
            row(17_329, CellValue::Null, vec![CellValue::Integer(51), CellValue::Null]),
        ]
    }

    #[test]
    fn test_sqlite_writer_round_trip_queries() {
        let dir = TempDir::new().unwrap();
        let mut writer = SqliteWriter::open(dir.path().join("out.db")).unwrap();
        writer.create_destination("variants__chr20", &schema(), true).unwrap();
        writer.create_destination("variants__residual", &schema(), true).unwrap();
        writer.write_rows("variants__chr20", &rows()).unwrap();
        writer.finish().unwrap();

        assert_eq!(writer.row_count("variants__chr20").unwrap(), 2);
        assert_eq!(writer.row_count("variants__residual").unwrap(), 0);
        assert_eq!(writer.count_non_null("variants__chr20", "DP").unwrap(), 1);
        assert_eq!(writer.count_non_null("variants__chr20", "DB").unwrap(), 0);
        assert_eq!(writer.sum_call_field("variants__chr20", "HQ").unwrap(), 76.0);
        assert_eq!(writer.sum_column("variants__chr20", "merge_conflicts").unwrap(), 4.0);
        assert_eq!(
            writer
                .query_scalar("SELECT json_extract(alternate_bases, '$[0]') = 'A' FROM \"variants__chr20\" LIMIT 1")
                .unwrap(),
            Some(1.0)
        );
    }

    #[test]
    fn test_sqlite_writer_rejects_unknown_destination() {
        let mut writer = SqliteWriter::in_memory().unwrap();
        assert!(writer.write_rows("variants__chr1", &rows()).is_err());
    }

    #[test]
    fn test_sqlite_sample_info() {
        let mut writer = SqliteWriter::in_memory().unwrap();
        let rows = vec![SampleInfoRow {
            sample_id: 42,
            sample_name: "NA00001".to_string(),
            file_path: "a.vcf".to_string(),
            ingestion_datetime: "2026-10-02 13:45:00.0".to_string(),
        }];
        writer.write_sample_info("variants__sample_info", &rows).unwrap();
        assert_eq!(writer.row_count("variants__sample_info").unwrap(), 1);
        assert!(writer
            .tables()
            .unwrap()
            .contains(&"variants__sample_info".to_string()));
    }

    #[test]
    fn test_memory_writer_aggregates() {
        let mut writer = MemoryWriter::new();
        writer.create_destination("variants__chr20", &schema(), false).unwrap();
        writer.write_rows("variants__chr20", &rows()).unwrap();
        writer.finish().unwrap();

        assert!(writer.is_finished());
        assert_eq!(writer.row_count("variants__chr20"), 2);
        assert_eq!(writer.count_non_null("variants__chr20", "DP"), 1);
        assert_eq!(writer.sum_call_field("variants__chr20", "HQ"), 76.0);
        assert_eq!(writer.sum_start("variants__chr20"), 14_369 + 17_329);
        assert_eq!(writer.sum_end("variants__chr20"), 14_370 + 17_330);
        assert!(writer.write_rows("variants__chr1", &rows()).is_err());
    }
}
