use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use datachat_core::{Error, Result};

/// Direct SQLite client backing the database tools. All operations return
/// their results as JSON strings, which the SQL agent forwards to the model
/// verbatim.
pub struct DatabaseClient {
    conn: Mutex<Connection>,
}

impl DatabaseClient {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("failed to open database: {}", e)))?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open database: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a SQL query and return the rows as a JSON array of objects.
    /// Bare SELECT statements get a LIMIT appended.
    pub fn run_query(&self, sql: &str, limit: u32) -> Result<String> {
        let trimmed = sql.trim();
        let upper = trimmed.to_uppercase();
        let effective = if upper.starts_with("SELECT") && !upper.contains("LIMIT") {
            format!("{} LIMIT {}", trimmed, limit)
        } else {
            trimmed.to_string()
        };
        debug!(sql = %effective, "Executing query");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&effective)
            .map_err(|e| Error::Database(format!("query error: {}", e)))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mut rows = stmt
            .query([])
            .map_err(|e| Error::Database(format!("query error: {}", e)))?;
        let mut results: Vec<Value> = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("scan error: {}", e)))?
        {
            let mut object = Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| Error::Database(format!("scan error: {}", e)))?;
                object.insert(name.clone(), column_value(value));
            }
            results.push(Value::Object(object));
        }

        serde_json::to_string(&results).map_err(|e| Error::Database(format!("json error: {}", e)))
    }

    /// Return the schema of one table as JSON: column name, type,
    /// nullability, and default.
    pub fn get_schema(&self, table_name: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value FROM pragma_table_info(?1) ORDER BY cid",
            )
            .map_err(|e| Error::Database(format!("query error: {}", e)))?;

        let mut rows = stmt
            .query([table_name])
            .map_err(|e| Error::Database(format!("query error: {}", e)))?;
        let mut schema: Vec<Value> = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("scan error: {}", e)))?
        {
            let name: String = row
                .get(0)
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;
            let data_type: String = row
                .get(1)
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;
            let not_null: bool = row
                .get(2)
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;
            let default: Option<String> = row
                .get(3)
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;

            let mut column = Map::new();
            column.insert("column_name".to_string(), json!(name));
            column.insert("data_type".to_string(), json!(data_type));
            column.insert("nullable".to_string(), json!(!not_null));
            if let Some(default) = default {
                column.insert("default".to_string(), json!(default));
            }
            schema.push(Value::Object(column));
        }

        serde_json::to_string(&schema).map_err(|e| Error::Database(format!("json error: {}", e)))
    }

    /// Return the names of all user tables as a JSON array.
    pub fn list_tables(&self) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| Error::Database(format!("query error: {}", e)))?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("query error: {}", e)))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| Error::Database(format!("scan error: {}", e)))?;

        serde_json::to_string(&tables).map_err(|e| Error::Database(format!("json error: {}", e)))
    }

    /// Return an overview of all tables with their columns, used both as a
    /// tool result and to seed the SQL agent's instruction.
    pub fn describe_database(&self) -> Result<String> {
        let table_names: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .map_err(|e| Error::Database(format!("query error: {}", e)))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Database(format!("query error: {}", e)))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;
            names
        };

        let mut tables: Vec<Value> = Vec::new();
        for table in table_names {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(|e| Error::Database(format!("query error: {}", e)))?;
            let columns = stmt
                .query_map([&table], |row| {
                    let name: String = row.get(0)?;
                    let data_type: String = row.get(1)?;
                    Ok(format!("{} {}", name, data_type))
                })
                .map_err(|e| Error::Database(format!("query error: {}", e)))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| Error::Database(format!("scan error: {}", e)))?;

            tables.push(json!({"table": table, "columns": columns}));
        }

        serde_json::to_string(&tables).map_err(|e| Error::Database(format!("json error: {}", e)))
    }
}

/// Map a SQLite cell onto a JSON value. Blobs are rendered as lossy UTF-8
/// text so every result row serializes.
fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_client() -> DatabaseClient {
        let client = DatabaseClient::open_in_memory().unwrap();
        {
            let conn = client.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, month TEXT NOT NULL, total REAL DEFAULT 0);
                 CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 INSERT INTO orders (month, total) VALUES ('Jan', 120.5), ('Feb', 95.0), ('Mar', 143.2);
                 INSERT INTO users (name) VALUES ('ada'), ('grace');",
            )
            .unwrap();
        }
        client
    }

    #[test]
    fn test_run_query_returns_rows_as_json() {
        let client = seeded_client();
        let raw = client.run_query("SELECT month, total FROM orders ORDER BY id", 100).unwrap();
        let rows: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["month"], "Jan");
        assert_eq!(rows[0]["total"], 120.5);
    }

    #[test]
    fn test_run_query_appends_limit_to_bare_select() {
        let client = seeded_client();
        let raw = client.run_query("SELECT id FROM orders ORDER BY id", 2).unwrap();
        let rows: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(rows.len(), 2);

        // An explicit LIMIT is left alone.
        let raw = client.run_query("SELECT id FROM orders LIMIT 3", 1).unwrap();
        let rows: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_run_query_error_on_bad_sql() {
        let client = seeded_client();
        let err = client.run_query("SELECT nope FROM missing", 10).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_list_tables() {
        let client = seeded_client();
        let raw = client.list_tables().unwrap();
        let tables: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(tables, vec!["orders", "users"]);
    }

    #[test]
    fn test_get_schema() {
        let client = seeded_client();
        let raw = client.get_schema("orders").unwrap();
        let schema: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema[1]["column_name"], "month");
        assert_eq!(schema[1]["data_type"], "TEXT");
        assert_eq!(schema[1]["nullable"], false);
        assert_eq!(schema[2]["default"], "0");
    }

    #[test]
    fn test_describe_database() {
        let client = seeded_client();
        let raw = client.describe_database().unwrap();
        let tables: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0]["table"], "orders");
        let columns = tables[0]["columns"].as_array().unwrap();
        assert_eq!(columns[0], "id INTEGER");
    }
}
