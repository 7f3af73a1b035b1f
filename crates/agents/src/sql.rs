use datachat_core::types::{ToolSignature, Turn};
use datachat_core::Result;
use datachat_db::DatabaseClient;
use datachat_providers::Provider;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::runner::{run_agent_loop, RunOptions, ToolDispatch};

const DEFAULT_QUERY_LIMIT: u32 = 100;

const SQL_INSTRUCTION: &str = "You are a SQL expert agent. Your job is to:
1. Understand the user's natural language query about data
2. Convert it to a valid SQLite query
3. Execute the query using the available database tools
4. Return the results in a structured format

Guidelines:
- Write efficient SQL queries with appropriate WHERE clauses
- Limit results to a reasonable number unless specifically asked for all
- Format dates and numbers appropriately
- If the query is ambiguous, make reasonable assumptions and explain them
- Use the database schema provided below to write accurate queries

Available tools:
- query_database: Execute SQL queries and get results
- get_schema: Get the schema of a specific table (if you need more details)
- list_tables: List all available tables
- describe_database: Get an overview of the database structure";

/// Converts natural-language questions to SQL and executes them through the
/// database tools.
pub struct SqlAgent {
    db: Arc<DatabaseClient>,
    instruction: String,
}

impl SqlAgent {
    /// `database_schema` is the preloaded overview from
    /// [`DatabaseClient::describe_database`]; when present it is appended to
    /// the instruction so the model can write accurate queries immediately.
    pub fn new(db: Arc<DatabaseClient>, database_schema: Option<&str>) -> Self {
        let mut instruction = SQL_INSTRUCTION.to_string();
        if let Some(schema) = database_schema {
            if !schema.is_empty() {
                instruction.push_str("\n\n## Database Schema\n");
                instruction.push_str(schema);
            }
        }
        instruction.push_str("\n\nAlways return the query results as structured JSON data.");
        Self { db, instruction }
    }

    /// The four database tools. Declared without parameter schemas; the
    /// provider substitutes its built-in fallback schemas on the wire.
    pub fn tools(&self) -> Vec<ToolSignature> {
        vec![
            ToolSignature::new(
                "query_database",
                "Execute a SQL query and return results as JSON",
            ),
            ToolSignature::new("get_schema", "Get the schema of a specific table"),
            ToolSignature::new("list_tables", "List all tables in the database"),
            ToolSignature::new(
                "describe_database",
                "Get an overview of the database structure including all tables and their columns",
            ),
        ]
    }

    pub async fn run(
        &self,
        provider: &dyn Provider,
        history: &mut Vec<Turn>,
        options: &RunOptions,
    ) -> Result<String> {
        run_agent_loop(
            provider,
            &self.instruction,
            history,
            &self.tools(),
            self,
            options,
        )
        .await
    }
}

impl ToolDispatch for SqlAgent {
    fn dispatch(&self, name: &str, arguments: &Value) -> Value {
        match name {
            "query_database" => {
                let sql = arguments.get("sql").and_then(|v| v.as_str()).unwrap_or("");
                if sql.is_empty() {
                    return json!({"error": "missing 'sql' argument"});
                }
                let limit = arguments
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .filter(|l| *l > 0)
                    .map(|l| l as u32)
                    .unwrap_or(DEFAULT_QUERY_LIMIT);
                info!(sql = %sql, limit, "Executing query");
                match self.db.run_query(sql, limit) {
                    Ok(data) => json!({"data": data}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            "get_schema" => {
                let table_name = arguments
                    .get("table_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if table_name.is_empty() {
                    return json!({"error": "missing 'table_name' argument"});
                }
                info!(table = %table_name, "Fetching table schema");
                match self.db.get_schema(table_name) {
                    Ok(schema) => json!({"schema": schema}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            "list_tables" => match self.db.list_tables() {
                Ok(tables) => json!({"tables": tables}),
                Err(e) => json!({"error": e.to_string()}),
            },
            "describe_database" => match self.db.describe_database() {
                Ok(description) => json!({"description": description}),
                Err(e) => json!({"error": e.to_string()}),
            },
            _ => json!({"error": format!("unknown tool: {}", name)}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> SqlAgent {
        let db = Arc::new(DatabaseClient::open_in_memory().unwrap());
        db.run_query(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, month TEXT, total REAL)",
            0,
        )
        .unwrap();
        SqlAgent::new(db, Some(r#"[{"table":"orders","columns":["id INTEGER"]}]"#))
    }

    #[test]
    fn test_instruction_includes_schema() {
        let agent = agent();
        assert!(agent.instruction.contains("## Database Schema"));
        assert!(agent.instruction.contains("orders"));
    }

    #[test]
    fn test_tools_declared_without_schemas() {
        let agent = agent();
        let tools = agent.tools();
        assert_eq!(tools.len(), 4);
        assert!(tools.iter().all(|t| t.parameters.is_none()));
    }

    #[test]
    fn test_dispatch_query_database() {
        let agent = agent();
        let result = agent.dispatch(
            "query_database",
            &json!({"sql": "SELECT COUNT(*) AS n FROM orders"}),
        );
        assert!(result.get("error").is_none(), "unexpected error: {}", result);
        assert!(result["data"].as_str().unwrap().contains("\"n\":0"));
    }

    #[test]
    fn test_dispatch_query_database_error_is_payload() {
        let agent = agent();
        let result = agent.dispatch("query_database", &json!({"sql": "SELECT * FROM missing"}));
        assert!(result["error"].as_str().unwrap().contains("query error"));
    }

    #[test]
    fn test_dispatch_missing_sql_argument() {
        let agent = agent();
        let result = agent.dispatch("query_database", &json!({}));
        assert_eq!(result["error"], "missing 'sql' argument");
    }

    #[test]
    fn test_dispatch_list_tables() {
        let agent = agent();
        let result = agent.dispatch("list_tables", &json!({}));
        assert_eq!(result["tables"], r#"["orders"]"#);
    }

    #[test]
    fn test_dispatch_unknown_tool() {
        let agent = agent();
        let result = agent.dispatch("send_email", &json!({}));
        assert!(result["error"].as_str().unwrap().contains("unknown tool"));
    }
}
