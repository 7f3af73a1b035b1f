use datachat_core::types::Turn;
use datachat_core::Result;
use datachat_db::DatabaseClient;
use datachat_providers::Provider;
use std::sync::Arc;
use tracing::info;

use crate::chart::ChartAgent;
use crate::classifier::{Intent, IntentClassifier};
use crate::router::{route, AgentKind};
use crate::runner::{run_agent_loop, NoTools, RunOptions};
use crate::sql::SqlAgent;

const MANAGER_INSTRUCTION: &str = "You are a manager agent that coordinates between specialized sub-agents.
Your role is to:
1. Understand user requests
2. Route requests to the appropriate sub-agent based on intent
3. Combine results from multiple agents when needed

You have access to two sub-agents:
- SQLAgent: For database queries and SQL operations
- ChartAgent: For data visualization and chart generation

Workflow patterns:
1. SQL-only: User wants data -> delegate to SQLAgent
2. Combined: User wants to see data as a chart -> first SQLAgent, then ChartAgent with the results

Always provide clear, helpful responses that summarize what was done.";

/// How a query was classified and which pipeline will handle it.
#[derive(Debug, Clone)]
pub struct RouteReport {
    pub query: String,
    pub intent: Intent,
    pub confidence: f64,
    pub agents_used: Vec<AgentKind>,
    pub workflow: &'static str,
}

/// Top-level agent: classifies each query, routes it, and drives the
/// resulting pipeline against the shared session history.
pub struct Manager {
    classifier: IntentClassifier,
    provider: Arc<dyn Provider>,
    sql: SqlAgent,
    chart: ChartAgent,
    options: RunOptions,
}

impl Manager {
    pub fn new(
        provider: Arc<dyn Provider>,
        db: Arc<DatabaseClient>,
        database_schema: Option<&str>,
        options: RunOptions,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            provider,
            sql: SqlAgent::new(db, database_schema),
            chart: ChartAgent::new(),
            options,
        }
    }

    /// Classify a query and decide the pipeline, without executing it.
    pub fn process_query(&self, query: &str) -> RouteReport {
        let (intent, confidence) = self.classifier.classify_with_confidence(query);
        let r = route(intent, query);
        RouteReport {
            query: query.to_string(),
            intent,
            confidence,
            agents_used: r.agents,
            workflow: r.workflow,
        }
    }

    /// Execute a query against the session history. The history accumulates
    /// every turn (including tool calls and results) so follow-up questions
    /// keep their context; the caller owns persistence.
    pub async fn handle(&self, query: &str, history: &mut Vec<Turn>) -> Result<String> {
        let report = self.process_query(query);
        info!(
            intent = %report.intent,
            confidence = report.confidence,
            workflow = report.workflow,
            "Query routed"
        );

        history.push(Turn::user(query));

        match report.workflow {
            "sql_query" => {
                self.sql
                    .run(self.provider.as_ref(), history, &self.options)
                    .await
            }
            "sql_then_chart" => {
                let data = self
                    .sql
                    .run(self.provider.as_ref(), history, &self.options)
                    .await?;
                history.push(Turn::user(&format!(
                    "Create the requested chart from this data:\n{}",
                    data
                )));
                self.chart
                    .run(self.provider.as_ref(), history, &self.options)
                    .await
            }
            "chart_only" => {
                self.chart
                    .run(self.provider.as_ref(), history, &self.options)
                    .await
            }
            _ => {
                run_agent_loop(
                    self.provider.as_ref(),
                    MANAGER_INSTRUCTION,
                    history,
                    &[],
                    &NoTools,
                    &self.options,
                )
                .await
            }
        }
    }
}
