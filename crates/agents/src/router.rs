use crate::classifier::Intent;

/// The agents that can take part in answering a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Sql,
    Chart,
    Manager,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Sql => "SQLAgent",
            AgentKind::Chart => "ChartAgent",
            AgentKind::Manager => "ManagerAgent",
        }
    }
}

/// An ordered agent pipeline plus its workflow tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub agents: Vec<AgentKind>,
    pub workflow: &'static str,
}

/// Map a classified intent onto the pipeline that should handle it. A
/// visualization request that also names a data source runs SQL first.
pub fn route(intent: Intent, query: &str) -> Route {
    match intent {
        Intent::SqlQuery => Route {
            agents: vec![AgentKind::Sql],
            workflow: "sql_query",
        },
        Intent::Visualization => {
            if needs_data_fetch(query) {
                Route {
                    agents: vec![AgentKind::Sql, AgentKind::Chart],
                    workflow: "sql_then_chart",
                }
            } else {
                Route {
                    agents: vec![AgentKind::Chart],
                    workflow: "chart_only",
                }
            }
        }
        Intent::General => Route {
            agents: vec![AgentKind::Manager],
            workflow: "general",
        },
    }
}

/// Whether the query mentions a data source and therefore needs SQL before
/// charting.
fn needs_data_fetch(query: &str) -> bool {
    const DATA_INDICATORS: &[&str] = &[
        "from database",
        "from table",
        "data from",
        "show me",
        "get",
        "fetch",
        "query",
        "sales",
        "users",
        "orders",
        "records",
    ];

    let query_lower = query.to_lowercase();
    DATA_INDICATORS.iter().any(|i| query_lower.contains(i))
}
