pub mod chart;
pub mod classifier;
pub mod manager;
pub mod router;
pub mod runner;
pub mod sql;

pub use chart::ChartAgent;
pub use classifier::{Intent, IntentClassifier};
pub use manager::{Manager, RouteReport};
pub use router::{route, AgentKind, Route};
pub use runner::{run_agent_loop, NoTools, RunOptions, ToolDispatch};
pub use sql::SqlAgent;
