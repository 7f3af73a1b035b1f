pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    FunctionCall, FunctionResponse, ModelReply, ModelRequest, TokenUsage, ToolInvocation,
    ToolSignature, Turn, TurnRole,
};
