pub mod client;
pub mod local;

use async_trait::async_trait;
use datachat_core::types::{ModelReply, ModelRequest};
use datachat_core::Result;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, request: &ModelRequest) -> Result<ModelReply>;
}

pub use local::LocalProvider;
