use crate::endpoint::Endpoint;
use crate::error::Result;

/// Maps a logical target to candidate endpoints
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, target: &str) -> Result<Vec<Endpoint>>;
}

/// Uses the target verbatim: one endpoint, or a comma-separated list
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver;

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, target: &str) -> Result<Vec<Endpoint>> {
        target
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}
