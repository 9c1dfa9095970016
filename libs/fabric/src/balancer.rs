use rand::seq::SliceRandom;

use crate::endpoint::Endpoint;

/// Picks one endpoint per connection attempt
pub trait LoadBalancer: Send + Sync {
    fn pick(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;
}

/// Uniform random choice among the candidates
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn pick(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        endpoints.choose(&mut rand::thread_rng()).cloned()
    }
}
