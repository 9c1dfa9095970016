use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::balancer::{LoadBalancer, RandomBalancer};
use crate::error::{Error, Result};
use crate::resolver::{Resolver, StaticResolver};

pub type ResolverFactory = Arc<dyn Fn() -> Arc<dyn Resolver> + Send + Sync>;
pub type LoadBalancerFactory = Arc<dyn Fn() -> Arc<dyn LoadBalancer> + Send + Sync>;

/// Name → factory table for resolvers and load balancers
///
/// Starts with the built-ins `static` and `random`; register more under
/// new names and select them through `ChannelOptions`.
#[derive(Clone)]
pub struct StrategyRegistry {
    resolvers: HashMap<String, ResolverFactory>,
    balancers: HashMap<String, LoadBalancerFactory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_resolver("static", || {
            Arc::new(StaticResolver) as Arc<dyn Resolver>
        });
        registry.register_load_balancer("random", || {
            Arc::new(RandomBalancer) as Arc<dyn LoadBalancer>
        });
        registry
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry without the built-in strategies
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
            balancers: HashMap::new(),
        }
    }

    pub fn register_resolver<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Resolver> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_load_balancer<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn LoadBalancer> + Send + Sync + 'static,
    {
        self.balancers.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn resolver(&self, name: &str) -> Result<Arc<dyn Resolver>> {
        self.resolvers
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownResolver(name.to_string()))
    }

    pub fn load_balancer(&self, name: &str) -> Result<Arc<dyn LoadBalancer>> {
        self.balancers
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownLoadBalancer(name.to_string()))
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("balancers", &self.balancers.keys().collect::<Vec<_>>())
            .finish()
    }
}
