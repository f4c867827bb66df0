pub mod connections;
pub mod strategy;

pub use connections::ConnectionCounter;
pub use strategy::{LeastConnections, LoadBalancer, Random, RoundRobin};

use llmproxy_core::types::LoadBalancingStrategyKind;

/// Builds the configured strategy. `LeastConnections` needs the shared
/// counter; the other two are stateless.
pub fn strategy_for(kind: LoadBalancingStrategyKind, counter: ConnectionCounter) -> Box<dyn LoadBalancer> {
    match kind {
        LoadBalancingStrategyKind::RoundRobin => Box::new(RoundRobin),
        LoadBalancingStrategyKind::Random => Box::new(Random),
        LoadBalancingStrategyKind::LeastConnections => Box::new(LeastConnections::new(counter)),
    }
}
