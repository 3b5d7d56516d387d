//! Registry mapping `SourceId -> SourceAdapter`, built once at startup.
//!
//! Dynamic dispatch over `SourceId` via a single interface plus a
//! registry, never runtime string matching on hot paths.

use std::collections::HashMap;
use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::rate_gate::{RateGate, RateGateConfig};
use crate::sources::SourceAdapter;
use crate::types::SourceId;

/// One registered source: its adapter plus the per-source limiter state
/// that the Orchestrator wraps every call with.
pub struct SourceEntry {
    pub adapter: Arc<dyn SourceAdapter>,
    pub rate_gate: RateGate,
    pub circuit_breaker: CircuitBreaker,
}

/// The full set of configured sources, constructed once at process start
/// and held by [`crate::Core`].
pub struct SourceRegistry {
    entries: HashMap<SourceId, SourceEntry>,
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder { entries: HashMap::new() }
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceEntry> {
        self.entries.get(&id)
    }

    pub fn configured_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.entries.keys().copied()
    }
}

pub struct SourceRegistryBuilder {
    entries: HashMap<SourceId, SourceEntry>,
}

impl SourceRegistryBuilder {
    pub fn register(
        mut self,
        adapter: Arc<dyn SourceAdapter>,
        rate_gate_config: RateGateConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let id = adapter.id();
        self.entries.insert(
            id,
            SourceEntry {
                adapter,
                rate_gate: RateGate::new(rate_gate_config),
                circuit_breaker: CircuitBreaker::new(breaker_config),
            },
        );
        self
    }

    pub fn build(self) -> SourceRegistry {
        SourceRegistry { entries: self.entries }
    }
}
