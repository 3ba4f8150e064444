//! Flow lookup

use std::collections::HashMap;
use std::sync::Arc;

use leadflow_core_types::FlowKey;

use crate::errors::FlowError;
use crate::types::Flow;

/// Resolves a flow key to an immutable flow definition.
pub trait FlowSource: Send + Sync {
    fn load(&self, key: &FlowKey) -> Result<Arc<Flow>, FlowError>;
}

/// Flows held in memory, keyed by `platform/slug`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowSource {
    flows: HashMap<FlowKey, Arc<Flow>>,
}

impl InMemoryFlowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.insert(flow);
        self
    }

    pub fn insert(&mut self, flow: Flow) {
        self.flows.insert(flow.key.clone(), Arc::new(flow));
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl FlowSource for InMemoryFlowSource {
    fn load(&self, key: &FlowKey) -> Result<Arc<Flow>, FlowError> {
        self.flows
            .get(key)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(key.clone()))
    }
}
