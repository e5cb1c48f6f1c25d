use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use relay_llm::FunctionDefinition;
use serde_json::Value;

/// A function the model may call during an ask
#[async_trait]
pub trait AssistantFunction: Send + Sync {
    fn definition(&self) -> FunctionDefinition;

    /// Run with JSON-decoded arguments; an error is reported back to the model
    async fn call(&self, arguments: Value) -> Result<Value>;
}

#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn AssistantFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the definition's name, replacing any previous entry
    pub fn register(&mut self, function: Arc<dyn AssistantFunction>) {
        let name = function.definition().name;
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AssistantFunction>> {
        self.functions.get(name).cloned()
    }

    /// Definitions advertised to the backend, sorted by name
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut definitions: Vec<FunctionDefinition> =
            self.functions.values().map(|f| f.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
