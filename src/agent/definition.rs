//! Immutable agent configuration.
//!
//! An [`AgentDefinition`] names an agent, carries its instructions and
//! model, and owns one lookup table from callable name to either a function
//! or a nested sub-agent definition. Definitions are built once, validated
//! at build time, and shared by `Arc` across every conversation that uses
//! them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::StrandError;
use crate::models::ModelSelector;
use crate::provider::ActionDefinition;
use crate::tools::Tool;
use crate::util::naming::{is_valid_callable_name, parameterize};

/// A function entry: the tool plus an optional per-call timeout.
#[derive(Clone)]
pub struct FunctionSpec {
    pub tool: Arc<dyn Tool>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.tool.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Anything the model can address by name.
#[derive(Debug, Clone)]
pub enum Callable {
    Function(FunctionSpec),
    SubAgent(Arc<AgentDefinition>),
}

pub struct AgentDefinition {
    name: String,
    description: String,
    instructions: String,
    model: ModelSelector,
    callables: BTreeMap<String, Callable>,
    input_schema: Option<serde_json::Value>,
    output_schema: Option<serde_json::Value>,
}

impl AgentDefinition {
    /// Start building an agent. The name is normalised to a lowercase slug.
    pub fn builder(name: impl Into<String>) -> AgentDefinitionBuilder {
        AgentDefinitionBuilder {
            name: name.into(),
            description: None,
            instructions: String::new(),
            model: None,
            functions: Vec::new(),
            sub_agents: Vec::new(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn model(&self) -> &ModelSelector {
        &self.model
    }

    pub fn input_schema(&self) -> Option<&serde_json::Value> {
        self.input_schema.as_ref()
    }

    pub fn output_schema(&self) -> Option<&serde_json::Value> {
        self.output_schema.as_ref()
    }

    /// Look up a function or sub-agent by name.
    pub fn lookup(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }

    pub fn callables(&self) -> impl Iterator<Item = (&str, &Callable)> {
        self.callables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn sub_agents(&self) -> impl Iterator<Item = &Arc<AgentDefinition>> {
        self.callables.values().filter_map(|c| match c {
            Callable::SubAgent(agent) => Some(agent),
            Callable::Function(_) => None,
        })
    }

    /// The actions advertised to the model, in name order.
    pub fn action_catalog(&self) -> Vec<ActionDefinition> {
        self.callables
            .iter()
            .map(|(name, callable)| match callable {
                Callable::Function(spec) => ActionDefinition {
                    name: name.clone(),
                    description: spec.tool.description().to_string(),
                    parameters: spec.tool.parameters().schema.clone(),
                },
                Callable::SubAgent(agent) => ActionDefinition {
                    name: name.clone(),
                    description: agent.description.clone(),
                    parameters: agent.delegation_schema(),
                },
            })
            .collect()
    }

    /// Schema for delegating to this agent: its input schema, or a single
    /// free-text `request`.
    pub fn delegation_schema(&self) -> serde_json::Value {
        self.input_schema.clone().unwrap_or_else(|| {
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": format!("The task for the {} agent", self.name),
                    }
                },
                "required": ["request"],
            })
        })
    }

    /// Tree of agent names below (and including) this one.
    pub fn hierarchy(&self) -> serde_json::Value {
        let children: Vec<serde_json::Value> = self.sub_agents().map(|a| a.hierarchy()).collect();
        json!({ "name": self.name, "sub_agents": children })
    }

    /// Length of the longest delegation chain starting here, counting this
    /// agent.
    pub fn chain_depth(&self) -> usize {
        1 + self.sub_agents().map(|a| a.chain_depth()).max().unwrap_or(0)
    }
}

impl fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("model", &self.model.to_string())
            .field("callables", &self.callables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`AgentDefinition`]. All validation happens in
/// [`build`](AgentDefinitionBuilder::build).
pub struct AgentDefinitionBuilder {
    name: String,
    description: Option<String>,
    instructions: String,
    model: Option<String>,
    functions: Vec<FunctionSpec>,
    sub_agents: Vec<Arc<AgentDefinition>>,
    input_schema: Option<serde_json::Value>,
    output_schema: Option<serde_json::Value>,
}

impl AgentDefinitionBuilder {
    /// Shown to a parent agent's model when this agent is a sub-agent.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// `provider:model_id`, or a bare id whose provider can be inferred.
    pub fn model(mut self, selector: impl Into<String>) -> Self {
        self.model = Some(selector.into());
        self
    }

    pub fn function(self, tool: impl Tool + 'static) -> Self {
        self.shared_function(Arc::new(tool), None)
    }

    pub fn function_with_timeout(self, tool: impl Tool + 'static, timeout: Duration) -> Self {
        self.shared_function(Arc::new(tool), Some(timeout))
    }

    pub fn shared_function(mut self, tool: Arc<dyn Tool>, timeout: Option<Duration>) -> Self {
        self.functions.push(FunctionSpec { tool, timeout });
        self
    }

    pub fn sub_agent(mut self, agent: impl Into<Arc<AgentDefinition>>) -> Self {
        self.sub_agents.push(agent.into());
        self
    }

    pub fn input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn build(self) -> Result<AgentDefinition, StrandError> {
        let invalid = |msg: String| StrandError::InvalidConfiguration(msg);

        let name = parameterize(&self.name);
        if name.is_empty() {
            return Err(invalid(format!(
                "agent name {:?} is empty after normalisation",
                self.name
            )));
        }
        if !is_valid_callable_name(&name) {
            return Err(invalid(format!("agent name '{name}' is too long")));
        }

        let model = match self.model {
            Some(raw) => ModelSelector::parse(&raw)
                .map_err(|e| invalid(format!("agent '{name}': {e}")))?,
            None => ModelSelector::default(),
        };

        for (label, schema) in [("input", &self.input_schema), ("output", &self.output_schema)] {
            if let Some(schema) = schema {
                if !schema.is_object() {
                    return Err(invalid(format!(
                        "agent '{name}': {label} schema must be a JSON object"
                    )));
                }
            }
        }

        let mut callables = BTreeMap::new();
        for spec in self.functions {
            let fn_name = spec.tool.name().to_string();
            if !is_valid_callable_name(&fn_name) {
                return Err(invalid(format!(
                    "agent '{name}': invalid function name {fn_name:?}"
                )));
            }
            if callables.contains_key(&fn_name) {
                return Err(invalid(format!(
                    "agent '{name}': duplicate function '{fn_name}'"
                )));
            }
            callables.insert(fn_name, Callable::Function(spec));
        }
        for agent in self.sub_agents {
            let sub_name = agent.name.clone();
            match callables.get(&sub_name) {
                Some(Callable::Function(_)) => {
                    return Err(invalid(format!(
                        "agent '{name}': sub-agent '{sub_name}' collides with a function of the same name"
                    )))
                }
                Some(Callable::SubAgent(_)) => {
                    return Err(invalid(format!(
                        "agent '{name}': duplicate sub-agent '{sub_name}'"
                    )))
                }
                None => {}
            }
            callables.insert(sub_name, Callable::SubAgent(agent));
        }

        Ok(AgentDefinition {
            description: self
                .description
                .unwrap_or_else(|| format!("Delegate a task to the {name} agent")),
            name,
            instructions: self.instructions,
            model,
            callables,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
        })
    }
}
