//! Parameter schemas for tools.

use serde::{Deserialize, Serialize};

/// JSON Schema describing a tool's arguments object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub schema: serde_json::Value,
}

impl ParameterSchema {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// An object schema with no parameters.
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder::default()
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builder for constructing tool parameter schemas.
#[derive(Debug, Default)]
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.typed(name, "string", description, required)
    }

    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.typed(name, "number", description, required)
    }

    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.typed(name, "integer", description, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.typed(name, "boolean", description, required)
    }

    /// Add a string property restricted to `values`.
    pub fn string_enum(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "string",
                "description": description.into(),
                "enum": values,
            }),
            required,
        )
    }

    /// Add an array property whose items are of `item_type`.
    pub fn array(
        self,
        name: impl Into<String>,
        item_type: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "array",
                "items": { "type": item_type },
                "description": description.into(),
            }),
            required,
        )
    }

    /// Add a property with an arbitrary schema.
    pub fn property(mut self, name: impl Into<String>, schema: serde_json::Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    fn typed(
        self,
        name: impl Into<String>,
        ty: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": ty,
                "description": description.into(),
            }),
            required,
        )
    }

    pub fn build(self) -> ParameterSchema {
        ParameterSchema {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
