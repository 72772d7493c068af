//! Typed field-selection trees.
//!
//! A query is an [`Operation`] holding top-level [`Field`]s; each field owns
//! its arguments and sub-selections. Arguments keep GraphQL literal kinds
//! (enums stay enums) so a rewritten operation renders back faithfully.

use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt::{self, Write};

use crate::error::MirrorError;

/// GraphQL input literal.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
    Variable(String),
}

impl InputValue {
    /// JSON view with variables substituted.
    pub fn to_json(&self, variables: &Map<String, Value>) -> Result<Value, MirrorError> {
        Ok(match self {
            InputValue::Null => Value::Null,
            InputValue::Bool(b) => Value::Bool(*b),
            InputValue::Int(i) => Value::from(*i),
            InputValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            InputValue::String(s) | InputValue::Enum(s) => Value::String(s.clone()),
            InputValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.to_json(variables))
                    .collect::<Result<_, _>>()?,
            ),
            InputValue::Object(fields) => {
                let mut map = Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), value.to_json(variables)?);
                }
                Value::Object(map)
            }
            InputValue::Variable(name) => variables
                .get(name)
                .cloned()
                .ok_or_else(|| MirrorError::MissingVariable(name.clone()))?,
        })
    }
}

impl InputValue {
    fn collect_variables<'a>(&'a self, out: &mut HashSet<&'a str>) {
        match self {
            InputValue::Variable(name) => {
                out.insert(name.as_str());
            }
            InputValue::List(items) => items.iter().for_each(|i| i.collect_variables(out)),
            InputValue::Object(fields) => fields.iter().for_each(|(_, v)| v.collect_variables(out)),
            _ => {}
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Null => f.write_str("null"),
            InputValue::Bool(b) => write!(f, "{}", b),
            InputValue::Int(i) => write!(f, "{}", i),
            InputValue::Float(v) => write!(f, "{:?}", v),
            InputValue::String(s) => write!(f, "{}", Value::String(s.clone())),
            InputValue::Enum(e) => f.write_str(e),
            InputValue::Variable(v) => write!(f, "${}", v),
            InputValue::List(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_char(']')
            }
            InputValue::Object(fields) => {
                f.write_char('{')?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_char('}')
            }
        }
    }
}

/// One requested field with its sub-selections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub subfields: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_subfields(name: impl Into<String>, subfields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            subfields,
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    /// Key under which this field appears in a response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_leaf(&self) -> bool {
        self.subfields.is_empty()
    }

    pub fn subfield(&self, name: &str) -> Option<&Field> {
        self.subfields.iter().find(|f| f.name == name)
    }

    pub fn subfield_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.subfields.iter_mut().find(|f| f.name == name)
    }

    /// Arguments as a JSON object with variables substituted.
    pub fn arguments_json(&self, variables: &Map<String, Value>) -> Result<Map<String, Value>, MirrorError> {
        let mut map = Map::new();
        for (name, value) in &self.arguments {
            map.insert(name.clone(), value.to_json(variables)?);
        }
        Ok(map)
    }

    fn render(&self, out: &mut String) {
        if let Some(alias) = &self.alias {
            let _ = write!(out, "{}: ", alias);
        }
        out.push_str(&self.name);
        if !self.arguments.is_empty() {
            out.push('(');
            for (i, (name, value)) in self.arguments.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: {}", name, value);
            }
            out.push(')');
        }
        if !self.subfields.is_empty() {
            render_selection_set(&self.subfields, out);
        }
    }
}

fn render_selection_set(fields: &[Field], out: &mut String) {
    out.push_str(" { ");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        field.render(out);
    }
    out.push_str(" }");
}

/// Declared variable of a named operation, kept verbatim for re-rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub type_name: String,
    pub default_value: Option<InputValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

/// A parsed operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub selections: Vec<Field>,
}

impl Operation {
    pub fn new(selections: Vec<Field>) -> Self {
        Self {
            selections,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Names of the variables used anywhere in the selections.
    pub fn referenced_variables(&self) -> HashSet<&str> {
        fn walk<'a>(fields: &'a [Field], out: &mut HashSet<&'a str>) {
            for field in fields {
                for (_, value) in &field.arguments {
                    value.collect_variables(out);
                }
                walk(&field.subfields, out);
            }
        }
        let mut out = HashSet::new();
        walk(&self.selections, &mut out);
        out
    }

    /// Drops variable definitions no remaining selection uses.
    pub fn prune_unused_variables(&mut self) {
        let used: HashSet<String> = self
            .referenced_variables()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.variable_definitions.retain(|def| used.contains(&def.name));
    }

    /// Renders the operation back into a query document.
    pub fn to_query_string(&self) -> String {
        let mut out = String::from(self.kind.keyword());
        if let Some(name) = &self.name {
            let _ = write!(out, " {}", name);
        }
        if !self.variable_definitions.is_empty() {
            out.push('(');
            for (i, def) in self.variable_definitions.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "${}: {}", def.name, def.type_name);
                if let Some(default) = &def.default_value {
                    let _ = write!(out, " = {}", default);
                }
            }
            out.push(')');
        }
        render_selection_set(&self.selections, &mut out);
        out
    }
}
