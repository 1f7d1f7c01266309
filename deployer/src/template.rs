//! Typed CloudFormation resources and the dependency graph between them.
//!
//! A [Resource] never names its dependencies directly: they are discovered from the
//! intrinsics (`Ref`, `Fn::GetAtt`, `Fn::Sub`) inside its properties, plus any explicit
//! `DependsOn` edges. [Template::validate] checks the resulting graph and
//! [Template::order] walks it.

use crate::Error;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Version string every template declares.
const FORMAT_VERSION: &str = "2010-09-09";

/// Prefix of pseudo parameters (`AWS::Region`, ...), which are not resources.
const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

/// `{"Ref": id}`
pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// `{"Fn::Select": [index, list]}`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index.to_string(), list] })
}

/// Availability zones of the stack's region.
pub fn availability_zones() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// `count` blocks of `bits` host bits each, carved out of `block`.
pub fn cidr(block: Value, count: usize, bits: u8) -> Value {
    json!({ "Fn::Cidr": [block, count.to_string(), bits.to_string()] })
}

/// `{"Fn::Base64": value}`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// Tag list with a `Name` and an environment tag.
pub fn tags(name: &str, environment: &str) -> Value {
    json!([
        { "Key": "Name", "Value": name },
        { "Key": "webstack:environment", "Value": environment },
    ])
}

/// A single resource of a template.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub logical_id: String,
    pub kind: String,
    pub properties: Value,
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(logical_id: &str, kind: &str, properties: Value) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            kind: kind.to_string(),
            properties,
            depends_on: Vec::new(),
        }
    }

    /// Adds an explicit ordering edge.
    pub fn depends_on(mut self, id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == id) {
            self.depends_on.push(id.to_string());
        }
        self
    }

    /// Resources referenced from the properties.
    pub fn references(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        collect_references(&self.properties, &mut found);
        found
    }

    /// Every resource that must exist before this one.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut dependencies = self.references();
        dependencies.extend(self.depends_on.iter().cloned());
        dependencies
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("Type".into(), Value::String(self.kind.clone()));
        if !self.depends_on.is_empty() {
            body.insert("DependsOn".into(), json!(self.depends_on));
        }
        if !self.properties.is_null() {
            body.insert("Properties".into(), self.properties.clone());
        }
        Value::Object(body)
    }
}

fn collect_references(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    if !id.starts_with(PSEUDO_PARAMETER_PREFIX) {
                        found.insert(id.clone());
                    }
                    return;
                }
                match map.get("Fn::GetAtt") {
                    Some(Value::Array(parts)) => {
                        if let Some(Value::String(id)) = parts.first() {
                            found.insert(id.clone());
                        }
                        return;
                    }
                    Some(Value::String(path)) => {
                        if let Some((id, _)) = path.split_once('.') {
                            found.insert(id.to_string());
                        }
                        return;
                    }
                    _ => {}
                }
                match map.get("Fn::Sub") {
                    Some(Value::String(template)) => {
                        collect_substitutions(template, &BTreeSet::new(), found);
                        return;
                    }
                    Some(Value::Array(parts)) => {
                        // Names bound by the variable map are not resources.
                        let bound = match parts.get(1) {
                            Some(Value::Object(vars)) => {
                                for var in vars.values() {
                                    collect_references(var, found);
                                }
                                vars.keys().cloned().collect()
                            }
                            _ => BTreeSet::new(),
                        };
                        if let Some(Value::String(template)) = parts.first() {
                            collect_substitutions(template, &bound, found);
                        }
                        return;
                    }
                    _ => {}
                }
            }
            for nested in map.values() {
                collect_references(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

/// Collects `${Id}` and `${Id.Attribute}` from a `Fn::Sub` template (`${!Literal}` is escaped).
fn collect_substitutions(template: &str, bound: &BTreeSet<String>, found: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        let Some(end) = rest.find('}') else {
            break;
        };
        let name = &rest[..end];
        rest = &rest[end + 1..];
        if name.starts_with('!') || name.starts_with(PSEUDO_PARAMETER_PREFIX) {
            continue;
        }
        let id = name.split_once('.').map_or(name, |(id, _)| id);
        if !id.is_empty() && !bound.contains(id) {
            found.insert(id.to_string());
        }
    }
}

/// A stack output.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
    pub name: String,
    pub description: String,
    pub value: Value,
    pub export: Option<String>,
}

/// Insertion-ordered resources and outputs of one stack.
#[derive(Clone, Debug, Default)]
pub struct Template {
    description: String,
    resources: Vec<Resource>,
    outputs: Vec<Output>,
}

impl Template {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            resources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds a resource and returns its logical ID.
    pub fn add(&mut self, resource: Resource) -> String {
        let id = resource.logical_id.clone();
        self.resources.push(resource);
        id
    }

    pub fn output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.push(Output {
            name: name.to_string(),
            description: description.to_string(),
            value,
            export: None,
        });
    }

    /// Adds an output that other stacks can import by `export`.
    pub fn export(&mut self, name: &str, description: &str, value: Value, export: &str) {
        self.outputs.push(Output {
            name: name.to_string(),
            description: description.to_string(),
            value,
            export: Some(export.to_string()),
        });
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.logical_id == id)
    }

    /// Rejects invalid or duplicate IDs, references to undeclared resources, and cycles.
    pub fn validate(&self) -> Result<(), Error> {
        let mut ids = BTreeSet::new();
        for resource in &self.resources {
            let id = &resource.logical_id;
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::InvalidLogicalId(id.clone()));
            }
            if !ids.insert(id.as_str()) {
                return Err(Error::DuplicateResource(id.clone()));
            }
        }
        for resource in &self.resources {
            for target in resource.dependencies() {
                if !ids.contains(target.as_str()) {
                    return Err(Error::DanglingReference {
                        resource: resource.logical_id.clone(),
                        target,
                    });
                }
            }
        }
        let mut names = BTreeSet::new();
        for output in &self.outputs {
            if !names.insert(output.name.as_str()) {
                return Err(Error::DuplicateOutput(output.name.clone()));
            }
            let mut referenced = BTreeSet::new();
            collect_references(&output.value, &mut referenced);
            if let Some(target) = referenced.into_iter().find(|t| !ids.contains(t.as_str())) {
                return Err(Error::DanglingReference {
                    resource: output.name.clone(),
                    target,
                });
            }
        }
        self.order().map(|_| ())
    }

    /// Resources in dependency order. Among resources whose dependencies are satisfied, the
    /// one declared first comes first, so the order is stable across runs.
    pub fn order(&self) -> Result<Vec<&Resource>, Error> {
        let index: BTreeMap<&str, usize> = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.logical_id.as_str(), i))
            .collect();

        // Dangling edges are reported by validate; here they are ignored.
        let mut pending = vec![0usize; self.resources.len()];
        let mut dependents = vec![Vec::new(); self.resources.len()];
        for (i, resource) in self.resources.iter().enumerate() {
            for dependency in resource.dependencies() {
                if let Some(&j) = index.get(dependency.as_str()) {
                    pending[i] += 1;
                    dependents[j].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.resources.len())
            .filter(|&i| pending[i] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(self.resources.len());
        while let Some(i) = ready.pop_first() {
            ordered.push(&self.resources[i]);
            for &dependent in &dependents[i] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if ordered.len() != self.resources.len() {
            let cycle = self
                .resources
                .iter()
                .enumerate()
                .filter(|(i, _)| pending[*i] > 0)
                .map(|(_, r)| r.logical_id.clone())
                .collect();
            return Err(Error::DependencyCycle(cycle));
        }
        Ok(ordered)
    }

    /// Renders the template document after validating it.
    pub fn to_json(&self) -> Result<Value, Error> {
        self.validate()?;
        let mut resources = Map::new();
        for resource in &self.resources {
            resources.insert(resource.logical_id.clone(), resource.to_json());
        }
        let mut document = Map::new();
        document.insert("AWSTemplateFormatVersion".into(), json!(FORMAT_VERSION));
        document.insert("Description".into(), json!(self.description));
        document.insert("Resources".into(), Value::Object(resources));
        if !self.outputs.is_empty() {
            let mut outputs = Map::new();
            for output in &self.outputs {
                let mut body = Map::new();
                body.insert("Description".into(), json!(output.description));
                body.insert("Value".into(), output.value.clone());
                if let Some(export) = &output.export {
                    body.insert("Export".into(), json!({ "Name": export }));
                }
                outputs.insert(output.name.clone(), Value::Object(body));
            }
            document.insert("Outputs".into(), Value::Object(outputs));
        }
        Ok(Value::Object(document))
    }

    /// Pretty-printed template body.
    pub fn render(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }
}
