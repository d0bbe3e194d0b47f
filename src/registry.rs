//! Operation registry.
//!
//! Maps (kind, name) onto a descriptor and a handler. Resources and tools get
//! the shared connection from the [`LifecycleContext`]; prompts are pure
//! functions of their arguments.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::connection::Connection;
use crate::error::{GatewayError, Result};
use crate::lifecycle::LifecycleContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Resource,
    Tool,
    Prompt,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Resource => "resource",
            OperationKind::Tool => "tool",
            OperationKind::Prompt => "prompt",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

/// What a registered operation is called and what it accepts.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    /// Operation name, or the URI template for resources.
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    /// JSON schema of the arguments object.
    pub input_schema: Map<String, Value>,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut input_schema = Map::new();
        input_schema.insert("type".into(), Value::from("object"));
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            input_schema,
        }
    }

    pub fn resource(template: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OperationKind::Resource, template, description)
    }

    pub fn tool(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OperationKind::Tool, name, description)
    }

    pub fn prompt(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OperationKind::Prompt, name, description)
    }

    /// Declare the parameter list from a typed parameter struct.
    ///
    /// Fails unless `T` describes an object with named properties.
    pub fn with_params<T: JsonSchema>(mut self) -> Result<Self> {
        let invalid = |reason: String| GatewayError::InvalidRegistration {
            name: self.name.clone(),
            reason,
        };

        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| invalid(format!("parameter schema could not be serialized: {e}")))?;
        let object = match schema {
            Value::Object(object) if object.get("properties").is_some_and(Value::is_object) => object,
            _ => return Err(invalid("parameters must be a struct with named fields".to_string())),
        };

        self.params = params_from_schema(&object);
        self.input_schema = object;
        Ok(self)
    }

    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

fn params_from_schema(schema: &Map<String, Value>) -> Vec<ParamSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| ParamSpec {
                    name: name.clone(),
                    description: property
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Arguments
// ============================================================================

/// Named string arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(BTreeMap<String, String>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a protocol arguments object; every value must be a string.
    pub fn from_json(operation: &str, object: Option<Map<String, Value>>) -> Result<Self> {
        let mut args = Self::new();
        for (name, value) in object.unwrap_or_default() {
            match value {
                Value::String(s) => args.insert(name, s),
                other => {
                    return Err(GatewayError::validation(
                        operation,
                        format!("parameter `{name}` must be a string, got {other}"),
                    ))
                }
            }
        }
        Ok(args)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Deserialize into a typed parameter struct.
    pub fn parse<T: DeserializeOwned>(&self, operation: &str) -> Result<T> {
        let object: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| GatewayError::validation(operation, e.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub type HandlerFuture = BoxFuture<'static, Result<String>>;

type ConnectedFn = dyn Fn(Arc<dyn Connection>, Arguments) -> HandlerFuture + Send + Sync;
type PureFn = dyn Fn(&Arguments) -> String + Send + Sync;

#[derive(Clone)]
pub enum Handler {
    /// Borrows the shared connection for the duration of the call.
    Connected(Arc<ConnectedFn>),
    /// No I/O; a function of the arguments alone.
    Pure(Arc<PureFn>),
}

impl Handler {
    pub fn connected<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn Connection>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Handler::Connected(Arc::new(
            move |conn: Arc<dyn Connection>, args: Arguments| -> HandlerFuture { f(conn, args).boxed() },
        ))
    }

    pub fn pure(f: impl Fn(&Arguments) -> String + Send + Sync + 'static) -> Self {
        Handler::Pure(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Connected(_) => f.write_str("Handler::Connected"),
            Handler::Pure(_) => f.write_str("Handler::Pure"),
        }
    }
}

// ============================================================================
// URI templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A `scheme://{var}/...` template with simple `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Option<Self> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let close = rest[open..].find('}')? + open;
            let name = &rest[open + 1..close];
            if name.is_empty() || matches!(segments.last(), Some(Segment::Var(_))) {
                return None;
            }
            segments.push(Segment::Var(name.to_string()));
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return None;
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Some(Self { segments })
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Extract variable values from a concrete URI. Values are non-empty.
    pub fn matches(&self, uri: &str) -> Option<Arguments> {
        let mut args = Arguments::new();
        let mut rest = uri;

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => rest = rest.strip_prefix(literal.as_str())?,
                Segment::Var(name) => {
                    let end = match self.segments.get(idx + 1) {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    if end == 0 {
                        return None;
                    }
                    args.insert(name.clone(), &rest[..end]);
                    rest = &rest[end..];
                }
            }
        }

        rest.is_empty().then_some(args)
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Operation {
    descriptor: OperationDescriptor,
    handler: Handler,
    template: Option<UriTemplate>,
}

/// Registered operations. Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct Registry {
    operations: Vec<Operation>,
    index: HashMap<(OperationKind, String), usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: OperationDescriptor, handler: Handler) -> Result<()> {
        let key = (descriptor.kind, descriptor.name.clone());
        if self.index.contains_key(&key) {
            return Err(GatewayError::DuplicateOperation {
                kind: descriptor.kind,
                name: descriptor.name,
            });
        }

        let invalid = |reason: &str| GatewayError::InvalidRegistration {
            name: descriptor.name.clone(),
            reason: reason.to_string(),
        };

        match (descriptor.kind, &handler) {
            (OperationKind::Prompt, Handler::Connected(_)) => {
                return Err(invalid("prompt handlers must not use the connection"))
            }
            (OperationKind::Resource | OperationKind::Tool, Handler::Pure(_)) => {
                return Err(invalid("resource and tool handlers take the connection"))
            }
            _ => {}
        }

        let template = match descriptor.kind {
            OperationKind::Resource => {
                let template = UriTemplate::parse(&descriptor.name)
                    .ok_or_else(|| invalid("malformed URI template"))?;
                let declared: Vec<&str> = descriptor.params.iter().map(|p| p.name.as_str()).collect();
                let placeholders: Vec<&str> = template.variables().collect();
                if placeholders != declared {
                    return Err(invalid("template placeholders must match the parameter list"));
                }
                Some(template)
            }
            _ => None,
        };

        tracing::debug!(kind = %descriptor.kind, name = %descriptor.name, "Registered operation");
        self.index.insert(key, self.operations.len());
        self.operations.push(Operation {
            descriptor,
            handler,
            template,
        });
        Ok(())
    }

    /// Descriptors of one kind, in registration order.
    pub fn descriptors(&self, kind: OperationKind) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations
            .iter()
            .map(|op| &op.descriptor)
            .filter(move |d| d.kind == kind)
    }

    pub fn descriptor(&self, kind: OperationKind, name: &str) -> Option<&OperationDescriptor> {
        self.lookup(kind, name).map(|op| &op.descriptor)
    }

    /// Find the resource template matching a concrete URI.
    pub fn resolve_resource(&self, uri: &str) -> Result<(&OperationDescriptor, Arguments)> {
        self.operations
            .iter()
            .filter_map(|op| {
                let args = op.template.as_ref()?.matches(uri)?;
                Some((&op.descriptor, args))
            })
            .next()
            .ok_or_else(|| GatewayError::not_found(OperationKind::Resource, uri))
    }

    /// Validate `args` against the declared parameters and invoke the handler.
    pub async fn dispatch(
        &self,
        ctx: &LifecycleContext,
        kind: OperationKind,
        name: &str,
        args: Arguments,
    ) -> Result<String> {
        let op = self
            .lookup(kind, name)
            .ok_or_else(|| GatewayError::not_found(kind, name))?;

        validate(&op.descriptor, &args)?;
        tracing::debug!(%kind, name, "Dispatching operation");

        match &op.handler {
            Handler::Connected(handler) => handler(ctx.connection(), args).await,
            Handler::Pure(handler) => Ok(handler(&args)),
        }
    }

    fn lookup(&self, kind: OperationKind, name: &str) -> Option<&Operation> {
        self.index
            .get(&(kind, name.to_string()))
            .map(|&idx| &self.operations[idx])
    }
}

fn validate(descriptor: &OperationDescriptor, args: &Arguments) -> Result<()> {
    if let Some(unknown) = args.names().find(|name| descriptor.param(name).is_none()) {
        return Err(GatewayError::validation(
            &descriptor.name,
            format!("unexpected parameter `{unknown}`"),
        ));
    }

    if let Some(missing) = descriptor
        .params
        .iter()
        .find(|p| p.required && args.get(&p.name).is_none())
    {
        return Err(GatewayError::validation(
            &descriptor.name,
            format!("missing required parameter `{}`", missing.name),
        ));
    }

    Ok(())
}
