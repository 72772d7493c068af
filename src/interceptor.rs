//! Query execution pipeline with before/after interceptors.
//!
//! A [`QueryPipeline`] parses an incoming `{ query, variables }` request into
//! an [`Operation`], lets every registered [`ExecutionInterceptor`] inspect or
//! rewrite it, sends whatever is left to the authoritative [`Resolver`] and
//! then runs the after hooks in reverse registration order.
//!
//! Hook failures never fail the query while the resolver is available:
//! - a `before_execute` error restores the operation as it was before that
//!   interceptor ran and skips its `after_execute`
//! - an `after_execute` error discards the rewritten result and resolves the
//!   original document once more

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::query_parser::parse_query;
use crate::selection::Operation;

/// Request body accepted by the pipeline and forwarded to resolvers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Standard GraphQL response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

impl QueryResponse {
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

/// Per-query state shared by all interceptors.
pub struct ExecutionContext {
    pub operation: Operation,
    pub variables: Map<String, Value>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    pub fn new(operation: Operation, variables: Map<String, Value>) -> Self {
        Self {
            operation,
            variables,
            extensions: HashMap::new(),
        }
    }

    pub fn insert_extension<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn take_extension<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }
}

/// Outcome of a `before_execute` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeExecute {
    Continue,
    /// Complete `data` for the query; the resolver is skipped.
    ShortCircuit(Map<String, Value>),
}

#[async_trait]
pub trait ExecutionInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<BeforeExecute>;

    async fn after_execute(&self, ctx: &mut ExecutionContext, response: &mut QueryResponse)
        -> Result<()>;
}

/// Authoritative resolution of a query document.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, request: &GraphQlRequest) -> Result<QueryResponse>;
}

/// Interceptors in registration order.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ExecutionInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: Arc<dyn ExecutionInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

pub struct QueryPipeline {
    chain: InterceptorChain,
    resolver: Arc<dyn Resolver>,
}

impl QueryPipeline {
    pub fn new(chain: InterceptorChain, resolver: Arc<dyn Resolver>) -> Self {
        Self { chain, resolver }
    }

    pub async fn execute(&self, request: GraphQlRequest) -> Result<QueryResponse> {
        let operation = match parse_query(&request.query) {
            Ok(op) => op,
            Err(e) => {
                debug!("query not parsed, forwarding unchanged: {}", e);
                return self.resolver.resolve(&request).await;
            }
        };

        let original = operation.clone();
        let mut ctx = ExecutionContext::new(operation, request.variables.clone());
        let mut active: Vec<&Arc<dyn ExecutionInterceptor>> = Vec::new();
        let mut short_circuit = None;

        for interceptor in &self.chain.interceptors {
            let before = ctx.operation.clone();
            match interceptor.before_execute(&mut ctx).await {
                Ok(BeforeExecute::Continue) => active.push(interceptor),
                Ok(BeforeExecute::ShortCircuit(data)) => {
                    active.push(interceptor);
                    short_circuit = Some(data);
                    break;
                }
                Err(e) => {
                    warn!(
                        "⚠️ interceptor {} failed before execution, using normal resolution: {:#}",
                        interceptor.name(),
                        e
                    );
                    metrics::increment_interceptor_errors("before_execute");
                    ctx.operation = before;
                }
            }
        }

        let mut response = match short_circuit {
            Some(data) => QueryResponse::from_data(data),
            None if ctx.operation == original => self.resolver.resolve(&request).await?,
            None => {
                // Variables used only by removed fields must not stay declared.
                let mut operation = ctx.operation.clone();
                operation.prune_unused_variables();
                let used = operation.referenced_variables();
                let variables = request
                    .variables
                    .iter()
                    .filter(|(name, _)| used.contains(name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                let rewritten = GraphQlRequest {
                    query: operation.to_query_string(),
                    variables,
                };
                debug!("resolving rewritten query: {}", rewritten.query);
                self.resolver.resolve(&rewritten).await?
            }
        };

        for interceptor in active.into_iter().rev() {
            if let Err(e) = interceptor.after_execute(&mut ctx, &mut response).await {
                warn!(
                    "⚠️ interceptor {} failed after execution, resolving original query: {:#}",
                    interceptor.name(),
                    e
                );
                metrics::increment_interceptor_errors("after_execute");
                return self.resolver.resolve(&request).await;
            }
        }

        Ok(response)
    }
}

/// Resolver forwarding documents to a remote GraphQL endpoint.
pub struct RemoteGraphQlResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteGraphQlResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Resolver for RemoteGraphQlResolver {
    async fn resolve(&self, request: &GraphQlRequest) -> Result<QueryResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("graphql request to {} failed", self.endpoint))?
            .error_for_status()
            .context("graphql endpoint returned an error status")?;
        response
            .json::<QueryResponse>()
            .await
            .context("invalid graphql response body")
    }
}
