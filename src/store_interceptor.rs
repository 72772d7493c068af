//! Answers servable query fields from the in-memory store.
//!
//! Before execution every top-level field matching a registered store query
//! is split into store fields and resolver fields (the store's
//! `missing_fields`). Fully servable fields are answered locally and removed
//! from the operation; partially servable ones are rewritten to the resolver
//! fields plus the identifier and merged back by identifier after execution.
//! When nothing is left for the resolver the query short-circuits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::freshness_monitor::{FreshnessMonitor, ReadinessStatus};
use crate::interceptor::{BeforeExecute, ExecutionContext, ExecutionInterceptor, QueryResponse};
use crate::metrics;
use crate::selection::{Field, OperationKind};
use crate::store_query::{QueryMeta, ServableStore};

/// A field rewritten to its resolver part, completed from the store afterwards.
struct PartialField {
    key: String,
    meta: &'static QueryMeta,
    store: Arc<dyn ServableStore>,
    arguments: Map<String, Value>,
    original: Field,
    /// Selections answered locally, identifier included.
    local_selection: Vec<Field>,
    forced_identifier: bool,
}

/// Interception state carried from `before_execute` to `after_execute`.
#[derive(Default)]
struct InterceptionPlan {
    /// Response keys in request order.
    order: Vec<String>,
    local: Vec<(String, Value)>,
    partial: Vec<PartialField>,
}

enum Claim {
    Declined,
    Local(Value),
    Partial { rewritten: Field, partial: PartialField },
}

pub struct StoreInterceptor {
    stores: Vec<Arc<dyn ServableStore>>,
    monitor: Arc<FreshnessMonitor>,
}

impl StoreInterceptor {
    pub fn new(stores: Vec<Arc<dyn ServableStore>>, monitor: Arc<FreshnessMonitor>) -> Self {
        Self { stores, monitor }
    }

    fn lookup(&self, query: &str) -> Option<(&Arc<dyn ServableStore>, &'static QueryMeta)> {
        self.stores
            .iter()
            .find_map(|store| store.query_meta(query).map(|meta| (store, meta)))
    }

    fn claim(&self, field: &Field, variables: &Map<String, Value>) -> Result<Claim> {
        let Some((store, meta)) = self.lookup(&field.name) else {
            return Ok(Claim::Declined);
        };
        let entity_fields = meta.entity_fields(field);
        if entity_fields.is_empty() {
            return Ok(Claim::Declined);
        }

        let (resolver_fields, store_fields): (Vec<Field>, Vec<Field>) = entity_fields
            .iter()
            .cloned()
            .partition(|f| meta.is_missing(&f.name));

        if !store.is_fresh_for(&store_fields, Utc::now()) {
            debug!("{} declined: backing groups are stale", field.name);
            return Ok(Claim::Declined);
        }

        let arguments = field.arguments_json(variables)?;

        if resolver_fields.is_empty() {
            let local = store.respond(&field.name, &arguments, &field.subfields)?;
            return Ok(Claim::Local(local));
        }

        let identifier = Field::new(meta.identifier_field);
        let forced_identifier = !entity_fields
            .iter()
            .any(|f| f.name == meta.identifier_field && f.alias.is_none());

        let mut sent = resolver_fields;
        if !sent.iter().any(|f| f == &identifier) {
            sent.push(identifier.clone());
        }
        let rewritten = meta.with_entity_fields(field, sent);

        let mut local_entity_fields = store_fields;
        if !local_entity_fields.iter().any(|f| f == &identifier) {
            local_entity_fields.push(identifier);
        }
        let local_selection = local_selection(meta, field, local_entity_fields);

        Ok(Claim::Partial {
            rewritten,
            partial: PartialField {
                key: field.response_key().to_string(),
                meta,
                store: Arc::clone(store),
                arguments,
                original: field.clone(),
                local_selection,
                forced_identifier,
            },
        })
    }

    fn plan(&self, ctx: &ExecutionContext) -> Result<(Vec<Field>, InterceptionPlan)> {
        let mut plan = InterceptionPlan::default();
        let mut remaining = Vec::with_capacity(ctx.operation.selections.len());

        for field in &ctx.operation.selections {
            plan.order.push(field.response_key().to_string());
            match self.claim(field, &ctx.variables)? {
                Claim::Declined => {
                    metrics::increment_interceptions("declined");
                    remaining.push(field.clone());
                }
                Claim::Local(value) => {
                    metrics::increment_interceptions("local");
                    plan.local.push((field.response_key().to_string(), value));
                }
                Claim::Partial { rewritten, partial } => {
                    metrics::increment_interceptions("partial");
                    remaining.push(rewritten);
                    plan.partial.push(partial);
                }
            }
        }
        Ok((remaining, plan))
    }
}

#[async_trait]
impl ExecutionInterceptor for StoreInterceptor {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<BeforeExecute> {
        if ctx.operation.kind != OperationKind::Query {
            return Ok(BeforeExecute::Continue);
        }
        if self.monitor.status() != ReadinessStatus::Done {
            return Ok(BeforeExecute::Continue);
        }

        let (remaining, plan) = self.plan(ctx)?;
        if plan.local.is_empty() && plan.partial.is_empty() {
            return Ok(BeforeExecute::Continue);
        }

        if remaining.is_empty() {
            debug!("query answered from store");
            return Ok(BeforeExecute::ShortCircuit(plan.local.into_iter().collect()));
        }

        ctx.operation.selections = remaining;
        ctx.insert_extension(plan);
        Ok(BeforeExecute::Continue)
    }

    async fn after_execute(
        &self,
        ctx: &mut ExecutionContext,
        response: &mut QueryResponse,
    ) -> Result<()> {
        let Some(plan) = ctx.take_extension::<InterceptionPlan>() else {
            return Ok(());
        };
        let data = response.data.get_or_insert_with(Map::new);

        for partial in &plan.partial {
            match data.get_mut(&partial.key) {
                None | Some(Value::Null) => {
                    let local = partial.store.respond(
                        &partial.original.name,
                        &partial.arguments,
                        &partial.original.subfields,
                    )?;
                    data.insert(partial.key.clone(), local);
                }
                Some(resolved) => {
                    let local = partial.store.respond(
                        &partial.original.name,
                        &partial.arguments,
                        &partial.local_selection,
                    )?;
                    merge_partial(resolved, &local, partial.meta, partial.forced_identifier);
                }
            }
        }

        for (key, value) in plan.local {
            data.insert(key, value);
        }
        reorder(data, &plan.order);
        Ok(())
    }
}

/// Selection used to compute the local half of a partially servable field.
fn local_selection(meta: &QueryMeta, field: &Field, entity_fields: Vec<Field>) -> Vec<Field> {
    if !meta.is_connection() {
        return entity_fields;
    }
    let mut subfields = field.subfields.clone();
    if let Some(node) = subfields
        .iter_mut()
        .find(|f| f.name == "edges")
        .and_then(|edges| edges.subfield_mut("node"))
    {
        node.subfields = entity_fields;
    }
    subfields
}

/// Fills keys missing from `target` with the values of `source`.
fn fill_missing(target: &mut Value, source: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (target, source) {
        for (key, value) in source {
            if !target.contains_key(key) {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn identifier_of<'a>(entity: &'a Value, identifier: &str) -> Option<&'a str> {
    entity.get(identifier).and_then(Value::as_str)
}

fn strip_identifier(entity: &mut Value, identifier: &str) {
    if let Value::Object(map) = entity {
        map.remove(identifier);
    }
}

/// Merges the local half into the resolver half by identifier, resolver
/// values winning on overlapping keys.
fn merge_partial(resolved: &mut Value, local: &Value, meta: &QueryMeta, forced_identifier: bool) {
    let identifier = meta.identifier_field;
    if meta.is_connection() {
        let local_edges: HashMap<&str, &Value> = local
            .get("edges")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|edge| {
                edge.get("node")
                    .and_then(|node| identifier_of(node, identifier))
                    .map(|id| (id, edge))
            })
            .collect();

        if let Some(edges) = resolved.get_mut("edges").and_then(Value::as_array_mut) {
            for edge in edges.iter_mut() {
                let id = edge
                    .get("node")
                    .and_then(|node| identifier_of(node, identifier))
                    .map(str::to_string);
                if let Some(local_edge) = id.as_deref().and_then(|id| local_edges.get(id)) {
                    if let (Some(node), Some(local_node)) =
                        (edge.get_mut("node"), local_edge.get("node"))
                    {
                        fill_missing(node, local_node);
                    }
                    fill_missing(edge, local_edge);
                }
                if forced_identifier {
                    if let Some(node) = edge.get_mut("node") {
                        strip_identifier(node, identifier);
                    }
                }
            }
        }
        fill_missing(resolved, local);
        return;
    }

    let local_items: HashMap<&str, &Value> = local
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| identifier_of(item, identifier).map(|id| (id, item)))
        .collect();

    if let Some(items) = resolved.as_array_mut() {
        for item in items.iter_mut() {
            let id = identifier_of(item, identifier).map(str::to_string);
            if let Some(local_item) = id.as_deref().and_then(|id| local_items.get(id)) {
                fill_missing(item, local_item);
            }
            if forced_identifier {
                strip_identifier(item, identifier);
            }
        }
    }
}

/// Restores request order of the top-level keys; unknown keys keep their place at the end.
fn reorder(data: &mut Map<String, Value>, order: &[String]) {
    let mut rest = std::mem::take(data);
    for key in order {
        if let Some(value) = rest.remove(key) {
            data.insert(key.clone(), value);
        }
    }
    data.extend(rest);
}
