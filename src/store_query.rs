//! Filter, sort and paginate engine over the in-memory collections.
//!
//! Every entity kind implements [`QueryableStore`] with its own static query
//! registry, filter shape and sort keys. The shared algorithm lives in the
//! blanket [`ServableStore`] implementation: resolve the query, parse the
//! arguments, filter in a fixed order, sort by one decimal key, window, and
//! project.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::MirrorError;
use crate::global_state::EntityCollection;
use crate::pagination::{connection_page, ConnectionArgs, Window};
use crate::projection::{project, project_entity};
use crate::selection::Field;
use crate::types::decimal::{compare_amounts, value_to_decimal};
use crate::types::{EntityKind, EntitySnapshot, FieldGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// Plain list with `offset`/`limit`.
    List,
    /// Cursor-paginated `edges { node }` page.
    Connection,
}

/// Registry entry for one servable top-level query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryMeta {
    pub name: &'static str,
    pub shape: QueryShape,
    /// Field identifying a member, used to merge partial results.
    pub identifier_field: &'static str,
    /// Fields this store never holds; requesting them needs normal resolution.
    pub missing_fields: &'static [&'static str],
    pub sortable: bool,
}

impl QueryMeta {
    pub fn is_connection(&self) -> bool {
        self.shape == QueryShape::Connection
    }

    pub fn is_missing(&self, field: &str) -> bool {
        self.missing_fields.contains(&field)
    }

    /// Entity-level selections of a top-level field: the field's own
    /// sub-selections for lists, `edges.node` for connections.
    pub fn entity_fields<'a>(&self, selection: &'a Field) -> &'a [Field] {
        match self.shape {
            QueryShape::List => &selection.subfields,
            QueryShape::Connection => selection
                .subfield("edges")
                .and_then(|edges| edges.subfield("node"))
                .map(|node| node.subfields.as_slice())
                .unwrap_or(&[]),
        }
    }

    /// Copy of `selection` whose entity-level selections are replaced by `fields`.
    /// For connections everything but `edges.node` is dropped.
    pub fn with_entity_fields(&self, selection: &Field, fields: Vec<Field>) -> Field {
        let mut rewritten = Field {
            alias: selection.alias.clone(),
            name: selection.name.clone(),
            arguments: selection.arguments.clone(),
            subfields: Vec::new(),
        };
        rewritten.subfields = match self.shape {
            QueryShape::List => fields,
            QueryShape::Connection => vec![Field::with_subfields(
                "edges",
                vec![Field::with_subfields("node", fields)],
            )],
        };
        rewritten
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// `sorting` argument of sortable queries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortingArgs {
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Paging {
    OffsetLimit { offset: usize, limit: usize },
    Connection(ConnectionArgs),
}

/// Typed arguments of one query invocation.
#[derive(Debug, Clone)]
pub struct QueryArgs<F> {
    pub filters: F,
    pub sorting: Option<SortingArgs>,
    pub paging: Paging,
}

/// Per-kind store contract: static registry, filters and sort keys.
pub trait QueryableStore: Send + Sync {
    type Entity: EntitySnapshot;
    type Filters: fmt::Debug;
    type SortField: Copy + fmt::Debug;

    fn entity_kind(&self) -> EntityKind;

    fn queries(&self) -> &'static [QueryMeta];

    fn collection(&self) -> &EntityCollection<Self::Entity>;

    /// GraphQL type of one entity.
    fn entity_type(&self) -> &'static str;

    /// GraphQL type of a connection page.
    fn connection_type(&self) -> &'static str;

    fn parse_filters(
        &self,
        meta: &QueryMeta,
        args: &Map<String, Value>,
    ) -> Result<Self::Filters, MirrorError>;

    /// Applies every predicate, in a fixed order.
    fn apply_filters(&self, entities: Vec<Self::Entity>, filters: &Self::Filters) -> Vec<Self::Entity>;

    fn sort_field(&self, name: &str) -> Option<Self::SortField>;

    fn sort_key(&self, entity: &Self::Entity, field: Self::SortField) -> Option<BigDecimal>;

    fn default_limit(&self) -> usize {
        500
    }

    fn default_page_size(&self) -> usize {
        10
    }
}

/// Object-safe view used by the interception layer.
pub trait ServableStore: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn query_meta(&self, name: &str) -> Option<&'static QueryMeta>;

    /// Answers `query` from the store with exactly `fields` projected.
    fn respond(
        &self,
        query: &str,
        args: &Map<String, Value>,
        fields: &[Field],
    ) -> Result<Value, MirrorError>;

    /// `true` when every entity is fresh for the groups backing `entity_fields`.
    fn is_fresh_for(&self, entity_fields: &[Field], now: DateTime<Utc>) -> bool;
}

impl<S: QueryableStore> ServableStore for S {
    fn kind(&self) -> EntityKind {
        self.entity_kind()
    }

    fn query_meta(&self, name: &str) -> Option<&'static QueryMeta> {
        self.queries().iter().find(|q| q.name == name)
    }

    fn respond(
        &self,
        query: &str,
        args: &Map<String, Value>,
        fields: &[Field],
    ) -> Result<Value, MirrorError> {
        let meta = self
            .query_meta(query)
            .ok_or_else(|| MirrorError::UnknownQuery(query.to_string()))?;
        let parsed = parse_query_args(self, meta, args)?;

        let mut entities = self.apply_filters(self.collection().get_all(), &parsed.filters);
        if let Some(sorting) = &parsed.sorting {
            sort_entities(self, &mut entities, sorting);
        }

        let total = entities.len();
        match parsed.paging {
            Paging::OffsetLimit { offset, limit } => {
                let window = Window::offset_limit(offset, limit, total);
                entities[window.range()]
                    .iter()
                    .map(|e| project_entity(e, fields, self.entity_type()))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Paging::Connection(pagination) => {
                let window =
                    Window::from_connection_args(&pagination, total, self.default_page_size())?;
                let nodes = entities[window.range()]
                    .iter()
                    .map(|e| serde_json::to_value(e).map_err(|e| MirrorError::Projection(e.to_string())))
                    .collect::<Result<Vec<_>, _>>()?;
                let page = connection_page(nodes, &window, total);
                Ok(project(&page, fields, self.connection_type()))
            }
        }
    }

    fn is_fresh_for(&self, entity_fields: &[Field], now: DateTime<Utc>) -> bool {
        let groups = backing_groups::<<S::Entity as EntitySnapshot>::Group>(entity_fields);
        self.collection().all_fresh(&groups, now)
    }
}

/// Distinct field groups behind a set of entity-level fields.
pub fn backing_groups<G: FieldGroup>(fields: &[Field]) -> Vec<G> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .filter_map(|f| G::of_field(&f.name))
        .filter(|g| seen.insert(*g))
        .collect()
}

fn parse_query_args<S: QueryableStore + ?Sized>(
    store: &S,
    meta: &QueryMeta,
    args: &Map<String, Value>,
) -> Result<QueryArgs<S::Filters>, MirrorError> {
    let filters = store.parse_filters(meta, args)?;
    let sorting = if meta.sortable {
        optional_arg::<SortingArgs>(meta, args, "sorting")?
    } else {
        None
    };
    let paging = match meta.shape {
        QueryShape::List => Paging::OffsetLimit {
            offset: optional_arg::<usize>(meta, args, "offset")?.unwrap_or(0),
            limit: optional_arg::<usize>(meta, args, "limit")?.unwrap_or(store.default_limit()),
        },
        QueryShape::Connection => Paging::Connection(
            optional_arg::<ConnectionArgs>(meta, args, "pagination")?.unwrap_or_default(),
        ),
    };
    Ok(QueryArgs {
        filters,
        sorting,
        paging,
    })
}

/// Decodes `args[name]`, treating absent and `null` alike.
pub fn optional_arg<T: DeserializeOwned>(
    meta: &QueryMeta,
    args: &Map<String, Value>,
    name: &str,
) -> Result<Option<T>, MirrorError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| MirrorError::invalid_arguments(meta.name, format!("{}: {}", name, e))),
    }
}

/// Decodes a filter object: the top-level arguments for lists, `filters` for connections.
pub fn filter_object<T: DeserializeOwned + Default>(
    meta: &QueryMeta,
    args: &Map<String, Value>,
) -> Result<T, MirrorError> {
    match meta.shape {
        QueryShape::List => serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| MirrorError::invalid_arguments(meta.name, e)),
        QueryShape::Connection => Ok(optional_arg(meta, args, "filters")?.unwrap_or_default()),
    }
}

// Unsupported sort fields leave the collection in store order.
fn sort_entities<S: QueryableStore + ?Sized>(
    store: &S,
    entities: &mut Vec<S::Entity>,
    sorting: &SortingArgs,
) {
    let Some(field) = sorting.sort_field.as_deref().and_then(|name| store.sort_field(name)) else {
        return;
    };
    let mut keyed: Vec<(Option<BigDecimal>, S::Entity)> = entities
        .drain(..)
        .map(|e| (store.sort_key(&e, field), e))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| match sorting.sort_order {
        SortOrder::Asc => compare_amounts(a.as_ref(), b.as_ref()),
        SortOrder::Desc => compare_amounts(b.as_ref(), a.as_ref()),
    });
    entities.extend(keyed.into_iter().map(|(_, e)| e));
}

/// Accepts either a single value or a list for list-typed filter fields.
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    }))
}

/// Decimal filter thresholds given as JSON numbers or decimal strings.
pub fn optional_decimal<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value_to_decimal(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("not a decimal: {}", value))),
    }
}

/// Case-insensitive substring match used by `searchToken` filters.
pub fn matches_search(needle: &str, haystacks: &[Option<&str>]) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    haystacks
        .iter()
        .flatten()
        .any(|h| h.to_lowercase().contains(&needle))
}
