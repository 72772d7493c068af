//! Field projection of raw snapshots into response objects.
//!
//! Output keys are exactly the requested response keys at every depth.
//! Missing raw values project to `null`; unknown parent/field pairs resolve
//! to [`UNKNOWN_TYPE`] since the upstream schema evolves independently.

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::MirrorError;
use crate::selection::Field;

/// Meta-field naming the declared type of the enclosing object.
pub const TYPENAME_FIELD: &str = "__typename";

/// Type name reported for nested objects missing from [`SCHEMA_SHAPE`].
pub const UNKNOWN_TYPE: &str = "Unknown";

pub const PAIR_TYPE: &str = "PairModel";
pub const TOKEN_TYPE: &str = "EsdtToken";
pub const PAIRS_CONNECTION_TYPE: &str = "PairsResponse";
pub const TOKENS_CONNECTION_TYPE: &str = "TokensResponse";

/// Static `parent type -> field -> child type` table for every nested object
/// the store serves.
pub static SCHEMA_SHAPE: Lazy<HashMap<&'static str, HashMap<&'static str, &'static str>>> =
    Lazy::new(|| {
        let table: &[(&str, &[(&str, &str)])] = &[
            (
                "Query",
                &[
                    ("pairs", PAIR_TYPE),
                    ("filteredPairs", PAIRS_CONNECTION_TYPE),
                    ("tokens", TOKEN_TYPE),
                    ("filteredTokens", TOKENS_CONNECTION_TYPE),
                ],
            ),
            (
                PAIR_TYPE,
                &[
                    ("firstToken", TOKEN_TYPE),
                    ("secondToken", TOKEN_TYPE),
                    ("liquidityPoolToken", TOKEN_TYPE),
                    ("info", "PairInfoModel"),
                    ("lockedTokensInfo", "LockedTokensInfo"),
                ],
            ),
            ("LockedTokensInfo", &[("lockingSC", "SimpleLockModel")]),
            (
                TOKEN_TYPE,
                &[("assets", "AssetsModel"), ("roles", "RolesModel")],
            ),
            ("AssetsModel", &[("social", "SocialModel")]),
            (
                PAIRS_CONNECTION_TYPE,
                &[
                    ("edges", "PairModelEdge"),
                    ("pageInfo", "PageInfo"),
                    ("pageData", "PageData"),
                ],
            ),
            ("PairModelEdge", &[("node", PAIR_TYPE)]),
            (
                TOKENS_CONNECTION_TYPE,
                &[
                    ("edges", "EsdtTokenEdge"),
                    ("pageInfo", "PageInfo"),
                    ("pageData", "PageData"),
                ],
            ),
            ("EsdtTokenEdge", &[("node", TOKEN_TYPE)]),
        ];

        table
            .iter()
            .map(|(parent, fields)| (*parent, fields.iter().copied().collect()))
            .collect()
    });

/// Declared type of `parent.field`, or [`UNKNOWN_TYPE`].
pub fn child_type(parent: &str, field: &str) -> &'static str {
    SCHEMA_SHAPE
        .get(parent)
        .and_then(|fields| fields.get(field))
        .copied()
        .unwrap_or(UNKNOWN_TYPE)
}

/// Projects `raw` onto `fields`, reporting `type_name` for `__typename`.
pub fn project(raw: &Value, fields: &[Field], type_name: &str) -> Value {
    let mut out = Map::with_capacity(fields.len());
    for field in fields {
        let key = field.response_key().to_string();
        if field.name == TYPENAME_FIELD {
            out.insert(key, Value::String(type_name.to_string()));
            continue;
        }

        let raw_value = raw.get(&field.name).unwrap_or(&Value::Null);
        let projected = if field.is_leaf() {
            raw_value.clone()
        } else {
            let nested_type = child_type(type_name, &field.name);
            match raw_value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| project_nested(item, &field.subfields, nested_type))
                        .collect(),
                ),
                other => project_nested(other, &field.subfields, nested_type),
            }
        };
        out.insert(key, projected);
    }
    Value::Object(out)
}

fn project_nested(raw: &Value, fields: &[Field], type_name: &str) -> Value {
    match raw {
        Value::Object(_) => project(raw, fields, type_name),
        _ => Value::Null,
    }
}

/// Serializes a typed snapshot and projects it.
pub fn project_entity<T: Serialize>(
    entity: &T,
    fields: &[Field],
    type_name: &str,
) -> Result<Value, MirrorError> {
    let raw = serde_json::to_value(entity).map_err(|e| MirrorError::Projection(e.to_string()))?;
    Ok(project(&raw, fields, type_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::parse_query;
    use serde_json::json;

    fn fields(doc: &str) -> Vec<Field> {
        parse_query(doc).unwrap().selections
    }

    fn key_set(value: &Value) -> Vec<String> {
        value.as_object().unwrap().keys().cloned().collect()
    }

    #[test]
    fn test_key_set_matches_request_at_every_depth() {
        let raw = json!({
            "address": "erd1",
            "lockedValueUSD": "10",
            "info": {"reserve0": "1", "reserve1": "2", "totalSupply": "3"},
            "firstToken": {"identifier": "A", "price": "1", "decimals": 18},
        });
        let projected = project(
            &raw,
            &fields("{ address info { reserve1 } firstToken { identifier } }"),
            PAIR_TYPE,
        );

        assert_eq!(key_set(&projected), vec!["address", "info", "firstToken"]);
        assert_eq!(key_set(&projected["info"]), vec!["reserve1"]);
        assert_eq!(key_set(&projected["firstToken"]), vec!["identifier"]);
        assert_eq!(projected["info"]["reserve1"], "2");
    }

    #[test]
    fn test_missing_fields_project_to_null() {
        let raw = json!({"address": "erd1"});
        let projected = project(
            &raw,
            &fields("{ address feesAPR info { reserve0 } trustedSwapPairs }"),
            PAIR_TYPE,
        );
        assert_eq!(
            projected,
            json!({"address": "erd1", "feesAPR": null, "info": null, "trustedSwapPairs": null})
        );
    }

    #[test]
    fn test_typename_and_nested_type_resolution() {
        let raw = json!({
            "identifier": "A",
            "assets": {"website": "https://a", "social": {"x": "@a"}},
        });
        let projected = project(
            &raw,
            &fields("{ __typename kind: __typename assets { __typename website social { __typename } } }"),
            TOKEN_TYPE,
        );
        assert_eq!(projected["__typename"], "EsdtToken");
        assert_eq!(projected["kind"], "EsdtToken");
        assert_eq!(projected["assets"]["__typename"], "AssetsModel");
        assert_eq!(projected["assets"]["social"]["__typename"], "SocialModel");
    }

    #[test]
    fn test_unknown_parent_field_is_permissive() {
        let raw = json!({"mystery": {"inner": 1}});
        let projected = project(&raw, &fields("{ mystery { __typename inner } }"), PAIR_TYPE);
        assert_eq!(projected["mystery"]["__typename"], UNKNOWN_TYPE);
        assert_eq!(projected["mystery"]["inner"], 1);
        assert_eq!(child_type("Nope", "nothing"), UNKNOWN_TYPE);
    }

    #[test]
    fn test_arrays_recurse_per_element() {
        let raw = json!({
            "edges": [
                {"cursor": "c0", "node": {"address": "p0", "state": "Active"}},
                {"cursor": "c1", "node": {"address": "p1", "state": "Paused"}},
            ],
            "pageData": {"count": 2, "limit": 10, "offset": 0},
        });
        let projected = project(
            &raw,
            &fields("{ edges { node { __typename address } } pageData { count } }"),
            PAIRS_CONNECTION_TYPE,
        );
        assert_eq!(
            projected,
            json!({
                "edges": [
                    {"node": {"__typename": "PairModel", "address": "p0"}},
                    {"node": {"__typename": "PairModel", "address": "p1"}},
                ],
                "pageData": {"count": 2},
            })
        );
    }

    #[test]
    fn test_leaf_request_on_object_copies_value() {
        let raw = json!({"trustedSwapPairs": ["a", "b"], "info": {"reserve0": "1"}});
        let projected = project(&raw, &fields("{ trustedSwapPairs info }"), PAIR_TYPE);
        assert_eq!(projected["trustedSwapPairs"], json!(["a", "b"]));
        assert_eq!(projected["info"], json!({"reserve0": "1"}));
    }
}
