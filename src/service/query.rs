//! Query-string and path parsing for the generated routes.

use crate::config::{ModelStructure, Settings};
use crate::error::AppError;
use crate::model::{ListQuery, OrderBy, Projection, SortDirection};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// What a route is allowed to expose, derived once at registration.
#[derive(Clone, Debug, Default)]
pub struct FieldPolicy {
    /// Global plus route exclusions; never returned, selected or filtered on.
    pub excluded_fields: HashSet<String>,
    pub excluded_relations: HashSet<String>,
    pub include_relations: bool,
}

impl FieldPolicy {
    pub fn new(settings: &Settings, route_fields: &HashSet<String>, excluded_relations: &HashSet<String>, include_relations: bool) -> Self {
        let mut excluded_fields: HashSet<String> = settings.excluded_fields.iter().cloned().collect();
        excluded_fields.extend(route_fields.iter().cloned());
        FieldPolicy {
            excluded_fields,
            excluded_relations: excluded_relations.clone(),
            include_relations,
        }
    }
}

/// `:id` as a number when it parses as an integer, else the raw string.
pub fn parse_id(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(n) => Value::Number(n.into()),
        Err(_) => Value::String(raw.to_string()),
    }
}

fn parse_json(param: &str, raw: &str) -> Result<Value, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::BadRequest(format!("{} must be JSON: {}", param, e)))
}

fn first<'a>(params: &'a HashMap<String, String>, names: &[&str]) -> Option<(&'a str, &'a str)> {
    names
        .iter()
        .find_map(|n| params.get_key_value(*n))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Names from `{"a": true, "b": false}` or `["a", "b"]`.
fn name_list(param: &str, v: Value) -> Result<Vec<String>, AppError> {
    match v {
        Value::Object(m) => Ok(m
            .into_iter()
            .filter(|(_, on)| on.as_bool().unwrap_or(false))
            .map(|(k, _)| k)
            .collect()),
        Value::Array(items) => items
            .into_iter()
            .map(|i| match i {
                Value::String(s) => Ok(s),
                other => Err(AppError::BadRequest(format!("{} entries must be strings, got {}", param, other))),
            })
            .collect(),
        other => Err(AppError::BadRequest(format!("{} must be an object or an array, got {}", param, other))),
    }
}

fn direction(v: &Value) -> Result<SortDirection, AppError> {
    v.as_str()
        .and_then(SortDirection::parse)
        .ok_or_else(|| AppError::BadRequest(format!("invalid sort direction {}", v)))
}

/// `order=[["name","desc"],["id","asc"]]` (a single pair is accepted too).
fn parse_order(v: Value) -> Result<Vec<OrderBy>, AppError> {
    let Value::Array(items) = v else {
        return Err(AppError::BadRequest("order must be an array of [field, direction] pairs".into()));
    };
    let pairs = if items.first().map_or(false, Value::is_string) {
        vec![Value::Array(items)]
    } else {
        items
    };
    pairs
        .into_iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(field)]) => Ok(OrderBy {
                field: field.clone(),
                direction: SortDirection::Asc,
            }),
            Some([Value::String(field), dir]) => Ok(OrderBy {
                field: field.clone(),
                direction: direction(dir)?,
            }),
            _ => Err(AppError::BadRequest(format!("invalid order entry {}", pair))),
        })
        .collect()
}

/// `orderBy={"name":"desc"}` or `orderBy=[{"name":"desc"},{"id":"asc"}]`.
fn parse_order_by(v: Value) -> Result<Vec<OrderBy>, AppError> {
    let objects = match v {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => return Err(AppError::BadRequest(format!("orderBy must be an object or an array, got {}", other))),
    };
    let mut out = Vec::new();
    for obj in objects {
        let Value::Object(m) = obj else {
            return Err(AppError::BadRequest("orderBy entries must be objects".into()));
        };
        for (field, dir) in m {
            out.push(OrderBy {
                direction: direction(&dir)?,
                field,
            });
        }
    }
    Ok(out)
}

/// `select` wins over `include`. Unknown and excluded names are dropped.
pub fn parse_projection(params: &HashMap<String, String>, structure: &ModelStructure, policy: &FieldPolicy) -> Result<Projection, AppError> {
    if let Some(raw) = params.get("select") {
        let fields: Vec<String> = name_list("select", parse_json("select", raw)?)?
            .into_iter()
            .filter(|f| structure.is_known(f) && !policy.excluded_fields.contains(f))
            .collect();
        if !fields.is_empty() {
            return Ok(Projection::Select(fields));
        }
    }
    if !policy.include_relations {
        return Ok(Projection::All);
    }
    if let Some(raw) = params.get("include") {
        let names: Vec<String> = name_list("include", parse_json("include", raw)?)?
            .into_iter()
            .filter(|n| structure.is_known(n) && !policy.excluded_relations.contains(n))
            .collect();
        if !names.is_empty() {
            return Ok(Projection::Include(names));
        }
    }
    Ok(Projection::All)
}

pub fn parse_list_query(
    params: &HashMap<String, String>,
    structure: &ModelStructure,
    policy: &FieldPolicy,
    settings: &Settings,
) -> Result<ListQuery, AppError> {
    let mut filter = Map::new();
    if let Some(raw) = params.get("filter") {
        match parse_json("filter", raw)? {
            Value::Object(m) => {
                for (k, v) in m {
                    if !structure.is_known(&k) || policy.excluded_fields.contains(&k) {
                        tracing::debug!(model = %structure.model, field = %k, "dropping unknown filter field");
                        continue;
                    }
                    filter.insert(k, v);
                }
            }
            _ => return Err(AppError::BadRequest("filter must be a JSON object".into())),
        }
    }

    let take = first(params, &["limit", "take"])
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .unwrap_or(settings.default_page_size)
        .min(settings.max_page_size);
    let skip = first(params, &["offset", "skip"])
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .unwrap_or(0);

    let mut order_by = match first(params, &["order", "orderBy"]) {
        Some(("order", raw)) => parse_order(parse_json("order", raw)?)?,
        Some((_, raw)) => parse_order_by(parse_json("orderBy", raw)?)?,
        None => Vec::new(),
    };
    order_by.retain(|o| structure.is_known(&o.field) && !policy.excluded_fields.contains(&o.field));

    Ok(ListQuery {
        filter,
        skip,
        take,
        order_by,
        projection: parse_projection(params, structure, policy)?,
    })
}

/// Remove excluded fields from a row or a list of rows, including embedded relation rows.
pub fn strip_fields(value: &mut Value, excluded: &HashSet<String>) {
    if excluded.is_empty() {
        return;
    }
    match value {
        Value::Object(m) => {
            m.retain(|k, _| !excluded.contains(k));
            for v in m.values_mut() {
                strip_fields(v, excluded);
            }
        }
        Value::Array(items) => {
            for v in items {
                strip_fields(v, excluded);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDef, FieldType, ModelSchema, RelationKind};
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn users() -> ModelStructure {
        ModelStructure::from_schema(
            &ModelSchema::new("User")
                .field(FieldDef::new("id", FieldType::Integer))
                .field(FieldDef::new("name", FieldType::String))
                .field(FieldDef::new("password", FieldType::String))
                .relation("posts", RelationKind::Bulk, "Post", "authorId"),
        )
    }

    fn policy() -> FieldPolicy {
        FieldPolicy::new(&Settings::default(), &HashSet::new(), &HashSet::new(), true)
    }

    #[test]
    fn numeric_ids_are_coerced() {
        assert_eq!(parse_id("42"), json!(42));
        assert_eq!(parse_id("abc-1"), json!("abc-1"));
        assert_eq!(parse_id("4.5"), json!("4.5"));
    }

    #[test]
    fn pagination_defaults_and_aliases() {
        let s = Settings::default();
        let q = parse_list_query(&params(&[]), &users(), &policy(), &s).unwrap();
        assert_eq!((q.skip, q.take), (0, 100));
        let q = parse_list_query(&params(&[("take", "2"), ("skip", "4")]), &users(), &policy(), &s).unwrap();
        assert_eq!((q.skip, q.take), (4, 2));
        let q = parse_list_query(&params(&[("limit", "50000")]), &users(), &policy(), &s).unwrap();
        assert_eq!(q.take, 1000);
    }

    #[test]
    fn unknown_and_excluded_filter_fields_are_dropped() {
        let q = parse_list_query(
            &params(&[("filter", r#"{"name":"Ann","password":"x","bogus":1}"#)]),
            &users(),
            &policy(),
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(Value::Object(q.filter), json!({ "name": "Ann" }));
    }

    #[test]
    fn unknown_structure_passes_filter_through() {
        let q = parse_list_query(
            &params(&[("filter", r#"{"anything":1}"#)]),
            &ModelStructure::empty("Thing"),
            &policy(),
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(Value::Object(q.filter), json!({ "anything": 1 }));
    }

    #[test]
    fn order_forms() {
        let s = Settings::default();
        let q = parse_list_query(&params(&[("order", r#"[["name","desc"],["id","asc"]]"#)]), &users(), &policy(), &s).unwrap();
        assert_eq!(q.order_by.len(), 2);
        assert_eq!(q.order_by[0].direction, SortDirection::Desc);
        let q = parse_list_query(&params(&[("order", r#"["name","desc"]"#)]), &users(), &policy(), &s).unwrap();
        assert_eq!(q.order_by[0].field, "name");
        let q = parse_list_query(&params(&[("orderBy", r#"{"name":"asc"}"#)]), &users(), &policy(), &s).unwrap();
        assert_eq!(q.order_by[0].direction, SortDirection::Asc);
        let err = parse_list_query(&params(&[("orderBy", r#"{"name":"sideways"}"#)]), &users(), &policy(), &s).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn select_overrides_include() {
        let p = params(&[("select", r#"{"name":true,"password":true}"#), ("include", r#"["posts"]"#)]);
        assert_eq!(parse_projection(&p, &users(), &policy()).unwrap(), Projection::Select(vec!["name".into()]));
        let p = params(&[("include", r#"{"posts":true}"#)]);
        assert_eq!(parse_projection(&p, &users(), &policy()).unwrap(), Projection::Include(vec!["posts".into()]));

        let closed = FieldPolicy::new(&Settings::default(), &HashSet::new(), &HashSet::new(), false);
        assert_eq!(parse_projection(&p, &users(), &closed).unwrap(), Projection::All);
    }

    #[test]
    fn malformed_json_is_a_bad_request() {
        let err = parse_list_query(&params(&[("filter", "{nope")]), &users(), &policy(), &Settings::default()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn strip_fields_reaches_embedded_rows() {
        let mut v = json!({ "data": [{ "id": 1, "password": "x", "profile": { "password": "y", "bio": "b" } }], "count": 1 });
        strip_fields(&mut v, &HashSet::from(["password".to_string()]));
        assert_eq!(v, json!({ "data": [{ "id": 1, "profile": { "bio": "b" } }], "count": 1 }));
    }
}
