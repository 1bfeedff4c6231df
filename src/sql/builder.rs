//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from a model schema.

use crate::config::{ModelSchema, RelationDef, RelationKind};
use crate::model::{ListQuery, Projection, SortDirection};
use serde_json::{Map, Value};

/// One relation fetched as a scalar subquery next to the parent row.
pub struct IncludeSelect<'a> {
    pub relation: &'a RelationDef,
    pub target: &'a ModelSchema,
}

/// Quote identifier for PostgreSQL (safe: only from schema).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &ModelSchema) -> String {
    format!("{}.{}", quoted(schema.namespace()), quoted(schema.table_name()))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder for `field`, cast to its declared column type.
    fn placeholder(&mut self, schema: &ModelSchema, field: &str, v: Value) -> String {
        let n = self.push_param(v);
        let cast = schema.field_def(field).map(|f| crate::sql::column_cast(f.type_)).unwrap_or("text");
        format!("${}::{}", n, cast)
    }
}

fn column_list(schema: &ModelSchema, alias: Option<&str>) -> String {
    schema
        .fields
        .iter()
        .map(|f| match alias {
            Some(a) => format!("{}.{}", a, quoted(&f.name)),
            None => quoted(&f.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// WHERE over known fields only; unknown filter keys are dropped.
fn where_clause(q: &mut QueryBuf, schema: &ModelSchema, filter: &Map<String, Value>, alias: Option<&str>) -> String {
    let mut parts = Vec::new();
    for (field, val) in filter {
        if schema.field_def(field).is_none() {
            continue;
        }
        let col = match alias {
            Some(a) => format!("{}.{}", a, quoted(field)),
            None => quoted(field),
        };
        if val.is_null() {
            parts.push(format!("{} IS NULL", col));
        } else {
            let ph = q.placeholder(schema, field, val.clone());
            parts.push(format!("{} = {}", col, ph));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn include_subquery(inc: &IncludeSelect<'_>, parent: &ModelSchema, parent_alias: &str) -> String {
    let rel_table = qualified_table(inc.target);
    let rel_cols = column_list(inc.target, None);
    let sub_from = format!(
        "{} WHERE {} = {}.{}",
        rel_table,
        quoted(&inc.relation.foreign_key),
        parent_alias,
        quoted(&parent.primary_key)
    );
    let subquery = match inc.relation.kind {
        RelationKind::Single => format!(
            "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
            rel_cols, sub_from
        ),
        RelationKind::Bulk => format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {}) sub)",
            rel_cols, sub_from
        ),
    };
    format!("{} AS {}", subquery, quoted(&inc.relation.field))
}

const MAIN_ALIAS: &str = "main";

fn select_parts(schema: &ModelSchema, projection: &Projection, includes: &[IncludeSelect<'_>]) -> String {
    let mut parts: Vec<String> = match projection {
        Projection::Select(fields) => schema
            .fields
            .iter()
            .filter(|f| fields.contains(&f.name))
            .map(|f| format!("{}.{}", MAIN_ALIAS, quoted(&f.name)))
            .collect(),
        _ => vec![column_list(schema, Some(MAIN_ALIAS))],
    };
    if parts.is_empty() {
        parts.push(format!("{}.{}", MAIN_ALIAS, quoted(&schema.primary_key)));
    }
    for inc in includes {
        parts.push(include_subquery(inc, schema, MAIN_ALIAS));
    }
    parts.join(", ")
}

/// SELECT list: filters (exact match), ORDER BY requested fields else pk, LIMIT/OFFSET, includes as subqueries.
pub fn select_list(schema: &ModelSchema, query: &ListQuery, includes: &[IncludeSelect<'_>]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_parts(schema, &query.projection, includes);
    let where_sql = where_clause(&mut q, schema, &query.filter, Some(MAIN_ALIAS));
    let mut order: Vec<String> = query
        .order_by
        .iter()
        .filter(|o| schema.field_def(&o.field).is_some())
        .map(|o| {
            let dir = match o.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{}.{} {}", MAIN_ALIAS, quoted(&o.field), dir)
        })
        .collect();
    if order.is_empty() {
        order.push(format!("{}.{}", MAIN_ALIAS, quoted(&schema.primary_key)));
    }
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {} LIMIT {} OFFSET {}",
        cols,
        qualified_table(schema),
        MAIN_ALIAS,
        where_sql,
        order.join(", "),
        query.take,
        query.skip
    );
    q
}

pub fn select_count(schema: &ModelSchema, filter: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, schema, filter, None);
    q.sql = format!("SELECT COUNT(*)::bigint AS \"count\" FROM {}{}", qualified_table(schema), where_sql);
    q
}

/// SELECT by primary key with optional includes; id is the sole param.
pub fn select_by_id(schema: &ModelSchema, id: &Value, projection: &Projection, includes: &[IncludeSelect<'_>]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_parts(schema, projection, includes);
    let ph = q.placeholder(schema, &schema.primary_key, id.clone());
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = {}",
        cols,
        qualified_table(schema),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(&schema.primary_key),
        ph
    );
    q
}

pub fn select_first(schema: &ModelSchema, filter: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, schema, filter, None);
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT 1",
        column_list(schema, None),
        qualified_table(schema),
        where_sql,
        quoted(&schema.primary_key)
    );
    q
}

/// INSERT known fields present in `data`; absent fields with a store default are omitted.
pub fn insert(schema: &ModelSchema, data: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in &schema.fields {
        let Some(val) = data.get(&f.name) else { continue };
        placeholders.push(q.placeholder(schema, &f.name, val.clone()));
        cols.push(quoted(&f.name));
    }
    let returning = column_list(schema, None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", qualified_table(schema), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(schema),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

fn set_clause(q: &mut QueryBuf, schema: &ModelSchema, data: &Map<String, Value>) -> Vec<String> {
    let mut sets = Vec::new();
    for (k, v) in data {
        if *k == schema.primary_key || schema.field_def(k).is_none() {
            continue;
        }
        let ph = q.placeholder(schema, k, v.clone());
        sets.push(format!("{} = {}", quoted(k), ph));
    }
    for stamp in ["updatedAt", "updated_at"] {
        if schema.field_def(stamp).map_or(false, |f| f.has_default) && !data.contains_key(stamp) {
            sets.push(format!("{} = NOW()", quoted(stamp)));
        }
    }
    sets
}

/// UPDATE by id: SET only known fields present in `data`. Falls back to a SELECT when nothing changes.
pub fn update(schema: &ModelSchema, id: &Value, data: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets = set_clause(&mut q, schema, data);
    let id_ph = q.placeholder(schema, &schema.primary_key, id.clone());
    let returning = column_list(schema, None);
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            returning,
            qualified_table(schema),
            quoted(&schema.primary_key),
            id_ph
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
            qualified_table(schema),
            sets.join(", "),
            quoted(&schema.primary_key),
            id_ph,
            returning
        )
    };
    q
}

/// UPDATE every row matching `filter`. An empty filter is refused by returning a no-op statement.
pub fn update_many(schema: &ModelSchema, filter: &Map<String, Value>, data: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets = set_clause(&mut q, schema, data);
    let where_sql = where_clause(&mut q, schema, filter, None);
    q.sql = if sets.is_empty() || where_sql.is_empty() {
        "SELECT 1 WHERE FALSE".to_string()
    } else {
        format!("UPDATE {} SET {}{}", qualified_table(schema), sets.join(", "), where_sql)
    };
    q
}

pub fn delete(schema: &ModelSchema, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(schema, &schema.primary_key, id.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        qualified_table(schema),
        quoted(&schema.primary_key),
        ph,
        column_list(schema, None)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDef, FieldType};
    use crate::model::OrderBy;
    use serde_json::json;

    fn users() -> ModelSchema {
        ModelSchema::new("User")
            .table("users")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("email", FieldType::String).required())
            .field(FieldDef::new("updatedAt", FieldType::DateTime).with_default())
            .relation("posts", RelationKind::Bulk, "Post", "authorId")
    }

    fn posts() -> ModelSchema {
        ModelSchema::new("Post")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("authorId", FieldType::Integer))
    }

    #[test]
    fn list_drops_unknown_filters_and_orders() {
        let schema = users();
        let q = ListQuery {
            filter: json!({ "email": "a@x.com", "bogus": 1 }).as_object().cloned().unwrap(),
            order_by: vec![
                OrderBy { field: "email".into(), direction: SortDirection::Desc },
                OrderBy { field: "nope".into(), direction: SortDirection::Asc },
            ],
            skip: 20,
            take: 10,
            ..Default::default()
        };
        let buf = select_list(&schema, &q, &[]);
        assert_eq!(
            buf.sql,
            "SELECT main.\"id\", main.\"email\", main.\"updatedAt\" FROM \"public\".\"users\" main \
             WHERE main.\"email\" = $1::text ORDER BY main.\"email\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(buf.params, vec![json!("a@x.com")]);
    }

    #[test]
    fn include_becomes_json_subquery() {
        let schema = users();
        let target = posts();
        let inc = IncludeSelect { relation: &schema.relations[0], target: &target };
        let buf = select_by_id(&schema, &json!(7), &Projection::Include(vec!["posts".into()]), &[inc]);
        assert!(buf.sql.contains("json_agg(row_to_json(sub))"));
        assert!(buf.sql.contains("WHERE \"authorId\" = main.\"id\""));
        assert!(buf.sql.ends_with("WHERE main.\"id\" = $1::bigint"));
    }

    #[test]
    fn update_stamps_updated_at_and_skips_pk() {
        let schema = users();
        let data = json!({ "id": 9, "email": "n@x.com" }).as_object().cloned().unwrap();
        let buf = update(&schema, &json!(3), &data);
        assert_eq!(
            buf.sql,
            "UPDATE \"public\".\"users\" SET \"email\" = $1::text, \"updatedAt\" = NOW() WHERE \"id\" = $2::bigint \
             RETURNING \"id\", \"email\", \"updatedAt\""
        );
        assert_eq!(buf.params, vec![json!("n@x.com"), json!(3)]);
    }

    #[test]
    fn update_many_without_filter_is_a_no_op() {
        let schema = users();
        let data = json!({ "email": "x" }).as_object().cloned().unwrap();
        assert_eq!(update_many(&schema, &Map::new(), &data).sql, "SELECT 1 WHERE FALSE");
    }

    #[test]
    fn insert_omits_absent_fields() {
        let schema = users();
        let buf = insert(&schema, &json!({ "email": "a@x.com" }).as_object().cloned().unwrap());
        assert_eq!(
            buf.sql,
            "INSERT INTO \"public\".\"users\" (\"email\") VALUES ($1::text) RETURNING \"id\", \"email\", \"updatedAt\""
        );
        let empty = insert(&schema, &Map::new());
        assert!(empty.sql.contains("DEFAULT VALUES"));
    }
}
