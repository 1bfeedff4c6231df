//! Query object handed to `ModelHandle::list`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Which relations or fields a read returns. Select and include are mutually exclusive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "fields", rename_all = "lowercase")]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Select(Vec<String>),
}

impl Projection {
    pub fn includes(&self) -> &[String] {
        match self {
            Projection::Include(names) => names,
            _ => &[],
        }
    }
}

fn default_take() -> u64 {
    100
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Exact-match conditions, field to value.
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_take")]
    pub take: u64,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub projection: Projection,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            filter: Map::new(),
            skip: 0,
            take: default_take(),
            order_by: Vec::new(),
            projection: Projection::All,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: Map<String, Value>, take: u64) -> Self {
        ListQuery {
            filter,
            take,
            ..Default::default()
        }
    }
}
