use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators understood by the document stores.
///
/// Only `Eq`, `Gt`, `Gte`, `Lt` and `Lte` are reachable from request input
/// (see [`FilterOp::from_query_token`]); `Ne` and `In` are used by resource
/// scopes and repeated query values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "$eq")] Eq,
    #[serde(rename = "$ne")] Ne,
    #[serde(rename = "$gt")] Gt,
    #[serde(rename = "$gte")] Gte,
    #[serde(rename = "$lt")] Lt,
    #[serde(rename = "$lte")] Lte,
    #[serde(rename = "$in")] In,
}

impl FilterOp {
    /// Maps the bracketed operator of `field[op]=value` onto a store operator.
    pub fn from_query_token(token: &str) -> Option<Self> {
        match token {
            "eq" => Some(FilterOp::Eq),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte)
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "IS DISTINCT FROM",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: Value,
}

impl FilterWhereInfo {
    pub fn new(column: impl Into<String>, operator: FilterOp, data: impl Into<Value>) -> Self {
        Self { column: column.into(), operator, data: data.into() }
    }

    pub fn eq(column: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, data)
    }

    pub fn ne(column: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Ne, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

impl FilterOrderInfo {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), sort: SortDirection::Asc }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), sort: SortDirection::Desc }
    }
}

/// Store-independent description of a read: conditions, order, projection
/// and window. Produced by [`crate::filter::Filter`] and executed by a
/// [`crate::database::DocumentStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub conditions: Vec<FilterWhereInfo>,
    /// Empty means creation order, newest first.
    pub order: Vec<FilterOrderInfo>,
    /// `None` returns every stored field.
    pub select: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QuerySpec {
    pub fn matching(conditions: Vec<FilterWhereInfo>) -> Self {
        Self { conditions, ..Default::default() }
    }

    pub fn and_where(mut self, condition: FilterWhereInfo) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}

/// Dotted field names address nested document values (`startLocation.coordinates`).
/// `id` and `_id` address the document identity.
pub fn is_id_field(column: &str) -> bool {
    column == "id" || column == "_id"
}

pub fn field_segments(column: &str) -> impl Iterator<Item = &str> {
    column.split('.')
}
