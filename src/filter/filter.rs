use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{FieldSource, FilterWhere};
use super::params::{coerce_operand, QueryParams};
use super::types::{is_id_field, FilterOp, FilterWhereInfo, QuerySpec, SqlResult};
use crate::config::FilterConfig;

/// Translates untrusted query parameters into a [`QuerySpec`].
///
/// The stages mirror the request grammar and can be chained individually:
///
/// ```ignore
/// let spec = Filter::new(&config.filter, scope)
///     .filter(&params)?
///     .sort(&params)?
///     .limit_fields(&params)?
///     .paginate(&params)?
///     .into_spec();
/// ```
pub struct Filter<'a> {
    config: &'a FilterConfig,
    spec: QuerySpec,
}

impl<'a> Filter<'a> {
    /// `base` is applied ahead of anything parsed from the request, e.g. the
    /// parent tour when listing a tour's reviews.
    pub fn new(config: &'a FilterConfig, base: Vec<FilterWhereInfo>) -> Self {
        Self {
            config,
            spec: QuerySpec::matching(base),
        }
    }

    /// Runs every stage.
    pub fn build(
        config: &'a FilterConfig,
        params: &QueryParams,
        base: Vec<FilterWhereInfo>,
    ) -> Result<QuerySpec, FilterError> {
        Ok(Self::new(config, base)
            .filter(params)?
            .sort(params)?
            .limit_fields(params)?
            .paginate(params)?
            .into_spec())
    }

    pub fn filter(mut self, params: &QueryParams) -> Result<Self, FilterError> {
        for raw in params.filters() {
            FilterWhere::validate_column(&raw.field)?;
            match raw.operator.as_deref() {
                Some(token) => {
                    let operator = FilterOp::from_query_token(token)
                        .ok_or_else(|| FilterError::UnsupportedOperator(token.to_string()))?;
                    for value in &raw.values {
                        self.spec
                            .conditions
                            .push(FilterWhereInfo::new(raw.field.clone(), operator, coerce_operand(value)));
                    }
                }
                None if raw.values.len() == 1 => {
                    self.spec
                        .conditions
                        .push(FilterWhereInfo::eq(raw.field.clone(), coerce_operand(&raw.values[0])));
                }
                None => {
                    let values: Vec<Value> = raw.values.iter().map(|v| coerce_operand(v)).collect();
                    self.spec
                        .conditions
                        .push(FilterWhereInfo::new(raw.field.clone(), FilterOp::In, Value::Array(values)));
                }
            }
        }
        Ok(self)
    }

    pub fn sort(mut self, params: &QueryParams) -> Result<Self, FilterError> {
        if let Some(sort) = params.last("sort") {
            self.spec.order = FilterOrder::parse(sort)?;
        }
        Ok(self)
    }

    pub fn limit_fields(mut self, params: &QueryParams) -> Result<Self, FilterError> {
        if let Some(fields) = params.last("fields") {
            let mut columns: Vec<String> = Vec::new();
            for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                FilterWhere::validate_column(field)?;
                if !columns.iter().any(|c| c == field) {
                    columns.push(field.to_string());
                }
            }
            self.spec.select = if columns.is_empty() { None } else { Some(columns) };
        }
        Ok(self)
    }

    pub fn paginate(mut self, params: &QueryParams) -> Result<Self, FilterError> {
        let page = match params.last("page") {
            Some(raw) => parse_positive(raw).ok_or_else(|| {
                FilterError::InvalidPage(format!("page must be a positive integer, got '{}'", raw))
            })?,
            None => 1,
        };
        let requested = match params.last("limit") {
            Some(raw) => parse_positive(raw).ok_or_else(|| {
                FilterError::InvalidLimit(format!("limit must be a positive integer, got '{}'", raw))
            })?,
            None => self.config.default_limit,
        };

        let limit = match self.config.max_limit {
            Some(max) if requested > max => {
                if self.config.debug_logging {
                    tracing::warn!("Limit {} exceeds max {}, capping to max", requested, max);
                }
                max
            }
            _ => requested,
        };

        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| FilterError::InvalidPage(format!("page {} is out of range", page)))?;

        self.spec.limit = Some(limit);
        self.spec.offset = Some(offset);
        Ok(self)
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }

    /// Renders a read against a collection table holding `(id, created_at,
    /// version, data jsonb)` rows.
    pub fn to_sql(table_name: &str, spec: &QuerySpec) -> Result<SqlResult, FilterError> {
        Self::validate_table_name(table_name)?;
        let source = FieldSource::table("t");
        let (where_clause, params) = FilterWhere::generate(&spec.conditions, 0, &source)?;
        let order_clause = FilterOrder::generate(&spec.order, &source, "t")?;
        let data_clause = Self::build_data_clause(spec.select.as_deref())?;

        let query = [
            format!("SELECT t.id, t.created_at, t.version, {} AS data", data_clause),
            format!("FROM \"{}\" t", table_name),
            format!("WHERE {}", where_clause),
            order_clause,
            Self::build_limit_clause(spec.limit, spec.offset),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(SqlResult { query, params })
    }

    pub fn to_count_sql(table_name: &str, spec: &QuerySpec) -> Result<SqlResult, FilterError> {
        Self::validate_table_name(table_name)?;
        let (where_clause, params) = FilterWhere::generate(&spec.conditions, 0, &FieldSource::table("t"))?;
        Ok(SqlResult {
            query: format!("SELECT COUNT(*) AS count FROM \"{}\" t WHERE {}", table_name, where_clause),
            params,
        })
    }

    pub fn validate_table_name(name: &str) -> Result<(), FilterError> {
        let mut chars = name.chars();
        match chars.next() {
            None => Err(FilterError::InvalidTableName("Table name cannot be empty".to_string())),
            Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
                Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)))
            }
            Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)))
            }
            Some(_) => Ok(()),
        }
    }

    /// Projection works on top-level keys; `startLocation.coordinates`
    /// projects `startLocation`.
    fn build_data_clause(select: Option<&[String]>) -> Result<String, FilterError> {
        let Some(columns) = select else {
            return Ok("t.data".to_string());
        };
        let mut keys: Vec<String> = Vec::new();
        for column in columns {
            FilterWhere::validate_column(column)?;
            if is_id_field(column) {
                continue;
            }
            let top = column.split('.').next().unwrap_or(column);
            let quoted = format!("'{}'", top);
            if !keys.contains(&quoted) {
                keys.push(quoted);
            }
        }
        if keys.is_empty() {
            return Ok("'{}'::jsonb".to_string());
        }
        Ok(format!(
            "COALESCE((SELECT jsonb_object_agg(e.key, e.value) FROM jsonb_each(t.data) e WHERE e.key IN ({})), '{{}}'::jsonb)",
            keys.join(", ")
        ))
    }

    fn build_limit_clause(limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) if o > 0 => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), _) => format!("LIMIT {}", l),
            (None, Some(o)) if o > 0 => format!("OFFSET {}", o),
            _ => String::new(),
        }
    }
}

fn parse_positive(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|n| *n >= 1)
}
