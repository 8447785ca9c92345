use serde_json::Value;

use super::error::FilterError;
use super::types::{field_segments, is_id_field, FilterOp, FilterWhereInfo};

/// Resolves document field names into SQL expressions over the `data` JSONB
/// column of a collection table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSource<'a> {
    alias: &'a str,
    unwind: Option<&'a str>,
}

impl<'a> FieldSource<'a> {
    pub fn table(alias: &'a str) -> Self {
        Self { alias, unwind: None }
    }

    /// Inside an unwound aggregation the unwound field names the array element.
    pub fn with_unwind(mut self, field: Option<&'a str>) -> Self {
        self.unwind = field;
        self
    }

    pub fn expr(&self, column: &str) -> Result<String, FilterError> {
        FilterWhere::validate_column(column)?;
        if is_id_field(column) {
            return Ok(format!("to_jsonb({}.id)", self.alias));
        }
        if self.unwind == Some(column) {
            return Ok("u.value".to_string());
        }
        let segments: Vec<&str> = field_segments(column).collect();
        if segments.len() == 1 {
            Ok(format!("{}.data -> '{}'", self.alias, segments[0]))
        } else {
            Ok(format!("{}.data #> '{{{}}}'", self.alias, segments.join(",")))
        }
    }
}

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn generate(
        conditions: &[FilterWhereInfo],
        starting_param_index: usize,
        source: &FieldSource<'_>,
    ) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let mut sql_conditions = Vec::with_capacity(conditions.len());
        for condition in conditions {
            sql_conditions.push(filter_where.build_sql_condition(condition, source)?);
        }
        let where_clause = if sql_conditions.is_empty() {
            "1=1".to_string()
        } else {
            sql_conditions.join(" AND ")
        };
        Ok((where_clause, filter_where.param_values))
    }

    /// Field names end up inside SQL text, so only identifier paths pass.
    pub fn validate_column(column: &str) -> Result<(), FilterError> {
        if column.is_empty() {
            return Err(FilterError::InvalidColumn("Field name cannot be empty".to_string()));
        }
        for segment in field_segments(column) {
            let mut chars = segment.chars();
            let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(FilterError::InvalidColumn(format!("Invalid field name format: {}", column)));
            }
        }
        Ok(())
    }

    fn build_sql_condition(
        &mut self,
        condition: &FilterWhereInfo,
        source: &FieldSource<'_>,
    ) -> Result<String, FilterError> {
        let expr = source.expr(&condition.column)?;
        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() {
                    Ok(format!("({0} IS NULL OR {0} = 'null'::jsonb)", expr))
                } else {
                    Ok(format!("{} = {}", expr, self.param(condition.data.clone())))
                }
            }
            FilterOp::Ne => {
                if condition.data.is_null() {
                    Ok(format!("({0} IS NOT NULL AND {0} <> 'null'::jsonb)", expr))
                } else {
                    Ok(format!("{} IS DISTINCT FROM {}", expr, self.param(condition.data.clone())))
                }
            }
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                if !is_scalar(&condition.data) {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "{} requires a number, string or boolean",
                        condition.column
                    )));
                }
                // jsonb orders across types; comparisons only hold within one type
                let p = self.param(condition.data.clone());
                Ok(format!(
                    "(jsonb_typeof({0}) = jsonb_typeof({1}) AND {0} {2} {1})",
                    expr,
                    p,
                    condition.operator.to_sql()
                ))
            }
            FilterOp::In => {
                if let Value::Array(values) = &condition.data {
                    if values.is_empty() {
                        return Ok("1=0".to_string());
                    }
                    let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                    Ok(format!("{} IN ({})", expr, params.join(", ")))
                } else {
                    Ok(format!("{} = {}", expr, self.param(condition.data.clone())))
                }
            }
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::String(_) | Value::Bool(_))
}
