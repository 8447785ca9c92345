use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::FilterError;
use super::filter::Filter;
use super::filter_where::{FieldSource, FilterWhere};
use super::types::{FilterOrderInfo, FilterWhereInfo, SqlResult};

/// Grouping key of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupKey {
    Field(String),
    /// Upper-cased string value of the field.
    Upper(String),
    /// Calendar month (1-12) of an RFC 3339 timestamp field.
    Month(String),
}

impl GroupKey {
    pub fn field(&self) -> &str {
        match self {
            GroupKey::Field(f) | GroupKey::Upper(f) | GroupKey::Month(f) => f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    /// Collects the field value of every grouped row.
    Push(String),
}

/// match → optional unwind → group → sort → limit.
///
/// Group output rows are JSON objects holding the key under `key_as` and one
/// entry per accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub conditions: Vec<FilterWhereInfo>,
    /// Array field expanded into one row per element; conditions on this
    /// field then apply to the element.
    pub unwind: Option<String>,
    pub group_by: GroupKey,
    pub key_as: String,
    pub accumulators: Vec<(String, Accumulator)>,
    pub sort: Vec<FilterOrderInfo>,
    pub limit: Option<i64>,
}

impl Aggregation {
    pub fn group(group_by: GroupKey, key_as: impl Into<String>) -> Self {
        Self {
            conditions: vec![],
            unwind: None,
            group_by,
            key_as: key_as.into(),
            accumulators: vec![],
            sort: vec![],
            limit: None,
        }
    }

    pub fn matching(mut self, conditions: Vec<FilterWhereInfo>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn unwind(mut self, field: impl Into<String>) -> Self {
        self.unwind = Some(field.into());
        self
    }

    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }

    pub fn sort_by(mut self, order: FilterOrderInfo) -> Self {
        self.sort.push(order);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_sql(&self, table_name: &str) -> Result<SqlResult, FilterError> {
        Filter::validate_table_name(table_name)?;
        let source = FieldSource::table("t").with_unwind(self.unwind.as_deref());

        let mut columns = vec![format!(
            "{} AS {}",
            key_sql(&self.group_by, &source)?,
            output_name(&self.key_as)?
        )];
        for (name, accumulator) in &self.accumulators {
            columns.push(format!("{} AS {}", accumulator_sql(accumulator, &source)?, output_name(name)?));
        }

        let unwind_clause = match &self.unwind {
            Some(field) => {
                let expr = FieldSource::table("t").expr(field)?;
                format!(
                    " CROSS JOIN LATERAL jsonb_array_elements(CASE WHEN jsonb_typeof({0}) = 'array' THEN {0} ELSE '[]'::jsonb END) AS u(value)",
                    expr
                )
            }
            None => String::new(),
        };

        let (where_clause, params) = FilterWhere::generate(&self.conditions, 0, &source)?;

        let mut order = Vec::with_capacity(self.sort.len() + 1);
        for info in &self.sort {
            order.push(format!("g.{} {}", output_name(&info.column)?, info.sort.to_sql()));
        }
        order.push(format!("g.{} ASC", output_name(&self.key_as)?));

        let mut query = format!(
            "SELECT to_jsonb(g) AS doc FROM (SELECT {} FROM \"{}\" t{} WHERE {} GROUP BY 1) g ORDER BY {}",
            columns.join(", "),
            table_name,
            unwind_clause,
            where_clause,
            order.join(", ")
        );
        if let Some(limit) = self.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(SqlResult { query, params })
    }
}

fn output_name(name: &str) -> Result<String, FilterError> {
    if name.contains('.') {
        return Err(FilterError::InvalidColumn(format!("Invalid output name: {}", name)));
    }
    FilterWhere::validate_column(name)?;
    Ok(format!("\"{}\"", name))
}

fn key_sql(key: &GroupKey, source: &FieldSource<'_>) -> Result<String, FilterError> {
    let expr = source.expr(key.field())?;
    Ok(match key {
        GroupKey::Field(_) => expr,
        GroupKey::Upper(_) => format!("upper({} #>> '{{}}')", expr),
        GroupKey::Month(_) => format!("EXTRACT(MONTH FROM ({} #>> '{{}}')::timestamptz)::int", expr),
    })
}

fn accumulator_sql(accumulator: &Accumulator, source: &FieldSource<'_>) -> Result<String, FilterError> {
    let numeric = |func: &str, field: &str| -> Result<String, FilterError> {
        let expr = source.expr(field)?;
        Ok(format!(
            "{}(CASE WHEN jsonb_typeof({1}) = 'number' THEN ({1} #>> '{{}}')::float8 END)",
            func, expr
        ))
    };
    match accumulator {
        Accumulator::Count => Ok("COUNT(*)".to_string()),
        Accumulator::Sum(field) => numeric("SUM", field),
        Accumulator::Avg(field) => numeric("AVG", field),
        Accumulator::Min(field) => numeric("MIN", field),
        Accumulator::Max(field) => numeric("MAX", field),
        Accumulator::Push(field) => Ok(format!("jsonb_agg({})", source.expr(field)?)),
    }
}

/// Accumulator state for stores that aggregate in process.
#[derive(Debug, Clone)]
pub enum AccumulatorState {
    Count(u64),
    Numeric { sum: f64, count: u64, min: Option<f64>, max: Option<f64> },
    Push(Vec<Value>),
}

impl AccumulatorState {
    pub fn start(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Count => AccumulatorState::Count(0),
            Accumulator::Push(_) => AccumulatorState::Push(vec![]),
            _ => AccumulatorState::Numeric { sum: 0.0, count: 0, min: None, max: None },
        }
    }

    pub fn feed(&mut self, value: Option<&Value>) {
        match self {
            AccumulatorState::Count(n) => *n += 1,
            AccumulatorState::Push(values) => values.push(value.cloned().unwrap_or(Value::Null)),
            AccumulatorState::Numeric { sum, count, min, max } => {
                if let Some(x) = value.and_then(Value::as_f64) {
                    *sum += x;
                    *count += 1;
                    *min = Some(min.map_or(x, |m| m.min(x)));
                    *max = Some(max.map_or(x, |m| m.max(x)));
                }
            }
        }
    }

    pub fn finish(&self, accumulator: &Accumulator) -> Value {
        match (self, accumulator) {
            (AccumulatorState::Count(n), _) => Value::from(*n),
            (AccumulatorState::Push(values), _) => Value::Array(values.clone()),
            (AccumulatorState::Numeric { sum, count, .. }, Accumulator::Sum(_)) => {
                if *count == 0 {
                    Value::Null
                } else {
                    number(*sum)
                }
            }
            (AccumulatorState::Numeric { sum, count, .. }, Accumulator::Avg(_)) => {
                if *count == 0 {
                    Value::Null
                } else {
                    number(*sum / *count as f64)
                }
            }
            (AccumulatorState::Numeric { min, .. }, Accumulator::Min(_)) => min.map(number).unwrap_or(Value::Null),
            (AccumulatorState::Numeric { max, .. }, Accumulator::Max(_)) => max.map(number).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Whole floats render as integers, matching how PostgreSQL prints float8 in JSON.
fn number(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}
