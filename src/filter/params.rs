use serde_json::{Number, Value};

/// Keys that shape the query instead of filtering it.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Raw query-string pairs in arrival order, as handed over by the transport.
///
/// Filter keys may carry a bracketed operator (`price[gte]=500`); a key may
/// repeat (`difficulty=easy&difficulty=medium`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Vec<(String, String)>);

/// One filter key after splitting off its operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFilter {
    pub field: String,
    pub operator: Option<String>,
    pub values: Vec<String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Last value wins for repeated reserved keys.
    pub fn last(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every occurrence of `key` with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.into()));
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Non-reserved keys grouped by (field, operator), in first-seen order.
    pub fn filters(&self) -> Vec<RawFilter> {
        let mut out: Vec<RawFilter> = Vec::new();
        for (key, value) in &self.0 {
            let key = key.trim();
            if key.is_empty() || RESERVED_KEYS.contains(&key) {
                continue;
            }
            let (field, operator) = split_operator(key);
            match out
                .iter_mut()
                .find(|f| f.field == field && f.operator.as_deref() == operator)
            {
                Some(existing) => existing.values.push(value.clone()),
                None => out.push(RawFilter {
                    field: field.to_string(),
                    operator: operator.map(str::to_string),
                    values: vec![value.clone()],
                }),
            }
        }
        out
    }
}

impl From<Vec<(String, String)>> for QueryParams {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for QueryParams {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

fn split_operator(key: &str) -> (&str, Option<&str>) {
    if let Some(open) = key.find('[') {
        if key.ends_with(']') && open > 0 {
            return (&key[..open], Some(&key[open + 1..key.len() - 1]));
        }
    }
    (key, None)
}

/// Query-string operands arrive as text; numbers and booleans are recovered
/// so comparisons happen in the operand's natural type.
pub fn coerce_operand(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            if f.is_finite() && trimmed.chars().any(|c| c.is_ascii_digit()) {
                return Value::Number(n);
            }
        }
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
