use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{CollectionSpec, DatabaseError, Document, DocumentStore};
use crate::filter::aggregate::AccumulatorState;
use crate::filter::filter_where::FilterWhere;
use crate::filter::{
    Aggregation, FilterError, FilterOp, FilterOrderInfo, FilterWhereInfo, GroupKey, QuerySpec, SortDirection,
};

/// In-process document store with the same query semantics as the
/// PostgreSQL backend. Used by the test-suite and `STORAGE=memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    last_created: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Collection {
    unique_keys: Vec<Vec<String>>,
    docs: HashMap<Uuid, Document>,
}

impl Inner {
    fn collection(&self, name: &str) -> Result<&Collection, DatabaseError> {
        self.collections
            .get(name)
            .ok_or_else(|| DatabaseError::UnknownCollection(name.to_string()))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection, DatabaseError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| DatabaseError::UnknownCollection(name.to_string()))
    }

    /// Creation timestamps are strictly increasing so creation order is total.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(next);
        next
    }
}

impl Collection {
    fn check_unique(&self, name: &str, id: Uuid, data: &Map<String, Value>) -> Result<(), DatabaseError> {
        let probe = Document { id, created_at: Utc::now(), version: 0, data: data.clone() };
        for key in &self.unique_keys {
            let values: Option<Vec<Value>> = key.iter().map(|f| probe.get(f)).collect();
            let Some(values) = values else {
                continue;
            };
            let taken = self.docs.values().filter(|d| d.id != id).any(|other| {
                key.iter()
                    .zip(&values)
                    .all(|(field, value)| other.get(field).is_some_and(|v| json_eq(&v, value)))
            });
            if taken {
                return Err(DatabaseError::UniqueViolation {
                    collection: name.to_string(),
                    fields: key.join(", "),
                });
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let collection = inner.collections.entry(spec.name.to_string()).or_default();
        collection.unique_keys = spec
            .unique_keys
            .iter()
            .map(|key| key.iter().map(|f| f.to_string()).collect())
            .collect();
        Ok(())
    }

    async fn find(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<Document>, DatabaseError> {
        validate_conditions(&spec.conditions)?;
        for info in &spec.order {
            FilterWhere::validate_column(&info.column)?;
        }

        let inner = self.inner.read().await;
        let mut docs: Vec<Document> = inner
            .collection(collection)?
            .docs
            .values()
            .filter(|doc| spec.conditions.iter().all(|c| matches_condition(doc, c, None)))
            .cloned()
            .collect();

        docs.sort_by(|a, b| compare_documents(a, b, &spec.order));

        let offset = spec.offset.unwrap_or(0).max(0) as usize;
        let limit = spec.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        let mut page: Vec<Document> = docs.into_iter().skip(offset).take(limit).collect();

        if let Some(select) = &spec.select {
            for column in select {
                FilterWhere::validate_column(column)?;
            }
            let keys: Vec<&str> = select.iter().filter_map(|c| c.split('.').next()).collect();
            for doc in &mut page {
                doc.data.retain(|k, _| keys.contains(&k.as_str()));
            }
        }

        Ok(page)
    }

    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.collection(collection)?.docs.get(&id).cloned())
    }

    async fn insert(&self, collection: &str, data: Map<String, Value>) -> Result<Document, DatabaseError> {
        let mut inner = self.inner.write().await;
        let id = Uuid::new_v4();
        inner.collection(collection)?.check_unique(collection, id, &data)?;
        let created_at = inner.next_created_at();
        let doc = Document { id, created_at, version: 0, data };
        inner.collection_mut(collection)?.docs.insert(id, doc.clone());
        Ok(doc)
    }

    async fn replace(
        &self,
        collection: &str,
        id: Uuid,
        version: i32,
        data: Map<String, Value>,
    ) -> Result<Option<Document>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let target = inner.collection_mut(collection)?;
        match target.docs.get(&id) {
            None => return Ok(None),
            Some(doc) if doc.version != version => {
                return Err(DatabaseError::Conflict { collection: collection.to_string(), id });
            }
            Some(_) => {}
        }
        target.check_unique(collection, id, &data)?;
        let Some(doc) = target.docs.get_mut(&id) else {
            return Ok(None);
        };
        doc.data = data;
        doc.version += 1;
        Ok(Some(doc.clone()))
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let mut inner = self.inner.write().await;
        Ok(inner.collection_mut(collection)?.docs.remove(&id))
    }

    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> Result<Vec<Value>, DatabaseError> {
        validate_conditions(&aggregation.conditions)?;
        let inner = self.inner.read().await;
        let source = inner.collection(collection)?;

        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();
        let mut feed = |doc: &Document, element: Option<(&str, &Value)>| {
            if !aggregation.conditions.iter().all(|c| matches_condition(doc, c, element)) {
                return;
            }
            let key = group_key(&aggregation.group_by, field_value(doc, aggregation.group_by.field(), element));
            let index = match groups.iter().position(|(k, _)| json_eq(k, &key)) {
                Some(i) => i,
                None => {
                    let states = aggregation
                        .accumulators
                        .iter()
                        .map(|(_, acc)| AccumulatorState::start(acc))
                        .collect();
                    groups.push((key, states));
                    groups.len() - 1
                }
            };
            for ((_, acc), state) in aggregation.accumulators.iter().zip(groups[index].1.iter_mut()) {
                let input = accumulator_field(acc).and_then(|f| field_value(doc, f, element));
                state.feed(input.as_ref());
            }
        };

        let mut docs: Vec<&Document> = source.docs.values().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for doc in docs {
            match &aggregation.unwind {
                Some(field) => {
                    if let Some(Value::Array(items)) = doc.get(field) {
                        for item in &items {
                            feed(doc, Some((field.as_str(), item)));
                        }
                    }
                }
                None => feed(doc, None),
            }
        }

        let mut rows: Vec<Map<String, Value>> = groups
            .into_iter()
            .map(|(key, states)| {
                let mut row = Map::new();
                row.insert(aggregation.key_as.clone(), key);
                for ((name, acc), state) in aggregation.accumulators.iter().zip(states.iter()) {
                    row.insert(name.clone(), state.finish(acc));
                }
                row
            })
            .collect();

        let mut order = aggregation.sort.clone();
        order.push(FilterOrderInfo::asc(aggregation.key_as.clone()));
        rows.sort_by(|a, b| {
            for info in &order {
                let ord = compare_optional(a.get(&info.column), b.get(&info.column), info.sort);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(limit) = aggregation.limit {
            rows.truncate(limit.max(0) as usize);
        }

        Ok(rows.into_iter().map(Value::Object).collect())
    }
}

fn validate_conditions(conditions: &[FilterWhereInfo]) -> Result<(), FilterError> {
    for condition in conditions {
        FilterWhere::validate_column(&condition.column)?;
        if condition.operator.is_range()
            && !matches!(condition.data, Value::Number(_) | Value::String(_) | Value::Bool(_))
        {
            return Err(FilterError::InvalidOperatorData(format!(
                "{} requires a number, string or boolean",
                condition.column
            )));
        }
    }
    Ok(())
}

fn field_value(doc: &Document, column: &str, element: Option<(&str, &Value)>) -> Option<Value> {
    match element {
        Some((field, value)) if field == column => Some(value.clone()),
        _ => doc.get(column),
    }
}

fn accumulator_field(acc: &crate::filter::Accumulator) -> Option<&str> {
    use crate::filter::Accumulator::*;
    match acc {
        Count => None,
        Sum(f) | Avg(f) | Min(f) | Max(f) | Push(f) => Some(f),
    }
}

fn group_key(key: &GroupKey, value: Option<Value>) -> Value {
    let value = match value {
        None | Some(Value::Null) => return Value::Null,
        Some(v) => v,
    };
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match key {
        GroupKey::Field(_) => value,
        GroupKey::Upper(_) => Value::String(text.to_uppercase()),
        GroupKey::Month(_) => DateTime::parse_from_rfc3339(&text)
            .map_or(Value::Null, |dt| Value::from(dt.with_timezone(&Utc).month())),
    }
}

fn matches_condition(doc: &Document, condition: &FilterWhereInfo, element: Option<(&str, &Value)>) -> bool {
    let value = field_value(doc, &condition.column, element);
    let data = &condition.data;
    match condition.operator {
        FilterOp::Eq if data.is_null() => matches!(value, None | Some(Value::Null)),
        FilterOp::Eq => value.is_some_and(|v| json_eq(&v, data)),
        FilterOp::Ne if data.is_null() => matches!(value, Some(ref v) if !v.is_null()),
        FilterOp::Ne => value.map_or(true, |v| !json_eq(&v, data)),
        FilterOp::In => match data {
            Value::Array(values) => value.is_some_and(|v| values.iter().any(|candidate| json_eq(&v, candidate))),
            other => value.is_some_and(|v| json_eq(&v, other)),
        },
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            let Some(v) = value else {
                return false;
            };
            if type_rank(&v) != type_rank(data) {
                return false;
            }
            let ord = compare_json(&v, data);
            match condition.operator {
                FilterOp::Gt => ord == Ordering::Greater,
                FilterOp::Gte => ord != Ordering::Less,
                FilterOp::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }
        }
    }
}

fn compare_documents(a: &Document, b: &Document, order: &[FilterOrderInfo]) -> Ordering {
    if order.is_empty() {
        return b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id));
    }
    for info in order {
        let ord = compare_optional(a.get(&info.column).as_ref(), b.get(&info.column).as_ref(), info.sort);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

/// Missing values sort as if larger than anything: last ascending, first
/// descending.
fn compare_optional(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    let ord = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_json(x, y),
    };
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// jsonb ordering: null < string < number < boolean < array < object.
pub(crate) fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y)
                .map(|(l, r)| compare_json(l, r))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|l, r| l.0.cmp(r.0));
            ys.sort_by(|l, r| l.0.cmp(r.0));
            xs.iter()
                .zip(&ys)
                .map(|(l, r)| l.0.cmp(r.0).then_with(|| compare_json(l.1, r.1)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_json(a, b) == Ordering::Equal
}
