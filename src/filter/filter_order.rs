use super::error::FilterError;
use super::filter_where::{FieldSource, FilterWhere};
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parses `sort=-price,ratingsAverage`: comma separated fields, a leading
    /// `-` sorts that field descending.
    pub fn parse(s: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (column, sort) = match trimmed.strip_prefix('-') {
                Some(rest) => (rest.trim(), SortDirection::Desc),
                None => (trimmed.strip_prefix('+').unwrap_or(trimmed), SortDirection::Asc),
            };
            FilterWhere::validate_column(column)
                .map_err(|_| FilterError::InvalidSort(format!("Invalid sort field: {}", trimmed)))?;
            out.push(FilterOrderInfo { column: column.to_string(), sort });
        }
        Ok(out)
    }

    /// Renders the ORDER BY clause. Without explicit keys rows come newest
    /// first; the id tie-break keeps pages disjoint.
    pub fn generate(infos: &[FilterOrderInfo], source: &FieldSource<'_>, alias: &str) -> Result<String, FilterError> {
        let mut parts = Vec::with_capacity(infos.len() + 2);
        if infos.is_empty() {
            parts.push(format!("{}.created_at DESC", alias));
        }
        for info in infos {
            parts.push(format!("{} {}", source.expr(&info.column)?, info.sort.to_sql()));
        }
        parts.push(format!("{}.id ASC", alias));
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}
