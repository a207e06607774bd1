//! Table operations in the shape the hosted REST layer understands:
//! a table, one operation, a column list (with foreign-key embeds),
//! equality / set-membership filters and an optional ordering.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::backend::{Backend, BackendError};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    In(String, Vec<String>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A related row pulled in through a foreign key on this table,
/// e.g. `job:jobs!job_id(id,title,company)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: String,
    pub fk_column: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    All,
    Named(String),
    Embed(Embed),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select,
    Insert(Vec<Value>),
    Update(Value),
    Upsert { rows: Vec<Value>, on_conflict: String },
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub operation: Operation,
    pub columns: Vec<Column>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    /// Writes only: return the written rows.
    pub returning: bool,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            operation: Operation::Select,
            columns: vec![Column::All],
            filters: Vec::new(),
            order: None,
            returning: false,
        }
    }

    /// Restricts the column list.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns
            .iter()
            .map(|c| Column::Named((*c).to_string()))
            .collect();
        self
    }

    pub fn embed(mut self, alias: &str, table: &str, fk_column: &str, columns: &[&str]) -> Self {
        self.columns.push(Column::Embed(Embed {
            alias: alias.to_string(),
            table: table.to_string(),
            fk_column: fk_column.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }));
        self
    }

    pub fn insert<T: Serialize>(mut self, rows: &[T]) -> Result<Self, BackendError> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.operation = Operation::Insert(rows);
        Ok(self)
    }

    pub fn update(mut self, patch: Value) -> Self {
        self.operation = Operation::Update(patch);
        self
    }

    pub fn upsert<T: Serialize>(mut self, rows: &[T], on_conflict: &str) -> Result<Self, BackendError> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.operation = Operation::Upsert {
            rows,
            on_conflict: on_conflict.to_string(),
        };
        Ok(self)
    }

    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters
            .push(Filter::Eq(column.to_string(), value.to_string()));
        self
    }

    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Asks a write to return the written rows.
    pub fn returning(mut self) -> Self {
        self.returning = true;
        self
    }

    pub fn is_read(&self) -> bool {
        matches!(self.operation, Operation::Select)
    }

    /// `select=` value in PostgREST syntax.
    pub fn select_clause(&self) -> String {
        self.columns
            .iter()
            .map(|column| match column {
                Column::All => "*".to_string(),
                Column::Named(name) => name.clone(),
                Column::Embed(embed) => format!(
                    "{}:{}!{}({})",
                    embed.alias,
                    embed.table,
                    embed.fk_column,
                    embed.columns.join(",")
                ),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Query-string pairs for the REST layer.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if self.is_read() || self.returning {
            params.push(("select".to_string(), self.select_clause()));
        }
        for filter in &self.filters {
            match filter {
                Filter::Eq(column, value) => params.push((column.clone(), format!("eq.{value}"))),
                Filter::In(column, values) => {
                    let quoted = values
                        .iter()
                        .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
                        .collect::<Vec<_>>()
                        .join(",");
                    params.push((column.clone(), format!("in.({quoted})")));
                }
            }
        }
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{direction}", order.column)));
        }
        if let Operation::Upsert { on_conflict, .. } = &self.operation {
            params.push(("on_conflict".to_string(), on_conflict.clone()));
        }
        params
    }
}

/// Runs `query` and decodes every returned row.
pub async fn fetch_rows<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Vec<T>, BackendError> {
    let rows = backend.execute(query).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

/// `maybeSingle()`: zero rows is `None`, more than one is an error.
pub async fn fetch_maybe_single<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Option<T>, BackendError> {
    let mut rows = backend.execute(query).await?;
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(serde_json::from_value(rows.remove(0))?)),
        n => Err(BackendError::Cardinality { rows: n }),
    }
}

/// `single()`: exactly one row or an error.
pub async fn fetch_single<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<T, BackendError> {
    let mut rows = backend.execute(query).await?;
    if rows.len() != 1 {
        return Err(BackendError::Cardinality { rows: rows.len() });
    }
    Ok(serde_json::from_value(rows.remove(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_with_embeds() {
        let query = Query::table("applications")
            .embed("job", "jobs", "job_id", &["id", "title", "company"])
            .in_list("job_id", ["a", "b"])
            .order("created_at", false);
        assert_eq!(
            query.to_params(),
            vec![
                (
                    "select".to_string(),
                    "*,job:jobs!job_id(id,title,company)".to_string()
                ),
                ("job_id".to_string(), "in.(\"a\",\"b\")".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
    }

    #[test]
    fn test_minimal_write_has_no_select() {
        let query = Query::table("jobs").delete().eq("id", "1").eq("recruiter_id", "r");
        assert_eq!(
            query.to_params(),
            vec![
                ("id".to_string(), "eq.1".to_string()),
                ("recruiter_id".to_string(), "eq.r".to_string()),
            ]
        );
    }

    #[test]
    fn test_upsert_carries_conflict_target() {
        let query = Query::table("profiles")
            .upsert(&[serde_json::json!({ "id": "x" })], "id")
            .unwrap();
        assert!(query
            .to_params()
            .contains(&("on_conflict".to_string(), "id".to_string())));
    }
}
