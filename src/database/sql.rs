/// Translation of filters and options into Postgres statements over JSONB
///
/// Every collection is a table `(id TEXT PRIMARY KEY, doc JSONB NOT NULL)`.
/// Clauses on `_id` compare the `id` column; all other clauses address the
/// document with `doc #> path`.

use crate::error::{CacheError, CacheResult};
use crate::filter::{Clause, Filter, Operator};
use crate::types::{id_key, Sort, SortOrder};
use serde_json::Value;
use tokio_postgres::types::ToSql;

/// Owned statement parameter
pub type Param = Box<dyn ToSql + Sync + Send>;

/// SQL text plus its positional parameters
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    /// Borrowed parameters in the shape `tokio_postgres` expects
    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Check that a collection name is usable as a table identifier
pub fn validate_collection_name(collection: &str) -> CacheResult<()> {
    let mut chars = collection.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && collection.len() <= 63 {
        Ok(())
    } else {
        Err(CacheError::DocumentStore(format!("Invalid collection name: {:?}", collection)))
    }
}

/// Quoted table identifier of a validated collection
pub fn table(collection: &str) -> CacheResult<String> {
    validate_collection_name(collection)?;
    Ok(format!("\"{}\"", collection))
}

/// Accumulates WHERE fragments and their parameters
#[derive(Default)]
struct Builder {
    params: Vec<Param>,
}

impl Builder {
    fn bind(&mut self, param: Param) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn path(&mut self, clause: &Clause) -> String {
        let placeholder = self.bind(Box::new(clause.segments()));
        format!("(doc #> {}::text[])", placeholder)
    }

    fn where_clause(&mut self, filter: &Filter) -> CacheResult<String> {
        let mut fragments = Vec::new();
        for clause in filter.clauses()? {
            fragments.push(if clause.is_id() {
                self.id_clause(&clause)
            } else {
                self.field_clause(&clause)
            });
        }

        if fragments.is_empty() {
            Ok("TRUE".to_string())
        } else {
            Ok(fragments.join(" AND "))
        }
    }

    fn id_clause(&mut self, clause: &Clause) -> String {
        let keys = || -> Vec<String> {
            clause
                .value
                .as_array()
                .map(|values| values.iter().filter_map(id_key).collect())
                .unwrap_or_default()
        };

        match clause.op {
            Operator::In => {
                let p = self.bind(Box::new(keys()));
                format!("id = ANY({}::text[])", p)
            }
            Operator::Nin => {
                let p = self.bind(Box::new(keys()));
                format!("NOT (id = ANY({}::text[]))", p)
            }
            // Every stored row has an id
            Operator::Exists => {
                if clause.value.as_bool().unwrap_or(true) { "TRUE" } else { "FALSE" }.to_string()
            }
            op => match id_key(&clause.value) {
                Some(key) => {
                    let p = self.bind(Box::new(key));
                    let sql_op = match op {
                        Operator::Eq => "=",
                        Operator::Ne => "IS DISTINCT FROM",
                        Operator::Gt => ">",
                        Operator::Gte => ">=",
                        Operator::Lt => "<",
                        _ => "<=",
                    };
                    format!("id COLLATE \"C\" {} {}::text", sql_op, p)
                }
                None if op == Operator::Ne => "TRUE".to_string(),
                None => "FALSE".to_string(),
            },
        }
    }

    fn field_clause(&mut self, clause: &Clause) -> String {
        // Unbound placeholders cannot be typed, so bail out before binding the path
        let range = matches!(clause.op, Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte);
        if range && comparable_type(&clause.value).is_none() {
            return "FALSE".to_string();
        }
        let target = self.path(clause);

        match clause.op {
            Operator::Eq => {
                let p = self.bind(Box::new(clause.value.clone()));
                equality(&target, &format!("{}::jsonb", p))
            }
            Operator::Ne => {
                let p = self.bind(Box::new(clause.value.clone()));
                format!("NOT COALESCE({}, FALSE)", equality(&target, &format!("{}::jsonb", p)))
            }
            Operator::In | Operator::Nin => {
                let values = clause.value.as_array().cloned().unwrap_or_default();
                let p = self.bind(Box::new(values));
                let any = format!(
                    "EXISTS (SELECT 1 FROM unnest({}::jsonb[]) AS candidate(value) WHERE {})",
                    p,
                    equality(&target, "candidate.value")
                );
                if clause.op == Operator::In {
                    any
                } else {
                    format!("NOT {}", any)
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let Some(json_type) = comparable_type(&clause.value) else {
                    return "FALSE".to_string();
                };
                let sql_op = match clause.op {
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    Operator::Lt => "<",
                    _ => "<=",
                };
                let p = self.bind(Box::new(clause.value.clone()));
                format!(
                    "(jsonb_typeof({t}) = '{ty}' AND {t} {op} {p}::jsonb)",
                    t = target,
                    ty = json_type,
                    op = sql_op,
                    p = p
                )
            }
            Operator::Exists => {
                if clause.value.as_bool().unwrap_or(true) {
                    format!("{} IS NOT NULL", target)
                } else {
                    format!("{} IS NULL", target)
                }
            }
        }
    }

    fn order_by(&mut self, sort: &Sort) -> String {
        let mut keys = Vec::new();
        for (path, order) in &sort.0 {
            let direction = match order {
                SortOrder::Ascending => "ASC NULLS FIRST",
                SortOrder::Descending => "DESC NULLS LAST",
            };
            if path == crate::types::ID_FIELD {
                keys.push(format!("id COLLATE \"C\" {}", direction));
            } else {
                let segments: Vec<String> = path.split('.').map(str::to_string).collect();
                let p = self.bind(Box::new(segments));
                keys.push(format!("doc #> {}::text[] {}", p, direction));
            }
        }
        // Stable output for ties
        keys.push("id COLLATE \"C\" ASC".to_string());
        format!(" ORDER BY {}", keys.join(", "))
    }

    fn window(&mut self, skip: Option<u64>, limit: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            let p = self.bind(Box::new(to_i64(limit)));
            sql.push_str(&format!(" LIMIT {}", p));
        }
        if let Some(skip) = skip.filter(|s| *s > 0) {
            let p = self.bind(Box::new(to_i64(skip)));
            sql.push_str(&format!(" OFFSET {}", p));
        }
        sql
    }
}

/// JSONB equality that also matches a scalar against array elements
fn equality(target: &str, operand: &str) -> String {
    format!(
        "({t} = {o} OR (jsonb_typeof({t}) = 'array' AND jsonb_typeof({o}) NOT IN ('array', 'object') AND {t} @> jsonb_build_array({o})))",
        t = target,
        o = operand
    )
}

fn comparable_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Number(_) => Some("number"),
        Value::String(_) => Some("string"),
        Value::Bool(_) => Some("boolean"),
        _ => None,
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SELECT of matching documents with sort and window applied
pub fn select(
    collection: &str,
    filter: &Filter,
    sort: &Sort,
    skip: Option<u64>,
    limit: Option<u64>,
) -> CacheResult<Statement> {
    let table = table(collection)?;
    let mut builder = Builder::default();
    let condition = builder.where_clause(filter)?;
    let order = builder.order_by(sort);
    let window = builder.window(skip, limit);

    Ok(Statement {
        sql: format!("SELECT doc FROM {} WHERE {}{}{}", table, condition, order, window),
        params: builder.params,
    })
}

/// COUNT of matching documents within the window
pub fn count(collection: &str, filter: &Filter, skip: Option<u64>, limit: Option<u64>) -> CacheResult<Statement> {
    let table = table(collection)?;
    let mut builder = Builder::default();
    let condition = builder.where_clause(filter)?;
    let window = builder.window(skip, limit);

    Ok(Statement {
        sql: format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {} WHERE {}{}) AS matched",
            table, condition, window
        ),
        params: builder.params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_names() {
        assert!(validate_collection_name("users").is_ok());
        assert!(validate_collection_name("_audit_2024").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("1users").is_err());
        assert!(validate_collection_name("users; DROP TABLE x").is_err());
        assert!(validate_collection_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_empty_filter_selects_everything() {
        let stmt = select("users", &Filter::new(), &Sort::default(), None, None).unwrap();
        assert_eq!(stmt.sql, "SELECT doc FROM \"users\" WHERE TRUE ORDER BY id COLLATE \"C\" ASC");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_id_membership_uses_id_column() {
        let filter = Filter::by_ids(&["a".to_string(), "b".to_string()]);
        let stmt = select("users", &filter, &Sort::default(), None, None).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT doc FROM \"users\" WHERE id = ANY($1::text[]) ORDER BY id COLLATE \"C\" ASC"
        );
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_field_clauses_bind_paths_and_values() {
        let filter = Filter::from_value(json!({"owner.login": "forsen", "count": {"$gt": 3}})).unwrap();
        let stmt = select("users", &filter, &Sort::default().desc("count"), Some(10), Some(5)).unwrap();

        // Clauses come out in field-name order
        assert!(stmt.sql.contains("jsonb_typeof((doc #> $1::text[])) = 'number'"));
        assert!(stmt.sql.contains("(doc #> $3::text[]) = $4::jsonb"));
        assert!(stmt.sql.contains("ORDER BY doc #> $5::text[] DESC NULLS LAST"));
        assert!(stmt.sql.ends_with("LIMIT $6 OFFSET $7"));
        assert_eq!(stmt.params.len(), 7);
    }

    #[test]
    fn test_uncomparable_range_operand_matches_nothing() {
        let filter = Filter::from_value(json!({"tags": {"$gt": ["a"]}})).unwrap();
        let stmt = count("users", &filter, None, None).unwrap();
        assert!(stmt.sql.contains("WHERE FALSE"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_count_wraps_window() {
        let stmt = count("users", &Filter::new(), Some(2), Some(3)).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT 1 FROM \"users\" WHERE TRUE LIMIT $1 OFFSET $2) AS matched"
        );
    }

    #[test]
    fn test_invalid_collection_is_rejected_before_sql() {
        assert!(select("bad name", &Filter::new(), &Sort::default(), None, None).is_err());
    }
}
