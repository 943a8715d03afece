//! Parameterized SQL over JSONB document tables. Identifiers come from configuration and
//! are quoted; every filter value and field path is a bind parameter.

use super::params::SqlArg;
use crate::error::StoreError;
use crate::store::filter::{build_regex, clauses, is_operator_object};
use crate::store::{Document, FindQuery, SortDirection};
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlArg>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: SqlArg) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

/// One table per collection; `seq` keeps insertion order as the final sort tie-breaker.
pub fn create_collection(schema: &str, collection: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            doc JSONB NOT NULL,
            seq BIGSERIAL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        qualified_table(schema, collection)
    )
}

pub fn select(schema: &str, collection: &str, query: &FindQuery) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = where_expr(&mut q, &query.filter)?;
    let mut order: Vec<String> = query
        .sort
        .iter()
        .map(|key| {
            let n = q.push_param(SqlArg::path(&key.field));
            match key.direction {
                SortDirection::Asc => format!("doc #> ${} ASC NULLS FIRST", n),
                SortDirection::Desc => format!("doc #> ${} DESC NULLS LAST", n),
            }
        })
        .collect();
    order.push("seq".into());
    let limit = if query.limit > 0 {
        format!(" LIMIT {}", query.limit)
    } else {
        String::new()
    };
    let offset = if query.skip > 0 {
        format!(" OFFSET {}", query.skip)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT doc FROM {} WHERE {} ORDER BY {}{}{}",
        qualified_table(schema, collection),
        where_clause,
        order.join(", "),
        limit,
        offset
    );
    Ok(q)
}

pub fn count(schema: &str, collection: &str, filter: Option<&Document>) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = match filter {
        Some(filter) => where_expr(&mut q, filter)?,
        None => "TRUE".into(),
    };
    q.sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        qualified_table(schema, collection),
        where_clause
    );
    Ok(q)
}

pub fn sum(schema: &str, collection: &str, filter: &Document, field: &str) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let path = q.push_param(SqlArg::path(field));
    let where_clause = where_expr(&mut q, filter)?;
    q.sql = format!(
        "SELECT COALESCE(SUM((doc #>> ${p})::float8), 0)::float8 FROM {} WHERE jsonb_typeof(doc #> ${p}) = 'number' AND {}",
        qualified_table(schema, collection),
        where_clause,
        p = path
    );
    Ok(q)
}

pub fn upsert(schema: &str, collection: &str, id: uuid::Uuid, doc: &Document) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id = q.push_param(SqlArg::Uuid(id));
    let body = q.push_param(SqlArg::Json(Value::Object(doc.clone())));
    q.sql = format!(
        "INSERT INTO {} (id, doc) VALUES (${}, ${}) ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
        qualified_table(schema, collection),
        id,
        body
    );
    q
}

pub fn update_fields(schema: &str, collection: &str, filter: &Document, patch: &Document) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let patch = q.push_param(SqlArg::Json(Value::Object(patch.clone())));
    let where_clause = where_expr(&mut q, filter)?;
    q.sql = format!(
        "UPDATE {} SET doc = doc || ${}, updated_at = NOW() WHERE {}",
        qualified_table(schema, collection),
        patch,
        where_clause
    );
    Ok(q)
}

pub fn delete(schema: &str, collection: &str, id: uuid::Uuid) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id = q.push_param(SqlArg::Uuid(id));
    q.sql = format!("DELETE FROM {} WHERE id = ${}", qualified_table(schema, collection), id);
    q
}

/// Boolean expression for a filter document. Empty filters match everything.
fn where_expr(q: &mut QueryBuf, filter: &Document) -> Result<String, StoreError> {
    let mut parts = Vec::new();
    for (key, cond) in filter {
        match key.as_str() {
            "$or" | "$and" => {
                let subs = clauses(key, cond)?;
                if subs.is_empty() {
                    parts.push(if key == "$or" { "FALSE".to_string() } else { "TRUE".to_string() });
                    continue;
                }
                let exprs = subs
                    .into_iter()
                    .map(|sub| where_expr(q, sub))
                    .collect::<Result<Vec<_>, _>>()?;
                let joiner = if key == "$or" { " OR " } else { " AND " };
                parts.push(format!("({})", exprs.join(joiner)));
            }
            op if op.starts_with('$') => return Err(StoreError::Query(format!("unknown operator {}", op))),
            field => parts.push(field_expr(q, field, cond)?),
        }
    }
    Ok(if parts.is_empty() {
        "TRUE".into()
    } else {
        parts.join(" AND ")
    })
}

fn field_expr(q: &mut QueryBuf, field: &str, cond: &Value) -> Result<String, StoreError> {
    let path = q.push_param(SqlArg::path(field));
    let target = format!("doc #> ${}", path);
    let ops = match cond {
        Value::Object(ops) if is_operator_object(cond) => ops,
        _ => return Ok(eq_expr(q, &target, cond)),
    };
    let mut parts = Vec::new();
    for (op, arg) in ops {
        let expr = match op.as_str() {
            "$eq" => eq_expr(q, &target, arg),
            "$ne" => format!("({}) IS NOT TRUE", eq_expr(q, &target, arg)),
            "$in" => in_expr(q, &target, arg)?,
            "$nin" => format!("({}) IS NOT TRUE", in_expr(q, &target, arg)?),
            "$gt" => range_expr(q, path, ">", arg)?,
            "$gte" => range_expr(q, path, ">=", arg)?,
            "$lt" => range_expr(q, path, "<", arg)?,
            "$lte" => range_expr(q, path, "<=", arg)?,
            "$exists" if arg.as_bool() == Some(false) => format!("{} IS NULL", target),
            "$exists" => format!("{} IS NOT NULL", target),
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| StoreError::Query("$regex expects a string".into()))?;
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                build_regex(pattern, options)?;
                let operator = if options.contains('i') { "~*" } else { "~" };
                let n = q.push_param(SqlArg::Text(postgres_pattern(pattern)));
                format!(
                    "(jsonb_typeof({t}) = 'string' AND doc #>> ${p} {op} ${n})",
                    t = target,
                    p = path,
                    op = operator,
                    n = n
                )
            }
            "$options" => continue,
            other => return Err(StoreError::Query(format!("unknown operator {}", other))),
        };
        parts.push(expr);
    }
    Ok(if parts.is_empty() {
        "TRUE".into()
    } else {
        format!("({})", parts.join(" AND "))
    })
}

/// Equality that also matches array fields containing the value; `null` matches missing fields.
fn eq_expr(q: &mut QueryBuf, target: &str, value: &Value) -> String {
    if value.is_null() {
        return format!("({t} IS NULL OR {t} = 'null'::jsonb)", t = target);
    }
    let n = q.push_param(SqlArg::Json(value.clone()));
    format!(
        "({t} = ${n} OR (jsonb_typeof({t}) = 'array' AND {t} @> jsonb_build_array(${n})))",
        t = target,
        n = n
    )
}

fn in_expr(q: &mut QueryBuf, target: &str, list: &Value) -> Result<String, StoreError> {
    let items = list
        .as_array()
        .ok_or_else(|| StoreError::Query("$in/$nin expects an array".into()))?;
    if items.is_empty() {
        return Ok("FALSE".into());
    }
    let exprs: Vec<String> = items.iter().map(|item| eq_expr(q, target, item)).collect();
    Ok(format!("({})", exprs.join(" OR ")))
}

fn range_expr(q: &mut QueryBuf, path: u32, op: &str, bound: &Value) -> Result<String, StoreError> {
    match bound {
        Value::Number(n) => {
            let f = n
                .as_f64()
                .ok_or_else(|| StoreError::Query("range bound out of range".into()))?;
            let n = q.push_param(SqlArg::Float(f));
            Ok(format!(
                "(jsonb_typeof(doc #> ${p}) = 'number' AND (doc #>> ${p})::float8 {op} ${n})",
                p = path,
                op = op,
                n = n
            ))
        }
        Value::String(s) => {
            let n = q.push_param(SqlArg::Text(s.clone()));
            Ok(format!(
                "(jsonb_typeof(doc #> ${p}) = 'string' AND doc #>> ${p} {op} ${n})",
                p = path,
                op = op,
                n = n
            ))
        }
        _ => Err(StoreError::Query("range bounds must be numbers or strings".into())),
    }
}

/// PostgreSQL spells the word boundary `\y`; `\b` there means backspace.
fn postgres_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('b') => out.push_str("\\y"),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}
