use crate::core::{Fields, Result, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Neq => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Neq => "<>",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }
}

/// One filter clause over a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    IsNull(String),
    Contains {
        field: String,
        needle: String,
    },
}

impl Expr {
    pub fn field(&self) -> &str {
        match self {
            Expr::Compare { field, .. } => field,
            Expr::In { field, .. } => field,
            Expr::IsNull(field) => field,
            Expr::Contains { field, .. } => field,
        }
    }

    /// Literal operands, used to type-check the clause against a schema.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            Expr::Compare { value, .. } => vec![value.clone()],
            Expr::In { values, .. } => values.clone(),
            Expr::IsNull(_) => Vec::new(),
            Expr::Contains { needle, .. } => vec![Value::from(needle.as_str())],
        }
    }

    /// Evaluates the clause; comparisons involving NULL never match.
    pub fn matches(&self, fields: &Fields) -> Result<bool> {
        let actual = fields.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Expr::IsNull(_) => Ok(actual.is_null()),
            _ if actual.is_null() => Ok(false),
            Expr::Compare { op, value, .. } => {
                if value.is_null() {
                    return Ok(false);
                }
                Ok(op.holds(actual.compare(value)?))
            }
            Expr::In { values, .. } => {
                for candidate in values {
                    if !candidate.is_null() && actual.compare(candidate)? == Ordering::Equal {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Contains { needle, .. } => {
                Ok(actual.as_str().is_some_and(|text| text.contains(needle.as_str())))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare { field, op, value } => write!(f, "{} {} {}", field, op.symbol(), value),
            Expr::In { field, values } => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} IN ({})", field, values.join(", "))
            }
            Expr::IsNull(field) => write!(f, "{} IS NULL", field),
            Expr::Contains { field, needle } => write!(f, "{} LIKE '%{}%'", field, needle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{} ASC", self.field),
            Direction::Desc => write!(f, "{} DESC", self.field),
        }
    }
}

/// Filter, sort and limit specification independent of any concrete query.
///
/// Criteria are translated into a [`super::QueryBuilder`] by the session,
/// which checks field names and literal types against the root entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    filters: Vec<Expr>,
    order_by: Vec<OrderBy>,
    first_result: Option<usize>,
    max_results: Option<usize>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_expr(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn where_cmp(
        self,
        field: impl Into<String>,
        op: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.where_expr(Expr::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_cmp(field, Comparison::Eq, value)
    }

    pub fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.where_expr(Expr::In {
            field: field.into(),
            values,
        })
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.where_expr(Expr::IsNull(field.into()))
    }

    pub fn where_contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.where_expr(Expr::Contains {
            field: field.into(),
            needle: needle.into(),
        })
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn first_result(mut self, offset: usize) -> Self {
        self.first_result = Some(offset);
        self
    }

    pub fn max_results(mut self, limit: usize) -> Self {
        self.max_results = Some(limit);
        self
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn get_first_result(&self) -> Option<usize> {
        self.first_result
    }

    pub fn get_max_results(&self) -> Option<usize> {
        self.max_results
    }

    /// Every field name referenced by filters and orderings.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        self.filters
            .iter()
            .map(Expr::field)
            .chain(self.order_by.iter().map(|o| o.field.as_str()))
    }
}
