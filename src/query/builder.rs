use super::{Criteria, Expr, OrderBy};
use crate::core::{DbError, Result};
use crate::session::TypeDescriptor;
use std::fmt;

/// Mutable query under construction.
///
/// `select_from` sets the root entity; criteria are merged in by
/// [`crate::Session::apply_criteria`]; `get_query` freezes the builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    root: Option<TypeDescriptor>,
    extra_select: Vec<String>,
    filters: Vec<Expr>,
    order_by: Vec<OrderBy>,
    first_result: Option<usize>,
    max_results: Option<usize>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_from(mut self, root: impl Into<TypeDescriptor>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Adds a scalar column returned next to each object.
    pub fn add_select(mut self, column: impl Into<String>) -> Self {
        self.extra_select.push(column.into());
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn add_order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn set_first_result(mut self, offset: Option<usize>) -> Self {
        self.first_result = offset;
        self
    }

    pub fn set_max_results(mut self, limit: Option<usize>) -> Self {
        self.max_results = limit;
        self
    }

    pub fn root(&self) -> Option<&TypeDescriptor> {
        self.root.as_ref()
    }

    /// Merges already validated criteria; limits set by the criteria win.
    pub fn merge_criteria(mut self, criteria: &Criteria) -> Self {
        self.filters.extend(criteria.filters().iter().cloned());
        self.order_by.extend(criteria.orderings().iter().cloned());
        if criteria.get_first_result().is_some() {
            self.first_result = criteria.get_first_result();
        }
        if criteria.get_max_results().is_some() {
            self.max_results = criteria.get_max_results();
        }
        self
    }

    pub fn get_query(&self) -> Result<Query> {
        let root = self.root.clone().ok_or(DbError::invalid_input(
            "query",
            "a query builder with a root entity",
        ))?;

        Ok(Query {
            root,
            extra_select: self.extra_select.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            first_result: self.first_result,
            max_results: self.max_results,
        })
    }
}

/// Frozen query ready to be executed by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    root: TypeDescriptor,
    extra_select: Vec<String>,
    filters: Vec<Expr>,
    order_by: Vec<OrderBy>,
    first_result: Option<usize>,
    max_results: Option<usize>,
}

impl Query {
    pub fn root(&self) -> &TypeDescriptor {
        &self.root
    }

    pub fn extra_select(&self) -> &[String] {
        &self.extra_select
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn first_result(&self) -> Option<usize> {
        self.first_result
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT this")?;
        for column in &self.extra_select {
            write!(f, ", this.{}", column)?;
        }
        write!(f, " FROM {} this", self.root)?;

        if !self.filters.is_empty() {
            let clauses: Vec<String> = self.filters.iter().map(|e| e.to_string()).collect();
            write!(f, " WHERE {}", clauses.join(" AND "))?;
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self.order_by.iter().map(|o| o.to_string()).collect();
            write!(f, " ORDER BY {}", orders.join(", "))?;
        }
        if let Some(limit) = self.max_results {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.first_result {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}
