//! Caller-supplied query criteria.
//!
//! # Responsibility
//! - Model search, filters, sort, pagination and visibility scope.
//! - Tokenize `"<operator> <literal>"` filter values over a closed operator
//!   set.
//!
//! # Invariants
//! - A bare filter value means `=`.
//! - Unknown operator tokens and scope names are `BadRequest`.

use crate::error::{CrudError, CrudResult};
use crate::model::record::ID_FIELD;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Default page size when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Soft-delete visibility of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// Rows with `deleted = false`.
    #[default]
    Active,
    /// Rows with `deleted = true`.
    Archived,
    /// Every row.
    All,
}

impl Scope {
    /// Parses a scope name case-insensitively; `STANDART` is accepted as an
    /// alias of `ACTIVE`.
    pub fn parse(value: &str) -> CrudResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" | "STANDART" => Ok(Self::Active),
            "ARCHIVED" => Ok(Self::Archived),
            "ALL" => Ok(Self::All),
            _ => Err(CrudError::bad_request("Unknown selection type {}").with_arg(value.trim())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
            Self::All => "ALL",
        }
    }

    /// Value the `deleted` column must hold, `None` for [`Scope::All`].
    pub fn deleted_flag(self) -> Option<bool> {
        match self {
            Self::Active => Some(false),
            Self::Archived => Some(true),
            Self::All => None,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Closed set of filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl Operator {
    pub fn parse(token: &str) -> CrudResult<Self> {
        match token {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            other if other.eq_ignore_ascii_case("like") => Ok(Self::Like),
            other => Err(CrudError::bad_request("Unsupported filter operator {}").with_arg(other)),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One parsed filter: operator plus the still untyped literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpr {
    pub operator: Operator,
    pub literal: String,
}

impl FilterExpr {
    pub fn new(operator: Operator, literal: impl Into<String>) -> Self {
        Self {
            operator,
            literal: literal.into(),
        }
    }

    pub fn eq(literal: impl Into<String>) -> Self {
        Self::new(Operator::Eq, literal)
    }

    /// Tokenizes a raw filter value.
    ///
    /// Without whitespace the whole value is an `=` literal. Otherwise the
    /// first whitespace-delimited token is the operator and the remainder,
    /// trimmed, is the literal.
    pub fn parse(raw: &str) -> CrudResult<Self> {
        let trimmed = raw.trim();
        match trimmed.split_once(char::is_whitespace) {
            None => Ok(Self::eq(trimmed)),
            Some((token, rest)) => Ok(Self::new(Operator::parse(token)?, rest.trim())),
        }
    }
}

/// Sort fields plus one direction for all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub fields: Vec<String>,
    pub descending: bool,
}

impl SortSpec {
    pub fn new<I, S>(fields: I, descending: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            descending,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new([ID_FIELD], true)
    }
}

/// Full description of one listing or counting request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCriteria {
    /// Free-text search; empty disables it.
    pub search: String,
    pub filters: BTreeMap<String, FilterExpr>,
    /// Zero-based page index.
    pub page: u32,
    pub size: i64,
    pub sort: SortSpec,
    pub scope: Scope,
}

impl Default for QueryCriteria {
    fn default() -> Self {
        Self {
            search: String::new(),
            filters: BTreeMap::new(),
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: SortSpec::default(),
            scope: Scope::Active,
        }
    }
}

impl QueryCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn filter(mut self, field: impl Into<String>, expr: FilterExpr) -> Self {
        self.filters.insert(field.into(), expr);
        self
    }

    /// Adds a filter from its raw `"<operator> <literal>"` form.
    pub fn filter_raw(self, field: impl Into<String>, raw: &str) -> CrudResult<Self> {
        Ok(self.filter(field, FilterExpr::parse(raw)?))
    }

    pub fn page(mut self, page: u32, size: i64) -> Self {
        self.page = page;
        self.size = size;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Row offset of the requested page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page).saturating_mul(self.size.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterExpr, Operator, QueryCriteria, Scope, SortSpec};
    use crate::error::ErrorKind;

    #[test]
    fn bare_value_defaults_to_equals() {
        assert_eq!(FilterExpr::parse("42").unwrap(), FilterExpr::eq("42"));
    }

    #[test]
    fn operator_token_is_split_from_literal() {
        assert_eq!(
            FilterExpr::parse("> 10").unwrap(),
            FilterExpr::new(Operator::Gt, "10")
        );
        assert_eq!(
            FilterExpr::parse("like  %doe%").unwrap(),
            FilterExpr::new(Operator::Like, "%doe%")
        );
        assert_eq!(
            FilterExpr::parse("= John Doe").unwrap(),
            FilterExpr::new(Operator::Eq, "John Doe")
        );
        assert_eq!(
            FilterExpr::parse("<> 3").unwrap().operator,
            Operator::Ne
        );
    }

    #[test]
    fn unknown_operator_is_bad_request() {
        let err = FilterExpr::parse("~ 10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = FilterExpr::parse("; drop").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn scope_parse_accepts_legacy_alias() {
        assert_eq!(Scope::parse("standart").unwrap(), Scope::Active);
        assert_eq!(Scope::parse("ARCHIVED").unwrap(), Scope::Archived);
        assert_eq!(Scope::parse("all").unwrap(), Scope::All);
        assert_eq!(
            Scope::parse("deleted").unwrap_err().kind(),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn defaults_sort_by_id_descending() {
        let criteria = QueryCriteria::new();
        assert_eq!(criteria.sort, SortSpec::new(["id"], true));
        assert_eq!(criteria.scope, Scope::Active);
        assert_eq!(criteria.size, 50);
        assert!(criteria.search.is_empty());
    }

    #[test]
    fn offset_follows_page_and_size() {
        assert_eq!(QueryCriteria::new().page(2, 20).offset(), 40);
        assert_eq!(QueryCriteria::new().page(2, -1).offset(), 0);
    }
}
