//! Query-string parsing for the request facade.
//!
//! # Invariants
//! - Reserved keys never become filters.
//! - Malformed numbers and booleans are `BadRequest`, never defaulted.

use crudify_core::{CrudError, CrudResult, Projection, QueryCriteria, Scope, SortSpec};

pub const PARAM_SEARCH: &str = "search";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_SIZE: &str = "size";
pub const PARAM_SORT_BY: &str = "by";
pub const PARAM_DESC: &str = "desc";
pub const PARAM_RESPONSE_FIELD: &str = "res_field";
pub const PARAM_SKIP_FIELD: &str = "skip_field";
pub const PARAM_SELECTION: &str = "selection_type";
pub const PARAM_HARD: &str = "hard";

const RESERVED: [&str; 9] = [
    PARAM_SEARCH,
    PARAM_PAGE,
    PARAM_SIZE,
    PARAM_SORT_BY,
    PARAM_DESC,
    PARAM_RESPONSE_FIELD,
    PARAM_SKIP_FIELD,
    PARAM_SELECTION,
    PARAM_HARD,
];

/// Parsed request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub search: String,
    pub page: u32,
    pub size: Option<i64>,
    pub sort_by: Vec<String>,
    pub descending: bool,
    pub response_fields: Vec<String>,
    /// Field names dropped from the response at every nesting level.
    pub skip_fields: Vec<String>,
    pub scope: Scope,
    pub hard: bool,
    /// Raw filter values keyed by field; the last occurrence wins.
    pub filters: Vec<(String, String)>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            search: String::new(),
            page: 0,
            size: None,
            sort_by: Vec::new(),
            descending: true,
            response_fields: Vec::new(),
            skip_fields: Vec::new(),
            scope: Scope::Active,
            hard: false,
            filters: Vec::new(),
        }
    }
}

impl RequestParams {
    /// Splits raw `key=value` pairs into reserved parameters and filters.
    ///
    /// # Errors
    /// - `BadRequest` for malformed `page`, `size`, `desc`, `hard` or
    ///   `selection_type` values.
    pub fn parse(pairs: &[(String, String)]) -> CrudResult<Self> {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                PARAM_SEARCH => params.search = value.clone(),
                PARAM_PAGE => params.page = parse_number(PARAM_PAGE, value)?,
                PARAM_SIZE => params.size = Some(parse_number(PARAM_SIZE, value)?),
                PARAM_SORT_BY => params.sort_by.push(value.trim().to_string()),
                PARAM_DESC => params.descending = parse_flag(PARAM_DESC, value)?,
                PARAM_RESPONSE_FIELD => params.response_fields.push(value.trim().to_string()),
                PARAM_SKIP_FIELD => params.skip_fields.push(value.trim().to_string()),
                PARAM_SELECTION => params.scope = Scope::parse(value)?,
                PARAM_HARD => params.hard = parse_flag(PARAM_HARD, value)?,
                _ => {
                    params.filters.retain(|(field, _)| field != key);
                    params.filters.push((key.clone(), value.clone()));
                }
            }
        }
        Ok(params)
    }

    pub fn is_reserved(key: &str) -> bool {
        RESERVED.contains(&key)
    }

    /// Response shaping: `res_field` allow-list plus `skip_field` names.
    pub fn projection(&self) -> Projection {
        Projection::new(self.response_fields.clone()).skipping(self.skip_fields.iter().cloned())
    }

    /// Builds query criteria, using `default_size` when no size was given.
    ///
    /// # Errors
    /// - `BadRequest` when a filter carries an unknown operator.
    pub fn criteria(&self, default_size: i64) -> CrudResult<QueryCriteria> {
        let mut sort = SortSpec::default();
        if !self.sort_by.is_empty() {
            sort.fields = self.sort_by.clone();
        }
        sort.descending = self.descending;

        let mut criteria = QueryCriteria::new()
            .search(self.search.clone())
            .page(self.page, self.size.unwrap_or(default_size))
            .sort(sort)
            .scope(self.scope);
        for (field, raw) in &self.filters {
            criteria = criteria.filter_raw(field.clone(), raw)?;
        }
        Ok(criteria)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> CrudResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        CrudError::bad_request("Parameter {} expects a number, got {}")
            .with_arg(key)
            .with_arg(raw)
    })
}

fn parse_flag(key: &str, raw: &str) -> CrudResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CrudError::bad_request("Parameter {} expects true or false, got {}")
            .with_arg(key)
            .with_arg(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::RequestParams;
    use crudify_core::{ErrorKind, Scope};

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reserved_keys_are_split_from_filters() {
        let params = RequestParams::parse(&pairs(&[
            ("search", "doe"),
            ("page", "2"),
            ("size", "20"),
            ("by", "name"),
            ("by", "age"),
            ("desc", "false"),
            ("res_field", "name"),
            ("skip_field", "deleted"),
            ("selection_type", "archived"),
            ("age", "> 18"),
        ]))
        .expect("params should parse");

        assert_eq!(params.search, "doe");
        assert_eq!(params.page, 2);
        assert_eq!(params.size, Some(20));
        assert_eq!(params.sort_by, vec!["name", "age"]);
        assert!(!params.descending);
        assert_eq!(params.response_fields, vec!["name"]);
        assert_eq!(params.projection().skip, vec!["deleted"]);
        assert_eq!(params.scope, Scope::Archived);
        assert_eq!(params.filters, pairs(&[("age", "> 18")]));
        assert!(RequestParams::is_reserved("hard"));
        assert!(RequestParams::is_reserved("skip_field"));
        assert!(!RequestParams::is_reserved("age"));
    }

    #[test]
    fn malformed_numbers_are_bad_requests() {
        for bad in [("page", "two"), ("size", "x"), ("desc", "maybe"), ("hard", "1")] {
            let err = RequestParams::parse(&pairs(&[bad])).expect_err("should reject");
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{bad:?}");
        }
    }

    #[test]
    fn criteria_falls_back_to_default_size_and_id_sort() {
        let criteria = RequestParams::parse(&pairs(&[("name", "Ada")]))
            .and_then(|params| params.criteria(25))
            .expect("criteria should build");
        assert_eq!(criteria.size, 25);
        assert_eq!(criteria.sort.fields, vec!["id"]);
        assert!(criteria.sort.descending);
        assert!(criteria.filters.contains_key("name"));
    }

    #[test]
    fn unknown_operator_fails_criteria() {
        let err = RequestParams::parse(&pairs(&[("age", "~~ 3")]))
            .and_then(|params| params.criteria(50))
            .expect_err("operator should be rejected");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
