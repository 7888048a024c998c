//! Offset pagination parameters and result pages

use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Canonical page request, validated before any store query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub skip: u64,
}

impl PageRequest {
    /// Build a page request, enforcing the same bounds as [`normalize`]
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page < 1 {
            return Err(Error::InvalidPagination(
                "Page must be a positive integer".to_string(),
            ));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::InvalidPagination(format!(
                "Limit must be between 1 and {MAX_LIMIT}"
            )));
        }

        Ok(Self {
            page,
            limit,
            skip: u64::from(page - 1) * u64::from(limit),
        })
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

/// Validate raw `page`/`limit` query values. Absent or empty values take the defaults.
pub fn normalize(raw_page: Option<&str>, raw_limit: Option<&str>) -> Result<PageRequest> {
    let page = parse_param(raw_page, DEFAULT_PAGE, "Page must be a positive integer")?;
    let limit = parse_param(
        raw_limit,
        DEFAULT_LIMIT,
        "Limit must be between 1 and 100",
    )?;

    PageRequest::new(page, limit)
}

fn parse_param(raw: Option<&str>, default: u32, message: &str) -> Result<u32> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| Error::InvalidPagination(message.to_string())),
    }
}

/// One page of a filtered listing plus the size of the whole filtered set
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

/// Pagination block returned alongside list responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(request: &PageRequest, total_count: u64) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total_count,
            total_pages: total_count.div_ceil(u64::from(request.limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = normalize(None, None).unwrap();
        assert_eq!(request, PageRequest::default());
        assert_eq!((request.page, request.limit, request.skip), (1, 10, 0));

        let empty = normalize(Some(""), Some("")).unwrap();
        assert_eq!(empty, PageRequest::default());
    }

    #[test]
    fn test_skip() {
        let request = normalize(Some("3"), Some("25")).unwrap();
        assert_eq!(request.skip, 50);
    }

    #[test]
    fn test_rejects_page_below_one() {
        for raw in ["0", "-1", "abc", "1.5"] {
            assert!(
                matches!(normalize(Some(raw), None), Err(Error::InvalidPagination(_))),
                "page {raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_limit_bounds() {
        assert!(normalize(None, Some("1")).is_ok());
        assert!(normalize(None, Some("100")).is_ok());

        for raw in ["0", "101", "-5", "ten"] {
            let err = normalize(None, Some(raw)).unwrap_err();
            assert!(matches!(err, Error::InvalidPagination(_)));
            assert!(err.to_string().contains("Limit must be between 1 and 100"));
        }
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let request = PageRequest::new(1, 10).unwrap();
        assert_eq!(PaginationMeta::new(&request, 0).total_pages, 0);
        assert_eq!(PaginationMeta::new(&request, 10).total_pages, 1);
        assert_eq!(PaginationMeta::new(&request, 11).total_pages, 2);
    }
}
