//! Reference literature browsing and search.

use crate::api_errors::{ApiError, ApiResult};
use crate::http_client::{ApiClient, LiteratureFilter};
use crate::models::{LiteratureDetail, LiteraturePage, LiteratureSearchResults};

pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_LIST_LIMIT: u32 = 100;
pub const MAX_SEARCH_LIMIT: u32 = 50;
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

pub struct LiteratureService {
    client: ApiClient,
}

impl LiteratureService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, filter: &LiteratureFilter) -> ApiResult<LiteraturePage> {
        if filter.page.limit == 0 || filter.page.limit > MAX_LIST_LIMIT {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }

        let filter = LiteratureFilter {
            category: non_blank(filter.category.as_deref()),
            search: non_blank(filter.search.as_deref()),
            page: filter.page,
        };
        self.client.literature(&filter).await
    }

    pub async fn detail(&self, id: i64) -> ApiResult<LiteratureDetail> {
        self.client.literature_detail(id).await
    }

    pub async fn categories(&self) -> ApiResult<Vec<String>> {
        Ok(self.client.literature_categories().await?.categories)
    }

    pub async fn search(&self, query: &str, limit: u32) -> ApiResult<LiteratureSearchResults> {
        let query = validate_search_query(query)?;
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}"
            )));
        }
        self.client.search_literature(&query, limit).await
    }
}

/// Trimmed query of at least two characters
pub fn validate_search_query(query: &str) -> ApiResult<String> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return Err(ApiError::Validation(format!(
            "Search query must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_validation() {
        assert!(validate_search_query("").is_err());
        assert!(validate_search_query("  a ").is_err());
        assert_eq!(validate_search_query(" акне ").unwrap(), "акне");
        // Counted in characters, not bytes
        assert!(validate_search_query("я").is_err());
        assert!(validate_search_query("яд").is_ok());
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" derm ")), Some("derm".to_string()));
        assert_eq!(non_blank(None), None);
    }
}
