//! Pure page-window computation over an ordered result list.

use serde::Serialize;
use tracing::warn;

/// Sanitized pagination input. Invalid boundary values are corrected to safe
/// defaults rather than failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: usize,
    pub page_size: usize,
}

impl PageParams {
    /// Parse raw boundary strings. Non-numeric or sub-1 input is a validation
    /// fault: it is logged and reset to page 1 / the configured default size.
    pub fn sanitize(page: Option<&str>, page_size: Option<&str>, default_size: usize) -> Self {
        let page = match page.map(str::parse::<usize>) {
            Some(Ok(p)) if p >= 1 => p,
            Some(_) => {
                warn!("invalid page parameter {page:?}, using 1");
                1
            }
            None => 1,
        };
        let page_size = match page_size.map(str::parse::<usize>) {
            Some(Ok(s)) if s >= 1 => s,
            Some(_) => {
                warn!("invalid page_size parameter {page_size:?}, using {default_size}");
                default_size.max(1)
            }
            None => default_size.max(1),
        };
        Self { page, page_size }
    }
}

/// One page of results plus navigation links, computed fresh per request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageWindow<T> {
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub current: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// Slice page `params.page` out of `results`. A page beyond the end yields an
/// empty slice, not an error. `previous` is absent on the first page, `next`
/// on or past the last; `current` carries page parameters only when a
/// neighbor exists.
pub fn paginate<T: Clone>(results: &[T], params: PageParams, base_url: &str) -> PageWindow<T> {
    // Callers may build PageParams directly, bypassing sanitize. Zero for
    // either field is meaningless, so clamp to 1 here as well.
    let page = params.page.max(1);
    let page_size = params.page_size.max(1);
    let total_pages = results.len().div_ceil(page_size);

    let start = (page - 1).saturating_mul(page_size).min(results.len());
    let end = start.saturating_add(page_size).min(results.len());

    let link = |p: usize| format!("{base_url}&page={p}&page_size={page_size}");
    let previous = (page > 1).then(|| link(page - 1));
    let next = (page < total_pages).then(|| link(page + 1));
    let current = if previous.is_some() || next.is_some() {
        link(page)
    } else {
        base_url.to_string()
    };

    PageWindow {
        page,
        page_size,
        total_pages,
        previous,
        current,
        next,
        results: results[start..end].to_vec(),
    }
}
