//! The paging driver (§4.5): drives the PagedResults cookie loop,
//! applies `skip`/`take`, and honours `size_limit_exceeded` when the
//! caller opted into `within_size_limit`.

use crate::connection::{DirectoryConnection, WireRequest, WireResponse};
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::translator::query::PagingOptions;
use ldap3::controls::{PagedResults, RawControl};
use ldap3::{Scope as Ldap3Scope, SearchEntry};

/// Everything a paged search needs besides the paging parameters
/// themselves.
pub struct PagedSearch<'a> {
    pub base: &'a str,
    pub scope: Ldap3Scope,
    pub filter: &'a str,
    pub attrs: &'a [String],
    pub extra_controls: Vec<RawControl>,
}

const SIZE_LIMIT_EXCEEDED_RC: u32 = 4;

/// Run a (possibly paged) search to completion, per §4.5's ordering
/// guarantee: page N+1 is requested only after page N returns.
pub async fn run<C: DirectoryConnection + ?Sized>(
    conn: &C,
    search: PagedSearch<'_>,
    paging: Option<&PagingOptions>,
    paging_enabled: bool,
    server_max_page_size: i32,
    within_size_limit: bool,
    logger: &dyn Logger,
) -> Result<Vec<SearchEntry>> {
    let page_size = effective_page_size(paging, paging_enabled, server_max_page_size);
    let mut entries = Vec::new();
    let mut cookie: Vec<u8> = Vec::new();

    loop {
        let mut controls = search.extra_controls.clone();
        if let Some(size) = page_size {
            controls.push(PagedResults { size, cookie: cookie.clone() }.into());
        }
        if logger.trace_enabled() {
            logger.trace(&format!(
                "search base={:?} scope={:?} filter={:?} attrs={:?} page_size={:?}",
                search.base, search.scope, search.filter, search.attrs, page_size
            ));
        }
        let request = WireRequest::Search {
            base: search.base.to_owned(),
            scope: search.scope,
            filter: search.filter.to_owned(),
            attrs: search.attrs.to_vec(),
            controls,
        };
        let response = conn.send_request(request).await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                logger.error("search request failed", Some(&e));
                return Err(e);
            }
        };
        let WireResponse::Search { entries: page_entries, paging_cookie, rc, matched, text } = response else {
            return Err(Error::Connection("expected a search response".into()));
        };
        if rc == SIZE_LIMIT_EXCEEDED_RC {
            if within_size_limit {
                entries.extend(page_entries);
                break;
            }
            return Err(Error::DirectoryOperation(crate::error::DirectoryOperationError { rc, matched, text }));
        }
        if rc != 0 {
            return Err(Error::DirectoryOperation(crate::error::DirectoryOperationError { rc, matched, text }));
        }
        entries.extend(page_entries);

        let take_satisfied = paging
            .and_then(|p| p.take)
            .map(|take| entries.len() >= paging.map(|p| p.skip).unwrap_or(0) + take)
            .unwrap_or(false);
        match paging_cookie {
            Some(next) if !next.is_empty() && page_size.is_some() && !take_satisfied => cookie = next,
            _ => break,
        }
    }

    apply_skip_take(entries, paging)
}

/// Synchronous counterpart of [`run`], for the blocking API.
pub fn run_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    search: PagedSearch<'_>,
    paging: Option<&PagingOptions>,
    paging_enabled: bool,
    server_max_page_size: i32,
    within_size_limit: bool,
    logger: &dyn Logger,
) -> Result<Vec<SearchEntry>> {
    let page_size = effective_page_size(paging, paging_enabled, server_max_page_size);
    let mut entries = Vec::new();
    let mut cookie: Vec<u8> = Vec::new();

    loop {
        let mut controls = search.extra_controls.clone();
        if let Some(size) = page_size {
            controls.push(PagedResults { size, cookie: cookie.clone() }.into());
        }
        let request = WireRequest::Search {
            base: search.base.to_owned(),
            scope: search.scope,
            filter: search.filter.to_owned(),
            attrs: search.attrs.to_vec(),
            controls,
        };
        let response = conn.send_request_sync(request)?;
        let WireResponse::Search { entries: page_entries, paging_cookie, rc, matched, text } = response else {
            return Err(Error::Connection("expected a search response".into()));
        };
        if rc == SIZE_LIMIT_EXCEEDED_RC {
            if within_size_limit {
                entries.extend(page_entries);
                break;
            }
            return Err(Error::DirectoryOperation(crate::error::DirectoryOperationError { rc, matched, text }));
        }
        if rc != 0 {
            return Err(Error::DirectoryOperation(crate::error::DirectoryOperationError { rc, matched, text }));
        }
        entries.extend(page_entries);

        let take_satisfied = paging
            .and_then(|p| p.take)
            .map(|take| entries.len() >= paging.map(|p| p.skip).unwrap_or(0) + take)
            .unwrap_or(false);
        match paging_cookie {
            Some(next) if !next.is_empty() && page_size.is_some() && !take_satisfied => cookie = next,
            _ => break,
        }
    }

    apply_skip_take(entries, paging)
}

fn effective_page_size(paging: Option<&PagingOptions>, paging_enabled: bool, server_max: i32) -> Option<i32> {
    if !paging_enabled {
        return None;
    }
    let paging = paging?;
    let caller_size = paging.page_size.unwrap_or(server_max);
    Some(caller_size.min(server_max).max(1))
}

fn apply_skip_take(entries: Vec<SearchEntry>, paging: Option<&PagingOptions>) -> Result<Vec<SearchEntry>> {
    let Some(paging) = paging else {
        return Ok(entries);
    };
    let skipped = entries.into_iter().skip(paging.skip);
    Ok(match paging.take {
        Some(take) => skipped.take(take).collect(),
        None => skipped.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{entry, RecordingConnection};
    use crate::logger::NullLogger;

    #[tokio::test]
    async fn concatenates_pages_until_cookie_is_empty() {
        let conn = RecordingConnection::new();
        conn.push_search(vec![entry("cn=a", &[])], Some(b"cookie1".to_vec()));
        conn.push_search(vec![entry("cn=b", &[])], Some(Vec::new()));

        let search = PagedSearch {
            base: "dc=example,dc=com",
            scope: Ldap3Scope::Subtree,
            filter: "(objectClass=*)",
            attrs: &[],
            extra_controls: vec![],
        };
        let paging = PagingOptions { page_size: Some(1), cookie: None, skip: 0, take: None };
        let entries = run(&conn, search, Some(&paging), true, 500, false, &NullLogger).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(conn.requests().len(), 2);
    }

    #[tokio::test]
    async fn size_limit_exceeded_returns_partial_results_when_opted_in() {
        let conn = RecordingConnection::new();
        conn.push_response(Ok(WireResponse::Search {
            entries: vec![entry("cn=a", &[])],
            paging_cookie: None,
            rc: 4,
            matched: String::new(),
            text: "size limit exceeded".into(),
        }));
        let search = PagedSearch {
            base: "dc=example,dc=com",
            scope: Ldap3Scope::Subtree,
            filter: "(objectClass=*)",
            attrs: &[],
            extra_controls: vec![],
        };
        let entries = run(&conn, search, None, false, 500, true, &NullLogger).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
