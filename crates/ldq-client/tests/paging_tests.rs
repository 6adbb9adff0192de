//! Paged retrieval against a scripted connection.

mod common;

use common::*;
use ldq_client::prelude::*;
use ldq_query::ast::prop;

fn entries(prefix: &str, count: usize) -> Vec<DirectoryAttributes> {
    (0..count)
        .map(|i| entry(&format!("cn={prefix}{i},dc=example,dc=com"), &[]))
        .collect()
}

fn search_requests(state: &std::sync::Mutex<MockState>) -> Vec<SearchRequest> {
    state
        .lock()
        .unwrap()
        .requests
        .iter()
        .map(|r| match r {
            DirectoryRequest::Search(s) => s.clone(),
            other => panic!("expected search, got {other:?}"),
        })
        .collect()
}

/// A 1200-entry result with a 500-entry page size counts in three
/// sequential paged searches, echoing each returned cookie.
#[tokio::test]
async fn test_paged_count_sums_all_pages() {
    let (ctx, state) = mock_context(vec![
        paged_search_response(entries("a", 500), b"c1"),
        paged_search_response(entries("b", 500), b"c2"),
        paged_search_response(entries("c", 200), b""),
    ]);

    let count = ctx.query::<TestUser>().count().await.unwrap();
    assert_eq!(count, 1200);

    let requests = search_requests(&state);
    assert_eq!(requests.len(), 3);
    assert_eq!(request_page_cookie(&DirectoryRequest::Search(requests[0].clone())), Some(vec![]));
    assert_eq!(
        request_page_cookie(&DirectoryRequest::Search(requests[1].clone())),
        Some(b"c1".to_vec())
    );
    assert_eq!(
        request_page_cookie(&DirectoryRequest::Search(requests[2].clone())),
        Some(b"c2".to_vec())
    );
    // Counting needs no attribute payload.
    assert_eq!(requests[0].attributes, vec!["1.1"]);
}

/// Concatenating pages preserves server order and loses nothing.
#[tokio::test]
async fn test_pages_concatenate_in_server_order() {
    let (ctx, _) = mock_context(vec![
        paged_search_response(entries("p", 3), b"next"),
        paged_search_response(entries("q", 2), b""),
    ]);

    let users = ctx.query::<TestUser>().to_vec().await.unwrap();
    let dns: Vec<&str> = users.iter().map(|u| u.dn()).collect();
    assert_eq!(
        dns,
        vec![
            "cn=p0,dc=example,dc=com",
            "cn=p1,dc=example,dc=com",
            "cn=p2,dc=example,dc=com",
            "cn=q0,dc=example,dc=com",
            "cn=q1,dc=example,dc=com",
        ]
    );
}

/// Once `take` is satisfied the driver stops requesting pages.
#[tokio::test]
async fn test_take_stops_the_cookie_loop() {
    let (ctx, state) = mock_context(vec![
        paged_search_response(entries("a", 500), b"c1"),
        paged_search_response(entries("b", 500), b"c2"),
        // Never requested.
        paged_search_response(entries("c", 200), b""),
    ]);

    let users = ctx.query::<TestUser>().take(600).to_vec().await.unwrap();
    assert_eq!(users.len(), 600);
    assert_eq!(search_requests(&state).len(), 2);
}

/// Skip discards leading entries after accumulation.
#[tokio::test]
async fn test_skip_discards_leading_entries() {
    let (ctx, _) = mock_context(vec![search_response(entries("s", 5))]);
    let users = ctx
        .query::<TestUser>()
        .skip(2)
        .take(2)
        .to_vec()
        .await
        .unwrap();
    let dns: Vec<&str> = users.iter().map(|u| u.dn()).collect();
    assert_eq!(dns, vec!["cn=s2,dc=example,dc=com", "cn=s3,dc=example,dc=com"]);
}

/// Size-limit handling: partial results only under within_size_limit.
#[tokio::test]
async fn test_size_limit_partial_results() {
    let (ctx, _) = mock_context(vec![search_response_with(entries("x", 3), 4, Vec::new())]);
    let users = ctx
        .query::<TestUser>()
        .within_size_limit()
        .to_vec()
        .await
        .unwrap();
    assert_eq!(users.len(), 3);

    let (ctx, _) = mock_context(vec![search_response_with(entries("x", 3), 4, Vec::new())]);
    let err = ctx.query::<TestUser>().to_vec().await.unwrap_err();
    assert!(matches!(
        err,
        DirectoryError::SizeLimitExceeded { retrieved: 3 }
    ));
}

/// An explicit page issues exactly one request and surfaces the cookie.
#[tokio::test]
async fn test_explicit_page_returns_cookie() {
    let (ctx, state) = mock_context(vec![paged_search_response(entries("p", 100), b"more")]);

    let (users, cookie) = ctx
        .query::<TestUser>()
        .filter(prop("P1").is_present())
        .page(100)
        .to_page()
        .await
        .unwrap();

    assert_eq!(users.len(), 100);
    assert_eq!(cookie, b"more".to_vec());
    assert_eq!(search_requests(&state).len(), 1);
}

/// without_paging suppresses the implicit paged-results control.
#[tokio::test]
async fn test_without_paging_sends_no_page_control() {
    let (ctx, state) = mock_context(vec![search_response(entries("n", 2))]);

    ctx.query::<TestUser>()
        .without_paging()
        .to_vec()
        .await
        .unwrap();

    let requests = search_requests(&state);
    assert_eq!(requests.len(), 1);
    assert!(request_page_cookie(&DirectoryRequest::Search(requests[0].clone())).is_none());
}

/// A virtual list view issues one request carrying sort + view controls.
#[tokio::test]
async fn test_virtual_list_view_single_request() {
    let (ctx, state) = mock_context(vec![search_response(entries("v", 25))]);

    let users = ctx
        .query::<TestUser>()
        .order_by("P1")
        .virtual_list_view(VirtualListViewOptions::window(101, 25))
        .to_vec()
        .await
        .unwrap();
    assert_eq!(users.len(), 25);

    let requests = search_requests(&state);
    assert_eq!(requests.len(), 1);
    let oids: Vec<&str> = requests[0].controls.iter().map(|c| c.oid.as_str()).collect();
    assert!(oids.contains(&ldq_client::controls::SORT_REQUEST_OID));
    assert!(oids.contains(&ldq_client::controls::VLV_REQUEST_OID));
    // No paged-results control alongside a view.
    assert!(!oids.contains(&ldq_client::controls::PAGED_RESULTS_OID));
}
