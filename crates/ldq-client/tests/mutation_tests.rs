//! Writes: change tracking, listeners, DN operations, range retrieval.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use ldq_client::controls::tree_delete;
use ldq_client::prelude::*;
use ldq_query::ast::prop;

/// Adding an entity sends its object classes and the non-null mapped
/// values, never the DN property as an attribute.
#[tokio::test]
async fn test_add_sends_object_classes_and_non_null_values() {
    let (ctx, state) = mock_context(vec![op_response(0)]);

    let user = TestUser {
        dn: Some("cn=new,dc=example,dc=com".into()),
        p1: Some("new".into()),
        p2: None,
        ..TestUser::default()
    };
    ctx.add(&user).await.unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Add(request) = &state.requests[0] else {
        panic!("expected an add request");
    };
    assert_eq!(request.dn, "cn=new,dc=example,dc=com");
    assert_eq!(
        request.attributes[0],
        (
            "objectClass".to_owned(),
            vec![RawValue::Text("user".into())]
        )
    );
    assert!(request.attributes.iter().any(|(a, _)| a == "x"));
    assert!(!request.attributes.iter().any(|(a, _)| a == "y"));
    assert!(!request.attributes.iter().any(|(a, _)| a == "distinguishedName"));
}

#[tokio::test]
async fn test_add_without_dn_is_rejected() {
    let (ctx, state) = mock_context(vec![]);
    let err = ctx.add(&TestUser::default()).await.unwrap_err();
    assert!(matches!(err, DirectoryError::InvalidArgument { .. }));
    assert!(state.lock().unwrap().requests.is_empty());
}

/// An update ships exactly the attributes that changed.
#[tokio::test]
async fn test_update_sends_minimal_modifications() {
    let (ctx, state) = mock_context(vec![
        search_response(vec![entry(
            "cn=a,dc=example,dc=com",
            &[("x", &["p1"]), ("y", &["p2"])],
        )]),
        op_response(0),
    ]);

    let mut user = ctx
        .get_by_dn::<TestUser>("cn=a,dc=example,dc=com")
        .await
        .unwrap();
    user.p2 = Some("changed".into());
    ctx.update(&mut user).await.unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Modify(request) = &state.requests[1] else {
        panic!("expected a modify request");
    };
    assert_eq!(
        request.operations,
        vec![ModificationOp::Replace {
            attribute: "y".into(),
            values: vec![RawValue::Text("changed".into())],
        }]
    );
}

/// After a successful update the snapshot refreshes: updating again with no
/// further mutation is a no-op.
#[tokio::test]
async fn test_update_refreshes_the_snapshot() {
    let (ctx, state) = mock_context(vec![
        search_response(vec![entry("cn=a,dc=example,dc=com", &[("x", &["p1"])])]),
        op_response(0),
    ]);

    let mut user = ctx
        .get_by_dn::<TestUser>("cn=a,dc=example,dc=com")
        .await
        .unwrap();
    user.p1 = Some("renamed".into());
    ctx.update(&mut user).await.unwrap();
    ctx.update(&mut user).await.unwrap();

    assert_eq!(state.lock().unwrap().requests.len(), 2);
}

#[tokio::test]
async fn test_untracked_update_fails() {
    let (ctx, state) = mock_context(vec![search_response(vec![entry(
        "cn=a,dc=example,dc=com",
        &[("x", &["p1"])],
    )])]);

    let mut users = ctx
        .query::<TestUser>()
        .as_no_tracking()
        .to_vec()
        .await
        .unwrap();
    let err = ctx.update(&mut users[0]).await.unwrap_err();
    assert!(matches!(err, DirectoryError::UntrackedUpdate { .. }));
    assert_eq!(state.lock().unwrap().requests.len(), 1);
}

/// Tracked attribute bags diff and update like mapped entities.
#[tokio::test]
async fn test_update_entry_diffs_the_bag() {
    let (ctx, state) = mock_context(vec![op_response(0)]);

    let mut bag = entry("cn=b,dc=example,dc=com", &[("title", &["intern"])]);
    bag.set_string("title", "engineer");
    bag.set_string("mobile", "+1555");
    ctx.update_entry(&mut bag, Vec::new()).await.unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Modify(request) = &state.requests[0] else {
        panic!("expected a modify request");
    };
    assert_eq!(request.operations.len(), 2);
    assert!(request
        .operations
        .iter()
        .any(|op| op.attribute() == "title"));
    assert!(request
        .operations
        .iter()
        .any(|op| matches!(op, ModificationOp::Add { attribute, .. } if attribute == "mobile")));
}

struct CountingListener {
    vetoed: bool,
    before: AtomicUsize,
    after: AtomicUsize,
}

#[async_trait]
impl DirectoryEventListener for CountingListener {
    async fn before_delete(&self, _dn: &str) -> DirectoryResult<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        if self.vetoed {
            return Err(DirectoryError::invalid_argument("vetoed by listener"));
        }
        Ok(())
    }

    async fn after_delete(&self, _dn: &str) -> DirectoryResult<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A failing pre-listener aborts the operation before the wire call; the
/// post-listener never runs.
#[tokio::test]
async fn test_listener_failure_aborts_the_operation() {
    let listener = Arc::new(CountingListener {
        vetoed: true,
        before: AtomicUsize::new(0),
        after: AtomicUsize::new(0),
    });
    let (ctx, state) = mock_context(vec![op_response(0)]);
    let ctx = ctx.with_listener(Arc::clone(&listener) as Arc<dyn DirectoryEventListener>);

    let err = ctx
        .delete("cn=doomed,dc=example,dc=com", Vec::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("vetoed"));
    assert!(state.lock().unwrap().requests.is_empty());
    assert_eq!(listener.before.load(Ordering::SeqCst), 1);
    assert_eq!(listener.after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_listeners_wrap_successful_delete() {
    let listener = Arc::new(CountingListener {
        vetoed: false,
        before: AtomicUsize::new(0),
        after: AtomicUsize::new(0),
    });
    let (ctx, state) = mock_context(vec![op_response(0)]);
    let ctx = ctx.with_listener(Arc::clone(&listener) as Arc<dyn DirectoryEventListener>);

    ctx.delete("cn=old,dc=example,dc=com", vec![tree_delete()])
        .await
        .unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Delete(request) = &state.requests[0] else {
        panic!("expected a delete request");
    };
    assert_eq!(request.controls[0].oid, ldq_client::controls::TREE_DELETE_OID);
    assert_eq!(listener.before.load(Ordering::SeqCst), 1);
    assert_eq!(listener.after.load(Ordering::SeqCst), 1);
}

/// A failed server response surfaces code and diagnostic, and skips the
/// post-listeners.
#[tokio::test]
async fn test_failed_operation_carries_the_result_code() {
    let listener = Arc::new(CountingListener {
        vetoed: false,
        before: AtomicUsize::new(0),
        after: AtomicUsize::new(0),
    });
    let (ctx, _) = mock_context(vec![op_response(32)]);
    let ctx = ctx.with_listener(Arc::clone(&listener) as Arc<dyn DirectoryEventListener>);

    let err = ctx
        .delete("cn=missing,dc=example,dc=com", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Operation { code: 32, .. }));
    assert_eq!(listener.after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rename_builds_and_escapes_the_new_rdn() {
    let (ctx, state) = mock_context(vec![op_response(0)]);

    let new_dn = ctx
        .rename_entry(
            "cn=Doe John,ou=people,dc=example,dc=com",
            "Doe, Jane",
            None,
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(new_dn, r"cn=Doe\, Jane,ou=people,dc=example,dc=com");

    let state = state.lock().unwrap();
    let DirectoryRequest::ModifyDn(request) = &state.requests[0] else {
        panic!("expected a modify-dn request");
    };
    assert_eq!(request.new_rdn, r"cn=Doe\, Jane");
    assert!(request.delete_old_rdn);
    assert!(request.new_parent.is_none());
}

#[tokio::test]
async fn test_move_keeps_the_rdn_under_the_new_parent() {
    let (ctx, state) = mock_context(vec![op_response(0)]);

    let new_dn = ctx
        .move_entry(
            "cn=a,ou=old,dc=example,dc=com",
            "ou=new,dc=example,dc=com",
            Some(true),
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(new_dn, "cn=a,ou=new,dc=example,dc=com");

    let state = state.lock().unwrap();
    let DirectoryRequest::ModifyDn(request) = &state.requests[0] else {
        panic!("expected a modify-dn request");
    };
    assert_eq!(request.new_parent.as_deref(), Some("ou=new,dc=example,dc=com"));
}

/// Range retrieval walks `attr;range=N-M` blocks until the final `N-*`.
#[tokio::test]
async fn test_range_retrieval_walks_blocks() {
    let first = {
        let mut attrs = DirectoryAttributes::new("cn=big,dc=example,dc=com");
        attrs.set(
            "member;range=0-1".to_owned(),
            vec![
                RawValue::Text("cn=m0".into()),
                RawValue::Text("cn=m1".into()),
            ],
        );
        attrs
    };
    let second = {
        let mut attrs = DirectoryAttributes::new("cn=big,dc=example,dc=com");
        attrs.set(
            "member;range=2-*".to_owned(),
            vec![RawValue::Text("cn=m2".into())],
        );
        attrs
    };
    let (ctx, state) = mock_context(vec![
        search_response(vec![first]),
        search_response(vec![second]),
    ]);

    let members: Vec<String> = ctx
        .retrieve_ranges("cn=big,dc=example,dc=com", "member", 0)
        .await
        .unwrap();
    assert_eq!(members, vec!["cn=m0", "cn=m1", "cn=m2"]);

    let state = state.lock().unwrap();
    let attribute_lists: Vec<Vec<String>> = state
        .requests
        .iter()
        .map(|r| match r {
            DirectoryRequest::Search(s) => s.attributes.clone(),
            other => panic!("expected search, got {other:?}"),
        })
        .collect();
    assert_eq!(attribute_lists[0], vec!["member;range=0-*"]);
    assert_eq!(attribute_lists[1], vec!["member;range=2-*"]);
}

/// add_attribute and delete_attribute are single-op modifies.
#[tokio::test]
async fn test_attribute_level_operations() {
    let (ctx, state) = mock_context(vec![op_response(0), op_response(0)]);

    ctx.add_attribute(
        "cn=a,dc=example,dc=com",
        "proxyAddresses",
        RawValue::Text("smtp:a@example.com".into()),
        Vec::new(),
    )
    .await
    .unwrap();
    ctx.delete_attribute("cn=a,dc=example,dc=com", "mobile", None, Vec::new())
        .await
        .unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Modify(add) = &state.requests[0] else {
        panic!("expected a modify request");
    };
    assert!(matches!(&add.operations[0], ModificationOp::Add { .. }));
    let DirectoryRequest::Modify(delete) = &state.requests[1] else {
        panic!("expected a modify request");
    };
    assert_eq!(
        delete.operations[0],
        ModificationOp::Delete {
            attribute: "mobile".into(),
            values: Vec::new(),
        }
    );
}

/// add_and_get round-trips through the directory.
#[tokio::test]
async fn test_add_and_get_reads_back() {
    let (ctx, _) = mock_context(vec![
        op_response(0),
        search_response(vec![entry(
            "cn=new,dc=example,dc=com",
            &[("x", &["server-side"])],
        )]),
    ]);

    let user = TestUser {
        dn: Some("cn=new,dc=example,dc=com".into()),
        p1: Some("client-side".into()),
        ..TestUser::default()
    };
    let tracked = ctx.add_and_get(&user).await.unwrap();
    assert_eq!(tracked.p1.as_deref(), Some("server-side"));
    assert!(tracked.is_tracked());
}

/// An entity materialised from a filtered query updates through the same
/// pipeline: snapshot at materialisation, diff on update.
#[tokio::test]
async fn test_query_then_update_lifecycle() {
    let (ctx, state) = mock_context(vec![
        search_response(vec![entry(
            "cn=a,dc=example,dc=com",
            &[("x", &["a"]), ("c", &["keep"])],
        )]),
        op_response(0),
    ]);

    let mut users = ctx
        .query::<TestUser>()
        .filter(prop("P1").eq("a"))
        .to_vec()
        .await
        .unwrap();
    let user = &mut users[0];
    user.p6 = None; // delete c
    user.p4 = Some("fresh".into()); // add a

    ctx.update(user).await.unwrap();

    let state = state.lock().unwrap();
    let DirectoryRequest::Modify(request) = &state.requests[1] else {
        panic!("expected a modify request");
    };
    assert_eq!(request.operations.len(), 2);
    assert!(request
        .operations
        .iter()
        .any(|op| matches!(op, ModificationOp::Add { attribute, .. } if attribute == "a")));
    assert!(request
        .operations
        .iter()
        .any(|op| matches!(op, ModificationOp::Delete { attribute, values }
            if attribute == "c" && values.is_empty())));
}
