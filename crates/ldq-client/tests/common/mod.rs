//! Shared fixtures: a scripted mock connection and a mapped test type.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use ldq_client::prelude::*;

/// Everything the mock records and replays.
#[derive(Default)]
pub struct MockState {
    /// Requests in send order.
    pub requests: Vec<DirectoryRequest>,
    /// Responses to replay, front first.
    pub responses: VecDeque<DirectoryResponse>,
}

/// A connection that records requests and replays scripted responses.
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl DirectoryConnection for MockConnection {
    async fn send(&mut self, request: DirectoryRequest) -> DirectoryResult<DirectoryResponse> {
        let mut state = self.state.lock().expect("mock state");
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .ok_or_else(|| DirectoryError::connection("mock connection has no scripted response"))
    }
}

/// Factory handing out connections that share one mock state.
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn open(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }

    async fn release(&self, _connection: Box<dyn DirectoryConnection>) {}
}

/// A context over a mock wire, plus the handle to its recorded state.
pub fn mock_context(responses: Vec<DirectoryResponse>) -> (DirectoryContext, Arc<Mutex<MockState>>) {
    let state = Arc::new(Mutex::new(MockState {
        requests: Vec::new(),
        responses: responses.into(),
    }));
    let config = DirectoryConfig::new(Url::parse("ldap://directory.example.com").unwrap());
    let context = DirectoryContext::with_factory(
        config,
        Arc::new(MockFactory {
            state: Arc::clone(&state),
        }),
    );
    (context, state)
}

/// Build an entry as the wire layer would deliver it: tracked, text values.
pub fn entry(dn: &str, attributes: &[(&str, &[&str])]) -> DirectoryAttributes {
    let mut attrs = DirectoryAttributes::new(dn);
    for (name, values) in attributes {
        attrs.set(
            (*name).to_owned(),
            values.iter().map(|v| RawValue::Text((*v).into())).collect(),
        );
    }
    attrs.enable_tracking();
    attrs
}

/// A successful search response.
pub fn search_response(entries: Vec<DirectoryAttributes>) -> DirectoryResponse {
    search_response_with(entries, 0, Vec::new())
}

/// A search response with an explicit result code and response controls.
pub fn search_response_with(
    entries: Vec<DirectoryAttributes>,
    code: u32,
    controls: Vec<DirectoryControl>,
) -> DirectoryResponse {
    DirectoryResponse::Search(SearchResponse {
        entries,
        controls,
        result: OperationResult {
            code,
            matched_dn: String::new(),
            message: String::new(),
        },
    })
}

/// A paged search response carrying a continuation cookie.
pub fn paged_search_response(entries: Vec<DirectoryAttributes>, cookie: &[u8]) -> DirectoryResponse {
    let control = ldq_client::controls::paged_results(0, cookie).expect("paged control");
    search_response_with(entries, 0, vec![control])
}

/// A successful (or failed) mutation response.
pub fn op_response(code: u32) -> DirectoryResponse {
    DirectoryResponse::Operation(OperationResult {
        code,
        matched_dn: String::new(),
        message: if code == 0 {
            String::new()
        } else {
            "operation failed".to_owned()
        },
    })
}

/// The cookie echoed in a request's paged-results control, if any.
pub fn request_page_cookie(request: &DirectoryRequest) -> Option<Vec<u8>> {
    let DirectoryRequest::Search(search) = request else {
        return None;
    };
    ldq_client::controls::parse_paged_response(&search.controls)
        .ok()
        .flatten()
        .map(|p| p.cookie)
}

/// The test type from the mapping scenarios: six properties P1..P6 mapped
/// onto the attributes x, y, z, a, b, c.
#[derive(Debug, Default, Clone)]
pub struct TestUser {
    pub dn: Option<String>,
    pub p1: Option<String>,
    pub p2: Option<String>,
    pub p3: Option<String>,
    pub p4: Option<String>,
    pub p5: Option<String>,
    pub p6: Option<String>,
}

macro_rules! text_property {
    ($name:literal, $attribute:literal, $field:ident) => {
        PropertyMap::new(
            $name,
            $attribute,
            AttributeSyntax::Text,
            |u: &TestUser| AttributeValue::from(u.$field.clone()),
            |u, v| {
                u.$field = v.as_str().map(str::to_owned);
                Ok(())
            },
        )
    };
}

impl DirectoryEntity for TestUser {
    fn class_map() -> DirectoryResult<ClassMap<Self>> {
        ClassMap::builder("TestUser", TestUser::default)
            .naming_context("dc=example,dc=com")
            .object_class("user")
            .property(
                PropertyMap::new(
                    "Dn",
                    "distinguishedName",
                    AttributeSyntax::Dn,
                    |u: &TestUser| AttributeValue::from(u.dn.clone()),
                    |u, v| {
                        u.dn = v.as_str().map(str::to_owned);
                        Ok(())
                    },
                )
                .distinguished_name(),
            )
            .property(text_property!("P1", "x", p1))
            .property(text_property!("P2", "y", p2))
            .property(text_property!("P3", "z", p3))
            .property(text_property!("P4", "a", p4))
            .property(text_property!("P5", "b", p5))
            .property(text_property!("P6", "c", p6))
            .build()
    }
}
