//! The `DirectoryConnection` collaborator (§6) and the wire-level request/
//! response shapes commands assemble.
//!
//! A production adapter wraps `ldap3::Ldap`/`ldap3::LdapConn` almost
//! mechanically: each `WireRequest` variant already carries the argument
//! shapes those methods expect. Tests instead substitute
//! [`RecordingConnection`], an in-memory mock that plays back canned
//! responses and records every request it was asked to send, so command
//! pre-flight behaviour (duplicate-control rejection, no-result
//! short-circuiting, paging sequencing) is verifiable without a live server.

use crate::error::{DirectoryOperationError, Error, Result};
use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Mod, Scope as Ldap3Scope, SearchEntry};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A single LDAP v3 operation this crate can issue.
#[derive(Clone, Debug)]
pub enum WireRequest {
    Search {
        base: String,
        scope: Ldap3Scope,
        filter: String,
        attrs: Vec<String>,
        controls: Vec<RawControl>,
    },
    Add {
        dn: String,
        attrs: Vec<(String, Vec<Vec<u8>>)>,
        controls: Vec<RawControl>,
    },
    Modify {
        dn: String,
        mods: Vec<Mod<Vec<u8>>>,
        controls: Vec<RawControl>,
    },
    ModifyDn {
        dn: String,
        new_rdn: String,
        delete_old_rdn: bool,
        new_superior: Option<String>,
        controls: Vec<RawControl>,
    },
    Delete {
        dn: String,
        controls: Vec<RawControl>,
    },
    Abandon {
        msgid: i32,
    },
}

/// The outcome of a [`WireRequest`].
#[derive(Clone, Debug)]
pub enum WireResponse {
    Search {
        entries: Vec<SearchEntry>,
        /// Non-empty when a `PagedResults` response control was present.
        paging_cookie: Option<Vec<u8>>,
        rc: u32,
        matched: String,
        text: String,
    },
    Outcome {
        rc: u32,
        matched: String,
        text: String,
    },
    Abandoned,
}

impl WireResponse {
    /// Turn a non-zero result code into a [`Error::DirectoryOperation`].
    pub fn into_success(self) -> Result<WireResponse> {
        let (rc, matched, text) = match &self {
            WireResponse::Search { rc, matched, text, .. } => (*rc, matched.clone(), text.clone()),
            WireResponse::Outcome { rc, matched, text } => (*rc, matched.clone(), text.clone()),
            WireResponse::Abandoned => return Ok(self),
        };
        if rc == 0 {
            Ok(self)
        } else {
            Err(Error::DirectoryOperation(DirectoryOperationError { rc, matched, text }))
        }
    }

    /// The LDAP result code, regardless of response shape.
    pub fn result_code(&self) -> u32 {
        match self {
            WireResponse::Search { rc, .. } => *rc,
            WireResponse::Outcome { rc, .. } => *rc,
            WireResponse::Abandoned => 0,
        }
    }
}

/// Collaborator boundary between this crate and the LDAP wire/TLS layer
/// (§6). A real implementation adapts `ldap3::Ldap`; [`RecordingConnection`]
/// substitutes it in tests.
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    async fn send_request(&self, request: WireRequest) -> Result<WireResponse>;

    fn send_request_sync(&self, request: WireRequest) -> Result<WireResponse>;
}

/// A canned response queued for [`RecordingConnection`] to hand back, keyed
/// by request arrival order.
pub type ScriptedResponse = Result<WireResponse>;

/// An in-memory [`DirectoryConnection`] that records every request it
/// receives and returns pre-scripted responses in FIFO order.
///
/// Calling [`RecordingConnection::requests`] after exercising a command lets
/// a test assert exactly what was sent (or that nothing was sent at all, for
/// the no-result short-circuit property).
#[derive(Default)]
pub struct RecordingConnection {
    script: Mutex<VecDeque<ScriptedResponse>>,
    sent: Mutex<Vec<WireRequest>>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        RecordingConnection::default()
    }

    /// Queue a response to be returned for the next request, in order.
    pub fn push_response(&self, response: ScriptedResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Convenience: queue a successful search response.
    pub fn push_search(&self, entries: Vec<SearchEntry>, cookie: Option<Vec<u8>>) {
        self.push_response(Ok(WireResponse::Search {
            entries,
            paging_cookie: cookie,
            rc: 0,
            matched: String::new(),
            text: String::new(),
        }));
    }

    /// Convenience: queue a successful non-search outcome.
    pub fn push_ok(&self) {
        self.push_response(Ok(WireResponse::Outcome {
            rc: 0,
            matched: String::new(),
            text: String::new(),
        }));
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<WireRequest> {
        self.sent.lock().unwrap().clone()
    }

    fn pop(&self) -> Result<WireResponse> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Connection("RecordingConnection: no scripted response left".into())))
    }
}

#[async_trait]
impl DirectoryConnection for RecordingConnection {
    async fn send_request(&self, request: WireRequest) -> Result<WireResponse> {
        self.sent.lock().unwrap().push(request);
        self.pop()
    }

    fn send_request_sync(&self, request: WireRequest) -> Result<WireResponse> {
        self.sent.lock().unwrap().push(request);
        self.pop()
    }
}

/// Build the raw attribute map a `SearchEntry` would carry, for tests that
/// construct canned entries without a live server.
pub fn entry(dn: &str, attrs: &[(&str, Vec<&str>)]) -> SearchEntry {
    let mut bin_attrs: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
    let attrs_map: HashMap<String, Vec<String>> = attrs
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect();
    // `ldap3::SearchEntry` keeps string- and binary-syntax attributes in
    // separate maps; construct an empty binary map since these fixtures are
    // all textual.
    bin_attrs.entry(String::new()).or_default();
    bin_attrs.remove("");
    SearchEntry {
        dn: dn.to_owned(),
        attrs: attrs_map,
        bin_attrs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_connection_plays_back_in_order() {
        let conn = RecordingConnection::new();
        conn.push_ok();
        conn.push_ok();
        let r1 = conn.send_request(WireRequest::Delete { dn: "a".into(), controls: vec![] }).await.unwrap();
        let r2 = conn.send_request(WireRequest::Delete { dn: "b".into(), controls: vec![] }).await.unwrap();
        assert_eq!(r1.result_code(), 0);
        assert_eq!(r2.result_code(), 0);
        assert_eq!(conn.requests().len(), 2);
    }

    #[tokio::test]
    async fn into_success_surfaces_non_zero_rc() {
        let resp = WireResponse::Outcome {
            rc: 32,
            matched: "dc=example,dc=com".into(),
            text: "no such object".into(),
        };
        let err = resp.into_success().unwrap_err();
        assert!(matches!(err, Error::DirectoryOperation(_)));
    }
}
