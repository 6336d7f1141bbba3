//! Mid-session failure recovery.
//!
//! When a chunk send fails transiently and the retry layer grants another
//! attempt, the client must not blindly resend the same bytes: the server
//! may have durably received part of them. [`StatusQueryInterceptor`]
//! rewrites the about-to-be-retried request into a zero-body status query
//! (`Content-Range: bytes */{total}`), so the next response carries the
//! server's authoritative cursor and the chunk windower reconciles.

use std::sync::{Arc, RwLock};

use tracing::debug;
use upwire_protocol::format_status_query;

use crate::retry::{AttemptFailure, RetryInterceptor};
use crate::transport::HttpRequest;

/// Session state shared between the driver and the recovery interceptor.
#[derive(Default)]
pub(crate) struct SessionState {
    /// URI of the in-flight session, once initialization succeeds.
    pub(crate) session_uri: RwLock<Option<String>>,
    /// Total payload length, once known.
    pub(crate) total: RwLock<Option<u64>>,
}

/// Rewrites a transiently failed chunk request into a status query.
///
/// The retry layer is shared by every session on the transport, so the
/// interceptor must pass over requests that are not for its own session
/// URI, and over failures that are not transient.
pub struct StatusQueryInterceptor {
    state: Arc<SessionState>,
}

impl StatusQueryInterceptor {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }
}

impl RetryInterceptor for StatusQueryInterceptor {
    fn before_retry(&self, request: &mut HttpRequest, failure: &AttemptFailure<'_>) -> bool {
        let uri = self.state.session_uri.read().unwrap();
        let Some(uri) = uri.as_deref() else {
            return false;
        };
        if request.url != uri {
            return false;
        }
        if !failure.is_transient() {
            return false;
        }

        let total = *self.state.total.read().unwrap();
        request.method = "PUT".to_string();
        request.headers.clear();
        request.body.clear();
        request.set_header("Content-Range", format_status_query(total));
        debug!(uri = %request.url, "rewrote failed chunk send into a status query");
        true
    }
}
