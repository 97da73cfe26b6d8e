// netpolicy-registry/tests/common/mod.rs
// ============================================================================
// Module: Registry Test Helpers
// Description: Scripted HTTP server for client tests.
// Purpose: Serve canned registry and identity replies over plain HTTP.
// Dependencies: tiny_http
// ============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers may unwrap."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use tiny_http::Response;
use tiny_http::Server;

/// Request as seen by the scripted server.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// HTTP method.
    pub method: String,
    /// Path and query.
    pub url: String,
    /// Authorization header value.
    pub authorization: Option<String>,
    /// Request body.
    pub body: String,
}

/// Running scripted server.
pub struct ScriptedServer {
    /// Base URL of the server.
    pub url: String,
    /// Requests received so far.
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl ScriptedServer {
    /// Returns a snapshot of received requests.
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

/// Starts a server answering every request with `handler`.
pub fn serve<F>(handler: F) -> ScriptedServer
where
    F: Fn(&SeenRequest) -> (u16, String) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    thread::spawn(move || {
        for mut request in server.incoming_requests() {
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let authorization = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("Authorization"))
                .map(|header| header.value.as_str().to_string());
            let seen_request = SeenRequest {
                method: request.method().as_str().to_string(),
                url: request.url().to_string(),
                authorization,
                body,
            };
            let (status, reply) = handler(&seen_request);
            recorded.lock().unwrap().push(seen_request);
            let _ = request.respond(Response::from_string(reply).with_status_code(status));
        }
    });
    ScriptedServer {
        url: format!("http://{addr}"),
        seen,
    }
}
