// netpolicy-server/tests/common/mod.rs
// ============================================================================
// Module: Server Test Harness
// Description: Fake registry and identity plus a running pair of listeners.
// Purpose: Drive the HTTP APIs end to end against a real SQLite store.
// Dependencies: netpolicy-server, netpolicy-store-sqlite, reqwest, tempfile
// ============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only helpers may unwrap."
)]

pub mod tls;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use netpolicy_core::SecurityGroup;
use netpolicy_core::SharedDatastore;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::IdentityError;
use netpolicy_registry::RegistryClient;
use netpolicy_registry::RegistryError;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::TokenInfo;
use netpolicy_server::AppState;
use netpolicy_server::Authorizer;
use netpolicy_server::NoopAuditSink;
use netpolicy_server::NoopMetrics;
use netpolicy_server::PolicyCleaner;
use netpolicy_server::ServerOptions;
use netpolicy_server::SharedState;
use netpolicy_server::external_router;
use netpolicy_server::internal_router;
use netpolicy_server::shutdown_channel;
use netpolicy_server::spawn_plain;
use netpolicy_store_sqlite::SqlitePolicyStore;
use netpolicy_store_sqlite::SqliteStoreConfig;
use serde_json::Value;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::watch;

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Token carrying `network.admin`.
pub const ADMIN_TOKEN: &str = "admin-token";
/// Token carrying `network.write` for user `dev`.
pub const WRITE_TOKEN: &str = "write-token";
/// Token with no network scopes for user `reader`.
pub const PLAIN_TOKEN: &str = "plain-token";

/// Identity fake answering `check_token` from a fixed table.
pub struct FakeIdentity {
    tokens: BTreeMap<String, TokenInfo>,
}

impl FakeIdentity {
    pub fn standard() -> Self {
        let mut tokens = BTreeMap::new();
        tokens.insert(ADMIN_TOKEN.to_string(), TokenInfo {
            client_id: "network-admin-client".to_string(),
            scope: vec!["network.admin".to_string()],
            sub: "admin-client".to_string(),
            ..TokenInfo::default()
        });
        tokens.insert(WRITE_TOKEN.to_string(), TokenInfo {
            client_id: "cf".to_string(),
            scope: vec!["network.write".to_string()],
            sub: "dev".to_string(),
            user_id: "dev".to_string(),
            user_name: "dev-user".to_string(),
        });
        tokens.insert(PLAIN_TOKEN.to_string(), TokenInfo {
            client_id: "cf".to_string(),
            scope: vec!["openid".to_string()],
            sub: "reader".to_string(),
            user_id: "reader".to_string(),
            user_name: "reader-user".to_string(),
        });
        Self {
            tokens,
        }
    }
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn get_token(&self) -> Result<String, IdentityError> {
        Ok("server-machine-token".to_string())
    }

    async fn check_token(&self, token: &str) -> Result<TokenInfo, IdentityError> {
        self.tokens.get(token).cloned().ok_or_else(|| IdentityError::BadResponse {
            status: 401,
            body: r#"{"error":"invalid_token"}"#.to_string(),
        })
    }
}

// ============================================================================
// SECTION: Registry Fake
// ============================================================================

#[derive(Default)]
struct RegistryState {
    app_spaces: BTreeMap<String, String>,
    deleted_apps: BTreeSet<String>,
    subject_spaces: BTreeMap<String, BTreeSet<String>>,
    groups: Vec<SecurityGroup>,
    last_update: Option<OffsetDateTime>,
    unstable_listings: usize,
    listing_stall: Duration,
    listings: usize,
    live_lookups: Vec<usize>,
}

/// Registry fake: every app is live unless deleted.
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    pub fn place_apps(&self, space: &str, apps: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for app in apps {
            state.app_spaces.insert((*app).to_string(), space.to_string());
        }
    }

    pub fn grant(&self, subject: &str, space: &str) {
        let mut state = self.state.lock().unwrap();
        state.subject_spaces.entry(subject.to_string()).or_default().insert(space.to_string());
    }

    pub fn delete_app(&self, app: &str) {
        let mut state = self.state.lock().unwrap();
        state.deleted_apps.insert(app.to_string());
        state.app_spaces.remove(app);
    }

    pub fn set_catalog(&self, groups: Vec<SecurityGroup>, last_update: Option<OffsetDateTime>) {
        let mut state = self.state.lock().unwrap();
        state.groups = groups;
        state.last_update = last_update;
    }

    pub fn fail_listings(&self, count: usize) {
        self.state.lock().unwrap().unstable_listings = count;
    }

    /// Delays every catalog listing by `stall`.
    pub fn stall_listings(&self, stall: Duration) {
        self.state.lock().unwrap().listing_stall = stall;
    }

    pub fn listings(&self) -> usize {
        self.state.lock().unwrap().listings
    }

    /// Sizes of each live-app lookup, in call order.
    pub fn live_lookups(&self) -> Vec<usize> {
        self.state.lock().unwrap().live_lookups.clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn get_live_app_guids(
        &self,
        _token: &str,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        let mut state = self.state.lock().unwrap();
        state.live_lookups.push(app_guids.len());
        Ok(app_guids.iter().filter(|id| !state.deleted_apps.contains(*id)).cloned().collect())
    }

    async fn get_live_space_guids(
        &self,
        _token: &str,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        Ok(space_guids.iter().cloned().collect())
    }

    async fn get_app_spaces(
        &self,
        _token: &str,
        app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let state = self.state.lock().unwrap();
        Ok(app_guids
            .iter()
            .filter_map(|id| state.app_spaces.get(id).map(|space| (id.clone(), space.clone())))
            .collect())
    }

    async fn get_subject_spaces(
        &self,
        _token: &str,
        subject: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        let state = self.state.lock().unwrap();
        Ok(state.subject_spaces.get(subject).cloned().unwrap_or_default())
    }

    async fn get_all_security_groups(
        &self,
        _token: &str,
    ) -> Result<Vec<SecurityGroup>, RegistryError> {
        let stall = self.state.lock().unwrap().listing_stall;
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
        let mut state = self.state.lock().unwrap();
        state.listings += 1;
        if state.unstable_listings > 0 {
            state.unstable_listings -= 1;
            return Err(RegistryError::UnstableCatalog("catalog changed mid-listing".to_string()));
        }
        Ok(state.groups.clone())
    }

    async fn get_security_groups_last_update(
        &self,
        _token: &str,
    ) -> Result<Option<OffsetDateTime>, RegistryError> {
        Ok(self.state.lock().unwrap().last_update)
    }
}

// ============================================================================
// SECTION: Store and Gateway
// ============================================================================

pub fn open_store(dir: &TempDir) -> SharedDatastore {
    Arc::new(SqlitePolicyStore::new(&SqliteStoreConfig::new(dir.path().join("policy.db"))).unwrap())
}

pub fn gateway(registry: &Arc<FakeRegistry>) -> Arc<RegistryGateway> {
    let client: Arc<dyn RegistryClient> = registry.clone();
    Arc::new(RegistryGateway::new(client, Arc::new(FakeIdentity::standard())))
}

pub fn security_group(guid: &str) -> SecurityGroup {
    SecurityGroup {
        guid: guid.to_string(),
        name: format!("{guid}-name"),
        rules_json: r#"[{"protocol":"tcp","destination":"10.0.0.0/8","ports":"443"}]"#.to_string(),
        ..SecurityGroup::default()
    }
}

// ============================================================================
// SECTION: Running Server
// ============================================================================

/// Knobs for [`TestApp::start`].
#[derive(Clone)]
pub struct TestOptions {
    pub max_policies_per_source: u32,
    pub self_service: bool,
    pub dynamic_egress: bool,
    pub allowed_cors_domains: Vec<String>,
    pub enable_tls: bool,
    pub request_timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            max_policies_per_source: 150,
            self_service: false,
            dynamic_egress: false,
            allowed_cors_domains: Vec::new(),
            enable_tls: false,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Both listeners over plain TCP against a temp store.
pub struct TestApp {
    pub external: String,
    pub internal: String,
    pub client: reqwest::Client,
    pub store: SharedDatastore,
    pub registry: Arc<FakeRegistry>,
    pub state: SharedState,
    shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn start(options: TestOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let registry = Arc::new(FakeRegistry::default());
        let gateway = gateway(&registry);
        let state = build_state(&store, &gateway, &options);
        let (shutdown, rx) = shutdown_channel();
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let external =
            spawn_plain(external_router(Arc::clone(&state)), loopback, rx.clone()).await.unwrap();
        let internal =
            spawn_plain(internal_router(Arc::clone(&state)), loopback, rx).await.unwrap();
        Self {
            external: format!("http://{}", external.addr()),
            internal: format!("http://{}", internal.addr()),
            client: reqwest::Client::new(),
            store,
            registry,
            state,
            shutdown,
            _dir: dir,
        }
    }

    pub fn external_url(&self, path: &str) -> String {
        format!("{}{path}", self.external)
    }

    pub fn internal_url(&self, path: &str) -> String {
        format!("{}{path}", self.internal)
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client.get(self.external_url(path)).bearer_auth(token).send().await.unwrap()
    }

    pub async fn post(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        let url = self.external_url(path);
        self.client.post(url).bearer_auth(token).json(body).send().await.unwrap()
    }

    pub async fn internal_get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.internal_url(path)).send().await.unwrap()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn build_state(
    store: &SharedDatastore,
    gateway: &Arc<RegistryGateway>,
    options: &TestOptions,
) -> SharedState {
    let metrics = Arc::new(NoopMetrics);
    let cleaner = Arc::new(PolicyCleaner::new(
        Arc::clone(store),
        Arc::clone(gateway),
        2,
        metrics.clone(),
    ));
    Arc::new(AppState {
        store: Arc::clone(store),
        identity: Arc::new(FakeIdentity::standard()),
        authorizer: Authorizer::new(
            Arc::clone(gateway),
            options.max_policies_per_source,
            options.self_service,
        ),
        cleaner,
        metrics,
        audit: Arc::new(NoopAuditSink),
        options: ServerOptions {
            request_timeout: options.request_timeout,
            max_body_bytes: 10 * 1024 * 1024,
            enable_tls: options.enable_tls,
            allowed_cors_domains: options.allowed_cors_domains.clone(),
            dynamic_egress: options.dynamic_egress,
        },
        started_at: Instant::now(),
    })
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

pub fn policy_json(source: &str, destination: &str, port: u16) -> Value {
    serde_json::json!({
        "source": {"id": source},
        "destination": {"id": destination, "protocol": "tcp", "ports": {"start": port, "end": port}}
    })
}

pub fn policies_body(policies: Vec<Value>) -> Value {
    serde_json::json!({ "policies": policies })
}

pub async fn json_of(response: reqwest::Response) -> Value {
    response.json::<Value>().await.unwrap()
}
