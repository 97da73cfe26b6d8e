// netpolicy-registry/src/registry.rs
// ============================================================================
// Module: Platform Registry Client
// Description: App, space, and security group lookups against the registry.
// Purpose: Answer liveness, ownership, and ASG catalog questions.
// Dependencies: reqwest, serde, time, url
// ============================================================================

//! ## Overview
//! The registry is the source of truth for which apps and spaces exist, which
//! spaces a user can develop in, and the ASG catalog. Liveness and ownership
//! lookups size `per_page` to the request so a single page always suffices.
//! The ASG catalog is paged, and the catalog's `last_update` stamp is read
//! around every page: a listing that straddles a catalog change is reported
//! as [`RegistryError::UnstableCatalog`] rather than returned half-updated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use async_trait::async_trait;
use netpolicy_core::SecurityGroup;
use reqwest::Client;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::client::HttpClientConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Page size for the security group listing.
const SECURITY_GROUPS_PER_PAGE: u32 = 5000;
/// Page size for the user space listing.
const SUBJECT_SPACES_PER_PAGE: &str = "100";

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Platform registry operations.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns the subset of `app_guids` that still exist.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry call fails.
    async fn get_live_app_guids(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError>;

    /// Returns the subset of `space_guids` that still exist.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry call fails.
    async fn get_live_space_guids(
        &self,
        token: &str,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError>;

    /// Maps each existing app to its space.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry call fails.
    async fn get_app_spaces(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError>;

    /// Returns the spaces `subject` is a developer of.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry call fails.
    async fn get_subject_spaces(
        &self,
        token: &str,
        subject: &str,
    ) -> Result<BTreeSet<String>, RegistryError>;

    /// Lists the full ASG catalog.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnstableCatalog`] when the catalog changes
    /// during the listing, or another [`RegistryError`] when a call fails.
    async fn get_all_security_groups(&self, token: &str)
    -> Result<Vec<SecurityGroup>, RegistryError>;

    /// Returns the catalog's last update stamp, or `None` when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the call fails or the stamp is malformed.
    async fn get_security_groups_last_update(
        &self,
        token: &str,
    ) -> Result<Option<OffsetDateTime>, RegistryError>;
}

/// Converts a catalog stamp into the millisecond marker kept by the store.
#[must_use]
pub fn last_update_millis(stamp: OffsetDateTime) -> i64 {
    i64::try_from(stamp.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Link object.
#[derive(Debug, Default, Deserialize)]
struct Href {
    /// Target URL.
    #[serde(default)]
    href: String,
}

/// v3 pagination block.
#[derive(Debug, Default, Deserialize)]
struct V3Pagination {
    /// Total page count.
    #[serde(default)]
    total_pages: u32,
    /// Next page link, null on the last page.
    #[serde(default)]
    next: Option<Href>,
}

/// Links of an app resource.
#[derive(Debug, Default, Deserialize)]
struct AppLinks {
    /// Owning space link.
    #[serde(default)]
    space: Href,
}

/// App resource.
#[derive(Debug, Deserialize)]
struct AppResource {
    /// App guid.
    guid: String,
    /// Resource links.
    #[serde(default)]
    links: AppLinks,
}

/// Space resource.
#[derive(Debug, Deserialize)]
struct GuidResource {
    /// Resource guid.
    guid: String,
}

/// Generic v3 list reply.
#[derive(Debug, Deserialize)]
struct V3List<T> {
    /// Pagination block.
    #[serde(default)]
    pagination: V3Pagination,
    /// Page resources.
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

/// v2 metadata block.
#[derive(Debug, Deserialize)]
struct V2Metadata {
    /// Resource guid.
    guid: String,
}

/// v2 space resource.
#[derive(Debug, Deserialize)]
struct V2Space {
    /// Metadata block.
    metadata: V2Metadata,
}

/// v2 list reply.
#[derive(Debug, Deserialize)]
struct V2List {
    /// Relative URL of the next page, null on the last page.
    #[serde(default)]
    next_url: Option<String>,
    /// Page resources.
    #[serde(default)]
    resources: Vec<V2Space>,
}

/// Global enablement flags of an ASG.
#[derive(Debug, Default, Deserialize)]
struct GloballyEnabled {
    /// Applies to every running workload.
    #[serde(default)]
    running: bool,
    /// Applies to every staging workload.
    #[serde(default)]
    staging: bool,
}

/// Relationship data list.
#[derive(Debug, Default, Deserialize)]
struct SpaceRelationship {
    /// Related spaces.
    #[serde(default)]
    data: Vec<GuidResource>,
}

/// ASG relationships.
#[derive(Debug, Default, Deserialize)]
struct SecurityGroupRelationships {
    /// Spaces bound for staging.
    #[serde(default)]
    staging_spaces: SpaceRelationship,
    /// Spaces bound for running.
    #[serde(default)]
    running_spaces: SpaceRelationship,
}

/// ASG resource.
#[derive(Debug, Deserialize)]
struct SecurityGroupResource {
    /// ASG guid.
    guid: String,
    /// ASG name.
    #[serde(default)]
    name: String,
    /// Global flags.
    #[serde(default)]
    globally_enabled: GloballyEnabled,
    /// Raw rules kept verbatim.
    #[serde(default)]
    rules: serde_json::Value,
    /// Space bindings.
    #[serde(default)]
    relationships: SecurityGroupRelationships,
}

impl SecurityGroupResource {
    /// Converts the wire resource into the stored model.
    fn into_model(self) -> Result<SecurityGroup, RegistryError> {
        let rules =
            if self.rules.is_null() { serde_json::Value::Array(Vec::new()) } else { self.rules };
        let rules_json = serde_json::to_string(&rules)
            .map_err(|err| RegistryError::BadResponse(err.to_string()))?;
        Ok(SecurityGroup {
            guid: self.guid,
            name: self.name,
            rules_json,
            staging_default: self.globally_enabled.staging,
            running_default: self.globally_enabled.running,
            staging_space_guids: self
                .relationships
                .staging_spaces
                .data
                .into_iter()
                .map(|space| space.guid)
                .collect(),
            running_space_guids: self
                .relationships
                .running_spaces
                .data
                .into_iter()
                .map(|space| space.guid)
                .collect(),
        })
    }
}

/// Catalog stamp reply.
#[derive(Debug, Deserialize)]
struct LatestUpdate {
    /// RFC 3339 timestamp.
    last_update: String,
}

// ============================================================================
// SECTION: Cloud Controller Client
// ============================================================================

/// Reqwest-backed registry client.
pub struct CloudControllerClient {
    /// Base URL without trailing slash.
    base_url: String,
    /// HTTP client configured with TLS and timeouts.
    client: Client,
}

impl CloudControllerClient {
    /// Builds a client for the registry at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Transport`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, http: &HttpClientConfig) -> Result<Self, RegistryError> {
        let client = http.build().map_err(|err| RegistryError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Builds an absolute URL with query parameters.
    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, RegistryError> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|err| RegistryError::BadResponse(format!("invalid registry url: {err}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// Sends an authorized GET.
    async fn send(&self, url: Url, token: &str) -> Result<Response, RegistryError> {
        self.client
            .get(url)
            .header(AUTHORIZATION, format!("bearer {token}"))
            .send()
            .await
            .map_err(|err| RegistryError::Transport(err.to_string()))
    }

    /// Sends an authorized GET and decodes a 2xx JSON reply.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &str,
    ) -> Result<T, RegistryError> {
        let response = self.send(url, token).await?;
        decode(response).await
    }

    /// Fetches one page of apps for the given guids.
    async fn apps(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<Vec<AppResource>, RegistryError> {
        let url = self.url("/v3/apps", &[
            ("guids", app_guids.join(",")),
            ("per_page", app_guids.len().to_string()),
        ])?;
        let list: V3List<AppResource> = self.get_json(url, token).await?;
        single_page(&list.pagination)?;
        Ok(list.resources)
    }

    /// Fetches one page of the ASG catalog.
    async fn security_group_page(
        &self,
        token: &str,
        page: u32,
    ) -> Result<V3List<SecurityGroupResource>, RegistryError> {
        let url = self.url("/v3/security_groups", &[
            ("per_page", SECURITY_GROUPS_PER_PAGE.to_string()),
            ("page", page.to_string()),
        ])?;
        self.get_json(url, token).await
    }
}

#[async_trait]
impl RegistryClient for CloudControllerClient {
    async fn get_live_app_guids(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        if app_guids.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self.apps(token, app_guids).await?.into_iter().map(|app| app.guid).collect())
    }

    async fn get_live_space_guids(
        &self,
        token: &str,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        if space_guids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let url = self.url("/v3/spaces", &[
            ("guids", space_guids.join(",")),
            ("per_page", space_guids.len().to_string()),
        ])?;
        let list: V3List<GuidResource> = self.get_json(url, token).await?;
        single_page(&list.pagination)?;
        Ok(list.resources.into_iter().map(|space| space.guid).collect())
    }

    async fn get_app_spaces(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        if app_guids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let apps = self.apps(token, app_guids).await?;
        Ok(apps
            .into_iter()
            .map(|app| {
                let space =
                    app.links.space.href.rsplit('/').next().unwrap_or_default().to_string();
                (app.guid, space)
            })
            .collect())
    }

    async fn get_subject_spaces(
        &self,
        token: &str,
        subject: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        let mut url = self.url(&format!("/v2/users/{subject}/spaces"), &[(
            "results-per-page",
            SUBJECT_SPACES_PER_PAGE.to_string(),
        )])?;
        let mut spaces = BTreeSet::new();
        loop {
            let page: V2List = self.get_json(url, token).await?;
            spaces.extend(page.resources.into_iter().map(|space| space.metadata.guid));
            match page.next_url.filter(|next| !next.is_empty()) {
                Some(next) => url = self.url(&next, &[])?,
                None => break,
            }
        }
        Ok(spaces)
    }

    async fn get_all_security_groups(
        &self,
        token: &str,
    ) -> Result<Vec<SecurityGroup>, RegistryError> {
        let original = self.get_security_groups_last_update(token).await?;
        let mut groups = Vec::new();
        let mut page = 1;
        loop {
            let list = self.security_group_page(token, page).await?;
            let current = self.get_security_groups_last_update(token).await?;
            if current != original {
                return Err(RegistryError::UnstableCatalog(
                    "last_update time has changed".to_string(),
                ));
            }
            if list.resources.is_empty() {
                break;
            }
            for resource in list.resources {
                groups.push(resource.into_model()?);
            }
            if list.pagination.next.is_none_or(|next| next.href.is_empty()) {
                break;
            }
            page += 1;
        }
        tracing::debug!(count = groups.len(), pages = page, "listed security groups");
        Ok(groups)
    }

    async fn get_security_groups_last_update(
        &self,
        token: &str,
    ) -> Result<Option<OffsetDateTime>, RegistryError> {
        let url = self.url("/internal/v4/asg_latest_update", &[])?;
        let response = self.send(url, token).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let latest: LatestUpdate = decode(response).await?;
        OffsetDateTime::parse(&latest.last_update, &Rfc3339).map(Some).map_err(|_| {
            RegistryError::BadResponse(format!(
                "failed parsing last_update from cloud controller: '{}'",
                latest.last_update
            ))
        })
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry client failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry rejected the token.
    #[error("registry unauthorized: {0}")]
    Unauthorized(String),
    /// The registry answered with an unexpected status or body.
    #[error("registry bad response: {0}")]
    BadResponse(String),
    /// The ASG catalog changed during a listing.
    #[error("unstable security group list: {0}")]
    UnstableCatalog(String),
    /// The request never produced a response.
    #[error("registry transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps status codes and decodes a JSON body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(|err| RegistryError::Transport(err.to_string()))?;
    if status == StatusCode::UNAUTHORIZED {
        return Err(RegistryError::Unauthorized(String::from_utf8_lossy(&bytes).into_owned()));
    }
    if !status.is_success() {
        return Err(RegistryError::BadResponse(format!(
            "{}: {}",
            status.as_u16(),
            String::from_utf8_lossy(&bytes)
        )));
    }
    serde_json::from_slice(&bytes).map_err(|err| RegistryError::BadResponse(err.to_string()))
}

/// Rejects replies that would need a second page.
fn single_page(pagination: &V3Pagination) -> Result<(), RegistryError> {
    if pagination.total_pages > 1 {
        return Err(RegistryError::BadResponse(
            "pagination support not yet implemented".to_string(),
        ));
    }
    Ok(())
}
