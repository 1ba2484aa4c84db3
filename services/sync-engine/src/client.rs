//! Remote label service client.
//!
//! Translates assignment operations into calls against the remote article
//! API. Each call is sent exactly once; retries belong to the controller.
//!
//! Articles are keyed by the entity's remote identifier: the assigned space
//! when there is one, otherwise the virtual pool slot. Clearing a space never
//! deletes the article, it overwrites the identifying fields with blanks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slotsync_id::EntityId;
use slotsync_reconcile::SpaceId;
use thiserror::Error;
use tracing::{debug, error};

use crate::model::{Attributes, Entity, SyncStatus};
use crate::token::{Session, TokenManager, TokenRefresher};

/// Reserved article data keys written alongside entity attributes.
pub mod fields {
    pub const ENTITY_ID: &str = "entity_id";
    pub const SPACE_ID: &str = "space_id";
    pub const POOL_ID: &str = "pool_id";

    pub const RESERVED: [&str; 3] = [ENTITY_ID, SPACE_ID, POOL_ID];
}

/// Remote call failures.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Missing, expired or rejected bearer token.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("transport error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The entity has neither a space nor a virtual pool slot.
    #[error("entity {0} has no remote identifier")]
    Unaddressable(EntityId),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid article url: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// Returns true if sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::AuthExpired(_)
            | Self::Unaddressable(_)
            | Self::Decode(_)
            | Self::InvalidUrl(_) => false,
        }
    }
}

/// One remote article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub article_id: String,
    #[serde(default)]
    pub data: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_code: Option<String>,
}

/// Body item of a batch upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleUpdate {
    pub article_id: String,
    pub data: Attributes,
}

#[derive(Debug, Serialize)]
struct ArticleBody<'a> {
    data: &'a Attributes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

/// Connection settings for the remote service.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub timeout: Duration,
    /// Attribute keys blanked when a space is vacated.
    pub identifying_fields: Vec<String>,
}

/// Operations the controller needs from the remote service.
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Fetch one page of articles. A page shorter than `page_size` is the last.
    async fn fetch_page(&self, cursor: u32, page_size: u32) -> Result<Vec<Article>, RemoteError>;

    /// Upsert the article for one entity.
    async fn push_one(&self, entity: &Entity) -> Result<(), RemoteError>;

    /// Upsert the articles for several entities in one request.
    async fn push_many(&self, entities: &[Entity]) -> Result<(), RemoteError>;

    /// Blank one space. `hint` is the entity that held it, if known.
    async fn clear_one(&self, space: &SpaceId, hint: Option<&Entity>) -> Result<(), RemoteError>;

    /// Blank several spaces in one request.
    async fn clear_many(&self, spaces: &[SpaceId]) -> Result<(), RemoteError>;
}

/// Article data for an entity: its attributes plus the reserved fields.
pub fn article_payload(entity: &Entity) -> Attributes {
    let mut data = entity.attributes.clone();
    data.insert(fields::ENTITY_ID.to_string(), entity.id.to_string());
    data.insert(
        fields::SPACE_ID.to_string(),
        entity
            .assigned_space_id
            .as_ref()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
    );
    data.insert(
        fields::POOL_ID.to_string(),
        entity.virtual_pool_id.clone().unwrap_or_default(),
    );
    data
}

/// Article data that vacates a space: every identifying key and every
/// reserved key set to blank. Other attribute keys are left as they are.
pub fn blank_payload(identifying_fields: &[String]) -> Attributes {
    let mut keys: BTreeSet<&str> = identifying_fields.iter().map(String::as_str).collect();
    keys.extend(fields::RESERVED);

    keys.into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect()
}

/// True when article data holds no identifying or reserved value.
///
/// This is the read side of [`blank_payload`]: a blanked article is vacant
/// even when unrelated keys still carry values.
pub fn is_vacant(data: &Attributes, identifying_fields: &[String]) -> bool {
    let filled = |key: &str| data.get(key).is_some_and(|v| !v.trim().is_empty());
    !fields::RESERVED.iter().any(|k| filled(*k))
        && !identifying_fields.iter().any(|k| filled(k.as_str()))
}

/// Build the URL of one article. The id is pushed as a single path segment
/// so reserved characters are percent-encoded.
pub fn article_url(base_url: &str, article_id: &str) -> Result<reqwest::Url, RemoteError> {
    let mut url = reqwest::Url::parse(&format!("{base_url}/articles"))
        .map_err(|e| RemoteError::InvalidUrl(format!("{base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| RemoteError::InvalidUrl(base_url.to_string()))?
        .push(article_id);
    Ok(url)
}

/// Map a fetched article to an entity, or `None` for a vacant article.
///
/// Articles whose id starts with `pool_prefix` are virtual pool slots; all
/// others are physical spaces.
pub fn article_to_entity(
    article: Article,
    identifying_fields: &[String],
    pool_prefix: &str,
    now: DateTime<Utc>,
) -> Option<Entity> {
    if is_vacant(&article.data, identifying_fields) {
        return None;
    }

    let id = article
        .data
        .get(fields::ENTITY_ID)
        .and_then(|raw| EntityId::parse(raw).ok())
        .unwrap_or_default();

    let attributes: Attributes = article
        .data
        .into_iter()
        .filter(|(k, _)| !fields::RESERVED.contains(&k.as_str()))
        .collect();

    let mut entity = Entity::with_id(id, attributes);
    if !pool_prefix.is_empty() && article.article_id.starts_with(pool_prefix) {
        entity.virtual_pool_id = Some(article.article_id);
    } else {
        entity.assigned_space_id = Some(SpaceId::new(article.article_id));
    }
    entity.sync_status = SyncStatus::Synced;
    entity.last_synced_at = Some(now);
    Some(entity)
}

async fn check_status(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(RemoteError::AuthExpired(if body.is_empty() {
            "remote rejected bearer token".to_string()
        } else {
            body
        }));
    }

    error!(operation, status = %status, body = %body, "Remote call failed");
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// HTTP implementation of [`LabelService`].
pub struct HttpLabelClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    identifying_fields: Vec<String>,
}

impl HttpLabelClient {
    pub fn new(config: &RemoteConfig, tokens: Arc<TokenManager>) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            base_url: config.base_url.clone(),
            tokens,
            identifying_fields: config.identifying_fields.clone(),
        })
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        self.tokens.bearer_token(Utc::now()).await
    }

    async fn put_article(&self, article_id: &str, data: &Attributes, operation: &str) -> Result<(), RemoteError> {
        let token = self.bearer().await?;
        let url = article_url(&self.base_url, article_id)?;
        debug!(url = %url, operation, "Upserting article");

        let response = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&ArticleBody { data })
            .send()
            .await?;
        check_status(response, operation).await?;
        Ok(())
    }

    async fn put_articles(&self, updates: &[ArticleUpdate], operation: &str) -> Result<(), RemoteError> {
        let token = self.bearer().await?;
        let url = format!("{}/articles", self.base_url);
        debug!(url = %url, operation, count = updates.len(), "Upserting articles");

        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(updates)
            .send()
            .await?;
        check_status(response, operation).await?;
        Ok(())
    }
}

#[async_trait]
impl LabelService for HttpLabelClient {
    async fn fetch_page(&self, cursor: u32, page_size: u32) -> Result<Vec<Article>, RemoteError> {
        let token = self.bearer().await?;
        let url = format!("{}/articles", self.base_url);
        debug!(url = %url, cursor, page_size, "Fetching article page");

        let response = self
            .client
            .get(&url)
            .query(&[("page", cursor), ("size", page_size)])
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response, "fetch_page").await?;
        let articles: Vec<Article> = decode(response).await?;

        debug!(cursor, count = articles.len(), "Fetched article page");
        Ok(articles)
    }

    async fn push_one(&self, entity: &Entity) -> Result<(), RemoteError> {
        let key = entity
            .remote_key()
            .ok_or(RemoteError::Unaddressable(entity.id))?;
        self.put_article(key, &article_payload(entity), "push_one")
            .await
    }

    async fn push_many(&self, entities: &[Entity]) -> Result<(), RemoteError> {
        if entities.is_empty() {
            return Ok(());
        }

        let updates = entities
            .iter()
            .map(|entity| {
                let key = entity
                    .remote_key()
                    .ok_or(RemoteError::Unaddressable(entity.id))?;
                Ok(ArticleUpdate {
                    article_id: key.to_string(),
                    data: article_payload(entity),
                })
            })
            .collect::<Result<Vec<_>, RemoteError>>()?;

        self.put_articles(&updates, "push_many").await
    }

    async fn clear_one(&self, space: &SpaceId, hint: Option<&Entity>) -> Result<(), RemoteError> {
        if let Some(entity) = hint {
            debug!(space = %space, entity_id = %entity.id, "Vacating space");
        }
        let data = blank_payload(&self.identifying_fields);
        self.put_article(space.as_str(), &data, "clear_one").await
    }

    async fn clear_many(&self, spaces: &[SpaceId]) -> Result<(), RemoteError> {
        if spaces.is_empty() {
            return Ok(());
        }

        let data = blank_payload(&self.identifying_fields);
        let updates: Vec<ArticleUpdate> = spaces
            .iter()
            .map(|space| ArticleUpdate {
                article_id: space.as_str().to_string(),
                data: data.clone(),
            })
            .collect();

        self.put_articles(&updates, "clear_many").await
    }
}

/// Exchanges refresh tokens against `POST {base}/auth/refresh`.
pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let url = format!("{}/auth/refresh", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let response = check_status(response, "refresh").await?;
        let body: RefreshResponse = decode(response).await?;

        Ok(Session {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(RemoteError::Status {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::AuthExpired("x".into()).is_retryable());
        assert!(!RemoteError::Decode("x".into()).is_retryable());
        assert!(!RemoteError::InvalidUrl("x".into()).is_retryable());
    }

    #[test]
    fn test_article_payload_carries_assignment() {
        let entity = Entity::new(attrs(&[("name", "Noa")])).assigned_to(SpaceId::from(4u32));
        let data = article_payload(&entity);

        assert_eq!(data["name"], "Noa");
        assert_eq!(data[fields::SPACE_ID], "4");
        assert_eq!(data[fields::POOL_ID], "");
        assert_eq!(data[fields::ENTITY_ID], entity.id.to_string());
    }

    fn name_field() -> Vec<String> {
        vec!["name".to_string()]
    }

    #[test]
    fn test_blank_payload_shape() {
        let data = blank_payload(&["name".to_string(), "badge".to_string()]);

        assert!(data.values().all(String::is_empty));
        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["badge", fields::ENTITY_ID, "name", fields::POOL_ID, fields::SPACE_ID]
        );
    }

    #[test]
    fn test_blanked_article_reads_back_vacant() {
        let entity = Entity::new(attrs(&[("name", "Noa"), ("dept", "Ops")]))
            .assigned_to(SpaceId::from(1u32));
        let mut data = article_payload(&entity);
        data.extend(blank_payload(&name_field()));

        assert_eq!(data["dept"], "Ops");
        assert!(is_vacant(&data, &name_field()));
        let article = Article {
            article_id: "1".into(),
            data,
            label_code: None,
        };
        assert!(article_to_entity(article, &name_field(), "POOL-", Utc::now()).is_none());
    }

    #[test]
    fn test_identifying_or_reserved_value_is_occupied() {
        assert!(!is_vacant(&attrs(&[("name", "Dana")]), &name_field()));
        assert!(!is_vacant(
            &attrs(&[("name", ""), (fields::ENTITY_ID, "x")]),
            &name_field()
        ));
        assert!(is_vacant(&attrs(&[("dept", "Ops")]), &name_field()));
        assert!(is_vacant(&Attributes::new(), &name_field()));
    }

    #[test]
    fn test_article_url_encodes_id() {
        let url = article_url("http://labels:9000", "a/b?c d").unwrap();
        assert_eq!(url.as_str(), "http://labels:9000/articles/a%2Fb%3Fc%20d");

        let url = article_url("http://labels:9000/api", "12").unwrap();
        assert_eq!(url.path(), "/api/articles/12");

        assert!(matches!(
            article_url("not a url", "1"),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_article_to_entity_physical_and_pool() {
        let now = Utc::now();
        let id = EntityId::new();

        let physical = Article {
            article_id: "12".into(),
            data: attrs(&[("name", "Dana"), (fields::ENTITY_ID, id.to_string().as_str())]),
            label_code: Some("LBL-12".into()),
        };
        let entity = article_to_entity(physical, &name_field(), "POOL-", now).unwrap();
        assert_eq!(entity.id, id);
        assert_eq!(entity.assigned_space_id, Some(SpaceId::from(12u32)));
        assert_eq!(entity.sync_status, SyncStatus::Synced);
        assert_eq!(entity.last_synced_at, Some(now));
        assert!(!entity.attributes.contains_key(fields::ENTITY_ID));

        let pooled = Article {
            article_id: "POOL-3".into(),
            data: attrs(&[("name", "Eli")]),
            label_code: None,
        };
        let entity = article_to_entity(pooled, &name_field(), "POOL-", now).unwrap();
        assert_eq!(entity.virtual_pool_id.as_deref(), Some("POOL-3"));
        assert!(!entity.is_assigned());
    }

    #[test]
    fn test_vacant_article_skipped() {
        let vacant = Article {
            article_id: "7".into(),
            data: attrs(&[("name", ""), (fields::SPACE_ID, "")]),
            label_code: None,
        };
        assert!(article_to_entity(vacant, &name_field(), "POOL-", Utc::now()).is_none());
    }

    #[test]
    fn test_article_wire_format() {
        let json = r#"{"articleId":"3","data":{"name":"Avi"},"labelCode":"A3"}"#;
        let article: Article = serde_json::from_str(json).unwrap();
        assert_eq!(article.article_id, "3");
        assert_eq!(article.label_code.as_deref(), Some("A3"));
    }
}
