//! In-process label service for tests and dry runs.
//!
//! Records every call, keeps one live article store that pushes, clears and
//! page fetches all see, and can be told to fail individual operations.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use slotsync_reconcile::SpaceId;

use crate::client::{article_payload, blank_payload, is_vacant, Article, LabelService, RemoteError};
use crate::model::{Attributes, Entity};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchPage { cursor: u32, page_size: u32 },
    PushOne { key: String },
    PushMany { keys: Vec<String> },
    ClearOne { space: SpaceId },
    ClearMany { spaces: Vec<SpaceId> },
}

/// Which operation a failure toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOperation {
    FetchPage,
    PushOne,
    PushMany,
    ClearOne,
    ClearMany,
}

#[derive(Default)]
struct FailureToggles {
    fetch_page: AtomicBool,
    push_one: AtomicBool,
    push_many: AtomicBool,
    clear_one: AtomicBool,
    clear_many: AtomicBool,
}

impl FailureToggles {
    fn flag(&self, op: MockOperation) -> &AtomicBool {
        match op {
            MockOperation::FetchPage => &self.fetch_page,
            MockOperation::PushOne => &self.push_one,
            MockOperation::PushMany => &self.push_many,
            MockOperation::ClearOne => &self.clear_one,
            MockOperation::ClearMany => &self.clear_many,
        }
    }
}

/// Mock [`LabelService`].
pub struct MockLabelService {
    calls: Mutex<Vec<RemoteCall>>,
    /// Articles by id, in space order.
    articles: Mutex<BTreeMap<SpaceId, Article>>,
    /// Keys blanked by clears, as in the default engine config.
    identifying_fields: Vec<String>,
    failures: FailureToggles,
    /// Remaining failures for operations set with `fail_times`.
    fail_budget: AtomicU32,
}

impl Default for MockLabelService {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            articles: Mutex::default(),
            identifying_fields: vec!["name".to_string()],
            failures: FailureToggles::default(),
            fail_budget: AtomicU32::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockLabelService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `articles` already stored.
    pub fn with_articles(articles: Vec<Article>) -> Self {
        let mock = Self::default();
        for article in articles {
            mock.seed(article);
        }
        mock
    }

    /// Store an article as-is, replacing any article with the same id.
    pub fn seed(&self, article: Article) {
        lock(&self.articles).insert(SpaceId::new(article.article_id.as_str()), article);
    }

    /// Make `op` fail until cleared.
    pub fn fail(&self, op: MockOperation, failing: bool) {
        self.failures.flag(op).store(failing, Ordering::SeqCst);
    }

    /// Make `op` fail for the next `times` calls, then succeed.
    pub fn fail_times(&self, op: MockOperation, times: u32) {
        self.fail_budget.store(times, Ordering::SeqCst);
        self.fail(op, times > 0);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Article ids that are not vacant, in space order.
    pub fn occupied_spaces(&self) -> Vec<String> {
        lock(&self.articles)
            .values()
            .filter(|article| !is_vacant(&article.data, &self.identifying_fields))
            .map(|article| article.article_id.clone())
            .collect()
    }

    pub fn article(&self, key: &str) -> Option<Attributes> {
        lock(&self.articles)
            .get(&SpaceId::new(key))
            .map(|article| article.data.clone())
    }

    fn upsert(articles: &mut BTreeMap<SpaceId, Article>, key: &str, data: Attributes) {
        match articles.entry(SpaceId::new(key)) {
            Entry::Occupied(mut slot) => slot.get_mut().data.extend(data),
            Entry::Vacant(slot) => {
                slot.insert(Article {
                    article_id: key.to_string(),
                    data,
                    label_code: None,
                });
            }
        }
    }

    fn record(&self, call: RemoteCall) {
        lock(&self.calls).push(call);
    }

    fn check(&self, op: MockOperation) -> Result<(), RemoteError> {
        let flag = self.failures.flag(op);
        if !flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        let remaining = self.fail_budget.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining == 1 {
                flag.store(false, Ordering::SeqCst);
            }
            self.fail_budget.store(remaining - 1, Ordering::SeqCst);
        }

        Err(RemoteError::Status {
            status: 503,
            body: format!("mock failure: {op:?}"),
        })
    }
}

#[async_trait]
impl LabelService for MockLabelService {
    async fn fetch_page(&self, cursor: u32, page_size: u32) -> Result<Vec<Article>, RemoteError> {
        self.record(RemoteCall::FetchPage { cursor, page_size });
        self.check(MockOperation::FetchPage)?;

        let start = cursor as usize * page_size as usize;
        Ok(lock(&self.articles)
            .values()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn push_one(&self, entity: &Entity) -> Result<(), RemoteError> {
        let key = entity
            .remote_key()
            .ok_or(RemoteError::Unaddressable(entity.id))?
            .to_string();
        self.record(RemoteCall::PushOne { key: key.clone() });
        self.check(MockOperation::PushOne)?;

        Self::upsert(&mut lock(&self.articles), &key, article_payload(entity));
        Ok(())
    }

    async fn push_many(&self, entities: &[Entity]) -> Result<(), RemoteError> {
        let keys = entities
            .iter()
            .map(|e| {
                e.remote_key()
                    .map(str::to_string)
                    .ok_or(RemoteError::Unaddressable(e.id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.record(RemoteCall::PushMany { keys: keys.clone() });
        self.check(MockOperation::PushMany)?;

        let mut articles = lock(&self.articles);
        for (key, entity) in keys.iter().zip(entities) {
            Self::upsert(&mut articles, key, article_payload(entity));
        }
        Ok(())
    }

    async fn clear_one(&self, space: &SpaceId, _hint: Option<&Entity>) -> Result<(), RemoteError> {
        self.record(RemoteCall::ClearOne {
            space: space.clone(),
        });
        self.check(MockOperation::ClearOne)?;

        let blank = blank_payload(&self.identifying_fields);
        Self::upsert(&mut lock(&self.articles), space.as_str(), blank);
        Ok(())
    }

    async fn clear_many(&self, spaces: &[SpaceId]) -> Result<(), RemoteError> {
        self.record(RemoteCall::ClearMany {
            spaces: spaces.to_vec(),
        });
        self.check(MockOperation::ClearMany)?;

        let blank = blank_payload(&self.identifying_fields);
        let mut articles = lock(&self.articles);
        for space in spaces {
            Self::upsert(&mut articles, space.as_str(), blank.clone());
        }
        Ok(())
    }
}
