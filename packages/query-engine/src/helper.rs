//! Query helpers: the single entry point extraction stages call.
//!
//! A [`QueryHelper`] binds a category, system prompt, user-prompt template
//! and model. Every call renders the template against caller fields into a
//! [`QuerySignature`] and runs it either synchronously or through its own
//! batch orchestrator. Helpers of one [`QueryEngine`] share the cache and
//! the synchronous executor but never a batch queue, so every job is
//! built for one model.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchOrchestrator;
use crate::error::{QueryError, Result};
use crate::executor::SyncExecutor;
use crate::recovery::{self, AmbiguousText, ResultShape};
use crate::signature::{QuerySignature, SamplingParams};
use crate::stores::MemoryStore;
use crate::traits::{llm::LlmService, store::QueryCache};
use crate::types::batch::{EnqueueOutcome, ResolveReport, SubmittedBatch};
use crate::types::config::EngineConfig;
use crate::types::entry::CacheStats;

/// Template fields supplied by a caller.
pub type Fields = Map<String, Value>;

/// Extraction stage a helper belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    DataEntity,
    DataClassification,
    PurposeEntity,
    PurposeClassification,
    PartyRecognition,
    DataPracticeAction,
    RelationRecognition,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 7] = [
        QueryCategory::DataEntity,
        QueryCategory::DataClassification,
        QueryCategory::PurposeEntity,
        QueryCategory::PurposeClassification,
        QueryCategory::PartyRecognition,
        QueryCategory::DataPracticeAction,
        QueryCategory::RelationRecognition,
    ];

    /// Shape used for post-parse normalization.
    pub fn shape(&self) -> ResultShape {
        match self {
            Self::DataEntity
            | Self::DataClassification
            | Self::PurposeEntity
            | Self::PurposeClassification => ResultShape::Entity,
            Self::PartyRecognition => ResultShape::Party,
            Self::DataPracticeAction => ResultShape::Action,
            Self::RelationRecognition => ResultShape::Relation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataEntity => "data_entity",
            Self::DataClassification => "data_classification",
            Self::PurposeEntity => "purpose_entity",
            Self::PurposeClassification => "purpose_classification",
            Self::PartyRecognition => "party_recognition",
            Self::DataPracticeAction => "data_practice_action",
            Self::RelationRecognition => "relation_recognition",
        }
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryCategory {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| QueryError::Config(format!("unknown query category: {}", s)))
    }
}

/// Which categories re-query instead of trusting the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OverrideScope {
    #[default]
    None,
    All,
    Only(BTreeSet<QueryCategory>),
}

impl OverrideScope {
    pub fn applies_to(&self, category: QueryCategory) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(categories) => categories.contains(&category),
        }
    }
}

impl FromStr for OverrideScope {
    type Err = QueryError;

    /// `none`, `all`, or a comma-separated category list.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" => Ok(Self::None),
            "all" => Ok(Self::All),
            list => list
                .split(',')
                .map(QueryCategory::from_str)
                .collect::<Result<BTreeSet<_>>>()
                .map(Self::Only),
        }
    }
}

/// Synchronous call or batch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Sync,
    Batch,
}

/// Step applied after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostParse {
    #[default]
    None,
    /// Reduce a bare string or `{"text": ...}` to the string.
    UnwrapText,
}

/// User-prompt template with `{field}` placeholders.
///
/// `{{` and `}}` are literal braces. String fields are inserted verbatim,
/// any other value as compact JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, fields: &Fields) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut chars = self.source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(QueryError::Template {
                                    reason: format!("unclosed placeholder {{{}", name),
                                })
                            }
                        }
                    }
                    match fields.get(&name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => {
                            return Err(QueryError::Template {
                                reason: format!("missing field '{}'", name),
                            })
                        }
                    }
                }
                '}' => {
                    return Err(QueryError::Template {
                        reason: "single '}' in template".to_string(),
                    })
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }
}

/// Copy field `from` into field `to` before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldAlias {
    to: String,
    from: String,
}

/// Binds a system prompt, template and model to the engine.
#[derive(Clone)]
pub struct QueryHelper {
    category: QueryCategory,
    system_prompt: String,
    template: PromptTemplate,
    model: String,
    sampling: SamplingParams,
    aliases: Vec<FieldAlias>,
    post_parse: PostParse,
    concurrency: usize,
    store: Arc<dyn QueryCache>,
    executor: SyncExecutor,
    batch: Arc<BatchOrchestrator>,
}

impl QueryHelper {
    /// Derive `to` from `from` (e.g. `sentence` from `segment`).
    pub fn with_alias(mut self, to: impl Into<String>, from: impl Into<String>) -> Self {
        self.aliases.push(FieldAlias {
            to: to.into(),
            from: from.into(),
        });
        self
    }

    pub fn with_post_parse(mut self, post_parse: PostParse) -> Self {
        self.post_parse = post_parse;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn category(&self) -> QueryCategory {
        self.category
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the signature for `fields`.
    pub fn signature(&self, fields: &Fields) -> Result<QuerySignature> {
        let mut fields = fields.clone();
        for alias in &self.aliases {
            if let Some(value) = fields.get(&alias.from).cloned() {
                fields.insert(alias.to.clone(), value);
            }
        }
        let user_prompt = self.template.render(&fields)?;
        Ok(QuerySignature::new(
            &self.model,
            self.sampling,
            &self.system_prompt,
            user_prompt,
        ))
    }

    /// Run one query and return its recovered value.
    ///
    /// In [`QueryMode::Batch`] the signature must already be resolved
    /// through the batch calls; otherwise this returns
    /// [`QueryError::BatchNotResolved`].
    pub async fn run_query(
        &self,
        fields: &Fields,
        override_scope: &OverrideScope,
        mode: QueryMode,
    ) -> Result<Value> {
        let signature = self.signature(fields)?;
        let value = match mode {
            QueryMode::Sync => {
                let override_cache = override_scope.applies_to(self.category);
                self.executor.execute(&signature, override_cache).await?
            }
            QueryMode::Batch => match self.store.lookup_finished(&signature).await? {
                Some(entry) => recovery::recover_value(&entry.response)?,
                None => {
                    return Err(QueryError::BatchNotResolved {
                        hash_key: signature.cache_key().to_string(),
                    })
                }
            },
        };
        self.post_process(value)
    }

    /// Queue one query for the next batch submission.
    pub async fn enqueue_batch_query(
        &self,
        fields: &Fields,
        override_scope: &OverrideScope,
    ) -> Result<EnqueueOutcome> {
        let signature = self.signature(fields)?;
        self.batch
            .enqueue(signature, override_scope.applies_to(self.category))
            .await
    }

    /// Submit everything queued. `None` when nothing was queued.
    pub async fn execute_batch_queries(&self) -> Result<Option<SubmittedBatch>> {
        self.batch.submit().await
    }

    /// Wait for one job, or every waiting job, and fan results in.
    pub async fn await_and_resolve_batch(
        &self,
        job_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport> {
        self.batch.await_and_resolve(job_id, cancel).await
    }

    /// Run independent queries and return once every one has finished.
    ///
    /// Results keep the order of `fields_list`. Synchronous mode fans out
    /// with the engine's concurrency limit. Batch mode enqueues everything,
    /// submits once and waits; a failed job fails the whole stage with
    /// [`QueryError::BatchFailed`].
    pub async fn run_stage(
        &self,
        fields_list: &[Fields],
        override_scope: &OverrideScope,
        mode: QueryMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<Value>>> {
        info!(
            category = %self.category,
            count = fields_list.len(),
            mode = ?mode,
            "Running stage"
        );

        if mode == QueryMode::Batch {
            self.run_batch(fields_list, override_scope, cancel).await?;
        }

        let results = stream::iter(fields_list)
            .map(|fields| self.run_query(fields, override_scope, mode))
            .buffered(self.concurrency)
            .collect::<Vec<_>>();

        tokio::select! {
            results = results => Ok(results),
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
        }
    }

    /// Enqueue, submit and wait on exactly the jobs holding this stage's
    /// queries: the one submitted here, and any earlier or sibling job
    /// that already owns one of them.
    async fn run_batch(
        &self,
        fields_list: &[Fields],
        override_scope: &OverrideScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let override_cache = override_scope.applies_to(self.category);
        let mut unresolved = Vec::new();
        for fields in fields_list {
            let signature = self.signature(fields)?;
            let outcome = self.batch.enqueue(signature.clone(), override_cache).await?;
            debug!(category = %self.category, outcome = ?outcome, "Enqueued");
            if outcome != EnqueueOutcome::AlreadyResolved {
                unresolved.push(signature);
            }
        }

        if let Some(submitted) = self.execute_batch_queries().await? {
            info!(
                category = %self.category,
                job_id = %submitted.job_id,
                count = submitted.count,
                "Stage batch submitted"
            );
        }

        let mut jobs = BTreeSet::new();
        for signature in &unresolved {
            if let Some(pending) = self.store.lookup_pending(signature).await? {
                jobs.insert(pending.batch_job_id);
            }
        }
        let jobs: Vec<String> = jobs.into_iter().collect();
        self.batch.await_jobs(&jobs, cancel).await?.into_result()?;
        Ok(())
    }

    fn post_process(&self, value: Value) -> Result<Value> {
        let value = recovery::normalize(value, self.category.shape())?;
        match self.post_parse {
            PostParse::None => Ok(value),
            PostParse::UnwrapText => Ok(Value::String(AmbiguousText::decode(value)?.into_text())),
        }
    }
}

/// The engine: one cache and one service client shared by every helper
/// built from it.
///
/// Its own orchestrator serves operator tasks (resume, abandon); each
/// helper gets a fresh one.
pub struct QueryEngine {
    config: EngineConfig,
    store: Arc<dyn QueryCache>,
    llm: Arc<dyn LlmService>,
    executor: SyncExecutor,
    batch: BatchOrchestrator,
}

impl QueryEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn QueryCache>, llm: Arc<dyn LlmService>) -> Self {
        let executor = SyncExecutor::new(store.clone(), llm.clone(), config.retry);
        let batch = orchestrator(&config, store.clone(), llm.clone());

        Self {
            config,
            store,
            llm,
            executor,
            batch,
        }
    }

    /// Open the cache configured by `config`.
    ///
    /// With a cache directory the SQLite database inside it is created if
    /// needed; without one the cache lives in memory.
    pub async fn open(config: EngineConfig, llm: Arc<dyn LlmService>) -> Result<Self> {
        let store: Arc<dyn QueryCache> = match (&config.cache_dir, config.database_url()) {
            (Some(dir), Some(url)) => open_sqlite(dir, &url).await?,
            _ => {
                debug!("No cache directory configured, using in-memory cache");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(config, store, llm))
    }

    /// Build a helper for one category, with its own batch queue.
    ///
    /// Clones of the returned helper share that queue.
    pub fn helper(
        &self,
        category: QueryCategory,
        system_prompt: impl Into<String>,
        template: impl Into<String>,
        model: impl Into<String>,
    ) -> QueryHelper {
        QueryHelper {
            category,
            system_prompt: system_prompt.into(),
            template: PromptTemplate::new(template),
            model: model.into(),
            sampling: self.config.sampling,
            aliases: Vec::new(),
            post_parse: PostParse::None,
            concurrency: self.config.concurrency.max(1),
            store: self.store.clone(),
            executor: self.executor.clone(),
            batch: Arc::new(orchestrator(&self.config, self.store.clone(), self.llm.clone())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueryCache> {
        &self.store
    }

    pub fn executor(&self) -> &SyncExecutor {
        &self.executor
    }

    pub fn batch(&self) -> &BatchOrchestrator {
        &self.batch
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats().await
    }
}

fn orchestrator(
    config: &EngineConfig,
    store: Arc<dyn QueryCache>,
    llm: Arc<dyn LlmService>,
) -> BatchOrchestrator {
    BatchOrchestrator::new(store, llm)
        .with_poll_interval(config.poll_interval)
        .with_cancel_remote_on_abort(config.cancel_remote_on_abort)
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(dir: &std::path::Path, url: &str) -> Result<Arc<dyn QueryCache>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| QueryError::Config(format!("cannot create cache dir {}: {}", dir.display(), e)))?;
    info!(path = %dir.display(), "Opening query cache");
    Ok(Arc::new(crate::stores::SqliteStore::new(url).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(dir: &std::path::Path, _url: &str) -> Result<Arc<dyn QueryCache>> {
    Err(QueryError::Config(format!(
        "cache dir {} configured but the sqlite feature is disabled",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn test_template_rendering() {
        let template = PromptTemplate::new("Sentence: {sentence}\nEntities: {entities}\n{{\"k\": 1}}");
        let rendered = template
            .render(&fields(json!({"sentence": "We store email.", "entities": ["email"]})))
            .unwrap();
        assert_eq!(rendered, "Sentence: We store email.\nEntities: [\"email\"]\n{\"k\": 1}");
    }

    #[test]
    fn test_template_errors() {
        let missing = PromptTemplate::new("{segment}").render(&Fields::new());
        assert!(matches!(missing, Err(QueryError::Template { .. })));
        assert!(PromptTemplate::new("{open").render(&Fields::new()).is_err());
        assert!(PromptTemplate::new("close}").render(&Fields::new()).is_err());
    }

    #[test]
    fn test_override_scope_parsing() {
        assert_eq!("none".parse::<OverrideScope>().unwrap(), OverrideScope::None);
        assert_eq!("all".parse::<OverrideScope>().unwrap(), OverrideScope::All);

        let scope: OverrideScope = "data_entity, party_recognition".parse().unwrap();
        assert!(scope.applies_to(QueryCategory::DataEntity));
        assert!(scope.applies_to(QueryCategory::PartyRecognition));
        assert!(!scope.applies_to(QueryCategory::PurposeEntity));

        assert!("data_entity,bogus".parse::<OverrideScope>().is_err());
    }

    #[test]
    fn test_category_shapes() {
        assert_eq!(QueryCategory::PurposeClassification.shape(), ResultShape::Entity);
        assert_eq!(QueryCategory::DataPracticeAction.shape(), ResultShape::Action);
        assert_eq!(
            "relation_recognition".parse::<QueryCategory>().unwrap(),
            QueryCategory::RelationRecognition
        );
    }

    #[tokio::test]
    async fn test_alias_feeds_template() {
        let llm = Arc::new(MockLlm::new().with_default_response("[]"));
        let engine = QueryEngine::open(EngineConfig::default(), llm).await.unwrap();
        let helper = engine
            .helper(QueryCategory::DataEntity, "sys", "S: {sentence}", "gpt-4o")
            .with_alias("sentence", "segment");

        let signature = helper.signature(&fields(json!({"segment": "abc"}))).unwrap();
        assert_eq!(signature.message("user"), Some("S: abc"));
        assert_eq!(signature.message("system"), Some("sys"));
    }

    #[tokio::test]
    async fn test_entity_normalization_and_unwrap() {
        let llm = Arc::new(
            MockLlm::new()
                .with_response("entities", r#"[{"dataEntity": "email", "type": "x"}]"#)
                .with_response("single", r#"{"text": "email"}"#),
        );
        let engine = QueryEngine::open(EngineConfig::default(), llm).await.unwrap();

        let entities = engine.helper(QueryCategory::DataEntity, "sys", "{segment}", "gpt-4o");
        let value = entities
            .run_query(&fields(json!({"segment": "entities"})), &OverrideScope::None, QueryMode::Sync)
            .await
            .unwrap();
        assert_eq!(value, json!(["email"]));

        let single = engine
            .helper(QueryCategory::PartyRecognition, "sys", "{segment}", "gpt-4o")
            .with_post_parse(PostParse::UnwrapText);
        let value = single
            .run_query(&fields(json!({"segment": "single"})), &OverrideScope::None, QueryMode::Sync)
            .await
            .unwrap();
        assert_eq!(value, json!("email"));
    }

    #[tokio::test]
    async fn test_batched_query_before_resolution_is_rejected() {
        let llm = Arc::new(MockLlm::new());
        let engine = QueryEngine::open(EngineConfig::default(), llm).await.unwrap();
        let helper = engine.helper(QueryCategory::DataEntity, "sys", "{segment}", "gpt-4o");

        let result = helper
            .run_query(&fields(json!({"segment": "x"})), &OverrideScope::None, QueryMode::Batch)
            .await;
        assert!(matches!(result, Err(QueryError::BatchNotResolved { .. })));
    }
}
