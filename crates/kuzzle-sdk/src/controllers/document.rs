//! `document` controller.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{call, request};
use crate::{
    Kuzzle,
    error::{KuzzleError, KuzzleResult},
    protocol::Protocol,
};

/// Options for [`DocumentController::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Document id; the backend generates one when unset.
    pub id: Option<String>,
    /// Wait for the document to be indexed before answering.
    pub wait_for_refresh: bool,
}

impl CreateOptions {
    /// Set the document id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set whether to wait for indexation.
    #[must_use]
    pub fn wait_for_refresh(mut self, wait: bool) -> Self {
        self.wait_for_refresh = wait;
        self
    }
}

/// Options for update actions.
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// Wait for the document to be indexed before answering.
    pub wait_for_refresh: bool,
    /// Number of retries on version conflicts.
    pub retry_on_conflict: Option<u32>,
    /// Return the updated document source.
    pub source: bool,
}

impl UpdateOptions {
    /// Set whether to wait for indexation.
    #[must_use]
    pub fn wait_for_refresh(mut self, wait: bool) -> Self {
        self.wait_for_refresh = wait;
        self
    }

    /// Set the conflict retry count.
    #[must_use]
    pub fn retry_on_conflict(mut self, retries: u32) -> Self {
        self.retry_on_conflict = Some(retries);
        self
    }

    /// Set whether to return the updated source.
    #[must_use]
    pub fn source(mut self, source: bool) -> Self {
        self.source = source;
        self
    }
}

/// Options for [`DocumentController::search`].
#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    /// Offset of the first hit.
    pub from: Option<u64>,
    /// Maximum number of hits.
    pub size: Option<u64>,
    /// Scroll duration, e.g. `"30s"`.
    pub scroll: Option<String>,
}

impl SearchOptions {
    /// Set the offset of the first hit.
    #[must_use]
    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the maximum number of hits.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the scroll duration.
    #[must_use]
    pub fn scroll(mut self, scroll: impl Into<String>) -> Self {
        self.scroll = Some(scroll.into());
        self
    }
}

/// One page of search results.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    pub hits: Vec<Value>,
    pub total: u64,
    pub scroll_id: Option<String>,
    pub aggregations: Option<Value>,
}

/// Requests against the `document` controller.
pub struct DocumentController<P: Protocol> {
    kuzzle: Kuzzle<P>,
}

fn document_request(action: &str, index: &str, collection: &str) -> Map<String, Value> {
    let mut request = request("document", action);
    request.insert("index".to_string(), Value::from(index));
    request.insert("collection".to_string(), Value::from(collection));
    request
}

fn refresh(request: &mut Map<String, Value>, wait_for_refresh: bool) {
    if wait_for_refresh {
        request.insert("refresh".to_string(), Value::from("wait_for"));
    }
}

fn update_options(request: &mut Map<String, Value>, options: &UpdateOptions) {
    refresh(request, options.wait_for_refresh);
    if let Some(retries) = options.retry_on_conflict {
        request.insert("retryOnConflict".to_string(), Value::from(retries));
    }
    if options.source {
        request.insert("source".to_string(), Value::Bool(true));
    }
}

impl<P: Protocol> DocumentController<P> {
    pub(crate) fn new(kuzzle: Kuzzle<P>) -> Self {
        Self { kuzzle }
    }

    /// Fetch a document by id.
    pub async fn get(&self, index: &str, collection: &str, id: &str) -> KuzzleResult<Value> {
        let mut request = document_request("get", index, collection);
        request.insert("_id".to_string(), Value::from(id));
        call(&self.kuzzle, request).await
    }

    /// Check whether a document exists.
    pub async fn exists(&self, index: &str, collection: &str, id: &str) -> KuzzleResult<bool> {
        let mut request = document_request("exists", index, collection);
        request.insert("_id".to_string(), Value::from(id));
        let result = call(&self.kuzzle, request).await?;
        result
            .as_bool()
            .ok_or_else(|| KuzzleError::internal("exists returned a non boolean result"))
    }

    /// Create a document.
    pub async fn create(
        &self,
        index: &str,
        collection: &str,
        document: Value,
        options: CreateOptions,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("create", index, collection);
        if let Some(id) = options.id {
            request.insert("_id".to_string(), Value::from(id));
        }
        refresh(&mut request, options.wait_for_refresh);
        request.insert("body".to_string(), document);
        call(&self.kuzzle, request).await
    }

    /// Create a document, replacing it if it already exists.
    pub async fn create_or_replace(
        &self,
        index: &str,
        collection: &str,
        id: &str,
        document: Value,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        self.write_one("createOrReplace", index, collection, id, document, wait_for_refresh)
            .await
    }

    /// Replace an existing document.
    pub async fn replace(
        &self,
        index: &str,
        collection: &str,
        id: &str,
        document: Value,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        self.write_one("replace", index, collection, id, document, wait_for_refresh)
            .await
    }

    async fn write_one(
        &self,
        action: &str,
        index: &str,
        collection: &str,
        id: &str,
        document: Value,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        let mut request = document_request(action, index, collection);
        request.insert("_id".to_string(), Value::from(id));
        refresh(&mut request, wait_for_refresh);
        request.insert("body".to_string(), document);
        call(&self.kuzzle, request).await
    }

    /// Apply partial changes to a document.
    pub async fn update(
        &self,
        index: &str,
        collection: &str,
        id: &str,
        changes: Value,
        options: UpdateOptions,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("update", index, collection);
        request.insert("_id".to_string(), Value::from(id));
        update_options(&mut request, &options);
        request.insert("body".to_string(), changes);
        call(&self.kuzzle, request).await
    }

    /// Delete a document. Returns the deleted document id.
    pub async fn delete(
        &self,
        index: &str,
        collection: &str,
        id: &str,
        wait_for_refresh: bool,
    ) -> KuzzleResult<String> {
        let mut request = document_request("delete", index, collection);
        request.insert("_id".to_string(), Value::from(id));
        refresh(&mut request, wait_for_refresh);
        let result = call(&self.kuzzle, request).await?;
        Ok(result
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string())
    }

    /// Validate a document against the collection validation rules.
    pub async fn validate(
        &self,
        index: &str,
        collection: &str,
        document: Value,
    ) -> KuzzleResult<bool> {
        let mut request = document_request("validate", index, collection);
        request.insert("body".to_string(), document);
        let result = call(&self.kuzzle, request).await?;
        Ok(result.get("valid").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Count documents matching `query`.
    pub async fn count(&self, index: &str, collection: &str, query: Value) -> KuzzleResult<u64> {
        let mut request = document_request("count", index, collection);
        request.insert("body".to_string(), query);
        let result = call(&self.kuzzle, request).await?;
        result
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| KuzzleError::internal("count result is missing"))
    }

    /// Search documents.
    pub async fn search(
        &self,
        index: &str,
        collection: &str,
        query: Value,
        options: SearchOptions,
    ) -> KuzzleResult<SearchResult> {
        let mut request = document_request("search", index, collection);
        if let Some(from) = options.from {
            request.insert("from".to_string(), Value::from(from));
        }
        if let Some(size) = options.size {
            request.insert("size".to_string(), Value::from(size));
        }
        if let Some(scroll) = options.scroll {
            request.insert("scroll".to_string(), Value::from(scroll));
        }
        request.insert("body".to_string(), query);
        let result = call(&self.kuzzle, request).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Delete every document matching `query`.
    pub async fn delete_by_query(
        &self,
        index: &str,
        collection: &str,
        query: Value,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("deleteByQuery", index, collection);
        refresh(&mut request, wait_for_refresh);
        request.insert("body".to_string(), json!({ "query": query }));
        call(&self.kuzzle, request).await
    }

    /// Apply `changes` to every document matching `query`.
    pub async fn update_by_query(
        &self,
        index: &str,
        collection: &str,
        query: Value,
        changes: Value,
        options: UpdateOptions,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("updateByQuery", index, collection);
        update_options(&mut request, &options);
        request.insert(
            "body".to_string(),
            json!({ "query": query, "changes": changes }),
        );
        call(&self.kuzzle, request).await
    }

    /// Create several documents. Each entry is `{ "_id"?, "body" }`.
    pub async fn m_create(
        &self,
        index: &str,
        collection: &str,
        documents: Vec<Value>,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        self.write_many("mCreate", index, collection, documents, wait_for_refresh)
            .await
    }

    /// Create or replace several documents.
    pub async fn m_create_or_replace(
        &self,
        index: &str,
        collection: &str,
        documents: Vec<Value>,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        self.write_many("mCreateOrReplace", index, collection, documents, wait_for_refresh)
            .await
    }

    /// Replace several documents.
    pub async fn m_replace(
        &self,
        index: &str,
        collection: &str,
        documents: Vec<Value>,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        self.write_many("mReplace", index, collection, documents, wait_for_refresh)
            .await
    }

    async fn write_many(
        &self,
        action: &str,
        index: &str,
        collection: &str,
        documents: Vec<Value>,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        let mut request = document_request(action, index, collection);
        refresh(&mut request, wait_for_refresh);
        request.insert("body".to_string(), json!({ "documents": documents }));
        call(&self.kuzzle, request).await
    }

    /// Update several documents. Each entry is `{ "_id", "body" }`.
    pub async fn m_update(
        &self,
        index: &str,
        collection: &str,
        documents: Vec<Value>,
        options: UpdateOptions,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("mUpdate", index, collection);
        update_options(&mut request, &options);
        request.insert("body".to_string(), json!({ "documents": documents }));
        call(&self.kuzzle, request).await
    }

    /// Delete several documents by id.
    pub async fn m_delete(
        &self,
        index: &str,
        collection: &str,
        ids: Vec<String>,
        wait_for_refresh: bool,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("mDelete", index, collection);
        refresh(&mut request, wait_for_refresh);
        request.insert("body".to_string(), json!({ "ids": ids }));
        call(&self.kuzzle, request).await
    }

    /// Fetch several documents by id.
    pub async fn m_get(
        &self,
        index: &str,
        collection: &str,
        ids: Vec<String>,
    ) -> KuzzleResult<Value> {
        let mut request = document_request("mGet", index, collection);
        request.insert("body".to_string(), json!({ "ids": ids }));
        call(&self.kuzzle, request).await
    }
}
