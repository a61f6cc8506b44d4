//! Query compilation and execution.
//!
//! A query is free text over `caption`, AND-ed with an exact filter on
//! `type`. Results are read from a fresh snapshot and deduplicated by
//! `(filename, caption, type, timestamp)` keeping relevance order.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tantivy::{
    Term,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::IndexRecordOption,
};

use crate::{
    document::MediaKind,
    error::{Error, Result},
    index::{IndexManager, StoredHit},
};

/// Value of `response` for a successful request.
pub const OKAY: &str = "okay";

pub const DEFAULT_LIMIT: usize = 10;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// A user query as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: MediaKind,
    #[serde(default = "default_limit")]
    pub n: usize,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, kind: MediaKind, n: usize) -> Self {
        Self {
            text: text.into(),
            kind,
            n,
        }
    }
}

/// One logical search hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryHit {
    pub filename: String,
    pub caption: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub timestamp: u64,
}

impl From<StoredHit> for QueryHit {
    fn from(hit: StoredHit) -> Self {
        Self {
            filename: hit.filename,
            caption: hit.caption,
            kind: hit.kind,
            timestamp: hit.timestamp,
        }
    }
}

/// Body returned to query clients. Failures are carried in `response`
/// alongside an empty result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    pub results: Vec<QueryHit>,
}

impl From<Result<Vec<QueryHit>>> for QueryResponse {
    fn from(result: Result<Vec<QueryHit>>) -> Self {
        match result {
            Ok(results) => Self {
                response: OKAY.to_string(),
                results,
            },
            Err(e) => Self {
                response: e.to_string(),
                results: Vec::new(),
            },
        }
    }
}

/// Build the compound query for `request`: caption text MUST match and
/// `type` MUST equal the requested kind. Terms in the text are AND-ed
/// unless the query syntax says otherwise.
pub fn compile_query(
    index: &IndexManager,
    request: &QueryRequest,
) -> Result<Box<dyn Query>> {
    if request.n == 0 {
        return Err(Error::QueryParse(
            "n must be a positive integer".to_string(),
        ));
    }
    let f = index.fields();

    let mut parser = QueryParser::for_index(index.index(), vec![f.caption]);
    parser.set_conjunction_by_default();
    let text_query = parser
        .parse_query(&request.text)
        .map_err(|e| Error::QueryParse(e.to_string()))?;

    let kind_query = TermQuery::new(
        Term::from_field_text(f.kind, request.kind.as_str()),
        IndexRecordOption::Basic,
    );

    Ok(Box::new(BooleanQuery::new(vec![
        (Occur::Must, text_query),
        (Occur::Must, Box::new(kind_query)),
    ])))
}

/// Compile and run `request` against a fresh snapshot of `index`.
pub fn execute_query(
    index: &IndexManager,
    request: &QueryRequest,
) -> Result<Vec<QueryHit>> {
    let query = compile_query(index, request)?;
    let snapshot = index.snapshot()?;
    let hits = snapshot.search(query.as_ref(), request.n)?;
    Ok(dedup_hits(hits.into_iter().map(QueryHit::from)))
}

/// Drop repeated hits, keeping the first occurrence of each.
pub fn dedup_hits(hits: impl IntoIterator<Item = QueryHit>) -> Vec<QueryHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.clone()))
        .collect()
}

/// Runs queries off the async runtime with a deadline.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    index: Arc<IndexManager>,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(index: Arc<IndexManager>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    pub async fn execute(
        &self,
        request: QueryRequest,
    ) -> Result<Vec<QueryHit>> {
        tracing::info!(
            text = %request.text,
            kind = %request.kind,
            n = request.n,
            "query"
        );

        let index = Arc::clone(&self.index);
        let task = tokio::task::spawn_blocking(move || {
            execute_query(&index, &request)
        });
        let hits = with_deadline(self.timeout, async move {
            task.await.map_err(|e| Error::Io(std::io::Error::other(e)))?
        })
        .await?;

        tracing::info!(results = hits.len(), "query finished");
        Ok(hits)
    }
}

/// Await `fut`, failing with [`Error::QueryTimeout`] once `timeout` passes.
async fn with_deadline<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::QueryTimeout(timeout.as_millis() as u64)),
    }
}

/// Format hits for human-readable terminal output.
pub fn format_human(hits: &[QueryHit]) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        match hit.kind {
            MediaKind::Image => println!("{:>3}. {}", i + 1, hit.filename),
            MediaKind::Video => {
                println!("{:>3}. {} @ {}s", i + 1, hit.filename, hit.timestamp)
            }
        }
        println!("     {}", hit.caption);
    }
    println!("\n{} result(s)", hits.len());
}

/// Format hits as a JSON query response.
pub fn format_json(hits: &[QueryHit]) -> Result<()> {
    let response = QueryResponse {
        response: OKAY.to_string(),
        results: hits.to_vec(),
    };
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
