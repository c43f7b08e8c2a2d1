use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use flowloom_core::error::Result;
use flowloom_core::types::value_to_text;

use super::first_truthy;
use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

fn default_top_k() -> u64 { 3 }

/// Ranks `config.documents` against the query and returns the best `topK`
/// as `{content, score}`.
///
/// Scores are cosine similarity over term-frequency vectors; documents with
/// no term in common with the query are dropped.
pub struct VectorStoreNode;

impl NodeExecutor for VectorStoreNode {
    fn kind(&self) -> &str {
        "vectorStore"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["vectorstore", "retriever"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let query = value_to_text(first_truthy(&inputs, &["input", "query"]).unwrap_or(&ctx.input));
            let documents = documents(node);
            let top_k = node.config_u64("topK").unwrap_or_else(default_top_k) as usize;

            let hits = rank(&query, &documents, top_k);
            ctx.log(format!(
                "[VectorStore] {}: {} of {} documents matched",
                node.display_name(),
                hits.len(),
                documents.len()
            ));

            Ok(NodeOutput::new(Value::Array(
                hits.into_iter()
                    .map(|(content, score)| json!({ "content": content, "score": score }))
                    .collect(),
            )))
        })
    }
}

/// Documents may be plain strings or objects with a `content` field.
fn documents(node: &Node) -> Vec<String> {
    node.config
        .get("documents")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .filter_map(|d| match d {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("content").map(value_to_text),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn term_counts(text: &str) -> BTreeMap<String, f32> {
    let mut counts = BTreeMap::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(term.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

fn score(query: &BTreeMap<String, f32>, doc: &BTreeMap<String, f32>) -> f32 {
    let mut vocab: Vec<&String> = query.keys().chain(doc.keys()).collect();
    vocab.sort();
    vocab.dedup();
    let q: Vec<f32> = vocab.iter().map(|t| query.get(*t).copied().unwrap_or(0.0)).collect();
    let d: Vec<f32> = vocab.iter().map(|t| doc.get(*t).copied().unwrap_or(0.0)).collect();
    cosine_similarity(&q, &d)
}

/// Best `top_k` documents by score; ties keep document order.
pub(crate) fn rank(query: &str, documents: &[String], top_k: usize) -> Vec<(String, f32)> {
    let q = term_counts(query);
    let mut scored: Vec<(usize, f32)> = documents
        .iter()
        .enumerate()
        .map(|(i, d)| (i, score(&q, &term_counts(d))))
        .filter(|(_, s)| *s > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(top_k)
        .map(|(i, s)| (documents[i].clone(), (s * 1000.0).round() / 1000.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::types::SessionId;

    fn docs() -> Vec<String> {
        vec![
            "Rust ownership and borrowing rules".into(),
            "Baking sourdough bread".into(),
            "Borrowing in Rust prevents data races".into(),
        ]
    }

    #[test]
    fn test_identical_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_rank_drops_unrelated() {
        let hits = rank("rust borrowing", &docs(), 3);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(c, _)| c.contains("orrowing")));
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn test_top_k_limits() {
        assert_eq!(rank("rust borrowing", &docs(), 1).len(), 1);
    }

    #[tokio::test]
    async fn test_node_reads_object_documents() {
        let node = Node::new("vs", "retriever").with_config(
            "documents",
            json!([{"content": "tokio runtime"}, "serde derive"]),
        );
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), json!("Tokio"));
        let out = VectorStoreNode.execute(&node, Map::new(), &mut ctx).await.unwrap();
        let hits = out.value.as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["content"], "tokio runtime");
    }
}
