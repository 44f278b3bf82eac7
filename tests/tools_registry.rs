//! Document ingestion, tool construction and tool retrieval.

mod common;

use async_trait::async_trait;
use common::{bag_of_words, library_for, test_config, write_doc, FakeEmbedder, FakeModel, Script};
use ragchat::embedding::EmbeddingProvider;
use ragchat::error::ChatError;
use ragchat::ingest::{document_id, load_document};
use ragchat::library::Library;
use ragchat::progress::NoProgress;
use ragchat::registry::ToolRegistry;
use ragchat::tools::{build_tools, Tool, ToolCall, ToolContext, ToolKind, EMPTY_RESPONSE};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn context(model: &FakeModel, config: &ragchat::config::Config) -> ToolContext {
    ToolContext {
        model: Arc::new(model.clone()),
        embedder: Arc::new(FakeEmbedder),
        retrieval: config.retrieval.clone(),
    }
}

#[test]
fn test_report_pdf_tool_names() {
    let id = document_id(Path::new("uploads/report.pdf")).unwrap();
    assert_eq!(id, "report");
    assert_eq!(ToolKind::Search.tool_name(&id), "vector_tool_report");
    assert_eq!(ToolKind::Summary.tool_name(&id), "summary_tool_report");
}

#[tokio::test]
async fn test_each_document_yields_two_tools() {
    let tmp = TempDir::new().unwrap();
    let paths = vec![
        write_doc(tmp.path(), "report.txt", "Annual report text."),
        write_doc(tmp.path(), "notes.md", "# Notes\n\nMeeting notes."),
    ];
    let config = test_config(tmp.path());
    let library = library_for(&paths, &config).await;

    assert_eq!(library.documents().len(), 2);
    assert_eq!(library.registry().len(), 4);

    let mut names = library.registry().names();
    names.sort();
    assert_eq!(
        names,
        vec![
            "summary_tool_notes",
            "summary_tool_report",
            "vector_tool_notes",
            "vector_tool_report"
        ]
    );

    let report = library.registry().get("summary_tool_report").unwrap();
    assert_eq!(report.kind(), ToolKind::Summary);
    assert_eq!(report.document_id(), "report");
    assert!(report.description().contains("report"));
}

#[tokio::test]
async fn test_ingestion_errors_do_not_abort_others() {
    let tmp = TempDir::new().unwrap();
    let paths = vec![
        write_doc(tmp.path(), "report.txt", "Real content."),
        write_doc(tmp.path(), "table.csv", "a,b\n1,2"),
        write_doc(tmp.path(), "report.md", "Same stem as the text file."),
        write_doc(tmp.path(), "blank.txt", "   \n\n  "),
    ];
    let config = test_config(tmp.path());
    let library = library_for(&paths, &config).await;

    assert_eq!(library.documents().len(), 1);
    assert_eq!(library.documents()[0].document.id, "report");

    let errors = library.errors();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| matches!(e, ChatError::Ingestion { .. })));
    assert!(errors.iter().any(|e| e.to_string().contains("unsupported file type: .csv")));
    assert!(errors.iter().any(|e| e.to_string().contains("duplicate document name")));
}

/// Rejects any batch containing the word "oversized", like an embedding
/// server refusing a chunk that exceeds its context window.
struct RejectingEmbedder;

#[async_trait]
impl EmbeddingProvider for RejectingEmbedder {
    fn model_name(&self) -> &str {
        "rejecting"
    }

    fn dims(&self) -> usize {
        common::DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        if texts.iter().any(|t| t.contains("oversized")) {
            return Err(ChatError::Embedding("input exceeds context length".to_string()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

#[tokio::test]
async fn test_embedding_failure_skips_only_that_document() {
    let tmp = TempDir::new().unwrap();
    let paths = vec![
        write_doc(tmp.path(), "a.txt", "Quarterly revenue figures."),
        write_doc(tmp.path(), "b.txt", "An oversized chunk of text."),
    ];
    let config = test_config(tmp.path());
    let library = Library::build(&paths, &config, Arc::new(RejectingEmbedder), &NoProgress)
        .await
        .unwrap();

    assert_eq!(library.documents().len(), 1);
    assert_eq!(library.documents()[0].document.id, "a");
    let mut names = library.registry().names();
    names.sort();
    assert_eq!(names, vec!["summary_tool_a", "vector_tool_a"]);

    assert_eq!(library.errors().len(), 1);
    assert!(matches!(library.errors()[0], ChatError::Embedding(_)));
    assert!(!library.is_empty());
}

#[tokio::test]
async fn test_library_from_upload_dir() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "b.txt", "Second file.");
    write_doc(tmp.path(), "a.txt", "First file.");
    write_doc(tmp.path(), "skip.csv", "x,y");
    let config = test_config(tmp.path());

    let library = Library::from_upload_dir(&config, Arc::new(FakeEmbedder), &NoProgress)
        .await
        .unwrap();
    let ids: Vec<&str> = library
        .documents()
        .iter()
        .map(|e| e.document.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(library.errors().is_empty());
}

#[tokio::test]
async fn test_missing_upload_dir_is_empty_library() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("nope"));
    let library = Library::from_upload_dir(&config, Arc::new(FakeEmbedder), &NoProgress)
        .await
        .unwrap();
    assert!(library.is_empty());
    assert!(matches!(
        library.search_chunks("x", 2).await,
        Err(ChatError::RegistryEmpty)
    ));
}

// ─── Registry ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieve_is_bounded_sorted_and_stable() {
    let tmp = TempDir::new().unwrap();
    let paths = vec![
        write_doc(tmp.path(), "finance.txt", "Revenue and costs."),
        write_doc(tmp.path(), "garden.txt", "Tomatoes and basil."),
        write_doc(tmp.path(), "report.txt", "Project status."),
    ];
    let config = test_config(tmp.path());
    let library = library_for(&paths, &config).await;
    let registry = library.registry();

    for k in [0, 1, 2, 3, 10] {
        let scored = registry.retrieve_scored("finance", k).await.unwrap();
        assert!(scored.len() <= k);
        assert!(scored.windows(2).all(|w| w[0].score >= w[1].score));
    }

    let top = registry.retrieve("finance", 2).await.unwrap();
    assert_eq!(top.len(), 2);
    assert!(top.iter().all(|t| t.document_id() == "finance"));

    let again = registry.retrieve("finance", 2).await.unwrap();
    let first: Vec<&str> = top.iter().map(|t| t.name()).collect();
    let second: Vec<&str> = again.iter().map(|t| t.name()).collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_registry_rejects_duplicate_names() {
    let tmp = TempDir::new().unwrap();
    let path = write_doc(tmp.path(), "report.txt", "Some text.");
    let config = test_config(tmp.path());
    let doc = load_document(&path, &config.chunking).unwrap();

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    tools.extend(build_tools(&doc, &FakeEmbedder).await.unwrap().into_tools());
    tools.extend(build_tools(&doc, &FakeEmbedder).await.unwrap().into_tools());

    match ToolRegistry::index(tools, Arc::new(FakeEmbedder)).await {
        Err(ChatError::DuplicateTool(name)) => assert_eq!(name, "vector_tool_report"),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("duplicate tools were accepted"),
    }
}

#[tokio::test]
async fn test_empty_registry_retrieves_nothing() {
    let registry = ToolRegistry::empty(Arc::new(FakeEmbedder));
    assert!(registry.is_empty());
    assert!(registry.retrieve("anything", 3).await.unwrap().is_empty());
}

// ─── Tools ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_tool_with_unmatched_pages() {
    let tmp = TempDir::new().unwrap();
    let path = write_doc(tmp.path(), "report.txt", "Plain text has no page labels.");
    let config = test_config(tmp.path());
    let library = library_for(&[path], &config).await;
    let model = FakeModel::new(vec![]);

    let tool = library.registry().get("vector_tool_report").unwrap();
    let call = ToolCall::new("labels").with_pages(vec!["3".to_string()]);
    let out = tool.execute(&call, &context(&model, &config)).await.unwrap();

    assert_eq!(out, EMPTY_RESPONSE);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_search_tool_reports_model_failure() {
    let tmp = TempDir::new().unwrap();
    let path = write_doc(tmp.path(), "report.txt", "Something to search.");
    let config = test_config(tmp.path());
    let library = library_for(&[path], &config).await;
    let model = FakeModel::new(vec![Script::Fail(ChatError::ModelUnavailable(
        "down".to_string(),
    ))]);

    let tool = library.registry().get("vector_tool_report").unwrap();
    let err = tool
        .execute(&ToolCall::new("search"), &context(&model, &config))
        .await
        .unwrap_err();
    match err {
        ChatError::ToolInvocation { tool, message } => {
            assert_eq!(tool, "vector_tool_report");
            assert!(message.contains("down"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_summary_tool_summarizes_in_rounds() {
    let tmp = TempDir::new().unwrap();
    let body = "alpha paragraph one\n\nbeta paragraph two\n\ngamma paragraph 3\n\ndelta paragraph 4";
    let path = write_doc(tmp.path(), "notes.txt", body);
    let mut config = test_config(tmp.path());
    config.chunking.max_tokens = 5;
    config.retrieval.summary_group_chars = 10;
    let library = library_for(&[path], &config).await;
    assert_eq!(library.documents()[0].chunks, 4);

    let model = FakeModel::new(vec![
        Script::text("first half"),
        Script::text("second half"),
        Script::text("whole document"),
    ]);
    let tool = library.registry().get("summary_tool_notes").unwrap();
    let out = tool
        .execute(&ToolCall::new("summarize"), &context(&model, &config))
        .await
        .unwrap();

    assert_eq!(out, "whole document");
    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    let last_prompt = &calls[2].1[0].content;
    assert!(last_prompt.contains("first half") || last_prompt.contains("second half"));
}
