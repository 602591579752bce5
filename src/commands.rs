//! CLI command bodies. Results are printed to stdout; diagnostics go
//! through `tracing`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};

use crate::app::Services;
use crate::chat::ChatSendRequest;
use crate::conversation::ReplySource;

pub async fn run_upload(services: &Services, path: &Path, file_id: Option<String>) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Path has no usable file name: {}", path.display()))?;

    let response = match file_id {
        Some(id) => services.pipeline.reingest(&id, file_name, &bytes).await?,
        None => services.pipeline.ingest(file_name, &bytes).await?,
    };

    println!("upload {}", response.file_name);
    println!("  file id: {}", response.file_id);
    println!("  chunks: {}", response.total_chunks);
    println!("  {}", response.message);
    Ok(())
}

pub async fn run_documents(services: &Services) -> Result<()> {
    let documents = services.store.list_documents().await?;
    if documents.is_empty() {
        println!("No documents uploaded.");
        return Ok(());
    }
    println!("{:<38} {:<6} {:>6}  {:<20} NAME", "FILE ID", "TYPE", "CHUNKS", "UPLOADED");
    for doc in documents {
        let uploaded = Utc
            .timestamp_opt(doc.uploaded_at, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| doc.uploaded_at.to_string());
        println!(
            "{:<38} {:<6} {:>6}  {:<20} {}",
            doc.file_id, doc.file_type, doc.total_chunks, uploaded, doc.file_name
        );
    }
    Ok(())
}

pub async fn run_delete(services: &Services, file_id: &str) -> Result<()> {
    if !services.pipeline.delete(file_id).await? {
        bail!("document not found: {}", file_id);
    }
    println!("Deleted {}", file_id);
    Ok(())
}

pub async fn run_retrieve(
    services: &Services,
    question: &str,
    file_id: Option<&str>,
    top_k: Option<usize>,
) -> Result<()> {
    let result = services.retrieval.retrieve(question, file_id, top_k).await?;
    if !result.has_context {
        println!("No matching context.");
        return Ok(());
    }
    for (i, hit) in result.chunks.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} chunk {} ({})",
            i + 1,
            hit.similarity,
            hit.file_name,
            hit.chunk_index + 1,
            hit.chunk_id
        );
        let preview: String = hit.text.chars().take(160).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

pub async fn run_chat(services: &Services, chat_id: &str, text: &str) -> Result<()> {
    let reply = services
        .chat
        .send(&ChatSendRequest {
            chat_id: chat_id.to_string(),
            sender_id: "cli".to_string(),
            sender_role: "customer".to_string(),
            text: text.to_string(),
        })
        .await;

    let source = match reply.source {
        ReplySource::Canned(category) => format!("canned:{:?}", category).to_lowercase(),
        ReplySource::Model => "model".to_string(),
        ReplySource::Fallback => "fallback".to_string(),
    };
    println!("{}", reply.text);
    println!("({})", source);
    Ok(())
}

pub fn run_functions(services: &Services) -> Result<()> {
    let catalog = services.executor.catalog();
    let time_variant: Vec<String> = catalog
        .descriptors(true)
        .into_iter()
        .map(|d| d.name)
        .collect();
    for d in catalog.descriptors(false) {
        let marker = if time_variant.contains(&d.name) { "*" } else { " " };
        println!("{} {:<24} {}", marker, d.name, d.description);
    }
    println!();
    println!("* offered when document context is present");
    Ok(())
}
