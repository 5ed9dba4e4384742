//! Load pre-embedded chunk records into the SQLite vector store.
//!
//! Input is JSON Lines, one [`ChunkRecord`] per line:
//!
//! ```text
//! {"id":"c1","document_id":"france.md","position":0,"text":"Paris is ...","embedding":[0.1, ...]}
//! ```
//!
//! Chunking and embedding happen upstream; records whose vector length
//! disagrees with `[embedding].dims` are skipped.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use context_chat_core::models::ChunkRecord;

use crate::backends;
use crate::config::Config;

#[derive(Debug, Default, PartialEq)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: usize,
}

pub async fn import_records(config: &Config, path: &Path) -> Result<ImportStats> {
    if config.retrieval.backend != "sqlite" {
        bail!(
            "import needs the sqlite retrieval backend (configured: {})",
            config.retrieval.backend
        );
    }
    let store = backends::open_vector_store(config).await?;
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;

    let mut stats = ImportStats::default();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: line {}: {}", line_no, e);
                stats.skipped += 1;
                continue;
            }
        };
        if let Some(dims) = config.embedding.dims {
            if record.embedding.len() != dims {
                eprintln!(
                    "Warning: line {}: chunk {} has {} dims, expected {}",
                    line_no,
                    record.chunk.id,
                    record.embedding.len(),
                    dims
                );
                stats.skipped += 1;
                continue;
            }
        }
        match store.insert(&record).await {
            Ok(()) => stats.imported += 1,
            Err(e) => {
                eprintln!("Warning: line {}: {}", line_no, e);
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let stats = import_records(config, path).await?;
    println!("import");
    println!("  imported: {}", stats.imported);
    println!("  skipped: {}", stats.skipped);
    Ok(())
}
