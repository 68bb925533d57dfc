//! Batch ingestion of an episode directory.
//!
//! Episodes are files named `<N>.md`. Each is ingested as `episode-<N>`,
//! version 1, in ascending episode order.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use saga_core::ingestion::{IngestRequest, IngestionPipeline, IngestionReport};

/// Episode files in `dir`, sorted by episode number. Other files are ignored.
pub fn episode_files(dir: &Path) -> anyhow::Result<Vec<(u32, PathBuf)>> {
    let mut episodes = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("cannot read episode directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(number) = number.filter(|n| *n > 0) {
            episodes.push((number, path));
        }
    }
    episodes.sort_by_key(|(number, _)| *number);
    Ok(episodes)
}

/// Ingest every episode (or just `only`) and print a summary to `out`.
///
/// Stops at the first failure; earlier episodes stay ingested and a rerun
/// overwrites them in place.
pub async fn ingest_dir(
    pipeline: &IngestionPipeline,
    dir: &Path,
    only: Option<u32>,
    story_id: Option<&str>,
    out: &mut impl Write,
) -> anyhow::Result<Vec<IngestionReport>> {
    let mut episodes = episode_files(dir)?;
    if let Some(number) = only {
        episodes.retain(|(n, _)| *n == number);
        if episodes.is_empty() {
            bail!("episode {} not found in {}", number, dir.display());
        }
    }
    let numbers: Vec<String> = episodes.iter().map(|(n, _)| n.to_string()).collect();
    writeln!(out, "Found {} episodes: {}", episodes.len(), numbers.join(", "))?;

    let mut reports = Vec::with_capacity(episodes.len());
    for (number, path) in episodes {
        writeln!(out, "\n--- Episode {} ---", number)?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        writeln!(out, "Loaded {} characters", text.chars().count())?;

        let mut request = IngestRequest::new(format!("episode-{}", number), number, 1, text);
        request.story_id = story_id.map(str::to_string);
        let report = pipeline.ingest(&request).await?;

        writeln!(out, "Extracted {} facts", report.facts_count)?;
        writeln!(out, "Created {} vectors", report.vector_ids.len())?;
        if only.is_some() {
            for id in &report.vector_ids {
                writeln!(out, "  - {}", id)?;
            }
        }
        reports.push(report);
    }

    writeln!(out, "\n=== Ingest Summary ===")?;
    for report in &reports {
        writeln!(
            out,
            "Episode {}: {} facts, {} vectors",
            report.episode_no,
            report.facts_count,
            report.vector_ids.len()
        )?;
    }
    let facts: usize = reports.iter().map(|r| r.facts_count).sum();
    let vectors: usize = reports.iter().map(|r| r.vector_ids.len()).sum();
    writeln!(out, "Total: {} facts, {} vectors", facts, vectors)?;
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pipeline, ScriptedExtractor};
    use saga_core::types::MemoryFact;
    use std::sync::Arc;

    fn episode_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10.md", "2.md", "1.md", "notes.md", "3.txt", "0.md"] {
            std::fs::write(dir.path().join(name), format!("text of {}", name)).unwrap();
        }
        dir
    }

    #[test]
    fn test_episode_files_numeric_order() {
        let dir = episode_dir();
        let numbers: Vec<u32> = episode_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(numbers, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn test_ingest_single_episode() {
        let dir = episode_dir();
        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.script(
            "episode-2",
            vec![
                MemoryFact::world("Rei visits the cafe", 2),
                MemoryFact::character("misaki", "Misaki distrusts Rei", 3),
            ],
        );
        let pipeline = pipeline(extractor);

        let mut out = Vec::new();
        let reports = ingest_dir(&pipeline, dir.path(), Some(2), None, &mut out)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].episode_id, "episode-2");

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("  - vec:episode-2:v1:character:misaki:1"));
        assert!(printed.contains("Total: 2 facts, 2 vectors"));
    }

    #[tokio::test]
    async fn test_missing_episode_is_an_error() {
        let dir = episode_dir();
        let pipeline = pipeline(Arc::new(ScriptedExtractor::default()));
        let mut out = Vec::new();
        assert!(ingest_dir(&pipeline, dir.path(), Some(7), None, &mut out)
            .await
            .is_err());
    }
}
