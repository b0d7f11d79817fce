//! Retrieve command handler.
//!
//! Debug view of the retrieval stages: prints the candidates the store
//! returns for a question, optionally after reranking.

use super::{load_pipeline, print_json};
use clap::Args;
use hrdesk_core::{config::AppConfig, AppResult};
use hrdesk_knowledge::{truncate_candidates, ScoredCandidate};

/// Characters of passage text shown per candidate.
const PREVIEW_CHARS: usize = 160;

/// Show the passages retrieved for a question
#[derive(Args, Debug)]
pub struct RetrieveCommand {
    /// Query text
    pub question: String,

    /// Number of candidates to fetch (default: reranker.candidates or retriever.k)
    #[arg(short = 'k', long)]
    pub k: Option<usize>,

    /// Filter expression passed to the store (default: retriever.expr)
    #[arg(long)]
    pub filter: Option<String>,

    /// Rerank the candidates with the configured reranker
    #[arg(long)]
    pub rerank: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RetrieveCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing retrieve command");

        let pipeline = load_pipeline(config).await?;
        let k = self.k.unwrap_or_else(|| config.candidate_count());
        let filter = self.filter.as_deref().unwrap_or(&config.retriever.expr);

        let candidates = pipeline.fetch_candidates(&self.question, k, filter).await?;
        let ranked = if self.rerank {
            pipeline
                .rerank(&self.question, candidates, pipeline.settings().top_n)
                .await
        } else {
            let count = candidates.len();
            truncate_candidates(candidates, count)
        };

        if self.json {
            return print_json(&ranked);
        }

        if ranked.is_empty() {
            println!("No candidates found.");
            return Ok(());
        }

        for (i, scored) in ranked.iter().enumerate() {
            println!("{}", format_candidate(i + 1, scored, self.rerank));
        }
        Ok(())
    }
}

fn format_candidate(rank: usize, scored: &ScoredCandidate, reranked: bool) -> String {
    let chunk = scored.chunk();
    let page = chunk
        .page
        .map(|p| format!(" p.{}", p))
        .unwrap_or_default();
    let score = if reranked {
        format!(
            "rerank={:.3} retrieval={:.3}",
            scored.rerank_score, scored.candidate.score
        )
    } else {
        format!("score={:.3}", scored.candidate.score)
    };

    let text = chunk.content.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    let ellipsis = if text.chars().count() > PREVIEW_CHARS {
        "..."
    } else {
        ""
    };

    format!(
        "[{}] {} {}{}\n    {}{}",
        rank,
        score,
        chunk.display_path(),
        page,
        preview,
        ellipsis
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrdesk_knowledge::{Candidate, DocumentChunk};

    #[test]
    fn test_format_candidate() {
        let chunk = DocumentChunk::new("Badges  are\nissued on day one.", "it.pdf").with_page(3);
        let scored = ScoredCandidate::new(Candidate::new(chunk, 0.5), 8.0);

        let line = format_candidate(1, &scored, true);
        assert!(line.starts_with("[1] rerank=8.000 retrieval=0.500 it.pdf p.3"));
        assert!(line.ends_with("Badges are issued on day one."));

        let plain = format_candidate(2, &scored, false);
        assert!(plain.starts_with("[2] score=0.500 it.pdf p.3"));
    }

    #[test]
    fn test_long_text_is_truncated() {
        let chunk = DocumentChunk::new("word ".repeat(100), "handbook.pdf");
        let scored = ScoredCandidate::new(Candidate::new(chunk, 0.1), 0.1);
        assert!(format_candidate(1, &scored, false).ends_with("..."));
    }
}
