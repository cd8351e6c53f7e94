// ============================================================================
// convo-admin - CLI inspection tool for the conversation core
// ============================================================================
// Usage:
//   convo-admin stats                               Record and index counts
//   convo-admin list --owner UID                    Conversations of one owner
//   convo-admin show --owner UID --id CID           Decoded transcript
//   convo-admin search --owner UID --query TEXT     Filtered retrieval
//   convo-admin classify --owner UID --audio WAV --segments JSON
//   convo-admin protect --owner UID --id CID --level enhanced
//   convo-admin delete --owner UID --id CID         Record + embedding
//   convo-admin export --owner UID                  JSON dump
// Backends are selected by CONVO_* environment variables (see .env).
// ============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use convo_core::retrieval::{DateRange, SearchQuery, StructuredFilters};
use convo_core::speaker::{load_voice_references, FsAudioStore, ModelVerifier, SharedSpeakerModel};
use convo_core::{
    ConversationService, CoreConfig, ProtectionLevel, SearchRequest, SpeakerClassifier,
    TranscriptSegment,
};

/// Conversation core inspection tool
#[derive(Parser)]
#[command(name = "convo-admin", version, about = "Inspect and manage protected conversations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record store and vector index statistics
    Stats,

    /// List an owner's conversations
    List {
        #[arg(long)]
        owner: String,

        /// Include discarded conversations
        #[arg(long)]
        all: bool,
    },

    /// Print one decoded conversation
    Show {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },

    /// Run a retrieval query
    Search {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        query: String,
        #[arg(long = "topic")]
        topics: Vec<String>,
        #[arg(long = "entity")]
        entities: Vec<String>,
        #[arg(long = "person")]
        people: Vec<String>,
        /// Lower bound, RFC 3339
        #[arg(long)]
        since: Option<String>,
        /// Upper bound, RFC 3339
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Attribute transcript segments to the owner or known people
    Classify {
        #[arg(long)]
        owner: String,
        /// Recording as a WAV file
        #[arg(long)]
        audio: PathBuf,
        /// JSON array of transcript segments
        #[arg(long)]
        segments: PathBuf,
        /// Person ids whose voice samples to compare against
        #[arg(long = "person")]
        people: Vec<String>,
    },

    /// Re-encode a conversation under another protection level
    Protect {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
        /// standard or enhanced
        #[arg(long)]
        level: String,
    },

    /// Delete a conversation and its embedding
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },

    /// Export an owner's decoded conversations as JSON
    Export {
        #[arg(long)]
        owner: String,
    },
}

/// Unix seconds as "YYYY-MM-DD HH:MM UTC"; out-of-range values print raw
fn created_label(unix_secs: i64) -> String {
    match DateTime::from_timestamp(unix_secs, 0) {
        Some(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("@{}", unix_secs),
    }
}

fn parse_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid RFC 3339 timestamp: {}", v))
        })
        .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CoreConfig::from_env()?;
    let service = ConversationService::open(&config).await?;

    match cli.command {
        Commands::Stats => cmd_stats(&service).await,
        Commands::List { owner, all } => cmd_list(&service, &owner, all),
        Commands::Show { owner, id } => cmd_show(&service, &owner, &id),
        Commands::Search {
            owner,
            query,
            topics,
            entities,
            people,
            since,
            until,
            limit,
        } => {
            let date_range = DateRange {
                start: parse_time(since.as_deref())?,
                end: parse_time(until.as_deref())?,
            };
            let request = SearchRequest::new(owner, SearchQuery::Text(query))
                .with_filters(StructuredFilters {
                    people,
                    topics,
                    entities,
                })
                .with_date_range(date_range)
                .with_limit(limit);
            cmd_search(&service, &request).await
        }
        Commands::Classify {
            owner,
            audio,
            segments,
            people,
        } => cmd_classify(&service, &config, &owner, &audio, &segments, &people).await,
        Commands::Protect { owner, id, level } => cmd_protect(&service, &owner, &id, &level),
        Commands::Delete { owner, id } => cmd_delete(&service, &owner, &id).await,
        Commands::Export { owner } => cmd_export(&service, &owner),
    }
}

async fn cmd_stats(service: &ConversationService) -> Result<()> {
    let stats = service.repository().store().stats()?;

    println!("=== Conversation Store Stats ===");
    println!("Conversations: {} total", stats.total_conversations);
    println!("  {:12} {}", "enhanced", stats.enhanced_conversations);
    println!("  {:12} {}", "discarded", stats.discarded_conversations);
    println!("Memories:      {}", stats.total_memories);
    println!("Owners:        {}", stats.owners);
    println!();

    let vectors = service.vectors();
    match vectors.count().await {
        Ok(count) => println!("Vector index ({}): {} embeddings", vectors.name(), count),
        Err(e) => println!("Vector index ({}): {}", vectors.name(), e),
    }

    Ok(())
}

fn cmd_list(service: &ConversationService, owner: &str, include_discarded: bool) -> Result<()> {
    let conversations = service.repository().list(owner, include_discarded)?;

    if conversations.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<9}  {:<22}  {}",
        "CONVERSATION ID", "LEVEL", "CREATED AT", "TITLE"
    );
    println!("{}", "-".repeat(100));

    for loaded in &conversations {
        let convo = &loaded.conversation;
        let mut title = convo.structured.title.chars().take(30).collect::<String>();
        if title.is_empty() {
            title = "-".to_string();
        }
        if convo.discarded {
            title.push_str(" (discarded)");
        }
        if let Some(anomaly) = loaded.anomaly {
            title.push_str(&format!(" [undecoded: {}]", anomaly));
        }
        println!(
            "{:<36}  {:<9}  {:<22}  {}",
            convo.id,
            convo.protection_level,
            created_label(convo.created_at),
            title
        );
    }

    println!("\nTotal: {} conversations", conversations.len());
    Ok(())
}

fn cmd_show(service: &ConversationService, owner: &str, id: &str) -> Result<()> {
    let loaded = service.repository().require(owner, id)?;
    let convo = &loaded.conversation;

    println!("=== {} ===", convo.id);
    println!("Title:      {}", convo.structured.title);
    println!("Created:    {}", created_label(convo.created_at));
    println!("Protection: {}", convo.protection_level);
    if let Some(anomaly) = loaded.anomaly {
        println!("WARNING:    transcript passed through undecoded ({})", anomaly);
    }
    if !convo.structured.overview.is_empty() {
        println!("\n{}", convo.structured.overview);
    }
    println!();

    for segment in &convo.transcript_segments {
        let who = if segment.is_user {
            "user".to_string()
        } else {
            segment.person_id.clone().unwrap_or_else(|| segment.speaker.clone())
        };
        println!(
            "[{:>7.1}s - {:>7.1}s] {:<14} {}",
            segment.start, segment.end, who, segment.text
        );
    }

    Ok(())
}

async fn cmd_search(service: &ConversationService, request: &SearchRequest) -> Result<()> {
    let report = service.planner().search_detailed(request).await?;

    if report.fallback_used {
        println!("No match on structured filters, showing similarity results.\n");
    }
    if report.candidates.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    println!("{:<36}  {:>10}  {:>7}  {}", "CONVERSATION ID", "SIMILARITY", "OVERLAP", "TITLE");
    println!("{}", "-".repeat(90));

    for candidate in &report.candidates {
        let title = service
            .repository()
            .load(&request.owner_id, &candidate.conversation_id)?
            .map(|l| l.conversation.structured.title)
            .unwrap_or_else(|| "(missing record)".to_string());
        println!(
            "{:<36}  {:>10.4}  {:>7}  {}",
            candidate.conversation_id, candidate.similarity, candidate.overlap, title
        );
    }

    Ok(())
}

async fn cmd_classify(
    service: &ConversationService,
    config: &CoreConfig,
    owner: &str,
    audio: &Path,
    segments: &Path,
    people: &[String],
) -> Result<()> {
    let audio_bytes = std::fs::read(audio)
        .with_context(|| format!("Failed to read audio file {}", audio.display()))?;
    let segments_json = std::fs::read_to_string(segments)
        .with_context(|| format!("Failed to read segments file {}", segments.display()))?;
    let mut conversation = convo_core::Conversation::new(
        owner,
        serde_json::from_str::<Vec<TranscriptSegment>>(&segments_json)
            .context("Segments file is not a JSON array of transcript segments")?,
    );

    let store = FsAudioStore::new(&config.audio_root);
    let references = load_voice_references(&store, owner, people).await?;
    println!("Loaded {} voice references", references.len());

    let model = SharedSpeakerModel::spectral();
    let verifier = ModelVerifier::from_shared(&model, config.speaker_threshold).await?;
    let mut classifier = SpeakerClassifier::new(Arc::new(verifier));
    if let Some(workers) = config.scoring_workers {
        classifier = classifier.with_workers(workers);
    }

    service
        .attribute_speakers(&classifier, &audio_bytes, &references, &mut conversation)
        .await?;

    println!("{}", serde_json::to_string_pretty(&conversation.transcript_segments)?);
    Ok(())
}

fn cmd_protect(service: &ConversationService, owner: &str, id: &str, level: &str) -> Result<()> {
    let level: ProtectionLevel = level.parse()?;
    if service.repository().set_protection_level(owner, id, level)? {
        println!("Conversation {} is now {}", id, level);
    } else {
        println!("Conversation {} not found.", id);
    }
    Ok(())
}

async fn cmd_delete(service: &ConversationService, owner: &str, id: &str) -> Result<()> {
    if service.delete(owner, id).await? {
        println!("Deleted conversation {}", id);
    } else {
        println!("Conversation {} not found (embedding cleanup still ran).", id);
    }
    Ok(())
}

fn cmd_export(service: &ConversationService, owner: &str) -> Result<()> {
    let conversations: Vec<_> = service
        .repository()
        .list(owner, true)?
        .into_iter()
        .map(|l| {
            serde_json::json!({
                "conversation": l.conversation,
                "undecoded": l.anomaly.map(|a| a.to_string()),
            })
        })
        .collect();

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "owner_id": owner,
        "codec_diagnostics": service.repository().codec().diagnostics(),
        "conversations": conversations,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_label() {
        assert_eq!(created_label(0), "1970-01-01 00:00 UTC");
        assert_eq!(created_label(1_700_000_000), "2023-11-14 22:13 UTC");
        assert_eq!(created_label(i64::MAX), format!("@{}", i64::MAX));
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time(None).unwrap(), None);

        let parsed = parse_time(Some("2024-03-01T12:00:00+02:00")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let err = parse_time(Some("yesterday")).unwrap_err();
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_cli_parses_search_filters() {
        let cli = Cli::try_parse_from([
            "convo-admin",
            "search",
            "--owner",
            "uid-1",
            "--query",
            "football",
            "--topic",
            "sports",
            "--topic",
            "weekend",
            "--since",
            "2024-01-01T00:00:00Z",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                owner,
                topics,
                since,
                limit,
                ..
            } => {
                assert_eq!(owner, "uid-1");
                assert_eq!(topics, vec!["sports", "weekend"]);
                assert_eq!(since.as_deref(), Some("2024-01-01T00:00:00Z"));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected search command"),
        }
    }
}
