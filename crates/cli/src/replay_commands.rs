use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Context as _,
    clap::Args,
    ferry_common::{DeliveryTarget, MessageSink, StreamEvent},
    ferry_config::FerryConfig,
    ferry_recovery::ErrorClassifier,
    ferry_sessions::{SessionStats, SessionStatus, SessionStore},
    ferry_stream::StreamCoordinator,
    ferry_throttle::{AdmissionQueue, RateLimitMetrics},
    serde::Serialize,
    tokio::{io::AsyncReadExt, sync::mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::console_sink::{ConsoleSink, ConsoleStats, FailureKind};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Text file to stream, or `-` for stdin.
    pub input: PathBuf,

    /// Channel name; selects `[channels.<name>]` admission settings.
    #[arg(long, default_value = "console")]
    pub channel: String,

    #[arg(long, default_value = "tty")]
    pub chat_id: String,

    #[arg(long, default_value = "replay")]
    pub owner: String,

    /// Characters per fragment.
    #[arg(long, default_value_t = 12)]
    pub chunk_chars: usize,

    /// Pause between fragments.
    #[arg(long, default_value_t = 80)]
    pub delay_ms: u64,

    /// Probability (0.0 - 1.0) that a sink call fails.
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    #[arg(long, value_enum, default_value_t = FailureKind::RateLimited)]
    pub failure_kind: FailureKind,

    /// Seed for failure injection; random when unset.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    status: SessionStatus,
    handle: Option<String>,
    total_chunks: u64,
    processed_chunks: u64,
    versions: u32,
    error_count: u32,
    retry_count: u32,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    session: Option<SessionSummary>,
    /// What the console message shows at the end.
    final_text: Option<String>,
    admission: RateLimitMetrics,
    sessions: SessionStats,
    sink: ConsoleStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Split `text` into fragments of at most `chunk_chars` characters.
fn split_fragments(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|c| c.iter().collect())
        .collect()
}

async fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))
    }
}

pub async fn run(args: ReplayArgs, config: FerryConfig) -> anyhow::Result<()> {
    let text = read_input(&args.input).await?;
    let fragments = split_fragments(&text, args.chunk_chars);
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(
        fragments = fragments.len(),
        bytes = text.len(),
        channel = %args.channel,
        failure_rate = args.failure_rate,
        seed,
        "replay starting"
    );

    let store = Arc::new(SessionStore::new(config.sessions.clone()));
    let classifier = Arc::new(ErrorClassifier::new(config.recovery.clone()));
    let queue = Arc::new(AdmissionQueue::with_classifier(
        args.channel.clone(),
        config.admission_for(&args.channel).clone(),
        classifier.clone(),
    ));
    let sink = Arc::new(ConsoleSink::new(
        args.failure_rate,
        args.failure_kind,
        seed,
    ));
    let mut coordinator = StreamCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&sink) as Arc<dyn MessageSink>,
        config.streaming.clone(),
        DeliveryTarget::new(args.channel.clone(), args.chat_id.clone()),
        args.owner.clone(),
    )
    .with_classifier(classifier);
    coordinator.initialize(HashMap::from([(
        "source".to_owned(),
        serde_json::Value::from(args.input.display().to_string()),
    )]))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping replay");
            interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let delay = Duration::from_millis(args.delay_ms);
    let producer = tokio::spawn(async move {
        for fragment in fragments {
            if tx.send(StreamEvent::Delta(fragment)).await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
        }
        let _ = tx.send(StreamEvent::Done).await;
    });

    let outcome = coordinator.consume(rx, cancel).await;
    producer.abort();

    let session = coordinator
        .session_id()
        .and_then(|id| store.snapshot(id))
        .map(|snap| SessionSummary {
            id: snap.session.id,
            status: snap.session.status,
            handle: snap.session.handle.map(|h| h.0),
            total_chunks: snap.context.total_chunks,
            processed_chunks: snap.context.processed_chunks,
            versions: snap.context.current_version,
            error_count: snap.context.error_count,
            retry_count: snap.context.retry_count,
        });
    let report = ReplayReport {
        session,
        final_text: coordinator.handle().and_then(|h| sink.message(h)),
        admission: queue.metrics(),
        sessions: store.stats(),
        sink: sink.stats(),
        error: outcome.as_ref().err().map(ToString::to_string),
    };
    queue.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    outcome.context("replay did not complete")?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_char_boundaries() {
        assert_eq!(split_fragments("héllo wörld", 4), vec![
            "héll", "o wö", "rld"
        ]);
        assert_eq!(split_fragments("", 4), Vec::<String>::new());
        assert_eq!(split_fragments("ab", 0), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reads_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(read_input(&path).await.unwrap(), "hello");
        assert!(read_input(&dir.path().join("missing.txt")).await.is_err());
    }

    #[tokio::test]
    async fn replay_delivers_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.txt");
        std::fs::write(&path, "The quick brown fox jumps over the lazy dog.").unwrap();

        let args = ReplayArgs {
            input: path,
            channel: "console".into(),
            chat_id: "tty".into(),
            owner: "test".into(),
            chunk_chars: 5,
            delay_ms: 5,
            failure_rate: 0.0,
            failure_kind: FailureKind::Server,
            seed: Some(1),
        };
        run(args, FerryConfig::default()).await.unwrap();
    }
}
