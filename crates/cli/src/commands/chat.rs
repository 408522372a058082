use std::io::{self, BufRead, Write};
use std::sync::Arc;

use rebook_agent::{build_extractor, AgentRuntime, KnowledgeBase, TurnRequest};
use rebook_core::audit::TracingAuditSink;
use rebook_core::clock::{Clock, FixedClock, SystemClock};
use rebook_core::config::AppConfig;
use rebook_core::fees::BookingPolicy;
use rebook_db::{DbPool, ReservationEngine, ReservationSeedDataset, SqlReservationStore};

use crate::commands::{init_logging, migrated_pool, prepare, CommandResult, StepError};

const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub thread_id: String,
    /// Runs a single turn instead of reading stdin.
    pub message: Option<String>,
    /// Loads the demo reservations before the first turn.
    pub seed: bool,
}

pub fn run(options: ChatOptions) -> CommandResult {
    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    init_logging(&config);

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        if options.seed {
            ReservationSeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        }
        let agent = build_runtime(&config, pool.clone())?;

        let outcome: Result<ChatOutcome, StepError> = match &options.message {
            Some(message) => {
                let reply = agent
                    .handle_turn(TurnRequest::text(options.thread_id.clone(), message.clone()))
                    .await;
                Ok(ChatOutcome::Single(reply.reply))
            }
            None => interactive(&agent, &options.thread_id).await.map(ChatOutcome::Session),
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(ChatOutcome::Single(reply)) => CommandResult::success("chat", reply),
        Ok(ChatOutcome::Session(turns)) => CommandResult::success(
            "chat",
            format!("chat session on thread `{}` ended after {turns} turns", options.thread_id),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

enum ChatOutcome {
    Single(String),
    Session(usize),
}

fn build_runtime(
    config: &AppConfig,
    pool: DbPool,
) -> Result<AgentRuntime<SqlReservationStore>, StepError> {
    let clock: Arc<dyn Clock> = match config.booking.reference_time {
        Some(now) => Arc::new(FixedClock(now)),
        None => Arc::new(SystemClock),
    };

    let engine = ReservationEngine::new(
        SqlReservationStore::new(pool),
        BookingPolicy::from(&config.booking),
        clock.clone(),
    )
    .with_audit_sink(Arc::new(TracingAuditSink));
    let extractor = build_extractor(&config.llm, clock)
        .map_err(|error| ("extractor_setup", error.to_string(), 7u8))?;
    let knowledge_base = KnowledgeBase::from_config(&config.faq)
        .map_err(|error| ("knowledge_base", error.to_string(), 7u8))?;

    Ok(AgentRuntime::new(Arc::new(engine), extractor, Arc::new(knowledge_base))
        .with_audit_sink(Arc::new(TracingAuditSink)))
}

/// Reads one turn per line until EOF or an exit word. Returns the number of turns handled.
async fn interactive(
    agent: &AgentRuntime<SqlReservationStore>,
    thread_id: &str,
) -> Result<usize, StepError> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut turns = 0;

    write_prompt(&mut stdout, "Type a message (`exit` to leave).\nyou> ")?;
    for line in stdin.lock().lines() {
        let line = line.map_err(|error| ("io", error.to_string(), 8u8))?;
        let message = line.trim();
        if EXIT_WORDS.contains(&message.to_ascii_lowercase().as_str()) {
            break;
        }
        if message.is_empty() {
            write_prompt(&mut stdout, "you> ")?;
            continue;
        }

        let reply = agent.handle_turn(TurnRequest::text(thread_id, message)).await;
        turns += 1;
        write_prompt(&mut stdout, &format!("\nrebook> {}\n\nyou> ", reply.reply))?;
    }
    write_prompt(&mut stdout, "\n")?;

    Ok(turns)
}

fn write_prompt(stdout: &mut io::Stdout, text: &str) -> Result<(), StepError> {
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|error| ("io", error.to_string(), 8u8))
}
