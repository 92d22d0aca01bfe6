//! Inquest
//!
//! Command-line research runs and an HTTP API over the research service.

mod api;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquest_core::skills::RadkitGenerator;
use inquest_core::state::{narrate, restore, DocumentStore, FinalAnswer, ResearchDb};
use inquest_core::swarm::{
    EventReceiver, ResearchDeps, ResearchEvent, ResearchEventKind, ResearchService, RunOutcome,
    SessionHandle,
};
use inquest_core::tools::SearxngRetriever;
use inquest_core::ResearchConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Inquest - autonomous research with cited answers")]
struct Args {
    /// JSON config file; INQUEST_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Research an objective and print the final answer
    Run {
        /// What the research should find out
        objective: String,
        /// A condition the final answer must address (repeatable)
        #[arg(short = 'c', long = "criterion")]
        criteria: Vec<String>,
    },
    /// Continue a stopped session
    Resume { session: String },
    /// Print a stored session as a timeline
    Show {
        session: String,
        /// Dump the raw document instead
        #[arg(long)]
        json: bool,
    },
    /// List stored sessions
    Sessions,
    /// Start the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn open_store(config: &ResearchConfig) -> Result<Arc<ResearchDb>> {
    let db = ResearchDb::open_at(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    Ok(Arc::new(db))
}

fn build_service(config: ResearchConfig) -> Result<Arc<ResearchService>> {
    let store = open_store(&config)?;
    store.check().context("Research database is not usable")?;

    let retriever = SearxngRetriever::new(config.searxng_url.as_deref())?;
    let generator = RadkitGenerator::new(&config);
    generator.check()?;

    let deps = ResearchDeps {
        retriever: Arc::new(retriever),
        generator: Arc::new(generator),
        store,
    };
    Ok(Arc::new(ResearchService::new(deps, config)))
}

/// One line for the events worth showing on a terminal
fn describe(event: &ResearchEvent) -> Option<String> {
    let field = |key: &str| {
        event
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    let question = event.question_id.as_deref().unwrap_or("-");

    let line = match event.kind {
        ResearchEventKind::ResearchStarted => "research started".to_string(),
        ResearchEventKind::ResearchResumed => "research resumed".to_string(),
        ResearchEventKind::QuestionAdded => {
            format!("+ [{}] {}", question, field("question"))
        }
        ResearchEventKind::SearchIssued => format!("  [{}] search: {}", question, field("query")),
        ResearchEventKind::Reflected => format!(
            "  [{}] {} ({})",
            question,
            field("thought"),
            field("delta")
        ),
        ResearchEventKind::QuestionCompleted => format!(
            "✓ [{}] {} / {} confidence",
            question,
            field("recommendation"),
            field("confidence")
        ),
        ResearchEventKind::DecisionMade => format!("→ planner: {}", field("action")),
        ResearchEventKind::SynthesisStarted => "synthesizing final answer".to_string(),
        ResearchEventKind::ResearchStopped => "research stopped".to_string(),
        ResearchEventKind::EditRejected => format!("! rejected edit: {}", field("error")),
        _ => return None,
    };
    Some(line)
}

fn print_answer(answer: &FinalAnswer) {
    println!("\n{}\n", answer.answer);
    println!("Confidence: {}", answer.confidence.as_str());
    for criterion in &answer.criteria {
        let mark = if criterion.addressed { "✓" } else { "✗" };
        println!("  {} {}", mark, criterion.criterion);
    }
    if !answer.limitations.is_empty() {
        println!("Limitations:");
        for limitation in &answer.limitations {
            println!("  - {}", limitation);
        }
    }
}

/// Print events until the run ends; Ctrl+C stops it after in-flight cycles
async fn follow(
    service: &ResearchService,
    handle: SessionHandle,
    mut events: EventReceiver,
) -> Result<RunOutcome> {
    println!("Session {}", handle.session_id);

    let stopper = handle.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing in-flight cycles before stopping");
            stopper.stop();
        }
    });
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe(&event) {
                println!("{}", line);
            }
        }
    });

    let outcome = service.wait(&handle.session_id).await;
    interrupt.abort();
    let _ = printer.await;
    let outcome = outcome?;

    match outcome.final_answer() {
        Some(answer) => print_answer(answer),
        None => println!(
            "\nStopped after {} steps. Continue with: inquest resume {}",
            outcome.steps, outcome.session_id
        ),
    }
    Ok(outcome)
}

async fn serve(service: Arc<ResearchService>, port: u16) -> Result<()> {
    let state = Arc::new(api::AppState::new(service));
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Inquest API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inquest=info,inquest_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = ResearchConfig::load(args.config.as_deref())?;

    match args.command {
        CliCommand::Run {
            objective,
            criteria,
        } => {
            let service = build_service(config)?;
            let (handle, events) = service.start_research(&objective, criteria).await?;
            follow(&service, handle, events).await?;
        }
        CliCommand::Resume { session } => {
            let service = build_service(config)?;
            let (handle, events) = service.resume(&session).await?;
            follow(&service, handle, events).await?;
        }
        CliCommand::Show { session, json } => {
            let store = open_store(&config)?;
            let doc = restore(store.as_ref(), &session)?
                .with_context(|| format!("No stored session `{}`", session))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print!("{}", narrate(&doc));
            }
        }
        CliCommand::Sessions => {
            let store = open_store(&config)?;
            for session in store.list()? {
                println!(
                    "{}  rev {}  {}",
                    session.session_id,
                    session.revision,
                    session.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        CliCommand::Serve { port } => {
            let service = build_service(config)?;
            serve(service, port).await?;
        }
    }
    Ok(())
}
