//! canvass - conversational survey builder and interviewer

mod config;

use std::io::{BufRead, Write as _};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use canvass_ai::{
    ChatProvider, FallbackClient, GoogleProvider, OpenAiProvider, StructuredClient,
};
use canvass_flow::{
    InitData, MemoryStore, Orchestrator, PromptStore, StateStore, Topic, TurnOutcome,
    interview_workflow, theme_workflow,
};

use config::Config;

/// canvass - build a survey from a company URL, then run the interview
#[derive(Parser, Debug)]
#[command(name = "canvass")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Survey title
    #[arg(short, long)]
    title: Option<String>,

    /// What the survey should find out
    #[arg(short, long)]
    goal: Option<String>,

    /// Company URL to research
    #[arg(short, long)]
    url: Option<String>,

    /// Prompt template overrides (TOML file)
    #[arg(long)]
    prompts: Option<String>,

    /// Primary model override
    #[arg(short, long)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.init_config {
        let path = Config::init().context("failed to write config file")?;
        println!("Config file: {}", path.display());
        println!("\nExample configuration:\n{}", config::example_config());
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(model) = &args.model {
        config.model = model.clone();
    }

    run(args, config).await
}

async fn run(args: Args, config: Config) -> Result<()> {
    let prompts = match args.prompts.as_deref().or(config.prompts_file.as_deref()) {
        Some(path) => PromptStore::load(path)?,
        None => PromptStore::defaults(),
    };

    let openai_key = config
        .get_api_key("openai")
        .context("OPENAI_API_KEY is not set (or add it to the config file)")?;
    let google_key = config.get_api_key("google");

    let openai = |model: &str| {
        let provider = OpenAiProvider::new(&openai_key, model);
        match &config.openai_base_url {
            Some(url) => provider.with_base_url(url),
            None => provider,
        }
    };
    let google = |key: &str, model: &str| {
        let provider = GoogleProvider::new(key, model);
        match &config.google_base_url {
            Some(url) => provider.with_base_url(url),
            None => provider,
        }
    };

    let primary: Arc<dyn ChatProvider> = Arc::new(openai(&config.model));
    let fixer: Arc<dyn ChatProvider> = Arc::new(openai(&config.repair_model));

    let secondary: Option<Arc<dyn ChatProvider>> = google_key
        .as_ref()
        .map(|key| Arc::new(google(key, &config.fallback_model)) as _);
    // Research needs web grounding; without a Google key the primary model
    // answers from its own knowledge.
    let research: Arc<dyn ChatProvider> = match &google_key {
        Some(key) => Arc::new(google(key, &config.research_model)),
        None => primary.clone(),
    };

    let make_client = || {
        let mut client = FallbackClient::new(primary.clone());
        if let Some(secondary) = &secondary {
            client = client.with_fallback(secondary.clone());
        }
        client
    };
    let make_structured = || StructuredClient::new(make_client(), fixer.clone());

    let theme_store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let interview_store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());

    let theme = theme_workflow(
        research,
        make_structured(),
        prompts.clone(),
        theme_store.clone(),
    )?;
    let interview = interview_workflow(
        Arc::new(make_client()),
        make_structured(),
        prompts,
        interview_store.clone(),
    )?;
    let orchestrator = Orchestrator::new(theme, theme_store, interview, interview_store);

    let title = args.title.unwrap_or_else(|| "Customer survey".to_string());
    let goal = args
        .goal
        .context("--goal is required: what should the survey find out?")?;
    let url = args.url.context("--url is required: company URL to research")?;

    // Phase 1: generate and refine the topic list
    println!("Researching {} ...", url);
    let identity = orchestrator.init(InitData {
        title: title.clone(),
        goal: goal.clone(),
        source_url: url,
    })?;
    let mut outcome = orchestrator.theme_turn(&identity, "").await?;
    print_topics(&outcome);

    let stdin = std::io::stdin();
    println!("\nRefine the topics, or type /start to begin the interview (/quit to exit).");
    loop {
        let Some(line) = read_line(&stdin, "refine> ")? else {
            return Ok(());
        };
        match line.as_str() {
            "" => continue,
            "/quit" => return Ok(()),
            "/start" => break,
            feedback => match orchestrator.theme_turn(&identity, feedback).await {
                Ok(next) => {
                    outcome = next;
                    println!("\n{}\n", outcome.message);
                    print_topics(&outcome);
                }
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }

    // Phase 2: run the interview over the accepted topics
    let topics: Vec<Topic> = outcome.topics.iter().map(Topic::new).collect();
    let interview_id = uuid::Uuid::new_v4().to_string();
    orchestrator
        .begin_interview(&interview_id, &title, &goal, topics)
        .await?;

    let mut outcome = orchestrator.interview_turn(&interview_id, "").await?;
    println!("\n{}", outcome.message);

    while !outcome.survey_complete {
        let Some(line) = read_line(&stdin, "you> ")? else {
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            return Ok(());
        }
        match orchestrator.interview_turn(&interview_id, &line).await {
            Ok(next) => {
                outcome = next;
                println!("\n{}", outcome.message);
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}

fn print_topics(outcome: &TurnOutcome) {
    println!("Survey topics:");
    for (i, topic) in outcome.topics.iter().enumerate() {
        println!("  {}. {}", i + 1, topic);
    }
}

/// Prompt and read one trimmed line; `None` on EOF
fn read_line(stdin: &std::io::Stdin, prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    if stdin.lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
