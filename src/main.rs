use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cartograph_agent::{ChatMessage, ChatResponse, GraphAgent, GraphOverview, LlmClient, NodeContext};
use cartograph_core::{AmbiguityPolicy, CartographConfig, CodeGraph, OutputFormat};
use cartograph_graph::index::GraphIndex;
use cartograph_graph::{GraphService, RepoSource};
use cartograph_impact::{ImpactResult, RiskLevel};
use cartograph_search::{CodeSearchEngine, SearchResult};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cartograph",
    version,
    about = "Code knowledge graph engine",
    long_about = "Cartograph turns a repository into a code knowledge graph: symbols, calls,\n\
                   imports and inheritance with confidence scores, clustered into communities\n\
                   and traced into execution flows.\n\n\
                   Examples:\n  \
                     cartograph build --path .                      Build and summarize the local repo\n  \
                     cartograph search 'session store' --limit 5    Hybrid keyword search\n  \
                     cartograph context 'function:src/auth.ts::login'  Callers, callees, flows\n  \
                     cartograph impact 'class:src/db.ts::Pool'      Blast radius of a change\n  \
                     cartograph chat 'How does login work?' --repo octocat/hello-world\n  \
                     cartograph mcp --path .                        Serve the graph over MCP"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .cartograph.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable tables and summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose (debug) logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

/// Which repository to analyze.
#[derive(Args, Clone)]
struct SourceArgs {
    /// GitHub repository (format: owner/repo or owner/repo@branch)
    #[arg(
        long,
        conflicts_with = "path",
        long_help = "GitHub repository to analyze.\n\nFormat: owner/repo or owner/repo@branch.\n\
            Uses the default branch when none is given. Set GITHUB_TOKEN for private\n\
            repositories and higher rate limits."
    )]
    repo: Option<String>,

    /// Local repository path (default: current directory)
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Maximum number of source files to parse
    #[arg(long)]
    max_files: Option<usize>,

    /// How call sites matching several global symbols are resolved
    #[arg(long)]
    ambiguity: Option<AmbiguityArg>,
}

impl SourceArgs {
    fn source(&self) -> Result<RepoSource> {
        match &self.repo {
            Some(reference) => Ok(RepoSource::github(reference)?),
            None => Ok(RepoSource::Local(self.path.clone())),
        }
    }

    fn apply(&self, config: &mut CartographConfig) {
        if let Some(max_files) = self.max_files {
            config.build.max_files = max_files;
        }
        if let Some(ambiguity) = self.ambiguity {
            config.build.ambiguity = ambiguity.into();
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build the code graph and print a summary
    #[command(long_about = "Build the code graph and print a summary.\n\n\
        Parses TypeScript, JavaScript and Python sources, resolves imports and calls\n\
        into confidence-scored edges, detects communities (Louvain) and execution flows.\n\
        JSON output is the full graph.\n\n\
        Examples:\n  cartograph build --path .\n  cartograph build --repo octocat/hello-world --format json > graph.json")]
    Build {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Search symbols and files
    #[command(long_about = "Search symbols and files in the graph.\n\n\
        Hybrid mode fuses BM25 keyword ranking with term-overlap ranking using\n\
        Reciprocal Rank Fusion. Each mode can also be run on its own.\n\n\
        Examples:\n  cartograph search 'login handler'\n  cartograph search session --mode bm25 --limit 20")]
    Search {
        /// Search query
        query: String,

        /// Maximum results to return (default: 10)
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Ranking mode
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,

        #[command(flatten)]
        source: SourceArgs,
    },
    /// Show callers, callees, community, flows and imports of a node
    #[command(long_about = "Show everything the graph knows about one node.\n\n\
        Node ids look like `function:src/auth.ts::login` or `file:src/auth.ts`;\n\
        find them with `cartograph search`.\n\n\
        Example:\n  cartograph context 'function:src/auth.ts::login'")]
    Context {
        /// Node id
        node_id: String,

        #[command(flatten)]
        source: SourceArgs,
    },
    /// Compute the blast radius of changing symbols
    #[command(long_about = "Compute the blast radius of changing one or more symbols.\n\n\
        Walks reverse calls/imports/extends edges to depth 3 and rates risk by the\n\
        number of direct dependents: >10 CRITICAL, >5 HIGH, >2 MEDIUM, else LOW.\n\n\
        Examples:\n  cartograph impact 'function:src/db.ts::save'\n  cartograph impact 'class:src/a.ts::A' 'class:src/b.ts::B' --fail-on high")]
    Impact {
        /// Changed symbol ids
        #[arg(required = true)]
        symbol_ids: Vec<String>,

        /// Exit with non-zero code if the risk is at or above this level
        #[arg(long)]
        fail_on: Option<RiskArg>,

        #[command(flatten)]
        source: SourceArgs,
    },
    /// Summarize the repository graph
    Overview {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Ask a question answered by an LLM using graph tools
    #[command(long_about = "Ask a natural-language question about the repository.\n\n\
        An OpenAI-compatible model answers by calling the search, context, impact and\n\
        overview tools against the graph, for a bounded number of rounds.\n\
        Requires OPENAI_API_KEY or [llm] api_key in .cartograph.toml.\n\n\
        Example:\n  cartograph chat 'What would break if I change the session store?'")]
    Chat {
        /// Question to ask
        question: String,

        /// Print every tool call the model made
        #[arg(long)]
        show_trace: bool,

        #[command(flatten)]
        source: SourceArgs,
    },
    /// Start the MCP server for IDE integration
    #[command(
        long_about = "Start the MCP (Model Context Protocol) server for IDE integration.\n\n\
        Exposes search_graph, node_context, impact_analysis and graph_overview over\n\
        stdio transport. The graph is built on the first tool call and cached.\n\n\
        Example:\n  cartograph mcp --path /my/project"
    )]
    Mcp {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Create a default .cartograph.toml configuration file
    #[command(long_about = "Create a default .cartograph.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .cartograph.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AmbiguityArg {
    /// Pick the first candidate by id
    FirstMatch,
    /// One low-confidence edge per candidate
    SplitAll,
}

impl From<AmbiguityArg> for AmbiguityPolicy {
    fn from(arg: AmbiguityArg) -> Self {
        match arg {
            AmbiguityArg::FirstMatch => AmbiguityPolicy::FirstMatch,
            AmbiguityArg::SplitAll => AmbiguityPolicy::SplitAll,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    /// BM25 and term overlap fused with RRF
    Hybrid,
    /// BM25 keyword ranking only
    Bm25,
    /// Term-overlap ranking only
    Semantic,
}

#[derive(Clone, Copy, ValueEnum)]
enum RiskArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<RiskArg> for RiskLevel {
    fn from(arg: RiskArg) -> Self {
        match arg {
            RiskArg::Low => RiskLevel::Low,
            RiskArg::Medium => RiskLevel::Medium,
            RiskArg::High => RiskLevel::High,
            RiskArg::Critical => RiskLevel::Critical,
        }
    }
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    let commands = [
        ("build", "Build the graph and print a summary"),
        ("search", "Hybrid BM25 + term-overlap search"),
        ("context", "Callers, callees, community and flows of a node"),
        ("impact", "Blast radius and risk level of a change"),
        ("overview", "Communities, flows and most-called symbols"),
        ("chat", "Ask an LLM that explores the graph with tools"),
        ("mcp", "Start MCP server for IDE integration"),
        ("init", "Create default configuration"),
    ];

    if use_color {
        println!("\x1b[1m\x1b[36m◆\x1b[0m \x1b[1mcartograph\x1b[0m v{version} - a map of your code\n");
        println!("Quick start:");
        println!("  \x1b[36mcartograph init\x1b[0m               Create a .cartograph.toml config file");
        println!("  \x1b[36mcartograph build --path .\x1b[0m     Build the graph for this directory");
        println!("  \x1b[36mcartograph search <query>\x1b[0m     Find symbols\n");
        println!("All commands:");
        for (name, about) in commands {
            println!("  \x1b[32m{name:<9}\x1b[0m {about}");
        }
    } else {
        println!("cartograph v{version} - a map of your code\n");
        println!("Quick start:");
        println!("  cartograph init               Create a .cartograph.toml config file");
        println!("  cartograph build --path .     Build the graph for this directory");
        println!("  cartograph search <query>     Find symbols\n");
        println!("All commands:");
        for (name, about) in commands {
            println!("  {name:<9} {about}");
        }
    }

    println!("\nRun 'cartograph <command> --help' for details.");
}

fn init_tracing(verbose: bool, use_color: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(use_color)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CartographConfig> {
    let config = match path {
        Some(path) => CartographConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".cartograph.toml");
            if default_path.exists() {
                CartographConfig::from_file(default_path)?
            } else {
                CartographConfig::default()
            }
        }
    };
    Ok(config.with_env())
}

fn spinner(message: String) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

async fn load_graph(
    source: &RepoSource,
    config: &CartographConfig,
    cancel: &CancellationToken,
) -> Result<Arc<CodeGraph>> {
    let service = GraphService::for_source(source, config)?;
    let credential = source.credential(config);
    let label = format!("{}/{}", source.owner(), source.repo());

    let pb = spinner(format!("Building graph for {label}..."));
    let result = service.graph_for(source, &credential, cancel).await;
    if let Some(pb) = pb {
        match &result {
            Ok(graph) => pb.finish_with_message(format!(
                "Built {label}: {} nodes, {} edges",
                graph.nodes.len(),
                graph.edges.len()
            )),
            Err(_) => pb.finish_with_message("Failed"),
        }
    }
    Ok(result?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_build_text(graph: &CodeGraph) {
    let stats = graph.stats();
    println!("{} @ {}", graph.repo_key(), graph.branch);
    println!(
        "  {} nodes, {} edges, {} communities, {} execution flows",
        stats.total_nodes, stats.total_edges, stats.communities, stats.processes
    );
    for (kind, count) in &stats.nodes_by_type {
        println!("  {:<10} {count:>6}", kind.as_str());
    }
    for (kind, count) in &stats.edges_by_type {
        println!("  {:<10} {count:>6}  (edges)", kind.as_str());
    }
    if !stats.languages.is_empty() {
        let langs: Vec<String> = stats
            .languages
            .iter()
            .map(|(lang, count)| format!("{lang} ({count})"))
            .collect();
        println!("  languages: {}", langs.join(", "));
    }
}

fn print_search_text(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No matches.");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        let node = &result.node;
        let location = match node.line_start {
            Some(line) => format!("{}:{line}", node.file_path),
            None => node.file_path.clone(),
        };
        println!(
            "{:>2}. {:.4}  {:<9} {}  {location}",
            i + 1,
            result.score,
            node.node_type.to_string(),
            node.label
        );
        println!("              {}", node.id);
    }
}

fn print_context_text(context: &NodeContext) {
    let node = &context.node;
    println!("{} ({})", node.label, node.node_type);
    println!("  id:        {}", node.id);
    println!("  file:      {}", node.file_path);
    if let Some(community) = &context.community {
        println!(
            "  community: {} ({} symbols, cohesion {:.2})",
            community.name, community.symbol_count, community.cohesion
        );
    }
    println!("\nCallers ({}):", context.callers.len());
    for n in &context.callers {
        println!("  {:.2}  {}  {}", n.confidence, n.label, n.file_path);
    }
    println!("\nCallees ({}):", context.callees.len());
    for n in &context.callees {
        println!("  {:.2}  {}  {}", n.confidence, n.label, n.file_path);
    }
    if !context.processes.is_empty() {
        println!("\nExecution flows ({}):", context.processes.len());
        for p in &context.processes {
            println!("  {} ({} steps)", p.name, p.step_count);
        }
    }
    if !context.imports.is_empty() {
        println!("\nImports: {}", context.imports.join(", "));
    }
    if !context.imported_by.is_empty() {
        println!("Imported by: {}", context.imported_by.join(", "));
    }
}

fn print_impact_text(result: &ImpactResult) {
    println!("Risk: {}", result.risk_level);
    for id in &result.unknown {
        println!("  warning: {id} is not in the graph");
    }
    let tiers = [
        ("Depth 1", &result.depth1),
        ("Depth 2", &result.depth2),
        ("Depth 3", &result.depth3),
    ];
    for (title, nodes) in tiers {
        println!("\n{title} ({}):", nodes.len());
        for n in nodes.iter() {
            println!("  {:<9} {}  {}  via {}", n.node_type.to_string(), n.label, n.file_path, n.via);
        }
    }
    if !result.affected_processes.is_empty() {
        println!("\nAffected flows ({}):", result.affected_processes.len());
        for p in &result.affected_processes {
            println!("  {}", p.name);
        }
    }
}

fn print_chat(response: &ChatResponse, format: OutputFormat, show_trace: bool) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(response);
    }
    if show_trace {
        for t in &response.tool_calls {
            let marker = if t.is_error { " (error)" } else { "" };
            eprintln!("[round {}] {} {}{marker}", t.round, t.name, t.arguments);
        }
        if !response.tool_calls.is_empty() {
            eprintln!();
        }
    }
    println!("{}", response.message.content);
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Cartograph Configuration
# Values shown are the defaults. CLI flags and environment variables override this file.

[build]
# max_files = 150
# max_file_size = 51200
# concurrency = 5
# noise_dirs = ["node_modules", "dist", "build", ".git", ".next", "out", "coverage", "__pycache__", ".venv", "venv", "vendor", "target"]
# skip_patterns = ["*.test.ts", "**/fixtures/**"]
# ambiguity = "first_match"   # or "split_all"
# fetch_timeout_secs = 30
# fetch_retries = 2

[cache]
# ttl_secs = 1800
# capacity = 20

[search]
# bm25_k1 = 1.2
# bm25_b = 0.75
# rrf_k = 60

[agent]
# max_rounds = 5
# max_tokens = 2048
# timeout_secs = 120

[llm]
# OpenAI-compatible endpoint; api_key falls back to OPENAI_API_KEY
# provider = "openai"
# model = "gpt-4o"
# base_url = "https://api.openai.com"

[github]
# token falls back to GITHUB_TOKEN
# api_url = "https://api.github.com"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };
    init_tracing(cli.verbose, use_color);

    let mut config = load_config(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        None => {
            print_welcome(use_color);
            return Ok(());
        }
        Some(Command::Build { ref source }) => {
            source.apply(&mut config);
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            match cli.format {
                OutputFormat::Json => print_json(graph.as_ref())?,
                OutputFormat::Markdown => print!("{}", GraphOverview::build(&graph).to_markdown()),
                OutputFormat::Text => print_build_text(&graph),
            }
        }
        Some(Command::Search {
            ref query,
            limit,
            mode,
            ref source,
        }) => {
            source.apply(&mut config);
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            let engine = CodeSearchEngine::new(&graph, &config.search);
            let results = match mode {
                SearchMode::Hybrid => engine.search(query, limit),
                SearchMode::Bm25 => engine.search_bm25(query, limit),
                SearchMode::Semantic => engine.search_semantic(query, limit),
            };
            match cli.format {
                OutputFormat::Json => print_json(&results)?,
                OutputFormat::Markdown => {
                    print!("{}", cartograph_search::search::format_markdown(query, &results))
                }
                OutputFormat::Text => print_search_text(&results),
            }
        }
        Some(Command::Context {
            ref node_id,
            ref source,
        }) => {
            source.apply(&mut config);
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            let index = GraphIndex::from_graph(&graph);
            let context = NodeContext::build(&graph, &index, node_id)?;
            match cli.format {
                OutputFormat::Json => print_json(&context)?,
                OutputFormat::Markdown => print!("{}", context.to_markdown()),
                OutputFormat::Text => print_context_text(&context),
            }
        }
        Some(Command::Impact {
            ref symbol_ids,
            fail_on,
            ref source,
        }) => {
            source.apply(&mut config);
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            let result = cartograph_impact::analyze_graph(symbol_ids, &graph);
            match cli.format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Markdown => print!("{}", cartograph_impact::format_markdown(&result)),
                OutputFormat::Text => print_impact_text(&result),
            }
            if let Some(threshold) = fail_on {
                if result.risk_level >= RiskLevel::from(threshold) {
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Overview { ref source }) => {
            source.apply(&mut config);
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            let overview = GraphOverview::build(&graph);
            match cli.format {
                OutputFormat::Json => print_json(&overview)?,
                OutputFormat::Markdown | OutputFormat::Text => print!("{}", overview.to_markdown()),
            }
        }
        Some(Command::Chat {
            ref question,
            show_trace,
            ref source,
        }) => {
            source.apply(&mut config);
            if config.llm.api_key.is_none() && config.llm.base_url.is_none() {
                return Err(miette::miette!(
                    help = "Set OPENAI_API_KEY or add api_key (or a local base_url) under [llm] in .cartograph.toml",
                    "No API key configured for LLM provider '{}'",
                    config.llm.provider
                ));
            }
            let graph = load_graph(&source.source()?, &config, &cancel).await?;
            let engine = CodeSearchEngine::new(&graph, &config.search);
            let model = LlmClient::new(&config.llm, Duration::from_secs(config.agent.timeout_secs))?;
            let agent = GraphAgent::new(model, config.agent.clone());

            let pb = spinner("Thinking...".to_string());
            let response = agent
                .chat(vec![ChatMessage::user(question.clone())], &graph, &engine, &cancel)
                .await;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            print_chat(&response?, cli.format, show_trace)?;
        }
        Some(Command::Mcp { ref source }) => {
            source.apply(&mut config);
            cartograph_mcp::server::run_server(config, source.source()?).await?;
        }
        Some(Command::Init) => {
            let path = Path::new(".cartograph.toml");
            if path.exists() {
                miette::bail!(".cartograph.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .cartograph.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "cartograph", &mut std::io::stdout());
        }
    }

    Ok(())
}
