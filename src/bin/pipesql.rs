//! pipesql: compile pipe-syntax SQL from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Compile a query
//! pipesql "FROM logs |> WHERE status >= 500 |> LIMIT 10"
//!
//! # As a CTE chain
//! pipesql "FROM t |> WHERE a |> AGGREGATE count(*) AS c GROUP BY k |> WHERE c > 1" --mode cte
//!
//! # Read the query from stdin
//! cat query.sql | pipesql
//! ```

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pipesql::ast::visit_pipe_nodes;
use pipesql::enrich::enrichment_queries;
use pipesql::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipesql")]
#[command(version)]
#[command(about = "Compile pipe-syntax SQL into plain SQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    pipesql 'FROM t |> WHERE b=9 |> WHERE c=10'
    pipesql 'FROM t |> AGGREGATE count(*) GROUP BY k' --mode cte
    pipesql tokens 'SELECT a FROM t' --format json
    pipesql explain 'FROM logs |> CALL TIMEBUCKET ts BY 1 hour AS bucket'")]
struct Cli {
    /// The query to compile (read from stdin when omitted)
    query: Option<String>,

    /// Output mode: nested or cte (overrides the config file)
    #[arg(short, long)]
    mode: Option<OutputMode>,

    /// Config file (default: <config dir>/pipesql/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database used to fill the enrichment table for CALL ENRICH_IP
    #[arg(long, env = "PIPESQL_DATABASE_URL")]
    database_url: Option<String>,

    /// JSON geolocation table used for enrichment
    #[arg(long)]
    geo: Option<PathBuf>,

    /// Fail when the query does not lex cleanly
    #[arg(long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the tokens of a query
    Tokens {
        /// The query to lex
        query: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show the grouped tree of a query and its SQL in both modes
    Explain {
        /// The query to explain
        query: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("pipesql={level}").parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = CompilerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    let compiler = Compiler::new(config)?;

    match &cli.command {
        Some(Commands::Tokens { query, format }) => show_tokens(&compiler, query, format),
        Some(Commands::Explain { query }) => explain_query(&compiler, query),
        None => {
            let Some(query) = read_query(cli.query.as_deref())? else {
                println!("{}", "pipesql: pipe-syntax SQL compiler".cyan().bold());
                println!();
                println!("Usage: pipesql <QUERY> [OPTIONS]");
                println!();
                println!("Try: pipesql --help");
                return Ok(());
            };
            compile_query(&compiler, &query, &cli).await
        }
    }
}

/// The query argument, or stdin when it is piped in.
fn read_query(arg: Option<&str>) -> anyhow::Result<Option<String>> {
    if let Some(query) = arg {
        return Ok(Some(query.to_string()));
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut query = String::new();
    stdin.read_to_string(&mut query).context("reading query from stdin")?;
    Ok(Some(query.trim_end().to_string()))
}

async fn compile_query(compiler: &Compiler, query: &str, cli: &Cli) -> anyhow::Result<()> {
    if cli.verbose {
        eprintln!("{} {}", "Input:".dimmed(), query.yellow());
        eprintln!("{} {}", "Mode:".dimmed(), compiler.config().mode);
    }

    if cli.strict {
        println!("{}", compiler.compile_strict(query)?);
        return Ok(());
    }

    let enrichment = &compiler.config().enrichment;
    let database_url = cli.database_url.clone().or_else(|| enrichment.database_url.clone());
    let needs_enrichment = !enrichment_queries(&compiler.parse(query), compiler).is_empty();

    let compilation = match database_url {
        Some(url) if needs_enrichment => {
            let geo = match cli.geo.as_ref().or(enrichment.geo_path.as_ref()) {
                Some(path) => GeoTable::load(path).with_context(|| format!("loading {}", path.display()))?,
                None => {
                    eprintln!("{}", "⚠ No geolocation table. Use --geo to resolve IP addresses".yellow());
                    GeoTable::new()
                }
            };
            let store = SqlEnrichmentStore::connect(&url, &enrichment.table).await?;
            store.ensure_table().await?;
            compiler.compile_with_enrichment(query, &store, &geo).await
        }
        _ => compiler.compile_detailed(query),
    };

    println!("{}", compilation.sql);

    if let Some(error) = &compilation.error {
        eprintln!(
            "{} input did not lex cleanly at position {}: {:?}",
            "⚠".yellow(),
            error.position,
            error.raw_value
        );
    }
    for name in &compilation.unknown_commands {
        eprintln!("{} unknown command {}", "⚠".yellow(), name.cyan());
    }
    if let Some(report) = &compilation.enrichment {
        if cli.verbose || report.failures > 0 {
            eprintln!(
                "{} {} queries, {} rows persisted, {} failures",
                "Enrichment:".dimmed(),
                report.queries,
                report.persisted,
                report.failures.to_string().red()
            );
        }
    }

    Ok(())
}

fn show_tokens(compiler: &Compiler, query: &str, format: &OutputFormat) -> anyhow::Result<()> {
    let tokens = pipesql::lexer::lex(query, compiler.rules());

    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = tokens
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "position": t.position,
                        "kind": t.kind.name,
                        "value": t.raw_value,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            let width = tokens.iter().map(|t| t.kind.name.len()).max().unwrap_or(0);
            println!(
                "{:>8} │ {:width$} │ {}",
                "Position".white().bold(),
                "Kind".white().bold(),
                "Value".white().bold()
            );
            println!("{}", format!("{}┼{}┼{}", "─".repeat(9), "─".repeat(width + 2), "─".repeat(20)).dimmed());
            for token in &tokens {
                let kind = format!("{:width$}", token.kind.name);
                let kind = if token.is(&pipesql::lexer::ERROR) { kind.red() } else { kind.cyan() };
                println!("{:>8} │ {} │ {:?}", token.position, kind, token.raw_value);
            }
            println!();
            println!("{} token(s)", tokens.len().to_string().cyan());
        }
    }

    Ok(())
}

fn explain_query(compiler: &Compiler, query: &str) -> anyhow::Result<()> {
    println!("{}", "pipesql Query Explanation".cyan().bold());
    println!();
    println!("{} {}", "Query:".dimmed(), query.yellow());
    println!();

    let tree = compiler.parse(query);
    println!("{}", "Tree:".green().bold());
    print_nodes(&tree, 1);

    let mut chains = 0;
    visit_pipe_nodes(&tree, &mut |_| chains += 1);
    println!();
    println!("{} {}", "Pipe chains:".dimmed(), chains.to_string().cyan());

    let nested = Compiler::new(CompilerConfig {
        mode: OutputMode::Nested,
        ..compiler.config().clone()
    })?;
    let cte = Compiler::new(CompilerConfig {
        mode: OutputMode::Cte,
        ..compiler.config().clone()
    })?;

    println!();
    println!("{}", "Nested SQL:".green().bold());
    println!("{}", nested.compile(query).white());
    println!();
    println!("{}", "CTE SQL:".green().bold());
    println!("{}", cte.compile(query).white());

    Ok(())
}

fn print_nodes(nodes: &[Node], depth: usize) {
    for node in nodes.iter().filter(|n| !n.is_trivia()) {
        print_node(node, depth);
    }
}

fn print_node(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    match node {
        Node::Token(token) => {
            println!("{indent}{} {}", token.raw_value.white(), token.kind.name.dimmed());
        }
        Node::List(children) => {
            println!("{indent}{}", "List".yellow());
            print_nodes(children, depth + 1);
        }
        Node::Pipe(pipe) => {
            println!("{indent}{}", "Pipe".magenta().bold());
            println!("{indent}  {}", "head".dimmed());
            print_nodes(&pipe.head, depth + 2);
            for (i, segment) in pipe.segments.iter().enumerate() {
                println!("{indent}  {} {}", "segment".dimmed(), (i + 1).to_string().cyan());
                print_nodes(segment, depth + 2);
            }
        }
    }
}
