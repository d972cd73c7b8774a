use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

mod client;
mod config;
mod format;
mod submit;

use client::ApiClient;
use config::CliConfig;
use forge::adapters::Adapters;
use forge::parser::{ParserMode, build_parser};
use format::{count, print_json, short};

/// Forge client — semantic version control for concurrent editors.
///
/// Attach a directory to a server state with `forge init`, then capture
/// local edits as symbol-level operations with `forge submit --file`.
/// Conflicts are durable records: inspect them with `forge conflicts` and
/// close them with `forge conflict resolve`.
#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'forge <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach this directory to a forge server (writes .forge.toml)
    Init(InitArgs),

    /// Update the attachment (server, state, or author)
    Attach(AttachArgs),

    /// Show the attached state: ops, heads, open conflicts, files
    Status,

    /// Create a new state on the server
    Create(CreateArgs),

    /// Capture local file edits as a change set and submit it
    ///
    /// Each file is diffed against the attached state's tree: JSON files
    /// produce per-key ops, Python files per-def/class ops, everything
    /// else whole-file upserts. Exits non-zero when the submission is
    /// rejected or conflicted.
    Submit(SubmitArgs),

    /// List change sets stacked with `submit --stack`
    Stack,

    /// List recorded change sets
    Log(LogArgs),

    /// Show one object by id (cs_…, op_…, or conf_…)
    Show {
        /// The id to show.
        id: String,
    },

    /// List all states on the server
    States,

    /// Manage states
    #[command(subcommand)]
    State(StateCommands),

    /// List open conflicts for the attached state
    Conflicts(ConflictsArgs),

    /// Inspect or resolve conflicts
    #[command(subcommand)]
    Conflict(ConflictCommands),
}

#[derive(Args)]
struct InitArgs {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:7341")]
    server: String,

    /// State to attach to.
    #[arg(long, default_value = "main")]
    state: String,

    /// Author recorded on submissions.
    #[arg(long, env = "USER", default_value = "anonymous")]
    author: String,
}

#[derive(Args)]
struct AttachArgs {
    /// New server base URL.
    #[arg(long)]
    server: Option<String>,

    /// New state.
    #[arg(long)]
    state: Option<String>,

    /// New author.
    #[arg(long)]
    author: Option<String>,
}

#[derive(Args)]
struct CreateArgs {
    /// Name of the state to create.
    name: String,

    /// Fork from this state (defaults to a fresh, empty state).
    #[arg(long)]
    from: Option<String>,
}

#[derive(Args)]
struct SubmitArgs {
    /// Files to capture (repeatable).
    #[arg(long = "file", required = true)]
    files: Vec<PathBuf>,

    /// Change-set message.
    #[arg(long)]
    message: Option<String>,

    /// Override the configured author.
    #[arg(long)]
    author: Option<String>,

    /// Submit to this state instead of the attached one.
    #[arg(long)]
    to: Option<String>,

    /// Remember the change-set id locally (see `forge stack`).
    #[arg(long)]
    stack: bool,
}

#[derive(Args)]
struct LogArgs {
    /// Filter by state (defaults to the attached state).
    #[arg(long)]
    state: Option<String>,

    /// Maximum rows to print.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// All states.
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Create a new state
    Create(CreateArgs),

    /// Promote a state's ops onto another state
    Promote {
        /// Source state.
        source: String,

        /// Target state.
        #[arg(long)]
        to: String,
    },
}

#[derive(Args)]
struct ConflictsArgs {
    /// Filter by state (defaults to the attached state).
    #[arg(long)]
    state: Option<String>,
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// Show one conflict
    Show {
        /// Conflict id (conf_…).
        id: String,
    },

    /// Resolve a conflict with an op read from a JSON file (or '-' for stdin)
    Resolve {
        /// Conflict id (conf_…).
        id: String,

        /// Path to the resolving op JSON.
        #[arg(long = "op-file")]
        op_file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => init(&args),
        Commands::Attach(args) => attach(&args),
        Commands::Status => status(),
        Commands::Create(args) | Commands::State(StateCommands::Create(args)) => create(&args),
        Commands::Submit(args) => submit_cmd(&args),
        Commands::Stack => stack(),
        Commands::Log(args) => log_cmd(&args),
        Commands::Show { id } => show(&id),
        Commands::States => states(),
        Commands::State(StateCommands::Promote { source, to }) => promote(&source, &to),
        Commands::Conflicts(args) => conflicts(&args),
        Commands::Conflict(ConflictCommands::Show { id }) => show(&id),
        Commands::Conflict(ConflictCommands::Resolve { id, op_file }) => resolve(&id, &op_file),
    }
}

fn cwd() -> Result<PathBuf> {
    std::env::current_dir().context("resolve current directory")
}

fn load() -> Result<(CliConfig, PathBuf, ApiClient)> {
    let (config, path) = CliConfig::load(&cwd()?)?;
    let client = ApiClient::new(&config.server)?;
    Ok((config, path, client))
}

fn cli_adapters() -> Adapters {
    // Symbol extraction on the client never needs the AST: the server
    // re-verifies every python op before acceptance.
    Adapters::new(build_parser(None, ParserMode::Auto, false))
}

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

fn init(args: &InitArgs) -> Result<()> {
    let dir = cwd()?;
    let path = dir.join(config::FILE_NAME);
    if path.exists() {
        println!("already attached ({})", path.display());
        return Ok(());
    }
    let config = CliConfig::new(&args.server, &args.state, &args.author);
    let client = ApiClient::new(&config.server)?;
    client
        .get("/health")
        .with_context(|| format!("server '{}' is not reachable", config.server))?;
    config.save(&path)?;
    println!(
        "attached '{}' to {} (state '{}', author '{}')",
        dir.display(),
        config.server,
        config.state,
        config.author
    );
    Ok(())
}

fn attach(args: &AttachArgs) -> Result<()> {
    let (mut config, path, _) = load()?;
    if let Some(server) = &args.server {
        config.server = server.trim_end_matches('/').to_owned();
    }
    if let Some(state) = &args.state {
        config.state = state.clone();
    }
    if let Some(author) = &args.author {
        config.author = author.clone();
    }
    config.save(&path)?;
    println!(
        "attachment updated: {} (state '{}', author '{}')",
        config.server, config.state, config.author
    );
    Ok(())
}

fn status() -> Result<()> {
    let (config, _, client) = load()?;
    let snapshot = client.get(&format!(
        "/v1/states/{}",
        ApiClient::encode_state(&config.state)
    ))?;
    let heads = snapshot["state"]["heads"].as_array().map_or(0, Vec::len);
    let files = snapshot["tree"].as_object().map_or(0, |t| t.len());
    let open = snapshot["open_conflicts"].as_array().map_or(0, Vec::len);
    println!("state:     {}", config.state);
    println!("server:    {}", config.server);
    println!("ops:       {}", snapshot["op_count"]);
    println!("heads:     {heads}");
    println!("files:     {files}");
    println!("conflicts: {}", count(open, "open conflict"));
    if open > 0 {
        for conflict in snapshot["open_conflicts"].as_array().into_iter().flatten() {
            println!(
                "  - {} [{}] {}",
                conflict["id"].as_str().unwrap_or("?"),
                conflict["type"].as_str().unwrap_or("?"),
                conflict["reason"].as_str().unwrap_or("")
            );
        }
        println!("  To inspect: forge conflict show <id>");
    }
    Ok(())
}

fn create(args: &CreateArgs) -> Result<()> {
    let (_, _, client) = load()?;
    let mut body = json!({"name": args.name});
    if let Some(from) = &args.from {
        body["from_state"] = json!(from);
    }
    let response = client.post("/v1/states", &body)?;
    println!(
        "created state '{}'{}",
        args.name,
        args.from
            .as_deref()
            .map(|f| format!(" from '{f}'"))
            .unwrap_or_default()
    );
    if let Some(policy) = response["state"].get("policy") {
        if policy["allow_open_conflicts"] == false {
            println!("  policy: strict (writes blocked while conflicts are open)");
        }
    }
    Ok(())
}

fn submit_cmd(args: &SubmitArgs) -> Result<()> {
    let (mut config, config_path, client) = load()?;
    let state = args.to.clone().unwrap_or_else(|| config.state.clone());
    let author = args.author.clone().unwrap_or_else(|| config.author.clone());

    let snapshot = client.get(&format!("/v1/states/{}", ApiClient::encode_state(&state)))?;
    let parents: Vec<String> = snapshot["state"]["heads"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|h| h.as_str().map(str::to_owned))
        .collect();
    let tree: std::collections::BTreeMap<String, String> = snapshot["tree"]
        .as_object()
        .into_iter()
        .flat_map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
        })
        .collect();

    let adapters = cli_adapters();
    let mut ops = Vec::new();
    for file in &args.files {
        let repo_path = submit::repo_path(file);
        let file_ops = submit::ops_for_file(&adapters, &state, &parents, &tree, &repo_path, file)?;
        ops.extend(file_ops);
    }
    if ops.is_empty() {
        println!("nothing to submit: {} unchanged", count(args.files.len(), "file"));
        return Ok(());
    }

    let mut metadata = json!({"author": author});
    if let Some(message) = &args.message {
        metadata["intent"] = json!(message);
    }
    let change_set = json!({"state": state, "metadata": metadata, "ops": ops});
    let outcome = client.post("/v1/change-sets", &json!({"change_set": change_set}))?;

    let change_set_id = outcome["change_set_id"].as_str().unwrap_or("?").to_owned();
    let status = outcome["status"].as_str().unwrap_or("?").to_owned();
    if args.stack {
        config.stack.push(change_set_id.clone());
        config.save(&config_path)?;
    }

    match status.as_str() {
        "accepted" => {
            println!(
                "{change_set_id}: accepted ({} into '{state}')",
                count(outcome["accepted"].as_array().map_or(0, Vec::len), "op")
            );
            Ok(())
        }
        other => {
            eprintln!("{change_set_id}: {other}");
            for conflict in outcome["conflict_details"].as_array().into_iter().flatten() {
                eprintln!(
                    "  - {} [{}] {}",
                    conflict["id"].as_str().unwrap_or("?"),
                    conflict["type"].as_str().unwrap_or("?"),
                    conflict["reason"].as_str().unwrap_or("")
                );
            }
            bail!("change set {change_set_id} was {other}");
        }
    }
}

fn stack() -> Result<()> {
    let (config, _, client) = load()?;
    if config.stack.is_empty() {
        println!("stack is empty. Add to it with: forge submit --stack --file <path>");
        return Ok(());
    }
    for id in &config.stack {
        let status = client
            .get(&format!("/v1/change-sets/{id}"))
            .map(|cs| cs["status"].as_str().unwrap_or("?").to_owned())
            .unwrap_or_else(|_| "unknown".to_owned());
        println!("{}  {status}", short(id));
    }
    Ok(())
}

fn log_cmd(args: &LogArgs) -> Result<()> {
    let (config, _, client) = load()?;
    let path = if args.all {
        "/v1/change-sets".to_owned()
    } else {
        let state = args.state.clone().unwrap_or_else(|| config.state.clone());
        format!("/v1/change-sets?state={}", ApiClient::encode_state(&state))
    };
    let response = client.get(&path)?;
    let change_sets = response["change_sets"].as_array().cloned().unwrap_or_default();
    for cs in change_sets.iter().rev().take(args.limit) {
        println!(
            "{}  {:10}  {:8}  {}",
            short(cs["id"].as_str().unwrap_or("?")),
            cs["status"].as_str().unwrap_or("?"),
            count(cs["results"].as_array().map_or(0, Vec::len), "op"),
            cs["metadata"]["intent"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

fn show(id: &str) -> Result<()> {
    let (_, _, client) = load()?;
    let path = if id.starts_with("cs_") {
        format!("/v1/change-sets/{id}")
    } else if id.starts_with("op_") {
        format!("/v1/ops/{id}")
    } else if id.starts_with("conf_") {
        format!("/v1/conflicts/{id}")
    } else {
        bail!("unrecognized id '{id}': expected a cs_, op_, or conf_ prefix");
    };
    print_json(&client.get(&path)?);
    Ok(())
}

fn states() -> Result<()> {
    let (_, _, client) = load()?;
    let response = client.get("/v1/states")?;
    for state in response["states"].as_array().into_iter().flatten() {
        let name = state["name"].as_str().unwrap_or("?");
        let ops = state["op_count"].as_u64().unwrap_or(0);
        let open = state["open_conflicts"].as_u64().unwrap_or(0);
        let base = state["base_state"]
            .as_str()
            .map(|b| format!(" (from {b})"))
            .unwrap_or_default();
        println!("{name}{base}: {ops} ops, {open} open conflicts");
    }
    Ok(())
}

fn promote(source: &str, target: &str) -> Result<()> {
    let (config, _, client) = load()?;
    let outcome = client.post(
        &format!("/v1/states/{}/promote", ApiClient::encode_state(source)),
        &json!({"target_state": target, "author": config.author}),
    )?;
    let accepted = outcome["accepted"].as_array().map_or(0, Vec::len);
    if outcome["ok"] == true {
        println!("promoted '{source}' to '{target}': {}", count(accepted, "op"));
        Ok(())
    } else {
        eprintln!(
            "promotion stopped after {}: {}",
            count(accepted, "op"),
            count(
                outcome["conflicts"].as_array().map_or(0, Vec::len),
                "conflict"
            )
        );
        for id in outcome["conflicts"].as_array().into_iter().flatten() {
            eprintln!("  - {}", id.as_str().unwrap_or("?"));
        }
        bail!("promotion of '{source}' to '{target}' conflicted");
    }
}

fn conflicts(args: &ConflictsArgs) -> Result<()> {
    let (config, _, client) = load()?;
    let state = args.state.clone().unwrap_or_else(|| config.state.clone());
    let response = client.get(&format!(
        "/v1/states/{}/conflicts",
        ApiClient::encode_state(&state)
    ))?;
    let conflicts = response["conflicts"].as_array().cloned().unwrap_or_default();
    let open: Vec<&Value> = conflicts
        .iter()
        .filter(|c| c["status"] == "open")
        .collect();
    if open.is_empty() {
        println!("no open conflicts in '{state}'");
        return Ok(());
    }
    for conflict in open {
        println!(
            "{}  [{}]  {}",
            conflict["id"].as_str().unwrap_or("?"),
            conflict["type"].as_str().unwrap_or("?"),
            conflict["target"].as_str().unwrap_or("")
        );
        println!("    {}", conflict["reason"].as_str().unwrap_or(""));
    }
    println!("Resolve with: forge conflict resolve <id> --op-file <op.json>");
    Ok(())
}

fn resolve(id: &str, op_file: &std::path::Path) -> Result<()> {
    let (_, _, client) = load()?;
    let raw = if op_file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("read op from stdin")?
    } else {
        std::fs::read_to_string(op_file)
            .with_context(|| format!("read {}", op_file.display()))?
    };
    let op: Value = serde_json::from_str(&raw).context("parse resolving op JSON")?;

    let outcome = client.post(&format!("/v1/conflicts/{id}/resolve"), &json!({"op": op}))?;
    if outcome["ok"] == true {
        println!("{id}: resolved");
        Ok(())
    } else {
        eprintln!("{id}: still open; the resolving op was not accepted");
        if let Some(details) = outcome["submit_result"]["conflict_details"].as_array() {
            for conflict in details {
                eprintln!("  - {}", conflict["reason"].as_str().unwrap_or(""));
            }
        }
        bail!("resolution of {id} failed");
    }
}
