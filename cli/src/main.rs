//! Offline inspector for branchscope storage dumps.
//!
//! A dump is the extension's `localStorage` exported as one JSON object of
//! string keys to string values. Read-only commands print to stdout;
//! commands that change records only write the dump back with `--write`.


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use branchscope::clock::SystemClock;
use branchscope::config::CoreConfig;
use branchscope::persistence::{DataType, KeyValueStore, MemoryStore, Persistence, codec, record};
use branchscope::tree::TreeBuilder;
use branchscope::CoreError;
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("cannot read dump {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot write dump {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("dump is not a JSON object of strings: {0}")]
    InvalidDump(#[from] serde_json::Error),
    #[error("no stored tree for conversation `{0}`")]
    UnknownConversation(String),
    #[error("variant `{variant}` is not in conversation `{conversation}`")]
    UnknownVariant { conversation: String, variant: String },
    #[error("pass a conversation id or --all")]
    MissingTarget,
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Parser, Debug)]
#[command(name = "branchscope", about = "Inspect and maintain branchscope storage dumps")]
struct Cli {
    /// Path to the storage dump.
    #[arg(long, env = "BRANCHSCOPE_DUMP", default_value = "branchscope-dump.json")]
    dump: PathBuf,

    /// Key prefix of branchscope records. Defaults to the configured prefix.
    #[arg(long, env = "BRANCHSCOPE_PREFIX")]
    prefix: Option<String>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-conversation record sizes and node counts.
    Stats,
    /// Render a conversation's tree.
    Show { conversation: String },
    /// Root-to-node path of one variant.
    Path { conversation: String, variant: String },
    /// Delete stale records.
    Prune {
        #[arg(long, default_value_t = false)]
        write: bool,
    },
    /// Delete the records of one conversation, or every record.
    Clear {
        conversation: Option<String>,
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long, default_value_t = false)]
        write: bool,
    },
    /// Rewrite readable tree records at the current schema version.
    Migrate {
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let persistence = open(&cli.dump, cli.prefix)?;
    let (output, write) = execute(&persistence, &cli.command)?;
    print!("{output}");
    if write {
        save_dump(&cli.dump, &persistence.store().snapshot())?;
        log::info!("wrote {}", cli.dump.display());
    }
    Ok(())
}

fn open(path: &Path, prefix: Option<String>) -> Result<Persistence<MemoryStore>, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_owned(), source })?;
    let entries = parse_dump(&raw)?;
    log::debug!("loaded {} entries from {}", entries.len(), path.display());
    Ok(persistence_from(entries, prefix))
}

fn persistence_from(entries: BTreeMap<String, String>, prefix: Option<String>) -> Persistence<MemoryStore> {
    let mut config = CoreConfig::from_env().persistence;
    if let Some(prefix) = prefix {
        config.prefix = prefix;
    }
    Persistence::new(MemoryStore::from_map(entries), config, Rc::new(SystemClock))
}

fn parse_dump(raw: &str) -> Result<BTreeMap<String, String>, CliError> {
    Ok(serde_json::from_str(raw)?)
}

fn save_dump(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, rendered).map_err(|source| CliError::Write { path: path.to_owned(), source })
}

/// Run one command. Returns the text to print and whether the dump changed
/// and should be written back.
fn execute(persistence: &Persistence<MemoryStore>, command: &Command) -> Result<(String, bool), CliError> {
    match command {
        Command::Stats => Ok((render_json(&serde_json::to_value(persistence.stats())?)?, false)),
        Command::Show { conversation } => Ok((show(persistence, conversation)?, false)),
        Command::Path { conversation, variant } => Ok((path(persistence, conversation, variant)?, false)),
        Command::Prune { write } => {
            let removed = persistence.prune_stale();
            Ok((list_keys("pruned", &removed), *write && !removed.is_empty()))
        }
        Command::Clear { conversation, all, write } => {
            let removed = match (conversation, all) {
                (_, true) => persistence.clear_all(),
                (Some(id), false) => {
                    let before = persistence.store().keys().len();
                    persistence.clear(id);
                    before - persistence.store().keys().len()
                }
                (None, false) => return Err(CliError::MissingTarget),
            };
            Ok((format!("cleared {removed} records\n"), *write && removed > 0))
        }
        Command::Migrate { write } => {
            let migrated = migrate(persistence)?;
            Ok((list_keys("migrated", &migrated), *write && !migrated.is_empty()))
        }
    }
}

fn render_json(value: &Value) -> Result<String, CliError> {
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    Ok(rendered)
}

fn list_keys(verb: &str, keys: &[String]) -> String {
    let mut out = format!("{verb} {} records\n", keys.len());
    for key in keys {
        out.push_str(&format!("  {key}\n"));
    }
    out
}

fn load(persistence: &Persistence<MemoryStore>, conversation: &str) -> Result<TreeBuilder, CliError> {
    let tree = persistence
        .try_load_tree(conversation)?
        .ok_or_else(|| CliError::UnknownConversation(conversation.to_owned()))?;
    let builder = TreeBuilder::new();
    builder.import_data(&tree);
    Ok(builder)
}

fn show(persistence: &Persistence<MemoryStore>, conversation: &str) -> Result<String, CliError> {
    let tree = load(persistence, conversation)?;
    let mut out = String::new();
    let mut stack: Vec<(String, usize)> = tree.root_children().into_iter().rev().map(|id| (id, 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        out.push_str(&describe(&tree, &id, depth));
        stack.extend(tree.children_of(&id).into_iter().rev().map(|child| (child, depth + 1)));
    }
    let stats = tree.stats();
    out.push_str(&format!(
        "{} nodes, {} discovered, {} branch points, depth {}\n",
        stats.node_count, stats.discovered_count, stats.branch_points, stats.max_depth
    ));
    Ok(out)
}

fn path(persistence: &Persistence<MemoryStore>, conversation: &str, variant: &str) -> Result<String, CliError> {
    let tree = load(persistence, conversation)?;
    let route = tree.find_path_to_node(variant);
    if route.is_empty() {
        return Err(CliError::UnknownVariant {
            conversation: conversation.to_owned(),
            variant: variant.to_owned(),
        });
    }
    Ok(route.iter().map(|id| describe(&tree, id, 0)).collect())
}

/// One line per node: active marker, turn, position, role and preview.
fn describe(tree: &TreeBuilder, variant_id: &str, depth: usize) -> String {
    let Some(node) = tree.node(variant_id) else {
        return format!("{}? {variant_id}\n", "  ".repeat(depth));
    };
    let marker = if node.is_active { '*' } else { ' ' };
    let preview = if node.is_discovered { node.preview.as_str() } else { "(not yet seen)" };
    format!(
        "{}{marker} [{}] v{} {:<9} {preview}\n",
        "  ".repeat(depth),
        node.turn_index,
        node.variant_index,
        node.role.as_str()
    )
}

/// Re-save every tree record through the current schema, keeping its
/// timestamp so staleness is unaffected. Unreadable records are skipped.
fn migrate(persistence: &Persistence<MemoryStore>) -> Result<Vec<String>, CliError> {
    let mut migrated = Vec::new();
    for conversation in persistence.conversation_ids() {
        let key = persistence.key(&conversation, DataType::Tree);
        let Some(stored) = persistence.store().get(&key) else {
            continue;
        };
        let decoded = codec::decode(&stored);
        let record = match record::parse_conversation(&key, decoded) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("skipping {key}: {err}");
                continue;
            }
        };
        let builder = TreeBuilder::new();
        builder.import_data(&record.tree_data);
        persistence.save_tree_at(&conversation, &builder.export_lean(), record.timestamp)?;
        migrated.push(key);
    }
    Ok(migrated)
}
