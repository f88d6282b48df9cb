//! Page a conversation out to disk from the command line.
//!
//! Input files are JSON arrays of messages
//! (`[{"role": "user", "content": "...", "timestamp": "..."}]`). Pass `-` to
//! read from stdin. Logs go to stderr; set `RUST_LOG` to adjust.
//!
//! # Examples
//!
//! ```sh
//! # Split a transcript into fragment pages and print the summary
//! cinch-pager fragment --input transcript.json --pages-dir ./pages --seed 7
//!
//! # Replay a transcript into an engine and compact it to 80% of an 8k window
//! cinch-pager compact --input transcript.json --pages-dir ./pages \
//!   --max-tokens 8000 --strategy semantic
//!
//! # Or name the token target directly
//! cinch-pager compact --input transcript.json --pages-dir ./pages --target-tokens 4000
//!
//! # List what has been paged out
//! cinch-pager pages --pages-dir ./pages
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::Utc;
use cinch_pager::context::{
    CleanupOutcome, ContextBudget, ContextBuffer, ContextConfig, ContextUsage, VirtualContext,
};
use cinch_pager::error::Result;
use cinch_pager::paging::{
    FragmentationConfig, FragmentationMemory, FragmenterConfig, HashingEmbedder,
    RandomSamplingFragmenter, SemanticConfig, SemanticMemory, SemanticOutcome, list_pages,
};
use cinch_pager::{Message, MessageRole};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Page LLM conversation history out to addressable JSON pages.
#[derive(Parser)]
#[command(name = "cinch-pager", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fragment a message list into pages and print the cross-reference summary
    Fragment(FragmentArgs),
    /// Replay messages into a paging engine and compact to a token target
    Compact(CompactArgs),
    /// List pages in a pages directory
    Pages {
        /// Directory holding page files
        #[arg(long)]
        pages_dir: PathBuf,
    },
}

#[derive(Args)]
struct FragmentArgs {
    /// JSON array of messages (`-` for stdin)
    #[arg(long)]
    input: PathBuf,

    /// Directory to write pages to
    #[arg(long)]
    pages_dir: PathBuf,

    /// Parent label for the fragments (default: context_<millis>)
    #[arg(long)]
    label: Option<String>,

    /// Seed for reproducible splits
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    fragmenter: FragmenterArgs,
}

#[derive(Args)]
struct FragmenterArgs {
    /// Base split probability after any message (0.0..=1.0)
    #[arg(long)]
    sample_rate: Option<f64>,

    /// How strongly age raises the split probability
    #[arg(long)]
    age_exponent: Option<f64>,

    /// Minimum fragment size before a random split
    #[arg(long)]
    min_size: Option<usize>,

    /// Fragment size that forces a split
    #[arg(long)]
    max_size: Option<usize>,
}

impl FragmenterArgs {
    fn to_config(&self) -> Result<FragmenterConfig> {
        let mut config = FragmenterConfig::default();
        if let Some(rate) = self.sample_rate {
            config = config.with_sample_rate(rate);
        }
        if let Some(exponent) = self.age_exponent {
            config = config.with_age_weight_exponent(exponent);
        }
        if let Some(n) = self.min_size {
            config = config.with_min_fragment_size(n);
        }
        if let Some(n) = self.max_size {
            config = config.with_max_fragment_size(n);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Oldest-first eviction into age-weighted fragment pages
    Fragment,
    /// Eviction by similarity to the recent conversation
    Semantic,
}

#[derive(Args)]
struct CompactArgs {
    /// JSON array of messages (`-` for stdin)
    #[arg(long)]
    input: PathBuf,

    /// Directory to write pages to
    #[arg(long)]
    pages_dir: PathBuf,

    /// Context window size in tokens
    #[arg(long, required_unless_present = "target_tokens")]
    max_tokens: Option<usize>,

    /// Fraction of the window to compact down to
    #[arg(long, default_value_t = 0.8)]
    cleanup_fraction: f64,

    /// Token count to compact down to (overrides the window fraction)
    #[arg(long)]
    target_tokens: Option<usize>,

    /// Paging engine
    #[arg(long, value_enum, default_value_t = Strategy::Fragment)]
    strategy: Strategy,

    /// Embedding width for the semantic strategy
    #[arg(long, default_value_t = 256)]
    dimensions: usize,

    /// Recent messages temporal eviction never removes
    #[arg(long, default_value_t = 10)]
    keep_recent: usize,

    /// Seed for reproducible splits
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    fragmenter: FragmenterArgs,
}

impl CompactArgs {
    /// Budget usage is reported against. Without `--max-tokens` the target
    /// itself is the window.
    fn budget(&self) -> ContextBudget {
        let window = self.max_tokens.or(self.target_tokens).unwrap_or_default();
        ContextBudget::new(window).with_cleanup_fraction(self.cleanup_fraction)
    }

    fn target_tokens(&self, budget: &ContextBudget) -> usize {
        self.target_tokens.unwrap_or_else(|| budget.target_tokens())
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Fragment(args) => fragment(args),
        Command::Compact(args) => compact(args).await,
        Command::Pages { pages_dir } => pages(&pages_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let json = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&json)?)
}

fn fragment(args: FragmentArgs) -> Result<()> {
    let messages = read_messages(&args.input)?;
    let mut config =
        FragmentationConfig::default().with_fragmenter_config(args.fragmenter.to_config()?);
    config.seed = args.seed;

    let buffer = VirtualContext::new(ContextConfig::new(&args.pages_dir))?;
    let mut memory =
        FragmentationMemory::new(buffer, config).with_fragmenter(RandomSamplingFragmenter::new());

    let base = args
        .label
        .unwrap_or_else(|| format!("context_{}", Utc::now().timestamp_millis()));
    let label = memory.buffer_mut().store_mut().reserve_label(base);
    let page = memory.create_page_from_messages(&messages, &label, MessageRole::System)?;

    info!(
        "Wrote {} fragment page(s) for {} messages to {}",
        page.page_ids.len(),
        messages.len(),
        args.pages_dir.display()
    );
    println!("{}", page.summary);
    Ok(())
}

async fn compact(args: CompactArgs) -> Result<()> {
    let messages = read_messages(&args.input)?;
    let count = messages.len();
    let budget = args.budget();
    let target = args.target_tokens(&budget);
    let before = budget.estimate_usage(&messages);
    info!("Compacting {count} messages to {target} tokens, {}", before.to_log_string());

    let buffer = VirtualContext::new(
        ContextConfig::new(&args.pages_dir).with_keep_recent(args.keep_recent),
    )?;

    match args.strategy {
        Strategy::Fragment => {
            let mut config =
                FragmentationConfig::default().with_fragmenter_config(args.fragmenter.to_config()?);
            config.seed = args.seed;
            let mut memory = FragmentationMemory::new(buffer, config)
                .with_fragmenter(RandomSamplingFragmenter::new());
            for msg in messages {
                memory.add_message(msg);
            }

            let outcome = memory.cleanup(target)?;
            memory.shutdown()?;

            print_stats(count, &before, &budget, memory.buffer());
            print_temporal(&outcome);
        }
        Strategy::Semantic => {
            let embedder = Arc::new(HashingEmbedder::new(args.dimensions));
            let mut memory =
                SemanticMemory::open(buffer, embedder, SemanticConfig::new(args.dimensions))
                    .await?;
            for msg in messages {
                memory.add_message(msg).await;
            }

            let outcome = memory.cleanup(target).await?;
            memory.shutdown()?;

            print_stats(count, &before, &budget, memory.buffer());
            match outcome {
                SemanticOutcome::WithinBudget => println!("within budget, nothing paged"),
                SemanticOutcome::Temporal(temporal) => {
                    println!("no semantic neighbors, fell back to temporal cleanup");
                    print_temporal(&temporal);
                }
                SemanticOutcome::Semantic {
                    page_id,
                    retrieved,
                    evicted,
                    overflow_page_ids,
                } => {
                    println!("semantic page: {page_id} ({retrieved} related msgs)");
                    println!("evicted: {evicted} msgs");
                    for id in overflow_page_ids {
                        println!("unretrieved page: {id}");
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_stats(
    count: usize,
    before: &ContextUsage,
    budget: &ContextBudget,
    buffer: &impl ContextBuffer,
) {
    let after = budget.estimate_usage(buffer.messages());
    println!("before: {count} msgs, {}", before.to_log_string());
    println!(
        "after:  {} msgs, {}",
        buffer.messages().len(),
        after.to_log_string()
    );
}

fn print_temporal(outcome: &CleanupOutcome) {
    match outcome {
        CleanupOutcome::WithinBudget => println!("within budget, nothing paged"),
        CleanupOutcome::NothingToEvict => println!("over budget, but every message is protected"),
        CleanupOutcome::Evicted { evicted, page_ids } => {
            println!("evicted: {evicted} msgs into {} page(s)", page_ids.len());
            for id in page_ids {
                println!("  {id}");
            }
        }
    }
}

fn pages(dir: &Path) -> Result<()> {
    let pages = list_pages(dir)?;
    if pages.is_empty() {
        println!("no pages in {}", dir.display());
        return Ok(());
    }
    for page in &pages {
        println!("{}\t{}\t{} msgs", page.id, page.label, page.messages.len());
    }
    Ok(())
}
