#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use collocate::*;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `{corpus_id}.json` corpus files
    #[arg(short, long, default_value = "corpora")]
    data_dir: PathBuf,

    /// Engine configuration (JSON); defaults apply to missing keys
    #[arg(long)]
    config: Option<PathBuf>,

    /// Constellation to analyse (JSON)
    #[arg(long)]
    constellation: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(clap::Args, Debug)]
struct RankingArgs {
    #[arg(long, default_value = "conservative_log_ratio")]
    sort_by: SortKey,
    #[arg(long)]
    ascending: bool,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 10)]
    page_size: usize,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Command {
    /// Items and discoursemes co-occurring with the focus discourseme
    Collocation {
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        focus: u64,
        #[arg(long, default_value = "word")]
        p_attribute: String,
        #[arg(long, default_value = "s")]
        s_break: String,
        #[arg(long, default_value_t = 10)]
        window: usize,
        #[arg(long, default_value = "local")]
        marginals: Marginals,
        #[arg(long)]
        filter_item: Option<String>,
        #[command(flatten)]
        ranking: RankingArgs,
    },
    /// Items over-represented in one corpus compared to another
    Keyword {
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        reference: String,
        #[arg(long, default_value = "word")]
        p_attribute: String,
        #[arg(long, default_value = "s")]
        s_break: String,
        #[arg(long, default_value_t = 1)]
        min_freq: u64,
        #[command(flatten)]
        ranking: RankingArgs,
    },
    /// Split a corpus into time buckets by a datetime annotation
    Partition {
        #[arg(long)]
        corpus: String,
        #[arg(long, default_value = "text")]
        level: String,
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "month")]
        interval: Interval,
    },
    /// Lines around every match of the focus discourseme
    Concordance {
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        focus: u64,
        #[arg(long, default_value = "word")]
        p_attribute: String,
        #[arg(long, default_value = "s")]
        s_break: String,
        #[arg(long, default_value_t = 10)]
        window: usize,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

#[cfg(feature = "cli")]
impl RankingArgs {
    fn ranking(&self) -> Ranking {
        Ranking {
            sort_by: self.sort_by,
            order: if self.ascending {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            },
        }
    }

    fn page(&self) -> Result<Page> {
        Ok(Page::new(self.page, self.page_size)?)
    }
}

#[cfg(feature = "cli")]
fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(feature = "cli")]
fn constellation(args: &Args) -> Result<Constellation> {
    let path = args
        .constellation
        .as_deref()
        .context("this command needs --constellation")?;
    read_json(path)
}

#[cfg(feature = "cli")]
fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("collocate needs to be installed with the cli feature (`cargo install --force collocate -F cli`)");
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> Result<()> {
    use std::sync::Arc;
    use tracing_subscriber::EnvFilter;

    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config: EngineConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => EngineConfig::default(),
    };
    let provider = InMemoryProvider::new(ProviderConfig {
        data_dir: args.data_dir.clone(),
        ..ProviderConfig::default()
    });
    let engine = Engine::new(Arc::new(provider), config)?;

    match &args.command {
        Command::Collocation {
            corpus,
            focus,
            p_attribute,
            s_break,
            window,
            marginals,
            filter_item,
            ranking,
        } => {
            let constellation = constellation(&args)?;
            let mut request =
                CollocationRequest::new(corpus, DiscoursemeId(*focus), p_attribute, s_break, *window);
            request.marginals = *marginals;
            request.filter_item = filter_item.clone();
            let view = engine
                .build_collocation(&constellation, &request, ranking.ranking(), ranking.page()?)
                .await?;
            print(&view)
        }
        Command::Keyword {
            corpus,
            reference,
            p_attribute,
            s_break,
            min_freq,
            ranking,
        } => {
            let constellation = constellation(&args)?;
            let mut request = KeywordRequest::new(corpus, reference, p_attribute, s_break);
            request.min_freq = *min_freq;
            let view = engine
                .build_keyword(&constellation, &request, ranking.ranking(), ranking.page()?)
                .await?;
            print(&view)
        }
        Command::Partition {
            corpus,
            level,
            key,
            interval,
        } => {
            let collection = engine.partition(corpus, level, key, *interval).await?;
            print(collection.as_ref())
        }
        Command::Concordance {
            corpus,
            focus,
            p_attribute,
            s_break,
            window,
            page,
        } => {
            let constellation = constellation(&args)?;
            let focus = constellation
                .get(DiscoursemeId(*focus))
                .with_context(|| format!("discourseme {} is not in the constellation", focus))?;
            let scope = engine.scope(corpus, None)?;
            let description = engine.describe(focus, &scope, s_break, p_attribute).await?;
            let mut request = ConcordanceRequest::new(p_attribute, s_break, *window);
            request.page_number = *page;
            let concordance = engine
                .build_concordance(&scope, &description.spans(), &constellation.discoursemes, &request)
                .await?;
            print(&concordance)
        }
    }
}
