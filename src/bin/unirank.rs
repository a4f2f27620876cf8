use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use unirank::cli::{self as prog_cli, Command, OutputMode, parse_fields, search_from_args};
use unirank::gateway::{ListRequest, VoteRequest};
use unirank::schema::{DistinctField, EntityKind, ReviewLayout};
use unirank::{ConfigLayer, GatewayConfig};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Json,
    Pretty,
    Plain,
}

impl From<Format> for OutputMode {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => Self::Json,
            Format::Pretty => Self::Human,
            Format::Plain => Self::Plain,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "unirank", version, about = "Query gateway for university and city rankings", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Directory of <collection>.ndjson files to serve")]
    data: Option<PathBuf>,
    #[arg(long, global = true, help = "Collection to query (defaults to the configured entity collection)")]
    collection: Option<String>,
    #[arg(long, help = "Review layout: embedded or standalone")]
    review_layout: Option<String>,
    #[arg(long, help = "Reject caller-supplied pipelines")]
    no_raw_pipelines: bool,
    #[arg(long, help = "Write app/audit/metrics logs to this directory")]
    log_dir: Option<PathBuf>,
    #[arg(long, help = "Log level (error, warn, info, debug, trace)")]
    log_level: Option<String>,
    #[arg(long, help = "Also write per-query trace lines to qtrace.log")]
    qtrace: bool,
    #[arg(long, value_enum, default_value = "json", global = true)]
    format: Format,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List the collections that can be queried")]
    Collections,
    #[command(about = "List records, filtered and paginated")]
    List {
        #[arg(long, allow_negative_numbers = true, help = "Maximum number of records")]
        first: Option<i64>,
        #[arg(long, allow_negative_numbers = true, help = "Records to skip")]
        skip: Option<i64>,
        #[arg(long, help = "Case-insensitive pattern over name, country and city")]
        search: Option<String>,
        #[arg(long, help = "JSON array of aggregation stages")]
        pipeline: Option<String>,
        #[arg(long = "where", help = "Condition field:op:value (repeatable)")]
        conditions: Vec<String>,
        #[arg(long, help = "Comma-separated fields to return")]
        fields: Option<String>,
        #[arg(long, help = "Sort as field[:asc|desc]")]
        sort: Option<String>,
    },
    #[command(about = "Count matching records")]
    Count {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long = "where")]
        conditions: Vec<String>,
    },
    #[command(about = "Entities with reviews and their total review count")]
    Summary,
    #[command(about = "Distinct values of country, language or discipline")]
    Distinct { field: String },
    #[command(about = "Set the vote total of an entity or one of its reviews")]
    Vote {
        id: String,
        #[arg(allow_negative_numbers = true)]
        votes: i64,
        #[arg(long, help = "Review id inside the entity")]
        review: Option<String>,
        #[arg(long = "type", default_value = "university", help = "university or city")]
        collection_type: String,
    },
    #[command(about = "Submit a feedback message")]
    Feedback {
        #[arg(long)]
        contact: String,
        #[arg(long)]
        message: String,
    },
    #[command(about = "Run a JSON batch of named operations")]
    Batch { file: PathBuf },
}

fn config_layer(cli: &Cli) -> Result<ConfigLayer, Box<dyn std::error::Error>> {
    Ok(ConfigLayer {
        data_dir: cli.data.clone(),
        review_layout: cli.review_layout.as_deref().map(str::parse::<ReviewLayout>).transpose()?,
        allow_raw_pipelines: cli.no_raw_pipelines.then_some(false),
        log_dir: cli.log_dir.clone(),
        log_level: cli.log_level.clone(),
        qtrace: cli.qtrace.then_some(true),
        ..ConfigLayer::default()
    })
}

fn to_command(cmd: Commands, collection: Option<String>) -> Result<Command, Box<dyn std::error::Error>> {
    Ok(match cmd {
        Commands::Collections => Command::Collections,
        Commands::List { first, skip, search, pipeline, conditions, fields, sort } => {
            let search = search_from_args(search, pipeline, &conditions)?.unwrap_or_default();
            Command::List(ListRequest {
                collection,
                projection: fields.as_deref().map(parse_fields),
                sort,
                ..ListRequest::new(first, skip, search)
            })
        }
        Commands::Count { search, pipeline, conditions } => {
            Command::Count { collection, search: search_from_args(search, pipeline, &conditions)? }
        }
        Commands::Summary => Command::Summary { collection },
        Commands::Distinct { field } => Command::Distinct { field: field.parse::<DistinctField>()?, collection },
        Commands::Vote { id, votes, review, collection_type } => Command::Vote(VoteRequest::new(
            collection_type.parse::<EntityKind>()?,
            &id,
            review.as_deref(),
            votes,
        )),
        Commands::Feedback { contact, message } => Command::Feedback { contact, message },
        Commands::Batch { file } => Command::Batch { file },
    })
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let layer = config_layer(&cli)?;
    let config = GatewayConfig::load(layer, cli.config.as_deref())?;
    if config.log.dir.is_some() || config.log.qtrace {
        unirank::init_logging(&config.log)?;
    }
    let mode = OutputMode::from(cli.format);
    let command = to_command(cli.command, cli.collection)?;
    let gateway = unirank::open(config)?;
    let stdout = std::io::stdout();
    prog_cli::run_with_format(&gateway, command, mode, &mut stdout.lock())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
