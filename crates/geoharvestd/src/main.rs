use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use chrono::Utc;
use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::GeoharvestdErrors;
use geoharvest::{
  config::Config,
  curation::Curator,
  database::{Database, Store, WorkFilter},
  date::PartialDate,
  event::{EventStatus, HarvestingEvent},
  geometry::{BoundingBox, GeometryCollection},
  harvest::Harvester,
  source::{FeedType, Source, SourceConfig, SourceRegistry, WorkType},
  work::{Actor, Status, TemporalExtent, Work},
};
use tracing::{debug, trace};
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static GLOBE: Emoji<'_, '_> = Emoji("🌍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static PAPER: Emoji<'_, '_> = Emoji("📄 ", "");
static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Parser)]
#[command(author, version, about = "Harvesting and curation front end for geoharvest")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Path to the database file, overriding the configuration
  #[arg(long, short, global = true)]
  path: Option<PathBuf>,

  /// Path to the configuration file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Answer every confirmation with its default
  #[arg(long, global = true)]
  accept_defaults: bool,

  /// Also write logs to daily files in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Initialize a new geoharvest database
  Init,
  /// Removes the entire database
  Clean,
  /// Manage harvestable sources
  #[command(subcommand)]
  Source(SourceCommands),
  /// Run one harvesting pass over a source
  Harvest {
    /// Source id
    source_id:   i64,
    /// Stop after this many records
    #[arg(long)]
    max_records: Option<usize>,
  },
  /// Harvest every source whose interval has elapsed
  HarvestDue,
  /// Attach a geometry and/or time period to a harvested work
  Contribute {
    /// Work id
    work_id:  i64,
    /// WKT, GeoJSON or `min_x,min_y,max_x,max_y`
    #[arg(long)]
    geometry: Option<String>,
    /// Start of the period, e.g. 2014 or 2014-08-29
    #[arg(long)]
    start:    Option<PartialDate>,
    /// End of the period
    #[arg(long)]
    end:      Option<PartialDate>,
    /// Who is contributing
    #[arg(long)]
    actor:    String,
  },
  /// Make a work public
  Publish {
    /// Work id
    work_id: i64,
    /// Administrator name
    #[arg(long)]
    actor:   String,
  },
  /// Take a published work back to draft
  Unpublish {
    /// Work id
    work_id: i64,
    /// Administrator name
    #[arg(long)]
    actor:   String,
  },
  /// Remove a work from view
  Withdraw {
    /// Work id
    work_id: i64,
    /// Administrator name
    #[arg(long)]
    actor:   String,
  },
  /// List works
  List {
    /// Only these statuses (repeatable)
    #[arg(long = "status")]
    statuses:  Vec<Status>,
    /// Only published works
    #[arg(long, conflicts_with = "statuses")]
    published: bool,
    /// Only works from this source
    #[arg(long)]
    source:    Option<i64>,
    /// Only this work type
    #[arg(long = "type")]
    work_type: Option<WorkType>,
    /// Substring of title or abstract
    #[arg(long)]
    text:      Option<String>,
    /// Earliest publication year
    #[arg(long)]
    from_year: Option<i32>,
    /// Latest publication year
    #[arg(long)]
    to_year:   Option<i32>,
    /// Bounding box `min_x,min_y,max_x,max_y` the geometry must intersect
    #[arg(long)]
    bbox:      Option<BoundingBox>,
    /// Maximum number of works
    #[arg(long)]
    limit:     Option<usize>,
    /// Works to skip
    #[arg(long, default_value_t = 0)]
    offset:    usize,
  },
  /// Harvested works still missing a geometry or time period
  Queue,
  /// Harvesting runs of a source, newest first
  Events {
    /// Source id
    source_id: i64,
  },
  /// Show one work
  Show {
    /// Work id
    work_id: i64,
    /// Print the work as JSON
    #[arg(long)]
    json:    bool,
  },
}

#[derive(Subcommand)]
enum SourceCommands {
  /// Register a source
  Add {
    /// Display name
    name:      String,
    /// OAI-PMH base URL or feed URL
    url:       String,
    /// `oai-pmh` or `rss`
    #[arg(long, default_value = "oai-pmh")]
    feed_type: FeedType,
    /// OAI-PMH metadata prefix
    #[arg(long, default_value = "oai_dc")]
    metadata_prefix: String,
    /// OAI-PMH set
    #[arg(long)]
    set:       Option<String>,
    /// Work type for records that do not state one
    #[arg(long)]
    work_type: Option<WorkType>,
    /// Minutes between scheduled harvests
    #[arg(long)]
    interval:  Option<i64>,
  },
  /// List registered sources
  List,
  /// Sources due for harvesting now
  Due,
  /// Add or update sources from a TOML registry file
  Import {
    /// Registry file with `[[sources]]` tables
    file: PathBuf,
  },
}

/// Setup logging with the specified verbosity level
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<(), GeoharvestdErrors> {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  let file_layer = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let file_appender = rolling::RollingFileAppender::builder()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("geoharvestd")
        .filename_suffix("log")
        .build(dir)?;
      Some(
        tracing_subscriber::fmt::layer()
          .with_writer(file_appender)
          .with_ansi(false)
          .with_thread_ids(true)
          .with_target(true)
          .with_file(true)
          .with_line_number(true),
      )
    },
    None => None,
  };

  let stdout_layer = tracing_subscriber::fmt::layer()
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true);

  tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();
  Ok(())
}

fn confirm(accept_defaults: bool, prompt: &str) -> Result<bool, GeoharvestdErrors> {
  if accept_defaults {
    return Ok(true);
  }
  Ok(dialoguer::Confirm::new().with_prompt(prompt).default(false).interact()?)
}

async fn open_database(path: &Path) -> Result<Database, GeoharvestdErrors> {
  trace!("Using database at: {}", path.display());
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  Ok(Database::open(path).await?)
}

/// Remove the database file and its journal/WAL siblings.
fn remove_database_files(path: &Path) -> Result<(), GeoharvestdErrors> {
  std::fs::remove_file(path)?;
  let siblings = glob::glob(&format!("{}-*", glob::Pattern::escape(&path.display().to_string())))?;
  for file in siblings.flatten() {
    std::fs::remove_file(file)?;
  }
  Ok(())
}

fn print_source(source: &Source) {
  println!(
    "{}. {} {}",
    style(source.id).yellow(),
    style(&source.config.name).white().bold(),
    style(format!("[{}]", source.config.feed_type)).cyan()
  );
  println!("   {} {}", style("URL:").green(), style(&source.config.url).blue().underlined());
  let last = source.last_harvest.map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
  println!(
    "   {} {} (every {} minutes)",
    style("Last harvest:").green(),
    style(last).white(),
    source.config.harvest_interval_minutes
  );
}

fn print_event(event: &HarvestingEvent) {
  let status = match event.status {
    EventStatus::Completed => style(event.status.to_string()).green(),
    EventStatus::Failed => style(event.status.to_string()).red(),
    _ => style(event.status.to_string()).yellow(),
  };
  println!(
    "{} Event {} for source {}: {} ({})",
    style(BOOKS).cyan(),
    style(event.id).yellow(),
    style(event.source_id).yellow(),
    status,
    event.counts
  );
  if let Some(reason) = &event.error {
    println!("   {} {}", style("Error:").red().bold(), style(reason).white());
  }
}

fn print_work_line(work: &Work) {
  println!(
    "\n{}. {} {}",
    style(work.id).yellow(),
    style(work.label()).white().bold(),
    style(format!("[{}]", work.status)).cyan()
  );
  if let Some(doi) = &work.doi {
    println!("   {} {}", style("DOI:").green(), style(doi).blue().underlined());
  }
  if let Some(abstract_text) = &work.abstract_text {
    let preview = abstract_text.chars().take(100).collect::<String>();
    let preview = if abstract_text.chars().count() > 100 { format!("{}...", preview) } else { preview };
    println!("   {} {}", style("Abstract:").green(), style(preview).white().italic());
  }
}

fn print_work(work: &Work) {
  println!("\n{} Work details:", style(PAPER).green());
  println!("   {} {}", style("ID:").green().bold(), style(work.id).yellow());
  println!("   {} {}", style("Status:").green().bold(), style(work.status).cyan());
  if let Some(title) = &work.title {
    println!("   {} {}", style("Title:").green().bold(), style(title).white());
  }
  if let Some(date) = &work.publication_date {
    println!("   {} {}", style("Published:").green().bold(), style(date).white());
  }
  println!("   {} {}", style("Type:").green().bold(), style(work.work_type).white());
  if let Some(doi) = &work.doi {
    println!("   {} {}", style("DOI:").green().bold(), style(doi).blue().underlined());
  }
  if let Some(url) = &work.url {
    println!("   {} {}", style("URL:").green().bold(), style(url).blue().underlined());
  }
  if !work.authors.is_empty() {
    println!("   {} {}", style("Authors:").green().bold(), style(work.authors.join("; ")).white());
  }
  if !work.keywords.is_empty() {
    println!("   {} {}", style("Keywords:").green().bold(), style(work.keywords.join(", ")).white());
  }
  if let Some(id) = &work.openalex_id {
    println!("   {} {}", style("OpenAlex:").green().bold(), style(id).blue().underlined());
  }
  let geometry = if work.has_geometry() { work.geometry.describe() } else { "none".to_string() };
  println!("   {} {}", style("Geometry:").green().bold(), style(geometry).white());
  let temporal = work.temporal.iter().map(ToString::to_string).collect::<Vec<_>>();
  let temporal = if temporal.is_empty() { "none".to_string() } else { temporal.join(", ") };
  println!("   {} {}", style("Time period:").green().bold(), style(temporal).white());
  if !work.provenance.is_empty() {
    println!("   {}", style("Provenance:").green().bold());
    for line in work.provenance.lines() {
      println!("     {}", style(line).dim());
    }
  }
}

#[tokio::main]
async fn main() -> Result<(), GeoharvestdErrors> {
  let cli = Cli::parse();
  setup_logging(cli.verbose, cli.log_dir.as_deref())?;

  let config = Config::load_or_default(cli.config.as_deref())?;
  let path = cli.path.clone().unwrap_or_else(|| config.database_path.clone());
  debug!("Database path: {}", path.display());

  match cli.command {
    Commands::Init => {
      if cli.path.is_none() {
        println!(
          "{} Using database path: {}",
          style(BOOKS).cyan(),
          style(path.display()).yellow()
        );
      }

      if path.exists() {
        println!(
          "{} Database already exists at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        if !confirm(
          cli.accept_defaults,
          "Do you want to reinitialize this database? This will erase all existing data",
        )? {
          println!("{} Keeping existing database", style("ℹ").blue());
          return Ok(());
        }

        println!("{} Removing existing database", style(WARNING).yellow());
        remove_database_files(&path)?;
      }

      println!(
        "{} Initializing database at: {}",
        style(ROCKET).cyan(),
        style(path.display()).yellow()
      );
      open_database(&path).await?;

      println!("{} Database initialized successfully!", style(SUCCESS).green());
      Ok(())
    },

    Commands::Clean => {
      if !path.exists() {
        println!(
          "{} No database found at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );
        return Ok(());
      }

      println!("{} Database found at: {}", style(WARNING).yellow(), style(path.display()).yellow());
      if !cli.accept_defaults {
        if !dialoguer::Confirm::new()
          .with_prompt("Are you sure you want to delete this database?")
          .default(false)
          .wait_for_newline(true)
          .interact()?
        {
          println!("{} Operation cancelled", style("✖").red());
          return Ok(());
        }

        let input = dialoguer::Input::<String>::new()
          .with_prompt(format!(
            "{} Type {} to confirm deletion",
            style("⚠️").red(),
            style("DELETE").red().bold()
          ))
          .interact_text()?;

        if input != "DELETE" {
          println!("{} Operation cancelled", style("✖").red());
          return Ok(());
        }
      }

      println!("{} Removing database: {}", style(WARNING).yellow(), style(path.display()).yellow());
      remove_database_files(&path)?;
      println!("{} Database files cleaned", style(SUCCESS).green());
      Ok(())
    },

    Commands::Source(command) => {
      let db = open_database(&path).await?;
      match command {
        SourceCommands::Add { name, url, feed_type, metadata_prefix, set, work_type, interval } => {
          let mut source = SourceConfig::new(name, url, feed_type);
          source.metadata_prefix = metadata_prefix;
          source.set_spec = set;
          if let Some(work_type) = work_type {
            source.default_work_type = work_type;
          }
          if let Some(interval) = interval {
            source.harvest_interval_minutes = interval;
          }

          let source = db.add_source(&source).await?;
          println!(
            "{} Added source {} with ID: {}",
            style(SAVE).green(),
            style(&source.config.name).white().bold(),
            style(source.id).yellow()
          );
        },
        SourceCommands::List => {
          let sources = db.list_sources().await?;
          if sources.is_empty() {
            println!("{} No sources registered", style(WARNING).yellow());
          }
          sources.iter().for_each(print_source);
        },
        SourceCommands::Due => {
          let due = db.due_sources(Utc::now()).await?;
          if due.is_empty() {
            println!("{} No sources due for harvesting", style(SUCCESS).green());
          } else {
            println!("{} {} sources due:", style(LOOKING_GLASS).cyan(), style(due.len()).yellow());
            due.iter().for_each(print_source);
          }
        },
        SourceCommands::Import { file } => {
          let registry = SourceRegistry::load(&file)?;
          let (mut added, mut updated) = (0, 0);
          for config in &registry.sources {
            let (source, created) = db.upsert_source(config).await?;
            debug!("Imported source {} ({})", source.id, source.config.name);
            if created {
              added += 1;
            } else {
              updated += 1;
            }
          }
          println!(
            "{} Imported {} sources: {} added, {} updated",
            style(SUCCESS).green(),
            style(registry.sources.len()).yellow(),
            added,
            updated
          );
        },
      }
      Ok(())
    },

    Commands::Harvest { source_id, max_records } => {
      let db = open_database(&path).await?;
      let harvester = Harvester::from_config(db, &config)?;

      println!("{} Harvesting source {}", style(GLOBE).cyan(), style(source_id).yellow());
      let event = harvester.harvest(source_id, max_records).await?;
      print_event(&event);
      Ok(())
    },

    Commands::HarvestDue => {
      let db = open_database(&path).await?;
      let harvester = Harvester::from_config(db, &config)?;

      let events = harvester.harvest_due(Utc::now()).await?;
      if events.is_empty() {
        println!("{} No sources due for harvesting", style(SUCCESS).green());
      }
      events.iter().for_each(print_event);
      Ok(())
    },

    Commands::Contribute { work_id, geometry, start, end, actor } => {
      let db = open_database(&path).await?;
      let curator = Curator::new(Arc::new(db));

      let geometry = geometry.as_deref().map(GeometryCollection::parse_input).transpose()?;
      let temporal = match (start, end) {
        (None, None) => None,
        (start, end) => Some(TemporalExtent::new(start, end)?),
      };
      let work = curator.contribute(work_id, geometry, temporal, &Actor::user(actor)).await?;
      println!(
        "{} Work {} is now {}",
        style(SAVE).green(),
        style(work.id).yellow(),
        style(work.status).cyan()
      );
      Ok(())
    },

    Commands::Publish { work_id, actor } => {
      let curator = Curator::new(Arc::new(open_database(&path).await?));
      let work = curator.publish(work_id, &Actor::admin(actor)).await?;
      println!("{} Published: {}", style(SUCCESS).green(), style(work.label()).white().bold());
      Ok(())
    },

    Commands::Unpublish { work_id, actor } => {
      let curator = Curator::new(Arc::new(open_database(&path).await?));
      let work = curator.unpublish(work_id, &Actor::admin(actor)).await?;
      println!("{} Back to {}: {}", style(SAVE).green(), style(work.status).cyan(), work.label());
      Ok(())
    },

    Commands::Withdraw { work_id, actor } => {
      let curator = Curator::new(Arc::new(open_database(&path).await?));
      let work = curator.withdraw(work_id, &Actor::admin(actor)).await?;
      println!("{} Withdrawn: {}", style(WARNING).yellow(), work.label());
      Ok(())
    },

    Commands::List {
      statuses,
      published,
      source,
      work_type,
      text,
      from_year,
      to_year,
      bbox,
      limit,
      offset,
    } => {
      let db = open_database(&path).await?;
      let filter = WorkFilter {
        statuses,
        source_id: source,
        work_type,
        text,
        year_from: from_year,
        year_to: to_year,
        bbox,
        limit,
        offset,
      };
      let works =
        if published { db.list_published(&filter).await? } else { db.list_works(&filter).await? };

      if works.is_empty() {
        println!("{} No works found", style(WARNING).yellow());
      } else {
        println!("{} Found {} works:", style(SUCCESS).green(), style(works.len()).yellow());
        works.iter().for_each(print_work_line);
      }
      Ok(())
    },

    Commands::Queue => {
      let db = open_database(&path).await?;
      let works = db.list_needing_contribution().await?;
      if works.is_empty() {
        println!("{} Nothing waiting for contributions", style(SUCCESS).green());
      } else {
        println!(
          "{} {} works need a geometry or time period:",
          style(LOOKING_GLASS).cyan(),
          style(works.len()).yellow()
        );
        works.iter().for_each(print_work_line);
      }
      Ok(())
    },

    Commands::Events { source_id } => {
      let db = open_database(&path).await?;
      let events = db.list_events(source_id).await?;
      if events.is_empty() {
        println!("{} No harvesting runs for source {}", style(WARNING).yellow(), source_id);
      }
      events.iter().for_each(print_event);
      Ok(())
    },

    Commands::Show { work_id, json } => {
      let db = open_database(&path).await?;
      match db.get_work(work_id).await? {
        Some(work) if json => println!("{}", serde_json::to_string_pretty(&work)?),
        Some(work) => print_work(&work),
        None => println!("{} Work {} not found", style(WARNING).yellow(), work_id),
      }
      Ok(())
    },
  }
}
