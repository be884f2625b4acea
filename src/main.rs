use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context as _, Result, eyre};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskrepo::events::{EmittedEvent, EventBus, JournalEventBus, MemoryEventBus};
use taskrepo::indexer::sort_tasks;
use taskrepo::models::{format_date_key, parse_date_key};
use taskrepo::{
    Context, DateField, DateRange, EventPayload, Repository, RepositoryConfig, SqliteStorage, Storage, Task,
    TaskIndexer, UpdateOptions, now_ms,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "taskrepo")]
#[command(about = "TaskRepo CLI - Indexed task repository with snapshot persistence and change events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the store directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    store_path: PathBuf,

    /// Config file (default: <store>/.taskrepo/config.yml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Replace the tasks of a file with a JSON array of tasks
    Import {
        /// File key the tasks belong to
        key: String,
        /// JSON file containing an array of tasks
        tasks: PathBuf,
    },

    /// Add one task to a file
    Add {
        file: String,
        content: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
    },

    /// Mark a task as completed
    Complete { id: String },

    /// Remove every task of a file
    Remove { key: String },

    /// Remove one task by id
    RemoveTask { id: String },

    /// List tasks; all given criteria must match
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, conflicts_with = "open")]
        completed: bool,
        #[arg(long)]
        open: bool,
        /// Inclusive lower date bound (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Inclusive upper date bound (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Date field for --from/--to: due, start or scheduled
        #[arg(long, default_value = "due")]
        field: String,
        /// Print tasks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show task counts by project, tag and status
    Summary,

    /// Show journaled change events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Write a consolidated snapshot now
    Persist,

    /// Remove all tasks and stored state
    Clear,

    /// Print the resolved configuration
    Config,
}

fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = RepositoryConfig::resolve(cli.config.as_deref(), &cli.store_path)?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let mut repo = open_repository(&cli.store_path, &config)?;
    let result = run(&mut repo, cli.command).and_then(|()| repo.cleanup());
    if config.journal {
        // Events may have been journaled even when the command failed
        repo.storage()
            .record_last_sequence(Context::global().seq().current())
            .context("Failed to record last sequence")?;
    }

    result
}

fn open_repository(store_path: &Path, config: &RepositoryConfig) -> Result<Repository> {
    let storage = SqliteStorage::open(store_path, config)?;
    let context = Context::global();

    let bus: Arc<dyn EventBus> = if config.journal {
        let journal = JournalEventBus::new(storage.journal_path());
        // Keep sequence numbers increasing across invocations
        let last = match storage.last_sequence()? {
            Some(seq) => seq,
            None => {
                let seq = journal.read_all()?.iter().map(|e| e.payload.seq()).max().unwrap_or(0);
                debug!(last_seq = seq, "No recorded sequence, scanned journal");
                seq
            }
        };
        context.seq().resume_from(last);
        debug!(last_seq = last, "Resumed sequence");
        Arc::new(journal)
    } else {
        MemoryEventBus::new()
    };

    let mut repo = Repository::new(TaskIndexer::new(), storage, bus, context, config);
    repo.initialize();
    Ok(repo)
}

fn run(repo: &mut Repository, command: Commands) -> Result<()> {
    match command {
        Commands::Import { key, tasks } => {
            let content =
                fs::read_to_string(&tasks).with_context(|| format!("Failed to read {}", tasks.display()))?;
            let tasks: Vec<Task> =
                serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", tasks.display()))?;
            let count = tasks.len();
            if repo.update_file(&key, &tasks, 0, UpdateOptions::default())? {
                println!("{} {} tasks into {}", "Imported".green(), count, key.bold());
            } else {
                println!("{} is already up to date", key.bold());
            }
        }
        Commands::Add {
            file,
            content,
            project,
            tags,
            due,
            priority,
        } => {
            let mut task = Task::new(uuid::Uuid::now_v7().to_string(), &file, content).with_tags(tags);
            if let Some(project) = project {
                task = task.with_project(project);
            }
            if let Some(due) = due {
                task = task.with_due(parse_date(&due)?);
            }
            if let Some(priority) = priority {
                task = task.with_priority(priority);
            }

            let mut tasks = repo
                .storage()
                .load_augmented(&file)?
                .map(|record| record.data)
                .unwrap_or_default();
            task = task.with_line(tasks.len() as u32 + 1);
            let id = task.id.clone();
            tasks.push(task);
            repo.update_file(&file, &tasks, 0, UpdateOptions::default())?;
            info!(id = %id, file = %file, "Added task");
            println!("{} {}", "Added".green(), id.dimmed());
        }
        Commands::Complete { id } => {
            let task = repo.by_id(&id).ok_or_else(|| eyre!("Task not found: {}", id))?;
            if task.completed {
                println!("{} is already completed", id.dimmed());
                return Ok(());
            }
            if !repo.update_single_task(task.complete(now_ms()), 0)? {
                return Err(eyre!("Task {} has no stored record to update", id));
            }
            println!("{} {}", "Completed".green(), id.dimmed());
        }
        Commands::Remove { key } => {
            if repo.remove_file(&key, 0)? {
                println!("{} {}", "Removed".red(), key.bold());
            } else {
                println!("Nothing stored for {}", key.bold());
            }
        }
        Commands::RemoveTask { id } => {
            if repo.remove_task_by_id(&id, 0)? {
                println!("{} {}", "Removed".red(), id.dimmed());
            } else {
                println!("Task not found: {}", id);
            }
        }
        Commands::List {
            project,
            tags,
            completed,
            open,
            from,
            to,
            field,
            json,
        } => {
            let mut selections = Vec::new();
            if let Some(project) = &project {
                selections.push(repo.by_project(project));
            }
            if !tags.is_empty() {
                selections.push(repo.by_tags(tags.as_slice()));
            }
            if completed || open {
                selections.push(repo.by_status(completed));
            }
            if from.is_some() || to.is_some() {
                let range = DateRange {
                    from: from.as_deref().map(parse_date).transpose()?,
                    to: to.as_deref().map(parse_date).transpose()?,
                    field: parse_field(&field)?,
                };
                selections.push(repo.by_date_range(&range));
            }

            let mut tasks = intersect(selections).unwrap_or_else(|| repo.all());
            sort_tasks(&mut tasks, &[]);

            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks");
            } else {
                for task in &tasks {
                    println!("{}", format_task(task));
                }
            }
        }
        Commands::Summary => {
            let summary = repo.summary();
            println!("{} {}", "Total:".bold(), repo.total_task_count());
            println!("  indexed   {}", summary.total);
            println!("  ics       {}", repo.ics_events().len());
            println!("  file      {}", repo.file_task_paths().len());

            println!("{}", "By status:".bold());
            for (completed, count) in &summary.by_status {
                let label = if *completed { "completed" } else { "open" };
                println!("  {:<20} {}", label, count);
            }
            println!("{}", "By project:".bold());
            for (project, count) in &summary.by_project {
                println!("  {:<20} {}", project.cyan(), count);
            }
            println!("{}", "By tag:".bold());
            for (tag, count) in &summary.by_tag {
                println!("  {:<20} {}", format!("#{}", tag).yellow(), count);
            }

            let stats = repo.storage().stats()?;
            println!("{}", "Storage:".bold());
            println!("  augmented {}", stats.augmented);
            println!("  snapshot  {}", stats.consolidated);
            println!("  ics       {}", stats.ics);
        }
        Commands::Events { limit } => {
            let journal = JournalEventBus::new(repo.storage().journal_path());
            let events = journal.read_all()?;
            let skip = events.len().saturating_sub(limit);
            for event in &events[skip..] {
                println!("{}", format_event(event));
            }
        }
        Commands::Persist => {
            repo.persist()?;
            println!("{}", "Snapshot written".green());
        }
        Commands::Clear => {
            repo.clear(0)?;
            println!("{}", "Repository cleared".red());
        }
        Commands::Config => {}
    }

    Ok(())
}

fn parse_date(value: &str) -> Result<i64> {
    parse_date_key(value).ok_or_else(|| eyre!("Invalid date '{}', expected YYYY-MM-DD", value))
}

fn parse_field(value: &str) -> Result<DateField> {
    match value {
        "due" => Ok(DateField::Due),
        "start" => Ok(DateField::Start),
        "scheduled" => Ok(DateField::Scheduled),
        other => Err(eyre!("Unknown date field '{}', expected due, start or scheduled", other)),
    }
}

/// Tasks present in every selection, in the order of the first; None when nothing was selected
fn intersect(selections: Vec<Vec<Task>>) -> Option<Vec<Task>> {
    let mut iter = selections.into_iter();
    let mut tasks = iter.next()?;
    for selection in iter {
        let ids: BTreeSet<String> = selection.into_iter().map(|t| t.id).collect();
        tasks.retain(|t| ids.contains(&t.id));
    }
    Some(tasks)
}

fn format_task(task: &Task) -> String {
    let mut line = if task.completed {
        format!("[x] {}", task.content.dimmed())
    } else {
        format!("[ ] {}", task.content)
    };

    if let Some(project) = &task.metadata.project {
        line.push_str(&format!(" {}", format!("+{}", project).cyan()));
    }
    for tag in &task.metadata.tags {
        line.push_str(&format!(" {}", format!("#{}", tag).yellow()));
    }
    if let Some(priority) = task.metadata.priority {
        line.push_str(&format!(" {}", format!("p{}", priority).magenta()));
    }
    if let Some(due) = task.metadata.due_date {
        line.push_str(&format!(" {}", format!("due:{}", format_date_key(due)).red()));
    }
    line.push_str(&format!("  {} {}", task.file_path.dimmed(), task.id.dimmed()));
    line
}

fn format_event(event: &EmittedEvent) -> String {
    match &event.payload {
        EventPayload::TaskCacheUpdated(update) => format!(
            "{:>6} {} {} changed={} total={} files={}",
            update.seq.to_string().bold(),
            event.scope.dimmed(),
            event.name.green(),
            update.stats.changed,
            update.stats.total,
            update.changed_files.join(",")
        ),
        EventPayload::CacheReady(ready) => format!(
            "{:>6} {} {} initial={}",
            ready.seq.to_string().bold(),
            event.scope.dimmed(),
            event.name.cyan(),
            ready.initial
        ),
    }
}
