//! Kiln - a multi-project build tool
//!
//! Builds workspaces described by kiln.toml files:
//! - Configurations and transitive dependency resolution
//! - File-system repositories for resolving and publishing
//! - A checksummed artifact cache
//! - Dependency-ordered, optionally parallel tasks

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;
use tracing::debug;

mod cli;

use cli::{CacheCommands, Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use kiln::artifacts::ModuleRevisionId;
use kiln::{
    ArtifactCache, Build, BuildRequest, DependencyReport, ExecutorConfig, KilnError, Result, TaskExecutionGraph,
    TaskRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    // Handle --no-color
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, None, false, &cli).await,
        EffectiveCommand::None => {
            let build = Arc::new(Build::load(cli.config.as_deref())?);
            if build.projects().iter().any(|p| !p.default_tasks.is_empty()) {
                run_tasks(&[], false, None, false, &cli).await
            } else {
                let registry = build.tasks()?;
                print_task_list(&registry, ListFormat::Table, false)
            }
        }
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run {
            tasks,
            dry_run,
            parallel,
            continue_on_failure,
        } => run_tasks(tasks, *dry_run, *parallel, *continue_on_failure, cli).await,

        Commands::Tasks { format, deps } => {
            let build = Arc::new(Build::load(cli.config.as_deref())?);
            let registry = build.tasks()?;
            print_task_list(&registry, format.clone(), *deps)
        }

        Commands::Dependencies {
            configuration,
            project,
            format,
            output,
        } => {
            let build = Build::load(cli.config.as_deref())?;
            let mut report = DependencyReport::new(configuration.clone()).with_format((*format).into());
            if let Some(output) = output {
                report = report.with_output(output);
            }
            match report.generate(&build, project)? {
                Some(text) => print!("{}", text),
                None if !cli.quiet => {
                    println!(
                        "{} Wrote {} report to {}",
                        style("✓").green(),
                        style(report.configuration()).bold(),
                        report.output().map(|p| p.display().to_string()).unwrap_or_default()
                    );
                }
                None => {}
            }
            if matches!(format, GraphFormat::Text) && !cli.quiet {
                if let Some(last) = build.engine().last_resolve_report() {
                    if last.has_unresolved() {
                        eprintln!(
                            "{} {} unresolved dependencies",
                            style("!").yellow().bold(),
                            last.unresolved.len()
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::Resolve {
            configuration,
            project,
            lenient,
        } => {
            let build = Build::load(cli.config.as_deref())?;
            let files = build.resolve(project, configuration, *lenient)?;
            for file in files {
                println!("{}", file.display());
            }
            Ok(())
        }

        Commands::Publish { configuration, project } => {
            let build = Build::load(cli.config.as_deref())?;
            build.publish(project, configuration)?;
            if !cli.quiet {
                println!(
                    "{} Published {} of {}",
                    style("✓").green(),
                    style(configuration).bold(),
                    build.project(project)?.module()
                );
            }
            Ok(())
        }

        Commands::Cache { command } => run_cache_command(command, cli),

        Commands::Check => {
            let build = Arc::new(Build::load(cli.config.as_deref())?);
            let registry = Arc::new(build.tasks()?);

            // add every task once so dependency cycles surface here
            let mut graph = TaskExecutionGraph::new(registry.clone(), ExecutorConfig::default());
            graph.add_tasks(registry.tasks().cloned())?;
            graph.all_tasks()?;

            println!(
                "{} {} is valid ({} projects, {} tasks)",
                style("✓").green(),
                build.root_dir.display(),
                build.projects().len(),
                registry.len()
            );
            Ok(())
        }
    }
}

async fn run_tasks(
    tasks: &[String],
    dry_run: bool,
    parallel: Option<usize>,
    continue_on_failure: bool,
    cli: &Cli,
) -> Result<()> {
    let build = Arc::new(Build::load(cli.config.as_deref())?);
    let registry = Arc::new(build.tasks()?);

    let exec_config = ExecutorConfig {
        parallelism: parallel.unwrap_or(build.settings.parallelism),
        continue_on_failure: continue_on_failure || build.settings.continue_on_failure,
        dry_run,
        progress: !cli.quiet,
    };

    let executer = BuildRequest::new(tasks.to_vec()).build_executer();
    debug!(executer = executer.name(), "selecting tasks");

    let mut graph = TaskExecutionGraph::new(registry.clone(), exec_config);
    executer.select(&build, &registry, &mut graph)?;

    if graph.is_empty() {
        if !cli.quiet {
            println!("{}", style("Nothing to do").dim());
        }
        return Ok(());
    }

    graph.execute().await?;
    Ok(())
}

fn run_cache_command(cmd: &CacheCommands, cli: &Cli) -> Result<()> {
    let cache_dir = Build::load(cli.config.as_deref())
        .map(|build| build.cache_root)
        .unwrap_or_else(|_| ArtifactCache::default_dir());

    let cache = ArtifactCache::new(cache_dir)?;

    match cmd {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            println!("Cache: {}", stats);
        }

        CacheCommands::Clear { module } => match module {
            Some(module) => {
                let revision: ModuleRevisionId = module.parse()?;
                cache.evict(&revision)?;
                println!("{} Evicted {}", style("✓").green(), revision);
            }
            None => {
                cache.clear()?;
                println!("{} Cache cleared", style("✓").green());
            }
        },

        CacheCommands::Path => {
            println!("{}", cache.dir().display());
        }
    }

    Ok(())
}

fn print_task_list(registry: &TaskRegistry, format: ListFormat, show_deps: bool) -> Result<()> {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let paths = registry.paths();
            let max_len = paths.iter().map(|p| p.len()).max().unwrap_or(0);

            for task in registry.tasks() {
                let path = task.path.to_string();
                print!(
                    "  {}{}  {}",
                    style(&path).cyan().bold(),
                    " ".repeat(max_len - path.len()),
                    style(task.description.as_deref().unwrap_or("")).dim()
                );

                if show_deps && !task.depends_on.is_empty() {
                    print!(
                        " {}",
                        style(format!("[deps: {}]", task.depends_on.join(", "))).yellow().dim()
                    );
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for task in registry.tasks() {
                let mut obj = serde_json::Map::new();
                if let Some(desc) = &task.description {
                    obj.insert("description".to_string(), serde_json::json!(desc));
                }
                if show_deps {
                    obj.insert("depends".to_string(), serde_json::json!(task.depends_on));
                }
                tasks.insert(task.path.to_string(), serde_json::Value::Object(obj));
            }
            let json = serde_json::to_string_pretty(&tasks).map_err(|e| KilnError::Io(e.into()))?;
            println!("{}", json);
        }

        ListFormat::Plain => {
            for path in registry.paths() {
                println!("{}", path);
            }
        }
    }

    Ok(())
}
