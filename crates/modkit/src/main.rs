mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::debug;
use serde::Serialize;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use modkit_core::kernel::bootstrap::Application;
use modkit_core::kernel::error::{Error, Result};
use modkit_core::module_system::hooks::SchemaOutcome;
use modkit_core::module_system::manifest::ModuleSource;
use modkit_core::module_system::scaffold::ScaffoldOptions;
use modkit_core::module_system::ModuleManager;
use modkit_core::storage::ConfigFormat;

use cli::{parse_source, CliArgs, Commands, ConfigOutput};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
        return;
    }
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::Other(format!("cannot encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn describe_outcome(outcome: &SchemaOutcome) -> String {
    match outcome {
        SchemaOutcome::Applied(n) => format!("applied {} step(s)", n),
        SchemaOutcome::Skipped(reason) => format!("skipped ({})", reason),
        SchemaOutcome::Failed(e) => format!("failed: {}", e),
    }
}

/// Runs one command; `Ok(false)` means it ran but reported a failed check.
async fn run(app: &Application, command: Commands, json: bool) -> Result<bool> {
    match command {
        Commands::Discover => {
            let report = app.manager().discover().await?;
            if json {
                print_json(&report)?;
            } else {
                for name in &report.discovered {
                    println!("Discovered: {}", name);
                }
                for sync in &report.synced {
                    println!("Synced: {} {} -> {}", sync.name, sync.from, sync.to);
                }
                for rejected in &report.rejected {
                    println!("Rejected: {} ({})", rejected.name, rejected.reason);
                }
                println!(
                    "{} new, {} synced, {} unchanged",
                    report.discovered.len(),
                    report.synced.len(),
                    report.unchanged.len()
                );
            }
        }
        Commands::List { enabled } => {
            let modules = if enabled {
                app.manager().enabled_modules().await?
            } else {
                app.manager().modules().await?
            };
            if json {
                print_json(&modules)?;
            } else if modules.is_empty() {
                println!("No modules registered.");
            } else {
                for module in &modules {
                    let source = module.source.as_ref().map(ModuleSource::slug).unwrap_or_default();
                    println!("{:<24} {:<12} {:<9} {}", module.name(), module.version, module.status.to_string(), source);
                }
            }
        }
        Commands::Enable { name } => {
            let module = app.enable_module(&name).await?;
            println!("Enabled module '{}' ({})", module.name(), module.version);
        }
        Commands::Disable { name } => {
            let module = app.disable_module(&name).await?;
            println!("Disabled module '{}'", module.name());
        }
        Commands::CheckDeps { name } => {
            let result = app.manager().check_dependencies(&name).await?;
            if json {
                print_json(&result)?;
            } else if result.satisfied {
                println!("All requirements of '{}' are satisfied.", name);
            } else {
                for missing in &result.missing {
                    println!("Missing: {}", missing);
                }
                for (dependency, mismatch) in &result.version_mismatch {
                    println!(
                        "Version mismatch: {} requires {}, found {}",
                        dependency, mismatch.required, mismatch.current
                    );
                }
            }
            return Ok(result.satisfied);
        }
        Commands::Install { archive } => {
            let installed = app.install(&archive).await?;
            if json {
                print_json(&installed)?;
            } else {
                println!(
                    "Installed module '{}' ({}) at {}",
                    installed.name,
                    installed.version,
                    installed.path.display()
                );
            }
        }
        Commands::Make {
            name,
            description,
            author,
            module_version,
        } => {
            let options = ScaffoldOptions {
                description,
                author,
                version: module_version,
            };
            let created = app.scaffolder().scaffold(&name, options).await?;
            app.manager().discover().await?;
            if json {
                print_json(&created)?;
            } else {
                println!("Created module '{}' at {}", created.name, created.path.display());
                for file in &created.files {
                    println!("  {}", file.display());
                }
            }
        }
        Commands::Uninstall { name } => {
            app.uninstall(&name).await?;
            println!("Uninstalled module '{}'", name);
        }
        Commands::Migrate { name } => {
            let outcome = app.manager().migrate(&name).await?;
            println!("Migrations for '{}': {}", name, describe_outcome(&outcome));
        }
        Commands::MigrateRollback { name, steps } => {
            let outcome = app.manager().rollback(&name, steps).await?;
            println!("Rollback for '{}': {}", name, describe_outcome(&outcome));
        }
        Commands::Seed { name } => {
            let outcome = app.manager().seed(&name).await?;
            println!("Seeding '{}': {}", name, describe_outcome(&outcome));
        }
        Commands::SetSource { name, source } => {
            let source = match source {
                Some(value) => {
                    let (owner, repo) = parse_source(&value)?;
                    Some(ModuleSource::new(owner, repo))
                }
                None => None,
            };
            let module = app.manager().set_update_source(&name, source).await?;
            match &module.source {
                Some(source) => println!("Module '{}' updates from {}", name, source.slug()),
                None => println!("Module '{}' has no update source", name),
            }
        }
        Commands::PreviewUpdate { name, prerelease } => {
            let preview = app.updater().preview(&name, prerelease.then_some(true)).await?;
            if json {
                print_json(&preview)?;
            } else {
                println!(
                    "{}: {} -> {} ({}){}",
                    preview.module,
                    preview.current_version,
                    preview.latest_version,
                    preview.tag_name,
                    if preview.is_major_update { " [major]" } else { "" }
                );
                println!("Checksum published: {}", if preview.has_checksum { "yes" } else { "no" });
                if preview.compatible {
                    println!("Compatible with this host.");
                } else {
                    for issue in &preview.compatibility_issues {
                        println!("Incompatible: {}", issue);
                    }
                }
                if let Some(notes) = &preview.release_notes {
                    println!();
                    println!("{}", notes);
                }
            }
        }
        Commands::Update { name, prerelease } => {
            let report = app.updater().update(&name, prerelease.then_some(true)).await?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Updated module '{}' from {} to {}",
                    report.module, report.from_version, report.to_version
                );
                if let Some(backup) = &report.backup {
                    println!("Backup: {}", backup.path.display());
                }
                if !report.checksum_verified {
                    println!("No checksum was published; the archive was not verified.");
                }
            }
        }
        Commands::CancelUpdate { name } => {
            if app.updater().cancel_update(&name).await? {
                println!("Released the update lock of '{}'", name);
            } else {
                println!("No update of '{}' is in progress", name);
            }
        }
        Commands::CheckUpdates { force } => {
            let checks = app.updater().check_for_updates(force).await?;
            if json {
                print_json(&checks)?;
            } else if checks.is_empty() {
                println!("No modules have an update source.");
            } else {
                for check in &checks {
                    let status = match (&check.error, &check.latest_version) {
                        (Some(e), _) => format!("error: {}", e),
                        (None, Some(latest)) if check.update_available => format!("update available: {}", latest),
                        (None, Some(_)) => "up to date".to_string(),
                        (None, None) => "no releases".to_string(),
                    };
                    println!("{:<24} {:<12} {}", check.module, check.current_version, status);
                }
            }
        }
        Commands::Rollback { name, backup } => {
            let module = app.updater().rollback(&name, &backup).await?;
            println!("Restored module '{}' ({}) from {}", name, module.version, backup.display());
        }
        Commands::Backups { name } => {
            let backups = app.updater().list_backups(&name).await?;
            if json {
                print_json(&backups)?;
            } else if backups.is_empty() {
                println!("No backups of '{}'.", name);
            } else {
                for backup in &backups {
                    println!(
                        "{}  {:<12} {:>10} B  {}",
                        backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                        backup.version,
                        backup.size,
                        backup.path.display()
                    );
                }
            }
        }
        Commands::DeleteBackup { path } => {
            app.updater().delete_backup(&path).await?;
            println!("Deleted {}", path.display());
        }
        Commands::HealthCheck { name } => {
            let module = app
                .manager()
                .get_module(&name)
                .await?
                .ok_or_else(|| Error::Other(format!("Module '{}' is not registered", name)))?;
            let dir = module.directory(&app.config().modules_path);
            let checker = app.health_checker().clone();
            let provider = module.provider.clone();
            let result = tokio::task::spawn_blocking(move || checker.check(&name, &provider, &dir))
                .await
                .map_err(|e| Error::Other(format!("health check task failed: {}", e)))?;
            if json {
                print_json(&result)?;
            } else {
                println!("Provider loaded:  {}", result.provider_loaded);
                println!("Routes valid:     {}", result.routes_valid);
                println!("Resources valid:  {}", result.resources_valid);
                for e in &result.errors {
                    println!("error: {}", e);
                }
                for w in &result.warnings {
                    println!("warning: {}", w);
                }
            }
            return Ok(result.passes());
        }
        Commands::Config { format } => {
            let format = match format {
                ConfigOutput::Json => ConfigFormat::Json,
                ConfigOutput::Yaml => ConfigFormat::Yaml,
                ConfigOutput::Toml => ConfigFormat::Toml,
            };
            print!("{}", app.config().serialize(format)?);
            println!();
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging(args.verbose);

    let Some(command) = args.command.take() else {
        eprintln!("No command given; run `modkit --help` for the list of commands.");
        return ExitCode::from(2);
    };

    let config_path = args.config_path();
    debug!("Using configuration {}", config_path.display());
    let app = match Application::from_config_file(&config_path, &args.base_dir) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize modkit: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&app, command, args.json).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
