//! Keeper - command-line front-end for the version tracking engine.
//!
//! Thin dispatch over the engine's manager, store and scheduler. Bulk
//! operations run as background jobs with progress on stderr; results go
//! to stdout.

mod commands;
mod logging;
mod progress;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use commands::{Cli, Commands, ProjectCommand, TagCommand};
use keeper_engine::manager::absolute_path;
use keeper_engine::{
    register_default_handlers, verify_and_record, EventType, Job, JobStatus, KeeperConfig,
    RelinkOptions, Scheduler, TrackedFile, VerificationResult, VersionManager,
};
use progress::JobProgress;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(&cli));
}

/// Load settings, install logging and dispatch. Returns the exit code.
fn run(cli: &Cli) -> i32 {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 2;
        }
    };
    let _guard = logging::init_logger(config.log_dir.as_deref());

    let stdout = io::stdout();
    match run_cli(cli, config, &mut stdout.lock()) {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            2
        }
    }
}

fn load_config(cli: &Cli) -> Result<KeeperConfig> {
    let mut config = KeeperConfig::load().context("Failed to load keeper.toml")?;
    apply_overrides(&mut config, cli);
    Ok(config)
}

/// Command-line flags win over file and environment values.
fn apply_overrides(config: &mut KeeperConfig, cli: &Cli) {
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.pin_dir {
        config.pin_storage_path = Some(dir.clone());
    }
}

/// An open installation: manager plus a scheduler with the built-in handlers.
struct Session {
    manager: Arc<VersionManager>,
    scheduler: Scheduler,
    quiet: bool,
}

impl Session {
    fn open(config: &KeeperConfig, quiet: bool) -> Result<Self> {
        let manager = Arc::new(config.open_manager().with_context(|| {
            format!("Failed to open data directory {}", config.data_dir.display())
        })?);
        let scheduler = Scheduler::new(config.worker_count());
        register_default_handlers(&scheduler, Arc::clone(&manager));
        Ok(Session {
            manager,
            scheduler,
            quiet,
        })
    }

    /// Look a file up by id, then by path.
    fn resolve(&self, reference: &str) -> Result<TrackedFile> {
        let store = self.manager.store();
        if let Some(file) = store.get_file(reference)? {
            return Ok(file);
        }
        let path = absolute_path(Path::new(reference))?;
        store
            .get_file_by_path(&path)?
            .ok_or_else(|| anyhow!("No tracked file matches '{}'", reference))
    }

    /// Enqueue a job and wait for it. Anything but COMPLETED is an error.
    fn run_job(&self, job: Job) -> Result<Job> {
        let events = self.scheduler.subscribe();
        let id = self.scheduler.enqueue(job);
        let job = JobProgress::new(self.quiet).wait(&events, id)?;
        match job.status {
            JobStatus::Completed => Ok(job),
            status => bail!(
                "{} {}: {}",
                job.job_type,
                status,
                job.error.as_deref().unwrap_or("no error recorded")
            ),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

fn print_file(out: &mut dyn Write, file: &TrackedFile) -> io::Result<()> {
    let marker = if file.is_favorite { "*" } else { " " };
    writeln!(
        out,
        "{:<8} {}{}  {}  {}",
        file.status.to_string(),
        marker,
        file.display_name,
        file.id,
        file.file_path.display()
    )
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli, config: KeeperConfig, out: &mut dyn Write) -> Result<()> {
    let session = Session::open(&config, cli.quiet)?;
    let manager = &session.manager;
    let store = manager.store();

    match &cli.command {
        Commands::Add {
            path,
            message,
            name,
        } => {
            let (file, version) = manager.register(path, message, name.as_deref())?;
            writeln!(
                out,
                "Tracking {} ({}) at version {}",
                file.display_name, file.id, version.version_number
            )?;
        }

        Commands::Commit { file, message } => {
            let file = session.resolve(file)?;
            let version = manager.commit(&file.id, message)?;
            writeln!(
                out,
                "Created version {} of {}",
                version.version_number, file.display_name
            )?;
        }

        Commands::Status { all, tag, project } => {
            let files = match (tag, project) {
                (Some(tag), _) => store.list_files_by_tag(tag)?,
                (None, Some(project)) => store.list_files_by_project(Some(project.as_str()), *all)?,
                (None, None) => store.list_files(*all)?,
            };
            for file in &files {
                print_file(out, file)?;
            }
        }

        Commands::Verify { file: Some(file) } => {
            let file = session.resolve(file)?;
            let status = verify_and_record(manager, &file.id)?;
            writeln!(out, "{}: {}", file.display_name, status)?;
        }

        Commands::Verify { file: None } => {
            let job = session.run_job(Job::verify_all())?;
            let summary = job.result.unwrap_or_default();
            writeln!(
                out,
                "Checked {}: {} ok, {} modified, {} missing",
                summary["checked"], summary["ok"], summary["modified"], summary["missing"]
            )?;
        }

        Commands::Log { file } => {
            let file = session.resolve(file)?;
            for version in store.list_versions(&file.id)? {
                let pin = if version.is_pinned { " [pinned]" } else { "" };
                writeln!(
                    out,
                    "v{}  {}  {}  {}{}",
                    version.version_number,
                    version.created_at,
                    format_bytes(version.file_size),
                    version.commit_message,
                    pin
                )?;
            }
        }

        Commands::Restore { file, version } => {
            let file = session.resolve(file)?;
            session.run_job(Job::restore(&file.id, *version))?;
            writeln!(out, "Restored {} to version {}", file.display_name, version)?;
        }

        Commands::Pin { file, version } => {
            let file = session.resolve(file)?;
            let job = session.run_job(Job::pin_copy(&file.id, *version))?;
            let pinned = job
                .result
                .as_ref()
                .and_then(|r| r["pinned_path"].as_str().map(str::to_string))
                .unwrap_or_default();
            writeln!(out, "Pinned version {} to {}", version, pinned)?;
        }

        Commands::Unpin { file, version } => {
            let file = session.resolve(file)?;
            if manager.unpin(&file.id, *version)? {
                store.append_event(
                    &file.id,
                    EventType::Unpin,
                    Some(&format!("Version {} unpinned", version)),
                )?;
                writeln!(out, "Unpinned version {}", version)?;
            } else {
                writeln!(out, "Version {} is not pinned", version)?;
            }
        }

        Commands::Rm { file } => {
            let file = session.resolve(file)?;
            manager.delete_file(&file.id)?;
            writeln!(out, "Deleted {} and all its versions", file.display_name)?;
        }

        Commands::Relink {
            root,
            hash,
            ext,
            max_size_mb,
            within_days,
        } => {
            let options = RelinkOptions {
                root_path: absolute_path(root)?,
                use_hash: *hash,
                exts: ext.clone(),
                max_size_mb: *max_size_mb,
                within_days: *within_days,
            };
            let job = session.run_job(Job::relink_scan(&options)?)?;
            let summary = job.result.unwrap_or_default();
            writeln!(
                out,
                "Checked {}: {} relinked, {} not found ({} candidates scanned)",
                summary["checked"], summary["relinked"], summary["not_found"], summary["scanned"]
            )?;
        }

        Commands::Tag { action } => match action {
            TagCommand::Add { file, name } => {
                let file = session.resolve(file)?;
                let tag = manager.add_tag(&file.id, name)?;
                writeln!(out, "Tagged {} with '{}'", file.display_name, tag.name)?;
            }
            TagCommand::Rm { file, name } => {
                let file = session.resolve(file)?;
                if !manager.remove_tag(&file.id, name)? {
                    bail!("{} is not tagged '{}'", file.display_name, name);
                }
                writeln!(out, "Removed tag '{}' from {}", name, file.display_name)?;
            }
            TagCommand::Ls { file } => {
                let tags = match file {
                    Some(file) => manager.file_tags(&session.resolve(file)?.id)?,
                    None => store.list_tags()?,
                };
                for tag in tags {
                    writeln!(out, "{}", tag.name)?;
                }
            }
        },

        Commands::Project { action } => match action {
            ProjectCommand::Add {
                name,
                description,
                color,
            } => {
                let project =
                    store.create_project(name, description.as_deref(), color.as_deref())?;
                writeln!(out, "Created project {} ({})", project.name, project.id)?;
            }
            ProjectCommand::Ls => {
                for (project, count) in store.list_projects_with_counts()? {
                    writeln!(
                        out,
                        "{}  {}  {} files  {}",
                        project.id, project.name, count, project.color
                    )?;
                }
            }
            ProjectCommand::Rm { id } => {
                store.delete_project(id)?;
                writeln!(out, "Deleted project {}", id)?;
            }
            ProjectCommand::Assign { file, project } => {
                let file = session.resolve(file)?;
                store.set_file_project(&file.id, project.as_deref())?;
                match project {
                    Some(project) => writeln!(out, "Assigned {} to {}", file.display_name, project)?,
                    None => writeln!(out, "Unassigned {}", file.display_name)?,
                }
            }
        },

        Commands::Events { file, limit } => {
            let file = session.resolve(file)?;
            for event in store.list_events(&file.id, *limit, false)? {
                writeln!(
                    out,
                    "{}  {:<15} {}",
                    event.created_at,
                    event.event_type.to_string(),
                    event.description.as_deref().unwrap_or("")
                )?;
            }
        }

        Commands::Integrity { file, version } => {
            let file = session.resolve(file)?;
            let results: BTreeMap<i64, VerificationResult> = match version {
                Some(n) => [(*n, manager.verify_version_integrity(&file.id, *n)?)]
                    .into_iter()
                    .collect(),
                None => manager.verify_all_versions(&file.id)?,
            };
            let mut invalid = 0;
            for (n, result) in &results {
                if result.is_valid {
                    writeln!(out, "v{}: OK", n)?;
                } else {
                    invalid += 1;
                    writeln!(
                        out,
                        "v{}: INVALID ({})",
                        n,
                        result.error.as_deref().unwrap_or("unknown")
                    )?;
                }
            }
            if invalid > 0 {
                bail!("{} version(s) failed the integrity check", invalid);
            }
        }

        Commands::Migrate => {
            let columns = store.migrate()?;
            let artifacts = manager.migrate_existing_files()?;
            writeln!(
                out,
                "Added {} column(s), migrated {} backup artifact(s)",
                columns, artifacts
            )?;
        }

        Commands::Rename { file, name } => {
            let file = session.resolve(file)?;
            manager.rename_file(&file.id, name)?;
            writeln!(out, "Renamed {} to {}", file.display_name, name.trim())?;
        }

        Commands::Favorite { file } => {
            let file = session.resolve(file)?;
            let favorite = store.toggle_favorite(&file.id)?;
            let state = if favorite { "marked" } else { "unmarked" };
            writeln!(out, "{} {} as favorite", file.display_name, state)?;
        }

        Commands::Archive { file, undo } => {
            let file = session.resolve(file)?;
            store.set_archived(&file.id, !*undo)?;
            let state = if *undo { "Unarchived" } else { "Archived" };
            writeln!(out, "{} {}", state, file.display_name)?;
        }

        Commands::Meta { file, refresh } => {
            let file = session.resolve(file)?;
            let meta = if *refresh {
                manager.extract_metadata(&file.id)?
            } else {
                store.get_metadata(&file.id)?
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&meta)?)?;
        }

        Commands::Open {
            file,
            version,
            reveal,
        } => {
            let file = session.resolve(file)?;
            match (version, reveal) {
                (Some(n), false) => manager.open_version(&file.id, *n)?,
                (Some(n), true) => manager.reveal_version(&file.id, *n)?,
                (None, false) => manager.open_file(&file.id, None)?,
                (None, true) => manager.reveal_file(&file.id)?,
            }
        }
    }

    Ok(())
}
