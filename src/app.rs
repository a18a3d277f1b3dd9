//! Application orchestrator.
//! Loads and merges config, initializes logging, installs the signal handler, validates
//! paths, and dispatches the selected mode.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

use stackcopy::cli::{Args, Command};
use stackcopy::config::paths::config_path;
use stackcopy::fs_ops::TerminalConfirm;
use stackcopy::output as out;
use stackcopy::{
    CONFIG_ENV, Config, FileRef, LogLevel, SimpleMode, SimpleOptions, SortOptions, StackError,
    load_config_from_xml, run_detect, run_simple, run_sort, shutdown,
};

use crate::logging::init_tracing;

const EXIT_PARTIAL: u8 = 23;

fn print_config_location() {
    match config_path() {
        Some((p, true)) => {
            out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {}", p.display()));
            out::print_info(&format!("To override, unset {CONFIG_ENV} or point it at another file."));
        }
        Some((p, false)) => {
            out::print_info(&format!("Default stackcopy config path:\n  {}", p.display()));
            if p.exists() {
                out::print_info("A config file exists at that location.");
            } else {
                out::print_info("No config file exists there; built-in defaults apply.");
            }
        }
        None => out::print_error("Could not determine a default config path"),
    }
}

/// Structured error line keyed by the error's code.
fn log_failure(e: &anyhow::Error) {
    let Some(se) = e.downcast_ref::<StackError>() else {
        error!(error = %format!("{e:#}"), "Run failed");
        return;
    };
    let code = se.code();
    match se {
        StackError::Scan { path, source } => {
            error!(code, kind = "scan", path = %path.display(), error = %source, "Cannot scan source directory")
        }
        StackError::LowSpace {
            required,
            available,
            reserve,
            dest,
        } => {
            error!(code, kind = "low_space", required = *required, available = *available, reserve = *reserve, dest = %dest.display(), "Batch refused")
        }
        StackError::Interrupted => error!(code, kind = "interrupted", "Run aborted by user"),
        other => error!(code, kind = "run_error", error = %other, "Run failed"),
    }
}

fn date_scope(date: Option<NaiveDate>) -> impl Fn(&FileRef) -> bool {
    move |f: &FileRef| date.is_none_or(|d| f.date() == Some(d))
}

fn sort(cfg: &Config, dir: &Path, copy: bool, prefix: Option<String>, date: Option<NaiveDate>) -> Result<ExitCode> {
    cfg.validate(Some(dir))?;
    let opts = SortOptions {
        source: dir.to_path_buf(),
        archive_root: cfg.archive_root.clone(),
        copy,
        prefix,
        force: cfg.force,
        dry_run: cfg.dry_run,
        jobs: cfg.jobs,
        policy: cfg.policy.clone(),
        space: cfg.space_guard(),
    };
    let s = run_sort(&opts, &date_scope(date), &TerminalConfirm)?;

    let lead = if cfg.dry_run { "Dry-run: " } else { "" };
    out::print_user(&format!(
        "{lead}{} stacks accepted, {} rejected; {} outputs and {} inputs relocated, {} other files swept",
        s.stacks_accepted, s.stacks_rejected, s.outputs_relocated, s.inputs_relocated, s.swept
    ));
    for p in &s.partial_groups {
        error!(code = p.code(), kind = "partial_group", error = %p, "Group not fully relocated");
        out::print_warn(&p.to_string());
    }
    if s.failures() > 0 {
        out::print_warn(&format!(
            "{} files not relocated ({} conflicts, {} without a usable time); see the log for details",
            s.failures(),
            s.conflicts,
            s.unplaced
        ));
    }
    Ok(if !s.partial_groups.is_empty() {
        ExitCode::from(EXIT_PARTIAL)
    } else if s.failures() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn detect(cfg: &Config, dir: &Path, date: Option<NaiveDate>) -> Result<ExitCode> {
    cfg.validate(None)?;
    let d = run_detect(dir, cfg.policy.clone(), &date_scope(date))?;
    for c in &d.accepted {
        let oldest = c.input_stems.last().map_or("", String::as_str);
        let nearest = c.input_stems.first().map_or("", String::as_str);
        out::print_user(&format!(
            "{}: {} inputs ({oldest} .. {nearest})",
            c.output_stem,
            c.input_stems.len()
        ));
    }
    if cfg.log_level >= LogLevel::Info {
        for c in &d.rejected {
            if let stackcopy::detect::Outcome::Rejected(reason) = c.outcome {
                out::print_user(&format!("{}: rejected ({reason})", c.output_stem));
            }
        }
    }
    out::print_success(&format!(
        "{} stacks detected, {} candidates rejected",
        d.accepted.len(),
        d.rejected.len()
    ));
    Ok(ExitCode::SUCCESS)
}

fn simple(cfg: &Config, mode: SimpleMode, prefix: Option<String>, date: Option<NaiveDate>) -> Result<ExitCode> {
    cfg.validate(None)?;
    if !mode.source().is_dir() {
        anyhow::bail!("not a directory: {}", mode.source().display());
    }
    let opts = SimpleOptions {
        prefix,
        force: cfg.force,
        dry_run: cfg.dry_run,
        jobs: cfg.jobs,
        space: cfg.space_guard(),
    };
    let s = run_simple(&mode, &opts, &date_scope(date), &TerminalConfirm)?;

    let verb = mode.verb(cfg.dry_run);
    for o in &s.report.outcomes {
        let src = o.task.src.file_name().unwrap_or_default().to_string_lossy();
        match &o.result {
            Ok(_) => {
                let dest = o.task.dest.file_name().unwrap_or_default().to_string_lossy();
                let dir = o.task.dest.parent().unwrap_or(Path::new("")).display();
                out::print_user(&format!("{verb} '{src}' to '{dest}' in '{dir}'"));
            }
            Err(e) => out::print_error(&format!("'{src}': {e:#}")),
        }
    }
    out::print_success(&format!(
        "{mode}: {} processed, {} skipped, {} failed",
        s.processed, s.skipped, s.failed
    ));
    Ok(if s.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Run the CLI application.
pub fn run(args: Args) -> Result<ExitCode> {
    if args.shared.print_config {
        print_config_location();
        return Ok(ExitCode::SUCCESS);
    }
    args.check()?;
    let Some(command) = args.command.clone() else {
        out::print_error("no mode given; run with --help to see the available subcommands");
        return Ok(ExitCode::from(2));
    };

    // defaults < XML < CLI
    let mut cfg = Config::default();
    let cfg_file = load_config_from_xml(&mut cfg)?;
    args.apply_overrides(&mut cfg);

    let guard = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.shared.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;
    let guard_slot = Arc::new(Mutex::new(guard));
    {
        let guard_slot = Arc::clone(&guard_slot);
        let installed = ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; finishing the current batch...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        });
        if let Err(e) = installed {
            warn!(error = %e, "Could not install interrupt handler");
        }
    }

    debug!(config_file = ?cfg_file, ?cfg, "Effective configuration");

    let prefix = args.shared.prefix.clone();
    let date = args.date_filter();
    let result = match command {
        Command::Sort { dir, copy, .. } => sort(&cfg, &dir, copy, prefix, date),
        Command::Detect { dir } => detect(&cfg, &dir, date),
        Command::Copy { src, dest } => simple(&cfg, SimpleMode::Copy { src, dest }, prefix, date),
        Command::Rename { dir } => simple(&cfg, SimpleMode::Rename { dir }, prefix, date),
        Command::Stackcopy { dir } => simple(&cfg, SimpleMode::Stackcopy { dir }, prefix, date),
    };
    if let Err(e) = &result {
        log_failure(e);
    }

    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    result
}
