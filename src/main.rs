use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use gapic_synth::{
    check_idempotence, load_builtin, load_from_path, patch_destination, synthesize,
    CommandGenerator, Generator, MergeStrategy, PatchMode, PrebuiltGenerator, RuleOutcome,
    SynthConfig,
};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "gapic-synth")]
#[command(about = "Regenerate a GAPIC client library and patch known generator defects", long_about = None)]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print a machine-readable JSON report on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, copy and patch (the default)
    Run {
        #[command(flatten)]
        target: Target,

        /// Use an existing generated tree instead of running the generator
        #[arg(short, long)]
        generated: Option<PathBuf>,

        /// Show unified diff of patched files
        #[arg(short, long)]
        diff: bool,
    },

    /// Apply only the patch rules to an existing destination
    Patch {
        #[command(flatten)]
        target: Target,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Fail if any patch rule would still change the destination
    Check {
        #[command(flatten)]
        target: Target,
    },

    /// List the generator request, copy rules and patch rules
    List {
        /// Synth config (defaults to the built-in dialogflow v2 config)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct Target {
    /// Synth config (defaults to the built-in dialogflow v2 config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination library root (defaults to the current directory)
    #[arg(short = 'C', long)]
    destination: Option<PathBuf>,
}

impl Target {
    fn destination(&self) -> Result<PathBuf> {
        match &self.destination {
            Some(path) => Ok(path.clone()),
            None => env::current_dir().context("cannot determine current directory"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Run {
        target: Target::default(),
        generated: None,
        diff: false,
    });

    match command {
        Commands::Run {
            target,
            generated,
            diff,
        } => cmd_run(&target, generated, diff, cli.json),

        Commands::Patch {
            target,
            dry_run,
            diff,
        } => cmd_patch(&target, dry_run, diff, cli.json),

        Commands::Check { target } => cmd_check(&target, cli.json),

        Commands::List { config } => cmd_list(config.as_deref(), cli.json),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "gapic_synth=info",
        1 => "gapic_synth=debug",
        _ => "gapic_synth=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SynthConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading synth config.");
            Ok(load_from_path(path)?)
        }
        None => Ok(load_builtin()?),
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (generated)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print one status line per rule and return how many changed something.
fn report_patches(outcomes: &[RuleOutcome], dry_run: bool, show_diff: bool) -> usize {
    let mut applied = 0;
    for outcome in outcomes {
        if outcome.matched_files.is_empty() {
            println!("{} {}: No files matched", "⊘".cyan(), outcome.id);
            continue;
        }
        if !outcome.applied {
            println!(
                "{} {}: Nothing to change in {} file(s)",
                "⊙".yellow(),
                outcome.id,
                outcome.matched_files.len()
            );
            continue;
        }

        applied += 1;
        let verb = if dry_run { "Would patch" } else { "Patched" };
        for change in &outcome.changed_files {
            println!(
                "{} {}: {} {} ({} replacement{})",
                "✓".green(),
                outcome.id,
                verb,
                change.path.display(),
                change.replacements,
                if change.replacements == 1 { "" } else { "s" }
            );
            if show_diff {
                display_diff(&change.path, &change.before, &change.after);
            }
        }
    }
    applied
}

fn cmd_run(target: &Target, generated: Option<PathBuf>, show_diff: bool, json: bool) -> Result<()> {
    let config = load_config(target.config.as_deref())?;
    let destination = target.destination()?;

    let generator: Box<dyn Generator> = match generated {
        Some(root) => Box::new(PrebuiltGenerator::new(root)),
        None => Box::new(CommandGenerator::from_config(&config.generator)?),
    };

    let report = synthesize(&config, generator.as_ref(), &destination)
        .with_context(|| format!("synthesis into {} failed", destination.display()))?;

    if json {
        return print_json(&report);
    }

    println!("Generated: {}", report.generated_root.display());
    println!("Destination: {}", destination.display());
    println!();

    for copy in &report.copies {
        let merged = if copy.merged.is_empty() {
            String::new()
        } else {
            format!(" ({} merged)", copy.merged.len())
        };
        println!(
            "{} {}: {} file(s){}",
            "→".blue(),
            copy.source,
            copy.files.len(),
            merged
        );
    }
    println!();

    let applied = report_patches(&report.patches, false, show_diff);

    println!();
    println!("{}", "Summary:".bold());
    println!(
        "  {} copied",
        format!("{}", report.copies.iter().map(|c| c.files.len()).sum::<usize>()).green()
    );
    println!("  {} patches applied", format!("{}", applied).green());
    println!(
        "  {} patches unchanged",
        format!("{}", report.patches.len() - applied).yellow()
    );

    Ok(())
}

fn cmd_patch(target: &Target, dry_run: bool, show_diff: bool, json: bool) -> Result<()> {
    let config = load_config(target.config.as_deref())?;
    let destination = target.destination()?;
    let mode = if dry_run {
        PatchMode::DryRun
    } else {
        PatchMode::Apply
    };

    let outcomes = patch_destination(&config, &destination, mode)
        .with_context(|| format!("patching {} failed", destination.display()))?;

    if json {
        return print_json(&outcomes);
    }

    println!("Destination: {}", destination.display());
    if dry_run {
        println!("{}", "  [DRY RUN - nothing is written]".cyan());
    }
    println!();

    let applied = report_patches(&outcomes, dry_run, show_diff);

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", applied).green());
    println!(
        "  {} unchanged",
        format!("{}", outcomes.len() - applied).yellow()
    );

    Ok(())
}

fn cmd_check(target: &Target, json: bool) -> Result<()> {
    let config = load_config(target.config.as_deref())?;
    let destination = target.destination()?;

    let report = check_idempotence(&config, &destination)
        .with_context(|| format!("checking {} failed", destination.display()))?;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", "Checking patch idempotence...".bold());
        println!("Destination: {}", destination.display());
        println!();

        for outcome in &report.outcomes {
            if outcome.applied {
                eprintln!("{} {}: NOT IDEMPOTENT", "✗".red(), outcome.id);
                for change in &outcome.changed_files {
                    eprintln!(
                        "  Would change: {} ({} replacements)",
                        change.path.display(),
                        change.replacements
                    );
                }
            } else {
                println!("{} {}: Stable", "✓".green(), outcome.id);
            }
        }

        let violations = report.violations().count();
        println!();
        println!("{}", "Summary:".bold());
        println!(
            "  {} stable",
            format!("{}", report.outcomes.len() - violations).green()
        );
        println!("  {} not idempotent", format!("{}", violations).red());
    }

    if !report.is_idempotent() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(config: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config)?;

    if json {
        return print_json(&config);
    }

    let generator = &config.generator;
    println!("{}", "Generator".bold());
    println!(
        "  {} {} ({})",
        generator.request.service, generator.request.version, generator.request.config_path
    );
    println!("  output: {}", generator.request.output_name);
    match &generator.command {
        Some(command) => println!("  command: {} {}", command, generator.args.join(" ")),
        None => println!("  command: {}", "none (use run --generated)".dimmed()),
    }
    println!();

    println!("{} ({} rules)", "Copy".bold(), config.copy.len());
    for rule in &config.copy {
        let dest = rule.dest.as_deref().unwrap_or(&rule.source);
        match rule.merge {
            MergeStrategy::Overwrite => println!("  {} -> {}", rule.source, dest),
            strategy => println!(
                "  {} -> {} {}",
                rule.source,
                dest,
                format!("[merge: {}]", strategy).cyan()
            ),
        }
    }
    println!();

    println!("{} ({} rules)", "Patches".bold(), config.patches.len());
    for rule in &config.patches {
        println!("  - {} {}", rule.id, rule.files.join(", ").dimmed());
        if let Some(reference) = &rule.reference {
            println!("    {}", reference.dimmed());
        }
    }

    Ok(())
}
