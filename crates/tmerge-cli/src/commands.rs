use colored::Colorize;

use crate::cli::*;
use crate::simulation::{self, SimulationConfig, SimulationReport};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = SimulationConfig::load(args.config.as_deref())?;
    if let Some(frames) = args.frames {
        config.frames = frames;
    }
    if let Some(callers) = args.callers {
        config.callers = callers;
    }
    if let Some(lease) = args.lease {
        config.merger.default_lease_term = lease;
    }
    if let Some(interval) = args.view_interval {
        config.view_interval = interval;
    }

    let report = simulation::run(&config)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, args.trace),
    }
    Ok(())
}

fn print_report(report: &SimulationReport, trace: bool) {
    if trace {
        for r in &report.trace {
            let padded = format!("{:<10}", r.thread);
            let thread = if r.on_platform_thread {
                padded.cyan()
            } else {
                padded.normal()
            };
            let mut events = String::new();
            if r.merged_now {
                events.push_str(" merged");
            }
            if r.unmerged_now {
                events.push_str(" unmerged");
            }
            println!("  frame {:>4}  {}{}", r.frame, thread, events.yellow());
        }
        println!();
    }

    println!(
        "{} {} frames, {} callers, lease {}",
        "✓".green().bold(),
        report.frames.to_string().bold(),
        report.callers,
        report.lease_term
    );
    println!(
        "  On platform thread: {}/{}",
        report.frames_on_platform_thread.to_string().cyan(),
        report.frames
    );
    println!("  Merges: {}", report.merges.to_string().yellow());
    println!("  Unmerges: {}", report.unmerges.to_string().yellow());
    if report.merged_at_end {
        println!("  {} a lease was still held after the last frame; drained", "!".yellow().bold());
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = SimulationConfig::load(args.config.as_deref())?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
