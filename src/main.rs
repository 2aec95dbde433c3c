//! netdive command line entry point.
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use log::debug;

use netdive::address::read_targets_file;
use netdive::engine::{Collaborators, Recon, ReconError};
use netdive::input::{Config, Opts};
use netdive::report;
use netdive::tui::ConsoleReporter;

const SHOWN_TARGETS: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);
    debug!("Main() `opts` arguments are {opts:?}");

    let targets = match &opts.file {
        Some(path) => read_targets_file(path).await?,
        None => opts.targets.clone(),
    };
    if targets.is_empty() {
        fail("No valid targets found in file");
    }

    if !opts.greppable && !opts.accessible {
        print_opening();
    }

    if !opts.yes && !authorized(&targets)? {
        println!("Scan aborted.");
        process::exit(1);
    }

    #[cfg(unix)]
    let ulimit = adjust_ulimit_size(opts.ulimit);
    #[cfg(unix)]
    debug!("File descriptor limit is {ulimit}");

    let reporter = Arc::new(ConsoleReporter::new(opts.greppable, opts.accessible));
    let tools = Collaborators::system().context("failed to build the HTTP client")?;
    let recon = Recon::new(opts.recon_config(targets), tools, reporter);

    let state = match recon.run().await {
        Ok(state) => state,
        Err(ReconError::NoValidTargets { .. }) => fail("No valid targets found"),
        Err(ReconError::NoHostsDiscovered) => fail("No hosts discovered."),
    };

    if opts.greppable {
        for line in report::greppable_lines(&state) {
            println!("{line}");
        }
    } else {
        println!("{}", report::summary(&state));
    }

    let path = report::write_json(&state, &opts.output)?;
    if !opts.greppable {
        println!("{} {}", "[+] Report saved to:".green(), path.display());
        println!("{}", "[+] Reconnaissance scan completed!".green());
    }
    Ok(())
}

fn fail(message: &str) -> ! {
    eprintln!("{}", format!("[-] {message}").red());
    process::exit(1);
}

fn print_opening() {
    println!(
        "{}",
        format!("netdive {}", env!("CARGO_PKG_VERSION")).bold()
    );
    println!(
        "{}",
        "WARNING: This tool is for authorized security testing only!".red()
    );
    println!(
        "{}",
        "Ensure you have proper permission before scanning any network.\n".red()
    );
}

/// Asks the operator to confirm they may scan `targets`.
fn authorized(targets: &[String]) -> anyhow::Result<bool> {
    let mut shown = targets
        .iter()
        .take(SHOWN_TARGETS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if targets.len() > SHOWN_TARGETS {
        shown.push_str(&format!(" ... (+{} more)", targets.len() - SHOWN_TARGETS));
    }

    println!("Targets to scan: {shown}");
    print!("Do you have authorization to scan these targets? (y/N): ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            println!(
                "{} {}",
                "[~] Automatically increasing ulimit value to".cyan(),
                limit
            );
        } else {
            eprintln!("{}", "[-] ERROR: Failed to set ulimit value.".red());
        }
    }

    let (soft, _) = Resource::NOFILE.get().unwrap_or((8000, 8000));
    soft
}
