use colored::Colorize;
use plinth_core::ReconciliationStatus;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use plinth_controller::PassOutcome;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_outcome(outcome: &PassOutcome) {
    match outcome {
        PassOutcome::Applied { .. } => print_success(&outcome.describe()),
        PassOutcome::Skipped { .. } | PassOutcome::NotFound => print_warning(&outcome.describe()),
        PassOutcome::Failed(_) => print_error(&outcome.describe()),
    }
}

pub fn print_status(resource: &str, status: &ReconciliationStatus) {
    println!("{}: {}", "Resource".cyan(), resource);
    println!(
        "{}: {}",
        "Last applied checksum".cyan(),
        status
            .last_applied_checksum
            .as_ref()
            .map(|c| c.as_str())
            .unwrap_or("(never applied)")
    );
    println!(
        "{}: {}",
        "Last applied".cyan(),
        format_time(status.last_applied_time)
    );
    if let Some(rerun) = &status.last_applied_rerun {
        println!("{}: {}", "Re-run token".cyan(), rerun);
    }
    println!(
        "{}: {}",
        "Last attempt".cyan(),
        format_time(status.last_attempt_time)
    );
    match &status.last_error {
        Some(error) => println!("{}: {}", "Last error".cyan(), error.red()),
        None => println!("{}: {}", "Last error".cyan(), "none".green()),
    }
}

fn format_time(at: Option<OffsetDateTime>) -> String {
    at.and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}
