//! Centralised helpers for CLI output. Results go to stdout as JSON; operator notes go to stderr.

use eyre::Context as _;
use std::io::{IsTerminal as _, Write as _};
use tessera::errors::ErrorReport;

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn print_json(v: &serde_json::Value) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")?;
    Ok(())
}

/// `{ "error": { "code", "message", "remediation" } }` on stdout.
pub fn print_error(report: &ErrorReport) -> eyre::Result<()> {
    print_json(&serde_json::json!({ "error": report }))
}

/// Reminder that merchant shares are shown exactly once (human operators only).
pub fn print_share_notice() {
    if !std::io::stderr().is_terminal() {
        return;
    }
    stderr_writeln(
        "Tessera: the merchant shares above are not stored anywhere. Hand them over now; \
         losing two of them plus the escrow share loses the wallet.",
    );
}
