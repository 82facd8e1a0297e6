//! Output formatting utilities for CLI commands

use colored::Colorize;
use regscope_shared::types::regop::status;
use regscope_shared::ProfilerRegOp;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print register ops after execution, one line each
pub fn reg_ops(ops: &[ProfilerRegOp]) {
    println!(
        "    {:>4} {:>6} {:>10} {:>18} {:>14}",
        "#", "OP", "OFFSET", "VALUE", "STATUS"
    );
    for (i, op) in ops.iter().enumerate() {
        let kind = op
            .kind()
            .map(|k| format!("{:?}", k).to_lowercase())
            .unwrap_or_else(|| format!("0x{:02x}", op.op));
        let status_text = format!("{:>14}", status::name(op.status));
        let status_text = if op.succeeded() {
            status_text.green()
        } else {
            status_text.red()
        };
        println!(
            "    {:>4} {:>6} {:>#10x} {:>#18x} {}",
            i, kind, op.offset, op.value, status_text
        );
    }
}
