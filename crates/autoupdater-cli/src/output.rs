//! Console presentation helpers (`console::style`, ✓/✗/→ glyphs) — no
//! progress bars here since this CLI's operations are either instant
//! (list/status) or already narrated step-by-step via the engine's event
//! stream.

use console::style;

pub fn success(msg: &str) {
    println!("{} {}", style("✓").bold().green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").bold().red(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", style("→").bold().blue(), msg);
}

pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}
