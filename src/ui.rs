//! Terminal output: a spinner for long operations and styled summaries.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use petrigate::analysis::AnalysisReport;
use petrigate::net::Marking;
use petrigate::scheduler::SchedulerEvents;
use petrigate::store::{HistoryKind, HistoryRow, InstanceRecord, InstanceStatus};

/// A single-line spinner that resolves to a ✓ or ✗ message.
pub struct Spinner {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl Spinner {
    /// Start spinning with `message` until `succeed` or `fail`.
    pub fn start(message: impl Into<String>) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.into());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn succeed(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn fail(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

/// Prints scheduler events as they happen.
pub struct ConsoleEvents {
    dim: Style,
    yellow: Style,
    red: Style,
    green: Style,
}

impl ConsoleEvents {
    pub fn new() -> Self {
        Self {
            dim: Style::new().dim(),
            yellow: Style::new().yellow(),
            red: Style::new().red().bold(),
            green: Style::new().green().bold(),
        }
    }
}

impl Default for ConsoleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerEvents for ConsoleEvents {
    fn on_fire(&self, instance: &str, transition: &str, marking: &Marking) {
        println!(
            "  {} {transition} {}",
            self.dim.apply_to(format!("[{instance}]")),
            self.dim.apply_to(marking)
        );
    }

    fn on_complete(&self, instance: &str, marking: &Marking) {
        println!("  {} {instance} completed at {marking}", self.green.apply_to("✓"));
    }

    fn on_error(&self, instance: &str, error: &str) {
        println!("  {} {instance}: {error}", self.red.apply_to("✗"));
    }

    fn on_timeout(&self, instance: &str, transition: &str, target_place: &str) {
        println!(
            "  {} {instance}: '{transition}' timed out, token to '{target_place}'",
            self.yellow.apply_to("⏱")
        );
    }
}

fn status_style(status: InstanceStatus) -> Style {
    match status {
        InstanceStatus::Completed => Style::new().green().bold(),
        InstanceStatus::Failed => Style::new().red().bold(),
        InstanceStatus::Active => Style::new().yellow(),
    }
}

/// Print an analysis report, or the report as JSON.
pub fn print_report(report: &AnalysisReport, as_json: bool) {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
        return;
    }
    let ok = Style::new().green().bold();
    let bad = Style::new().red().bold();
    let heading = if report.is_sound() { &ok } else { &bad };

    println!();
    println!("{}", heading.apply_to(format!("─── {} ───", report.net)));
    println!("  states:    {}", report.state_count());
    println!("  edges:     {}", report.edge_count);
    println!("  terminal:  {}", report.terminal.len());
    for m in &report.expected_terminal {
        println!("    {} {m}", ok.apply_to("expected"));
    }
    for m in &report.awaiting_timeout {
        println!("    {} {m}", Style::new().yellow().apply_to("awaiting timeout"));
    }
    for m in &report.deadlocks {
        println!("    {} {m}", bad.apply_to("deadlock"));
    }
    for v in &report.invariants {
        match &v.violation {
            None => println!("  {} invariant {} = {}", ok.apply_to("✓"), v.name, v.initial_sum),
            Some(m) => println!(
                "  {} invariant {} = {} violated at {m}",
                bad.apply_to("✗"),
                v.name,
                v.initial_sum
            ),
        }
    }
    if !report.dead_transitions.is_empty() {
        println!("  never enabled: {}", report.dead_transitions.join(", "));
    }
}

/// Print status, marking, context and armed timeouts of one instance.
pub fn print_instance(record: &InstanceRecord) {
    let style = status_style(record.status);
    println!();
    println!(
        "{} {}",
        style.apply_to(format!("─── {} ({}) ───", record.id, record.status)),
        Style::new().dim().apply_to(&record.definition)
    );
    println!("  marking: {}", record.state.marking);
    if !record.state.context.is_empty() {
        println!(
            "  context: {}",
            serde_json::to_string(&record.state.context).unwrap_or_default()
        );
    }
    for (name, pending) in record.timeouts.iter() {
        println!(
            "  timeout: {name} → {} at {}",
            pending.target_place,
            pending.deadline.format("%H:%M:%S%.3f")
        );
    }
    if record.stalled {
        println!("  {}", Style::new().yellow().apply_to("stalled"));
    }
    if let Some(error) = &record.error {
        println!("  error: {}", Style::new().red().apply_to(error));
    }
}

/// One line per history row, oldest first.
pub fn print_history(rows: &[HistoryRow]) {
    for row in rows {
        let kind = match row.kind {
            HistoryKind::Fired => "fired",
            HistoryKind::TimedOut => "timeout",
            HistoryKind::Injected => "inject",
        };
        println!(
            "  {} {kind:<7} {:<16} {} ({}ms)",
            row.timestamp.format("%H:%M:%S%.3f"),
            row.name,
            row.marking_after,
            row.duration_ms
        );
    }
}

/// One line per stored instance.
pub fn print_instances(records: &[InstanceRecord]) {
    if records.is_empty() {
        println!("  no instances");
        return;
    }
    for r in records {
        println!(
            "  {:<24} {:<16} {} {}",
            r.id,
            r.definition,
            status_style(r.status).apply_to(r.status),
            r.state.marking
        );
    }
}
