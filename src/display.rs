use colored::Colorize;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};

use crate::event::format_event;
use crate::event_tree::TreeInfo;
use crate::optimizer::Solution;
use crate::tree_splitter::PathPartition;

/// Paths shown per group before the list is cut short.
const MAX_PATHS_SHOWN: usize = 4;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn tree_info_table(info: &TreeInfo) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Metric").set_alignment(CellAlignment::Left),
        Cell::new("Value").set_alignment(CellAlignment::Right),
    ]);

    let breadths: Vec<String> = info.breadths.iter().map(|b| b.to_string()).collect();
    let rows = [
        ("Parties", info.depth.to_string()),
        ("Breadths", breadths.join(" x ")),
        ("Leaves", info.n_leaves.to_string()),
        ("Nodes", info.n_nodes_total.to_string()),
        ("Cached nodes", info.n_nodes_cached.to_string()),
        ("Memory", format_bytes(info.memory_bytes)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label.bold().to_string()),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }

    table.to_string()
}

pub fn partition_table(partition: &PathPartition) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Group"),
        Cell::new("Paths").set_alignment(CellAlignment::Right),
        Cell::new("Leaves").set_alignment(CellAlignment::Right),
        Cell::new("Share").set_alignment(CellAlignment::Right),
        Cell::new("First paths"),
    ]);

    let total = partition.n_leaves().max(1) as f64;
    for (i, (group, leaves)) in partition
        .groups()
        .iter()
        .zip(partition.leaves_per_group())
        .enumerate()
    {
        let mut shown: Vec<String> = group
            .iter()
            .take(MAX_PATHS_SHOWN)
            .map(|p| {
                let parts: Vec<String> = p.path.iter().map(|k| k.to_string()).collect();
                format!("[{}]", parts.join(","))
            })
            .collect();
        if group.len() > MAX_PATHS_SHOWN {
            shown.push("...".dimmed().to_string());
        }
        table.add_row(vec![
            Cell::new(i.to_string().bold().to_string()),
            Cell::new(group.len()).set_alignment(CellAlignment::Right),
            Cell::new(leaves).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}%", leaves as f64 / total * 100.0))
                .set_alignment(CellAlignment::Right),
            Cell::new(shown.join(" ")),
        ]);
    }

    let quality = format!("quality factor {:.3}", partition.quality_factor());
    let quality = if partition.met_target() {
        quality.green().to_string()
    } else {
        format!("{} (best effort)", quality).yellow().to_string()
    };
    format!("{}\n  {}", table, quality)
}

pub fn solution_table(solution: &Solution, n_leaves: Option<u64>) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Metric").set_alignment(CellAlignment::Left),
        Cell::new("Value").set_alignment(CellAlignment::Right),
    ]);

    let score = format!("{:.6}", solution.score());
    let score = if solution.is_certificate() {
        score.green().bold().to_string()
    } else {
        score.bold().to_string()
    };
    let mut rows = vec![
        ("Optimizer", solution.optimizer.to_string()),
        ("Stop mode", solution.stop_mode.as_str().to_string()),
        ("Score", score),
        ("Event", format_event(solution.event())),
        ("Time", format!("{:.3}s", solution.elapsed.as_secs_f64())),
    ];
    if let Some(visited) = solution.pre.n_leaves_effective {
        let value = match n_leaves {
            Some(total) if total > 0 => format!(
                "{} / {} ({:.1}%)",
                visited,
                total,
                visited as f64 / total as f64 * 100.0
            ),
            _ => visited.to_string(),
        };
        rows.push(("Leaves visited", value));
    }
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label.bold().to_string()),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }

    table.to_string()
}

/// One row per cross-check: seed, both scores and whether they agree.
pub fn verify_table(rows: &[(u64, f64, f64, bool)]) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Seed"),
        Cell::new("Brute force").set_alignment(CellAlignment::Right),
        Cell::new("Tree search").set_alignment(CellAlignment::Right),
        Cell::new("Match").set_alignment(CellAlignment::Center),
    ]);

    for &(seed, brute, tree, ok) in rows {
        let status = if ok {
            "yes".green().bold().to_string()
        } else {
            "NO".red().bold().to_string()
        };
        table.add_row(vec![
            Cell::new(seed),
            Cell::new(format!("{:.6}", brute)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.6}", tree)).set_alignment(CellAlignment::Right),
            Cell::new(status).set_alignment(CellAlignment::Center),
        ]);
    }

    table.to_string()
}

pub fn print_section(title: &str, content: &str) {
    println!("\n{}", title.cyan().bold());
    println!("{}", content);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "Error:".red().bold(), msg);
}

pub fn print_success(msg: &str) {
    println!("{}", msg.green().bold());
}
