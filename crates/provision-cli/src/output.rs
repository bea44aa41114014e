use provision_core::report::Summary;
use serde::Serialize;
use std::io::Write;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns two spaces apart, sized by character count, with a
/// dashed rule under the header. Trailing padding is trimmed.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let width = |s: &str| s.chars().count();
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| width(cell))
                .fold(width(headers[col]), usize::max)
        })
        .collect();

    let mut out = line(headers.iter().copied(), &widths);
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&line(rule.iter().map(String::as_str), &widths));
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect();
    format!("{}\n", padded.join("  ").trim_end())
}

/// Key/value rows as a two-column table.
pub fn print_pairs(rows: Vec<(&'static str, String)>) {
    print_table(
        &["SETTING", "VALUE"],
        rows.into_iter().map(|(k, v)| vec![k.to_string(), v]).collect(),
    );
}

/// Human-readable run summary.
pub fn print_summary(summary: &Summary) {
    print_pairs(summary.configuration.rows());
    println!();

    print_table(
        &["STAGE", "STATUS", "TIME", "DETAIL"],
        summary
            .stages
            .iter()
            .map(|s| {
                vec![
                    s.stage.to_string(),
                    s.status.label().to_string(),
                    format!("{}ms", s.duration_ms),
                    s.status.detail().to_string(),
                ]
            })
            .collect(),
    );

    if !summary.artifacts.is_empty() {
        println!();
        print_table(
            &["FILE", "PATH"],
            summary
                .artifacts
                .iter()
                .map(|a| vec![a.kind.as_str().to_string(), a.path.display().to_string()])
                .collect(),
        );
    }

    println!();
    match summary.failed_stage {
        Some(stage) => println!("Provisioning stopped at stage '{stage}'."),
        None => println!(
            "Odoo is provisioned. Service: {}  Port: {}",
            summary.configuration.service, summary.configuration.http_port
        ),
    }
}
