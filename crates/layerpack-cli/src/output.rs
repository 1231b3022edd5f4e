use std::io::Write;

use anyhow::Result;
use atty::Stream;
use layerpack_core::{CommandStatus, ExecutionOutcome};
use serde_json::{json, Value};

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

/// Print `outcome` and return the process exit code.
pub fn emit_output(opts: &OutputOptions, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    if opts.json {
        let payload = to_json_response(outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        if code != 0 {
            eprintln!("error[{}]: {}", error_kind(&outcome.details), outcome.message);
        }
        return Ok(code);
    }

    if let CommandStatus::Ok = outcome.status {
        if !opts.quiet {
            let style = Style::new(opts.no_color, atty::is(Stream::Stdout));
            println!("{}", style.status(&outcome.status, &outcome.message));
            if let Some(table) = render_package_table(&style, &outcome.details) {
                println!("{table}");
            }
        }
    } else {
        let style = Style::new(opts.no_color, atty::is(Stream::Stderr));
        let mut stderr = std::io::stderr().lock();
        writeln!(
            stderr,
            "{} {}",
            style.error_label(error_kind(&outcome.details)),
            outcome.message
        )?;
        if let Some(hint) = hint_from_details(&outcome.details) {
            writeln!(stderr, "{}", style.hint(hint))?;
        }
    }
    Ok(code)
}

pub fn to_json_response(outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "failure",
    };
    json!({
        "status": status,
        "message": outcome.message,
        "details": outcome.details,
    })
}

fn error_kind(details: &Value) -> &str {
    details
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("InternalError")
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

struct PackageRow {
    name: String,
    version: String,
    role: String,
    size: String,
}

/// Table of resolved packages for `analyze` and `create-layer` results.
fn render_package_table(style: &Style, details: &Value) -> Option<String> {
    let rows: Vec<PackageRow> = if let Some(analysis) = details.get("analysis") {
        analysis
            .get("packages")?
            .as_array()?
            .iter()
            .map(|pkg| {
                let excluded = pkg.get("excluded").and_then(Value::as_bool);
                let size = match (excluded, pkg.get("size").and_then(Value::as_u64)) {
                    (Some(true), _) => "excluded".to_string(),
                    (_, Some(bytes)) => layerpack_core::human_bytes(bytes),
                    (_, None) => "unknown".to_string(),
                };
                Some(PackageRow {
                    name: pkg.get("name")?.as_str()?.to_string(),
                    version: pkg.get("version")?.as_str()?.to_string(),
                    role: pkg.get("role")?.as_str()?.to_string(),
                    size,
                })
            })
            .collect::<Option<_>>()?
    } else {
        details
            .get("layer")?
            .get("packages")?
            .as_array()?
            .iter()
            .map(|pkg| {
                let direct = pkg.get("direct").and_then(Value::as_bool).unwrap_or(false);
                Some(PackageRow {
                    name: pkg.get("name")?.as_str()?.to_string(),
                    version: pkg.get("version")?.as_str()?.to_string(),
                    role: if direct { "top-level" } else { "transitive" }.to_string(),
                    size: String::new(),
                })
            })
            .collect::<Option<_>>()?
    };
    if rows.is_empty() {
        return None;
    }
    Some(format_package_table(style, &rows))
}

fn format_package_table(style: &Style, rows: &[PackageRow]) -> String {
    let headers = ["Package", "Version", "Role", "Size"];
    let mut widths = headers.map(str::len);
    for row in rows {
        widths[0] = widths[0].max(row.name.len());
        widths[1] = widths[1].max(row.version.len());
        widths[2] = widths[2].max(row.role.len());
        widths[3] = widths[3].max(row.size.len());
    }
    let line = |cells: [&str; 4]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        )
        .trim_end()
        .to_string()
    };

    let mut lines = vec![style.table_header(&line(headers))];
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in rows {
        lines.push(line([
            row.name.as_str(),
            row.version.as_str(),
            row.role.as_str(),
            row.size.as_str(),
        ]));
    }
    lines.join("\n")
}
