//! Inspect command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    rust_i18n::t,
    std::path::{Path, PathBuf},
    weflyup::{ImageSummary, Target, parse_record_file, summarize},
};

/// Image kind of a file, from its extension (`.mcs` is FPGA, anything else MCU).
pub(crate) fn target_for_path(path: &Path) -> Target {
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(Target::Fpga.file_extension()))
    {
        Target::Fpga
    } else {
        Target::Mcu
    }
}

/// Parsed figures for one file.
struct Inspected {
    path: PathBuf,
    target: Target,
    summary: ImageSummary,
    wire_bytes: usize,
}

fn inspect_file(path: &Path, target: Option<Target>) -> Result<Inspected> {
    let target = target.unwrap_or_else(|| target_for_path(path));
    let frames = parse_record_file(path, target)
        .with_context(|| t!("error.load_image", path = path.display()).to_string())?;

    Ok(Inspected {
        path: path.to_path_buf(),
        target,
        summary: summarize(&frames),
        wire_bytes: frames.iter().map(weflyup::Frame::encoded_len).sum(),
    })
}

/// Inspect command implementation.
pub(crate) fn cmd_inspect(files: &[PathBuf], target: Option<Target>, json: bool) -> Result<()> {
    let inspected = files
        .iter()
        .map(|path| inspect_file(path, target))
        .collect::<Result<Vec<_>>>()?;

    if json {
        let files: Vec<serde_json::Value> = inspected
            .iter()
            .map(|i| {
                serde_json::json!({
                    "path": i.path.display().to_string(),
                    "target": i.target,
                    "summary": i.summary,
                    "wire_bytes": i.wire_bytes,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "files": files,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for i in &inspected {
        println!(
            "{} {}",
            style(i.path.display()).cyan().bold(),
            style(format!("[{}]", i.target)).yellow()
        );
        println!("  {}", t!("inspect.frames", count = i.summary.frame_count));
        println!(
            "  {}",
            t!("inspect.payload", bytes = i.summary.payload_bytes)
        );
        println!(
            "  {}",
            t!(
                "inspect.range",
                start = format!("0x{:08X}", i.summary.start_address),
                end = format!("0x{:08X}", i.summary.end_address)
            )
        );
        println!("  {}", t!("inspect.wire", bytes = i.wire_bytes));
        if i.summary.frame_count == 0 {
            println!("  {}", style(t!("inspect.empty")).dim());
        }
    }

    Ok(())
}
