use std::path::Path;

use anyhow::Result;
use authscan_config::Config;
use authscan_sources::{DEFAULT_DENYLIST, Denylist};
use serde_json::json;

use crate::runtime::matcher_registry;

pub fn handle(config: &Config, path: &Path, json: bool) -> Result<()> {
    let registry = matcher_registry(config);
    let denylist = Denylist::new(
        DEFAULT_DENYLIST
            .iter()
            .map(|p| p.to_string())
            .chain(config.denylist.patterns.iter().cloned()),
    );

    let mut report = Vec::new();
    let mut files = 0usize;
    let mut failures = 0usize;

    for entry in ignore::WalkBuilder::new(path).build() {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let file = entry.path();
        let rel = file
            .strip_prefix(path)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");
        if denylist.is_denied(&rel) {
            continue;
        }
        let Some(matcher) = registry.matcher_for(file) else {
            continue;
        };
        if entry.metadata().map(|m| m.len()).unwrap_or(0) > config.pipeline.max_file_bytes {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        files += 1;

        match matcher.extract(&content, &rel) {
            Ok(details) if details.is_empty() => {}
            Ok(details) => {
                if !json {
                    println!("{} ({})", rel, matcher.language().as_str());
                    for detail in &details {
                        println!(
                            "  {}-{} {} [{}] {}",
                            detail.line_start, detail.line_end, detail.construct, detail.category, detail.pattern
                        );
                    }
                }
                report.push(json!({ "path": rel, "language": matcher.language(), "details": details }));
            }
            Err(e) => {
                failures += 1;
                eprintln!("  ✗ {}", e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "\n{} file(s) checked, {} with authorization logic, {} unparsable",
            files,
            report.len(),
            failures
        );
    }

    Ok(())
}
