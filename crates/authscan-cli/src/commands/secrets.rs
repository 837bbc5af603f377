use std::path::Path;

use anyhow::Result;
use authscan_config::Config;

use crate::runtime::secret_gate;

pub fn handle(config: &Config, path: &Path) -> Result<()> {
    let gate = secret_gate(config)?;
    let content = std::fs::read_to_string(path)?;
    let findings = gate.scan(&content);

    if findings.is_empty() {
        println!("✓ No secrets found in {}", path.display());
        return Ok(());
    }

    println!("Secrets in {} ({}):", path.display(), findings.len());
    for finding in &findings {
        println!(
            "  line {}: {} ({}) {}",
            finding.line, finding.kind, finding.description, finding.preview
        );
    }

    let redaction = gate.redact(&content);
    println!("\nRedaction would replace {} value(s):", redaction.count);
    for info in &redaction.redactions {
        println!("  {} x{}", info.redaction_type, info.count);
    }

    Ok(())
}
