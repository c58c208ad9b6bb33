//! `rulekeeper rules` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use rulekeeper_core::types::{Detection, EngineKind, RULESET_CUSTOM};
use rulekeeper_rules::{RuleFilter, RuleParseError, SigmaRule, suricata, yara};

use crate::cli::{RulesAction, RulesArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render, truncate};

/// Execute the `rules` command.
pub async fn execute(args: RulesArgs, writer: &OutputWriter) -> Result<(), CliError> {
    match args.action {
        RulesAction::Validate { path, engine } => {
            let report = validate_path(&path, engine).await?;
            writer.render(&report)?;
            if report.invalid > 0 {
                return Err(CliError::Rule(format!("{} invalid rule files", report.invalid)));
            }
            Ok(())
        }
        RulesAction::Parse {
            path,
            engine,
            content,
        } => {
            let report = parse_file(&path, engine, content).await?;
            writer.render(&report)?;
            Ok(())
        }
    }
}

/// Engine whose language a file extension denotes.
pub fn engine_for_path(path: &Path) -> Option<EngineKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "yar" | "yara" => Some(EngineKind::Strelka),
        "rules" => Some(EngineKind::Suricata),
        "yml" | "yaml" => Some(EngineKind::ElastAlert),
        _ => None,
    }
}

/// Parse rule text in an engine's language into detections.
pub fn parse_content(engine: EngineKind, content: &str) -> Result<Vec<Detection>, RuleParseError> {
    let detections = match engine {
        EngineKind::Strelka => {
            let rules = yara::parse_rules(content, None)?;
            rules
                .iter()
                .map(|rule| {
                    rule.validate()?;
                    Ok(rule.to_detection("", RULESET_CUSTOM, false))
                })
                .collect::<Result<Vec<_>, RuleParseError>>()?
        }
        EngineKind::Suricata => suricata::parse_rules(content, None, &RuleFilter::none())?,
        EngineKind::ElastAlert => {
            let rule = SigmaRule::parse(content)?;
            vec![rule.to_detection(content, RULESET_CUSTOM, "", false)]
        }
    };

    if detections.is_empty() {
        return Err(RuleParseError::Empty);
    }
    Ok(detections)
}

/// Validate a rule file or every recognised rule file under a directory.
pub async fn validate_path(
    path: &Path,
    engine: Option<EngineKind>,
) -> Result<RuleValidationReport, CliError> {
    info!(path = %path.display(), "validating rule files");

    let mut report = RuleValidationReport {
        path: path.display().to_string(),
        ..RuleValidationReport::default()
    };

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| CliError::Command(format!("failed to walk {}: {e}", path.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(kind) = engine.or_else(|| engine_for_path(entry.path())) else {
            debug!(file = %entry.path().display(), "skipping file with unknown extension");
            continue;
        };

        report.total_files += 1;
        let file = entry.path().display().to_string();
        let content = tokio::fs::read_to_string(entry.path()).await?;

        match parse_content(kind, &content) {
            Ok(detections) => {
                report.valid += 1;
                report.rules += detections.len();
            }
            Err(e) => {
                report.invalid += 1;
                report.errors.push(RuleFileError {
                    file,
                    engine: kind.as_str().to_owned(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Parse one file and describe its detections.
pub async fn parse_file(
    path: &Path,
    engine: Option<EngineKind>,
    with_content: bool,
) -> Result<RuleParseReport, CliError> {
    let kind = engine.or_else(|| engine_for_path(path)).ok_or_else(|| {
        CliError::Command(format!(
            "cannot infer rule language of {}; pass --engine",
            path.display()
        ))
    })?;

    let content = tokio::fs::read_to_string(path).await?;
    let detections = parse_content(kind, &content)?;

    Ok(RuleParseReport {
        file: path.display().to_string(),
        engine: kind.as_str().to_owned(),
        detections: detections
            .into_iter()
            .map(|d| ParsedDetection {
                public_id: d.public_id,
                title: d.title,
                severity: d.severity.to_string(),
                author: d.author,
                content: with_content.then_some(d.content),
            })
            .collect(),
    })
}

#[derive(Debug, Default, Serialize)]
pub struct RuleValidationReport {
    pub path: String,
    pub total_files: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Rules found in the valid files.
    pub rules: usize,
    pub errors: Vec<RuleFileError>,
}

#[derive(Debug, Serialize)]
pub struct RuleFileError {
    pub file: String,
    pub engine: String,
    pub error: String,
}

impl Render for RuleValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Rule Validation: {}", self.path.bold())?;
        writeln!(
            w,
            "  Files: {} total, {} valid, {} invalid ({} rules)",
            self.total_files,
            self.valid.to_string().green(),
            if self.invalid > 0 {
                self.invalid.to_string().red()
            } else {
                self.invalid.to_string().normal()
            },
            self.rules
        )?;

        if !self.errors.is_empty() {
            writeln!(w)?;
            for e in &self.errors {
                writeln!(w, "  {} [{}] {}", "x".red(), e.engine, e.file)?;
                writeln!(w, "      {}", e.error.dimmed())?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RuleParseReport {
    pub file: String,
    pub engine: String,
    pub detections: Vec<ParsedDetection>,
}

#[derive(Debug, Serialize)]
pub struct ParsedDetection {
    pub public_id: String,
    pub title: String,
    pub severity: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Render for RuleParseReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{} ({}): {} rules", self.file, self.engine, self.detections.len())?;
        writeln!(w)?;
        writeln!(w, "{:<38} {:<40} {:<14} Author", "PublicID", "Title", "Severity")?;
        writeln!(w, "{}", "-".repeat(110))?;

        for d in &self.detections {
            writeln!(
                w,
                "{:<38} {:<40} {:<14} {}",
                truncate(&d.public_id, 38),
                truncate(&d.title, 40),
                d.severity,
                d.author
            )?;
            if let Some(content) = &d.content {
                writeln!(w)?;
                writeln!(w, "{content}")?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YARA: &str = "rule Alpha {\n\tmeta:\n\t\tauthor = \"Jane\"\n\tcondition:\n\t\ttrue\n}\n\nrule Beta { condition: false }\n";
    const SURICATA: &str = "# comment\nalert tcp any any -> any any (msg:\"Test\"; sid:10000; rev:1;)\n";
    const SIGMA: &str = "title: Sigma Test\nid: 5f2e8a3c-1111-4a2b-9c3d-000000000001\nlogsource:\n    product: windows\ndetection:\n    sel:\n        Image: a.exe\n    condition: sel\nlevel: high\n";

    #[test]
    fn extension_selects_engine() {
        assert_eq!(engine_for_path(Path::new("a/x.yar")), Some(EngineKind::Strelka));
        assert_eq!(engine_for_path(Path::new("x.YARA")), Some(EngineKind::Strelka));
        assert_eq!(engine_for_path(Path::new("x.rules")), Some(EngineKind::Suricata));
        assert_eq!(engine_for_path(Path::new("x.yml")), Some(EngineKind::ElastAlert));
        assert_eq!(engine_for_path(Path::new("README.md")), None);
        assert_eq!(engine_for_path(Path::new("noext")), None);
    }

    #[test]
    fn parses_each_language() {
        let yara = parse_content(EngineKind::Strelka, YARA).unwrap();
        assert_eq!(
            yara.iter().map(|d| d.public_id.as_str()).collect::<Vec<_>>(),
            ["Alpha", "Beta"]
        );

        let suricata = parse_content(EngineKind::Suricata, SURICATA).unwrap();
        assert_eq!(suricata.len(), 1);
        assert_eq!(suricata[0].public_id, "10000");

        let sigma = parse_content(EngineKind::ElastAlert, SIGMA).unwrap();
        assert_eq!(sigma[0].title, "Sigma Test");
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(
            parse_content(EngineKind::Suricata, "# only comments\n"),
            Err(RuleParseError::Empty)
        );
    }

    #[tokio::test]
    async fn validate_directory_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yar"), YARA).unwrap();
        std::fs::write(dir.path().join("good.rules"), SURICATA).unwrap();
        std::fs::write(dir.path().join("bad.yml"), "title: x\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let report = validate_path(dir.path(), None).await.unwrap();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.rules, 3);
        assert!(report.errors[0].file.ends_with("bad.yml"));
        assert_eq!(report.errors[0].engine, "elastalert");
    }

    #[tokio::test]
    async fn parse_file_requires_known_language() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rule.txt");
        std::fs::write(&path, SURICATA).unwrap();

        assert!(matches!(
            parse_file(&path, None, false).await,
            Err(CliError::Command(_))
        ));

        let report = parse_file(&path, Some(EngineKind::Suricata), true)
            .await
            .unwrap();
        assert_eq!(report.detections[0].public_id, "10000");
        assert!(report.detections[0].content.is_some());
    }
}
