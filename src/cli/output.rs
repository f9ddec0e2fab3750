//! Output formatting for build reports, validation results and image listings
//!
//! Every formatter supports JSON, YAML and human-readable text. Structured
//! formats serialize the library types directly so scripts see the same
//! field names the store and builder use.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

use crate::build::{BuildReport, ImageRecord};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

/// Result of `layerpack validate`
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub spec: String,
    pub context: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rules: Vec<&'static str>,
}

/// One row of `layerpack images`
#[derive(Debug, Clone, Serialize)]
pub struct ImageListing<'a> {
    pub tag: &'a str,
    #[serde(flatten)]
    pub record: &'a ImageRecord,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_build(&self, report: &BuildReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report, "build report"),
            OutputFormat::Yaml => to_yaml(report, "build report"),
            OutputFormat::Human => Ok(self.format_build_human(report)),
        }
    }

    pub fn format_validation(&self, summary: &ValidationSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(summary, "validation result"),
            OutputFormat::Yaml => to_yaml(summary, "validation result"),
            OutputFormat::Human => Ok(self.format_validation_human(summary)),
        }
    }

    pub fn format_images(&self, images: &[(String, ImageRecord)]) -> Result<String> {
        let listings: Vec<ImageListing<'_>> = images
            .iter()
            .map(|(tag, record)| ImageListing { tag, record })
            .collect();

        match self.format {
            OutputFormat::Json => to_json(&listings, "image list"),
            OutputFormat::Yaml => to_yaml(&listings, "image list"),
            OutputFormat::Human => Ok(self.format_images_human(&listings)),
        }
    }

    // Human-readable formatting methods

    fn format_build_human(&self, report: &BuildReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Built {} ({})", report.tag, report.image_digest);
        let _ = writeln!(out, "  Base: {} ({})", report.base, report.base_digest.short());
        let _ = writeln!(out, "  Steps:");
        for step in &report.steps {
            let marker = if step.cached { "CACHED" } else { "BUILT " };
            let _ = writeln!(
                out,
                "    {} [{}/{}] {}",
                marker,
                step.index,
                report.steps.len(),
                step.instruction
            );
        }
        let _ = write!(
            out,
            "  {} of {} steps cached, {:.2}s",
            report.cached_steps(),
            report.steps.len(),
            report.duration_ms as f64 / 1000.0
        );
        out
    }

    fn format_validation_human(&self, summary: &ValidationSummary) -> String {
        let mut out = String::new();
        if summary.valid {
            let _ = writeln!(out, "✓ {} is valid", summary.spec);
        } else {
            let _ = writeln!(out, "✗ {} is invalid", summary.spec);
            if let Some(error) = &summary.error {
                let _ = writeln!(out, "  {}", error);
            }
        }
        let _ = writeln!(out, "  Context: {}", summary.context);
        let _ = write!(out, "  Rules checked: {}", summary.rules.join(", "));
        out
    }

    fn format_images_human(&self, listings: &[ImageListing<'_>]) -> String {
        if listings.is_empty() {
            return "No images".to_string();
        }

        let width = listings
            .iter()
            .map(|l| l.tag.len())
            .max()
            .unwrap_or(0)
            .max("TAG".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:<12}  {:<6}  CREATED", "TAG", "DIGEST", "LAYERS");
        for listing in listings {
            let _ = writeln!(
                out,
                "{:<width$}  {:<12}  {:<6}  {}",
                listing.tag,
                listing.record.digest.short(),
                listing.record.manifest.layers.len(),
                listing.record.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        out.trim_end().to_string()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).with_context(|| format!("Failed to serialize {} to JSON", what))
}

fn to_yaml<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_yaml::to_string(value).with_context(|| format!("Failed to serialize {} to YAML", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Digest, ImageConfig, ImageManifest, StepReport};
    use crate::spec::StepRole;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn report() -> BuildReport {
        let key = Digest::sha256(b"key");
        BuildReport {
            tag: "demo:latest".to_string(),
            image_digest: Digest::sha256(b"image"),
            base: "docker.io/library/python:3.11-slim".to_string(),
            base_digest: Digest::sha256(b"base"),
            steps: vec![
                StepReport {
                    index: 1,
                    instruction: "COPY requirements.txt .".to_string(),
                    role: StepRole::Manifest,
                    cache_key: key.clone(),
                    diff_id: Digest::sha256(b"diff1"),
                    cached: true,
                },
                StepReport {
                    index: 2,
                    instruction: "RUN pip install -r requirements.txt".to_string(),
                    role: StepRole::Install,
                    cache_key: key,
                    diff_id: Digest::sha256(b"diff2"),
                    cached: false,
                },
            ],
            duration_ms: 1500,
        }
    }

    fn record() -> ImageRecord {
        let layer = Digest::sha256(b"layer");
        ImageRecord {
            digest: Digest::sha256(b"image"),
            manifest: ImageManifest {
                base: "python:3.11-slim".to_string(),
                base_digest: Digest::sha256(b"base"),
                layers: Vec::new(),
                config: ImageConfig {
                    workdir: "/app".to_string(),
                    env: BTreeMap::new(),
                    cmd: vec!["python".to_string(), "app.py".to_string()],
                },
            },
            top_layer: layer,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_build(&report())
            .unwrap();
        assert!(output.contains("Built demo:latest"));
        assert!(output.contains("CACHED [1/2] COPY requirements.txt ."));
        assert!(output.contains("BUILT  [2/2] RUN pip install"));
        assert!(output.contains("1 of 2 steps cached"));
    }

    #[test]
    fn test_build_json() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_build(&report())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["tag"], "demo:latest");
        assert_eq!(value["steps"][0]["role"], "manifest");
        assert_eq!(value["steps"][1]["cached"], false);
        assert!(value["image_digest"].as_str().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn test_validation_invalid_human() {
        let summary = ValidationSummary {
            spec: "layerpack.yaml".to_string(),
            context: ".".to_string(),
            valid: false,
            error: Some("[StepOrder] install runs before its manifest".to_string()),
            rules: vec!["RequiredFields", "StepOrder"],
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_validation(&summary)
            .unwrap();
        assert!(output.contains("✗ layerpack.yaml is invalid"));
        assert!(output.contains("[StepOrder]"));
    }

    #[test]
    fn test_validation_yaml_omits_missing_error() {
        let summary = ValidationSummary {
            spec: "Dockerfile".to_string(),
            context: ".".to_string(),
            valid: true,
            error: None,
            rules: vec!["RequiredFields"],
        };
        let output = OutputFormatter::new(OutputFormat::Yaml)
            .format_validation(&summary)
            .unwrap();
        assert!(output.contains("valid: true"));
        assert!(!output.contains("error"));
    }

    #[test]
    fn test_images_human() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        assert_eq!(formatter.format_images(&[]).unwrap(), "No images");

        let output = formatter
            .format_images(&[("demo:latest".to_string(), record())])
            .unwrap();
        assert!(output.starts_with("TAG"));
        assert!(output.contains("demo:latest"));
    }

    #[test]
    fn test_images_json_flattens_record() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_images(&[("demo:latest".to_string(), record())])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[0]["tag"], "demo:latest");
        assert_eq!(value[0]["manifest"]["config"]["workdir"], "/app");
    }
}
