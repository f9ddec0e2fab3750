//! Image build specification data structures
//!
//! An [`ImageSpec`] is the declarative, inert description of an image: a base
//! image, a working directory, an ordered list of build steps, the runtime
//! environment and the start command. It is authored once and consumed by the
//! builder; nothing mutates it at run time.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Disables writing of compiled bytecode caches by the interpreter
pub const NO_BYTECODE_FLAG: &str = "PYTHONDONTWRITEBYTECODE";

/// Disables buffering of the interpreter's stdout and stderr
pub const UNBUFFERED_FLAG: &str = "PYTHONUNBUFFERED";

/// File name of the dependency manifest used by the python preset
pub const DEFAULT_MANIFEST: &str = "requirements.txt";

/// Working directory used by the python preset
pub const DEFAULT_WORKDIR: &str = "/app";

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Root of an image build specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Schema version (e.g., "1.0")
    #[serde(default = "default_version")]
    pub version: String,
    /// Base image reference (e.g., "python:3.11-slim")
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub base: String,
    /// Absolute working directory inside the image
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub workdir: String,
    /// Build steps, applied in order
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub steps: Vec<BuildStep>,
    /// Process-wide environment for every container instance
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
    /// Start command
    pub command: CommandLine,
}

/// One step of the build phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildStep {
    Copy(CopyStep),
    Run(RunStep),
}

/// Copies files from the build context into the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStep {
    /// Context-relative sources
    pub sources: Vec<String>,
    /// Destination, relative to the working directory unless absolute
    pub dest: String,
}

/// Runs a command inside the image being built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
    pub command: CommandLine,
}

/// A command in exec form (argv) or shell form (a script for `/bin/sh -c`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Exec(Vec<String>),
    Shell(String),
}

/// What a build step contributes to the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Copy of individual files, typically the dependency manifest
    Manifest,
    /// Dependency installation
    Install,
    /// Copy of the whole application tree or a directory
    Tree,
}

impl CommandLine {
    /// Exec-form argv; shell form is wrapped in `/bin/sh -c`
    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandLine::Exec(args) => args.clone(),
            CommandLine::Shell(script) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), script.clone()]
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Exec(args) => args.iter().all(|a| a.trim().is_empty()),
            CommandLine::Shell(script) => script.trim().is_empty(),
        }
    }

    /// Basename of the program that will be executed
    pub fn program_name(&self) -> Option<String> {
        let argv = self.argv();
        let program = argv.first()?;
        Some(
            Path::new(program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.clone()),
        )
    }
}

impl Default for CommandLine {
    fn default() -> Self {
        CommandLine::Exec(Vec::new())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Exec(args) => {
                let json = serde_json::to_string(args).map_err(|_| fmt::Error)?;
                write!(f, "{}", json.replace("\",\"", "\", \""))
            }
            CommandLine::Shell(script) => write!(f, "{}", script),
        }
    }
}

/// True for copy sources that stand for a whole directory tree
pub fn is_tree_source(source: &str) -> bool {
    let trimmed = source.trim();
    trimmed == "." || trimmed == "./" || trimmed.ends_with('/')
}

impl CopyStep {
    pub fn new(sources: Vec<String>, dest: impl Into<String>) -> Self {
        Self {
            sources,
            dest: dest.into(),
        }
    }
}

impl BuildStep {
    pub fn copy(sources: &[&str], dest: &str) -> Self {
        BuildStep::Copy(CopyStep::new(
            sources.iter().map(|s| s.to_string()).collect(),
            dest,
        ))
    }

    pub fn run_shell(script: &str) -> Self {
        BuildStep::Run(RunStep {
            command: CommandLine::Shell(script.to_string()),
        })
    }

    pub fn role(&self) -> StepRole {
        match self {
            BuildStep::Run(_) => StepRole::Install,
            BuildStep::Copy(copy) if copy.sources.iter().any(|s| is_tree_source(s)) => {
                StepRole::Tree
            }
            BuildStep::Copy(_) => StepRole::Manifest,
        }
    }

    /// Dockerfile-style one line description, also used as `created_by`
    pub fn instruction(&self) -> String {
        match self {
            BuildStep::Copy(copy) => format!("COPY {} {}", copy.sources.join(" "), copy.dest),
            BuildStep::Run(run) => format!("RUN {}", run.command),
        }
    }
}

impl ImageSpec {
    /// The python application layout: manifest first, install, then the tree
    pub fn python_app(base: impl Into<String>, entry: impl Into<String>) -> Self {
        let mut env = BTreeMap::new();
        env.insert(NO_BYTECODE_FLAG.to_string(), "1".to_string());
        env.insert(UNBUFFERED_FLAG.to_string(), "1".to_string());

        Self {
            version: default_version(),
            base: base.into(),
            workdir: DEFAULT_WORKDIR.to_string(),
            steps: vec![
                BuildStep::copy(&[DEFAULT_MANIFEST], "."),
                BuildStep::run_shell(&format!(
                    "pip install --no-cache-dir -r {}",
                    DEFAULT_MANIFEST
                )),
                BuildStep::copy(&["."], "."),
            ],
            env,
            command: CommandLine::Exec(vec!["python".to_string(), entry.into()]),
        }
    }

    /// Loads a specification from YAML, JSON or a Dockerfile
    ///
    /// The format is chosen by extension: `.yaml`/`.yml`, `.json`, anything
    /// else is parsed as a Dockerfile.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read spec file {}", path.display()))?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML spec {}", path.display())),
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON spec {}", path.display())),
            _ => crate::dockerfile::parse(&content)
                .with_context(|| format!("Failed to parse Dockerfile {}", path.display())),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize ImageSpec to YAML")
    }

    /// Entry script of an exec-form start command (its second token)
    pub fn entry_script(&self) -> Option<&str> {
        match &self.command {
            CommandLine::Exec(args) => args.get(1).map(|s| s.as_str()),
            CommandLine::Shell(_) => None,
        }
    }

    /// Copy steps in declaration order
    pub fn copy_steps(&self) -> impl Iterator<Item = &CopyStep> {
        self.steps.iter().filter_map(|step| match step {
            BuildStep::Copy(copy) => Some(copy),
            BuildStep::Run(_) => None,
        })
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image Specification (v{})", self.version)?;
        writeln!(f, "  Base:    {}", self.base)?;
        writeln!(f, "  Workdir: {}", self.workdir)?;
        writeln!(f, "  Steps:")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "    {}. {:<8} {}", i + 1, format!("{:?}", step.role()), step.instruction())?;
        }
        if !self.env.is_empty() {
            writeln!(f, "  Env:")?;
            for (key, value) in &self.env {
                writeln!(f, "    {}={}", key, value)?;
            }
        }
        writeln!(f, "  Command: {}", self.command)?;
        Ok(())
    }
}
