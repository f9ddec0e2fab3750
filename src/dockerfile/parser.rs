//! Dockerfile parsing into an [`ImageSpec`]
//!
//! Only the single-stage subset that an image spec can express is accepted:
//! `FROM`, `WORKDIR`, `COPY`, `RUN`, `ENV` and `CMD`. `EXPOSE` and `LABEL`
//! carry no build or launch semantics here and are skipped.

use crate::spec::{BuildStep, CommandLine, CopyStep, ImageSpec, RunStep};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DockerfileError {
    #[error("line {line}: missing arguments for {instruction}")]
    MissingArguments { line: usize, instruction: String },

    #[error("line {line}: unsupported instruction {instruction}")]
    UnsupportedInstruction { line: usize, instruction: String },

    #[error("line {line}: unsupported flag {flag} on {instruction}")]
    UnsupportedFlag {
        line: usize,
        instruction: String,
        flag: String,
    },

    #[error("line {line}: multi-stage builds are not supported (second FROM)")]
    MultiStage { line: usize },

    #[error("line {line}: WORKDIR changes the directory after build steps")]
    WorkdirAfterSteps { line: usize },

    #[error("line {line}: {instruction} before FROM")]
    BeforeFrom { line: usize, instruction: String },

    #[error("line {line}: invalid ENV syntax: {detail}")]
    InvalidEnv { line: usize, detail: String },

    #[error("line {line}: invalid JSON array: {detail}")]
    InvalidJson { line: usize, detail: String },

    #[error("no FROM instruction found")]
    MissingFrom,

    #[error("no CMD instruction found")]
    MissingCmd,
}

/// A logical instruction with continuation lines joined
struct LogicalLine {
    number: usize,
    keyword: String,
    args: String,
}

fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut buffer = String::new();
    let mut start = 0;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if buffer.is_empty() {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            start = idx + 1;
        } else if trimmed.starts_with('#') {
            // comments inside a continuation are dropped
            continue;
        }

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            buffer.push_str(stripped.trim_end());
            buffer.push(' ');
            continue;
        }

        buffer.push_str(trimmed);
        push_logical(&mut lines, start, &buffer);
        buffer.clear();
    }

    if !buffer.trim().is_empty() {
        push_logical(&mut lines, start, &buffer);
    }

    lines
}

fn push_logical(lines: &mut Vec<LogicalLine>, number: usize, text: &str) {
    let text = text.trim();
    let (keyword, args) = match text.split_once(char::is_whitespace) {
        Some((k, a)) => (k, a.trim()),
        None => (text, ""),
    };
    lines.push(LogicalLine {
        number,
        keyword: keyword.to_uppercase(),
        args: args.to_string(),
    });
}

fn parse_json_array(line: usize, args: &str) -> Result<Vec<String>, DockerfileError> {
    serde_json::from_str::<Vec<String>>(args).map_err(|e| DockerfileError::InvalidJson {
        line,
        detail: e.to_string(),
    })
}

fn parse_command(line: usize, args: &str) -> Result<CommandLine, DockerfileError> {
    if args.starts_with('[') {
        Ok(CommandLine::Exec(parse_json_array(line, args)?))
    } else {
        Ok(CommandLine::Shell(args.to_string()))
    }
}

/// Strips surrounding quotes
///
/// Inside double quotes a backslash escapes `"`, `\\` and `$`; other
/// backslashes are kept as written.
fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() < 2 {
        return value.to_string();
    }
    let inner = &value[1..value.len() - 1];
    match (bytes[0], bytes[bytes.len() - 1]) {
        (b'"', b'"') => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c != '\\' {
                    out.push(c);
                    continue;
                }
                match chars.next() {
                    Some(next @ ('"' | '\\' | '$')) => out.push(next),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                }
            }
            out
        }
        (b'\'', b'\'') => inner.to_string(),
        _ => value.to_string(),
    }
}

/// Splits on whitespace outside of double or single quotes
fn split_words(args: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('"'), '\\') => {
                escaped = true;
                current.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn parse_env(
    line: usize,
    args: &str,
    env: &mut BTreeMap<String, String>,
) -> Result<(), DockerfileError> {
    let words = split_words(args);
    let first = words.first().ok_or_else(|| DockerfileError::MissingArguments {
        line,
        instruction: "ENV".to_string(),
    })?;

    if !first.contains('=') {
        // legacy form: ENV KEY value with spaces
        let value = args[first.len()..].trim();
        if value.is_empty() {
            return Err(DockerfileError::InvalidEnv {
                line,
                detail: format!("missing value for {}", first),
            });
        }
        env.insert(first.clone(), unquote(value));
        return Ok(());
    }

    for word in words {
        let (key, value) = word.split_once('=').ok_or_else(|| DockerfileError::InvalidEnv {
            line,
            detail: format!("expected KEY=VALUE, got '{}'", word),
        })?;
        if key.is_empty() {
            return Err(DockerfileError::InvalidEnv {
                line,
                detail: "empty variable name".to_string(),
            });
        }
        env.insert(key.to_string(), unquote(value));
    }
    Ok(())
}

fn resolve_workdir(current: &str, next: &str) -> String {
    let joined = if next.starts_with('/') {
        PathBuf::from(next)
    } else {
        Path::new(if current.is_empty() { "/" } else { current }).join(next)
    };

    let mut normalized = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
            _ => {}
        }
    }
    normalized.to_string_lossy().into_owned()
}

/// Parses Dockerfile text into an image specification
pub fn parse(text: &str) -> Result<ImageSpec, DockerfileError> {
    let mut base: Option<String> = None;
    let mut workdir = String::new();
    let mut steps = Vec::new();
    let mut env = BTreeMap::new();
    let mut command: Option<CommandLine> = None;

    for logical in logical_lines(text) {
        let LogicalLine {
            number: line,
            keyword,
            args,
        } = logical;

        if args.is_empty() {
            return Err(DockerfileError::MissingArguments {
                line,
                instruction: keyword,
            });
        }

        if keyword != "FROM" && base.is_none() {
            return Err(DockerfileError::BeforeFrom {
                line,
                instruction: keyword,
            });
        }

        match keyword.as_str() {
            "FROM" => {
                if base.is_some() {
                    return Err(DockerfileError::MultiStage { line });
                }
                let image = args.split_whitespace().next().unwrap_or_default();
                if image.starts_with("--") {
                    return Err(DockerfileError::UnsupportedFlag {
                        line,
                        instruction: keyword,
                        flag: image.to_string(),
                    });
                }
                base = Some(image.to_string());
            }
            "WORKDIR" => {
                let next = resolve_workdir(&workdir, &unquote(&args));
                let current = if workdir.is_empty() { "/" } else { workdir.as_str() };
                // a spec has one workdir for every step
                if !steps.is_empty() && next != current {
                    return Err(DockerfileError::WorkdirAfterSteps { line });
                }
                workdir = next;
            }
            "COPY" => {
                let mut words = if args.starts_with('[') {
                    parse_json_array(line, &args)?
                } else {
                    split_words(&args).into_iter().map(|w| unquote(&w)).collect()
                };
                if let Some(flag) = words.iter().find(|w| w.starts_with("--")) {
                    return Err(DockerfileError::UnsupportedFlag {
                        line,
                        instruction: keyword,
                        flag: flag.clone(),
                    });
                }
                if words.len() < 2 {
                    return Err(DockerfileError::MissingArguments {
                        line,
                        instruction: keyword,
                    });
                }
                let dest = words.pop().unwrap_or_default();
                steps.push(BuildStep::Copy(CopyStep::new(words, dest)));
            }
            "RUN" => steps.push(BuildStep::Run(RunStep {
                command: parse_command(line, &args)?,
            })),
            "ENV" => parse_env(line, &args, &mut env)?,
            "CMD" => command = Some(parse_command(line, &args)?),
            "EXPOSE" | "LABEL" => debug!(line, instruction = %keyword, "Skipping instruction"),
            _ => {
                return Err(DockerfileError::UnsupportedInstruction {
                    line,
                    instruction: keyword,
                })
            }
        }
    }

    let base = base.ok_or(DockerfileError::MissingFrom)?;
    let command = command.ok_or(DockerfileError::MissingCmd)?;

    Ok(ImageSpec {
        version: "1.0".to_string(),
        base,
        workdir: if workdir.is_empty() {
            "/".to_string()
        } else {
            workdir
        },
        steps,
        env,
        command,
    })
}
