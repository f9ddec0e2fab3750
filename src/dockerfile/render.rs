use crate::spec::{BuildStep, CommandLine, CopyStep, ImageSpec};
use std::fmt::Write;

fn quote_env_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.contains(|c: char| c.is_whitespace() || c == '"')
        && !value.starts_with('\'')
        && !value.ends_with('\\');
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Paths with whitespace need the JSON-array form to survive parsing
fn copy_args(copy: &CopyStep) -> String {
    let needs_json = copy
        .sources
        .iter()
        .chain(std::iter::once(&copy.dest))
        .any(|w| w.contains(char::is_whitespace));
    if !needs_json {
        return format!("{} {}", copy.sources.join(" "), copy.dest);
    }

    let mut words = copy.sources.clone();
    words.push(copy.dest.clone());
    CommandLine::Exec(words).to_string()
}

/// Renders an image specification as a Dockerfile
///
/// Build steps keep their declared order. Environment lines come after the
/// last build step so runtime env never invalidates a cached build layer.
pub fn render(spec: &ImageSpec) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "FROM {}", spec.base);
    let _ = writeln!(out, "WORKDIR {}", spec.workdir);
    let _ = writeln!(out);

    for step in &spec.steps {
        match step {
            BuildStep::Copy(copy) => {
                let _ = writeln!(out, "COPY {}", copy_args(copy));
            }
            BuildStep::Run(run) => {
                let _ = writeln!(out, "RUN {}", run.command);
            }
        }
    }

    if !spec.env.is_empty() {
        let _ = writeln!(out);
        for (key, value) in &spec.env {
            let _ = writeln!(out, "ENV {}={}", key, quote_env_value(value));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "CMD {}", spec.command);
    out
}
