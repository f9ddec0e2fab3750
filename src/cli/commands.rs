use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Build and run container images from declarative specs
#[derive(Parser, Debug)]
#[command(
    name = "layerpack",
    about = "Build and run container images from declarative specs",
    version,
    long_about = "layerpack reads an image specification (YAML, JSON or a Dockerfile), \
                  builds it step by step with a content-addressed layer cache, and runs \
                  the resulting image as a single foreground process whose exit code \
                  becomes layerpack's own."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Print the Dockerfile for a spec",
        long_about = "Renders an image specification as a Dockerfile.\n\n\
                      Examples:\n  \
                      layerpack render\n  \
                      layerpack render -f layerpack.yaml"
    )]
    Render(RenderArgs),

    #[command(
        about = "Check a spec against its invariants and build context",
        long_about = "Validates step ordering, image reference, runtime flags, and that \
                      every COPY source and the entry script exist in the build context.\n\n\
                      Examples:\n  \
                      layerpack validate\n  \
                      layerpack validate ./service --format json"
    )]
    Validate(ValidateArgs),

    #[command(
        about = "Build an image",
        long_about = "Builds the spec in CONTEXT, reusing cached layers whose inputs are \
                      unchanged, and tags the result.\n\n\
                      Examples:\n  \
                      layerpack build -t demo\n  \
                      layerpack build ./service -t demo:1.0 --no-cache"
    )]
    Build(BuildArgs),

    #[command(
        about = "Run a built image",
        long_about = "Starts the image's command in the foreground with the declared \
                      environment. layerpack exits with the command's exit code.\n\n\
                      Examples:\n  \
                      layerpack run demo"
    )]
    Run(RunArgs),

    #[command(about = "List built images")]
    Images(ImagesArgs),

    #[command(
        about = "Write a starter spec for a python application",
        long_about = "Writes the python application layout (manifest copy, dependency \
                      install, full-tree copy, unbuffered output, no bytecode caches) as YAML.\n\n\
                      Examples:\n  \
                      layerpack init\n  \
                      layerpack init --base python:3.12-slim --entry main.py -o layerpack.yaml"
    )]
    Init(InitArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(
        short = 'f',
        long,
        value_name = "FILE",
        help = "Spec file (defaults to layerpack.yaml, then Dockerfile, in the current directory)"
    )]
    pub file: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(value_name = "CONTEXT", help = "Build context (defaults to current directory)")]
    pub context: Option<PathBuf>,

    #[arg(short = 'f', long, value_name = "FILE", help = "Spec file")]
    pub file: Option<PathBuf>,

    #[arg(short = 'F', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(value_name = "CONTEXT", help = "Build context (defaults to current directory)")]
    pub context: Option<PathBuf>,

    #[arg(short = 'f', long, value_name = "FILE", help = "Spec file")]
    pub file: Option<PathBuf>,

    #[arg(short = 't', long, value_name = "TAG", help = "Tag for the built image")]
    pub tag: String,

    #[arg(long, help = "Execute every step even when a cached layer exists")]
    pub no_cache: bool,

    #[arg(short = 'F', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "TAG", help = "Image to run")]
    pub tag: String,

    #[arg(long, help = "Keep the container filesystem after exit")]
    pub keep: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ImagesArgs {
    #[arg(short = 'F', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "python:3.11-slim", help = "Base image")]
    pub base: String,

    #[arg(long, default_value = "app.py", help = "Entry script")]
    pub entry: String,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the spec to FILE instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
