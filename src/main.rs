use layerpack::cli::commands::{CliArgs, Commands};
use layerpack::cli::handlers::{
    handle_build, handle_images, handle_init, handle_render, handle_run, handle_validate,
};
use layerpack::util::logging::{init_logging, json_from_env, parse_level, LoggingConfig};
use layerpack::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("layerpack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Render(render_args) => handle_render(render_args).await,
        Commands::Validate(validate_args) => handle_validate(validate_args).await,
        Commands::Build(build_args) => handle_build(build_args).await,
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Images(images_args) => handle_images(images_args).await,
        Commands::Init(init_args) => handle_init(init_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("LAYERPACK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    init_logging(LoggingConfig {
        level,
        use_json: json_from_env(),
        ..LoggingConfig::default()
    });
}
