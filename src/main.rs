use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use story_shorts::config::Config;
use story_shorts::generator::run_generation;
use story_shorts::init;
use story_shorts::tool::SystemRunner;

/// Generate narrated short-story videos over random background footage.
#[derive(Parser, Debug)]
#[command(name = "story-shorts", version)]
struct Args {
    /// Number of stories to create
    #[arg(short = 'n', long, default_value_t = 1)]
    runs: usize,

    /// Custom title for a run; repeat for several runs, used in order
    #[arg(short, long = "title")]
    titles: Vec<String>,

    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Skip AssemblyAI subtitle generation
    #[arg(long)]
    no_subtitles: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.runs == 0 {
        eprintln!("[ERROR] --runs must be at least 1");
        return ExitCode::from(2);
    }

    let cfg = match Config::load(&args.config).await {
        Ok(cfg) => cfg.with_env(),
        Err(err) => {
            eprintln!("[ERROR] {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init::ensure_directories(&cfg).await {
        eprintln!("[ERROR] Failed to create directories: {:#}", err);
        return ExitCode::FAILURE;
    }
    for tool in init::missing_tools(&SystemRunner).await {
        eprintln!("[WARNING] {} not found in PATH. Please install FFmpeg.", tool);
    }

    match run_generation(cfg, args.runs, &args.titles, !args.no_subtitles).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("[ERROR] {:#}", err);
            ExitCode::FAILURE
        }
    }
}
