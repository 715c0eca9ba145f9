use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use murmur::config::{Config, DEFAULT_CONFIG_FILE};
use murmur::engine::{Engine, Mode};
use murmur::scheduler::StopReason;
use murmur::{mlog, Error, Result};

/// Murmur - a paced, generated group chat with selfies
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MURMUR_DEBUG=1  Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable debug logging (writes to ~/.murmur/murmur.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Echo log lines to stderr and show writing flags in the transcript
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Skip all pacing waits
    #[arg(long)]
    pub rapid: bool,

    /// Stop after this many runs
    #[arg(long)]
    pub runs: Option<u32>,

    /// Seconds to wait before the first turn
    #[arg(long)]
    pub delay: Option<f64>,

    /// Record published turns and selfies into this directory
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Publish into a file store at this directory
    #[arg(long)]
    pub store: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if self.rapid {
            config.rapid = true;
        }
        if let Some(runs) = self.runs {
            config.runs.max_runs = Some(runs);
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        if let Some(record) = &self.record {
            config.record_dir = Some(absolute(record));
        }
        if let Some(store) = &self.store {
            config.store.dir = Some(absolute(store));
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Generate and publish a conversation
    Run {
        /// Use canned continuations from a JSON array instead of the text command
        #[arg(long)]
        script: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Publish a recorded conversation again with the same pacing
    Replay {
        /// Recording directory (holds conversation.jsonl)
        dir: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Validate the configuration, seeds, sounds and generator commands
    Check,

    /// Write an example configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short = 'f')]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    murmur::log::init_with_options(cli.debug, cli.verbose);

    match cli.command.clone() {
        Command::Init { force } => run_init(&cli.config, force),
        Command::Check => run_check(&cli.config),
        Command::Run { script, overrides } => {
            let mode = Mode::Live {
                script: script.as_deref().map(absolute),
            };
            run_conversation(&cli, mode, &overrides)
        }
        Command::Replay { dir, overrides } => {
            run_conversation(&cli, Mode::Replay(absolute(&dir)), &overrides)
        }
    }
}

/// Paths given on the command line are relative to the working directory,
/// while paths in the config file are relative to the file.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn config_dir(path: &Path) -> PathBuf {
    absolute(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn run_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Config::example().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_check(path: &Path) -> Result<()> {
    let engine = Engine::new(Config::load(path)?, &config_dir(path))?;
    let report = engine.check()?;

    println!("participants: {}", report.participants.join(", "));
    println!("seeds:        {}", report.seeds);
    println!("sounds:       {}", report.sounds);
    match &report.text_command {
        Some(program) => println!("text:         {}", program.display()),
        None => println!("text:         (not set, use `run --script`)"),
    }
    println!("images:       {}", report.image_source);
    println!("store:        {}", report.store);
    Ok(())
}

fn run_conversation(cli: &Cli, mode: Mode, overrides: &Overrides) -> Result<()> {
    let mut config = Config::load(&cli.config)?;
    overrides.apply(&mut config);

    mlog!(
        "murmur starting: {} participants, mode={:?}, rapid={}",
        config.participants.len(),
        mode,
        config.rapid
    );
    let engine = Engine::new(config, &config_dir(&cli.config))?.verbose(cli.verbose);

    let rt = tokio::runtime::Runtime::new()?;
    let reason = rt.block_on(engine.run(mode))?;
    if reason == StopReason::Cancelled {
        mlog!("murmur stopped by user");
    }
    Ok(())
}
