use std::io;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{info, warn};

use keystrike::sim::SimArm;
use keystrike::{
    cartesian_sequencer, joint_sequencer, parse_song, ActuationMode, AutoConfirm, Config,
    ConfirmPolicy, LineConfirm, RunSummary, StopToken, StrikeError,
};

/// Play a song on a keyboard with a simulated arm.
///
/// Cartesian mode parks the idle arm, poses the acting arm, captures home and strikes keys
/// by pose targets. Joint mode replays per-note postures.
#[derive(Parser, Debug)]
#[command(name = "keystrike")]
#[command(version)]
#[command(about = "Strike piano keys with a robot arm", long_about = None)]
struct Cli {
    /// YAML configuration (defaults to the built-in rig configuration)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Actuation mode
    #[arg(short, long, value_enum)]
    mode: Option<ActuationMode>,

    /// Song as note names or indices, e.g. "A B C D" or "9 11 0 2"
    #[arg(short, long)]
    song: Option<String>,

    /// Number of note cycles to play (defaults to one pass through the song)
    #[arg(long, conflicts_with = "forever")]
    cycles: Option<usize>,

    /// Keep looping the song
    #[arg(long)]
    forever: bool,

    /// Ask for confirmation on stdin before every move
    #[arg(short, long)]
    interactive: bool,

    /// Polls the simulated arm needs to finish a motion
    #[arg(long, default_value_t = 3)]
    motion_ticks: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let cycles = if cli.forever {
        None
    } else {
        Some(cli.cycles.unwrap_or(config.song.len()))
    };

    // Ctrl-C stops cooperatively so the controller context is always restored
    let stop = StopToken::new();
    let handle = stop.handle();
    if let Err(e) = ctrlc::set_handler(move || handle.stop()) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    let result = if config.interactive {
        let stdin = io::stdin();
        let confirm = LineConfirm::new(stdin.lock(), io::stdout());
        play(&config, &cli, cycles, confirm, stop)
    } else {
        play(&config, &cli, cycles, AutoConfirm, stop)
    };

    match result {
        Ok(summary) => {
            info!(cycles = summary.cycles, stopped = summary.stopped, "finished");
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, StrikeError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::builtin()?,
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(song) = &cli.song {
        config.song = parse_song(song)?;
    }
    if cli.interactive {
        config.interactive = true;
    }
    Ok(config)
}

fn play<P: ConfirmPolicy>(
    config: &Config,
    cli: &Cli,
    cycles: Option<usize>,
    confirm: P,
    stop: StopToken,
) -> Result<RunSummary, StrikeError> {
    let acting = SimArm::new();
    acting.set_polls_per_motion(cli.motion_ticks);

    info!(mode = %config.mode, notes = config.song.len(), "starting");
    match config.mode {
        ActuationMode::Cartesian => {
            let mut idle = SimArm::new();
            idle.set_polls_per_motion(cli.motion_ticks);
            let mut sequencer = cartesian_sequencer(
                config,
                &mut idle,
                &mut acting.clone(),
                acting,
                confirm,
                stop,
            )?;
            let summary = sequencer.run(cycles)?;
            sequencer.shutdown()?;
            Ok(summary)
        }
        ActuationMode::Joint => {
            let mut sequencer = joint_sequencer(config, acting, confirm, stop)?;
            let summary = sequencer.run(cycles)?;
            sequencer.shutdown()?;
            Ok(summary)
        }
    }
}
