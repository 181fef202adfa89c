use std::{io::Write, path::PathBuf, thread, time::Duration};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde_json::json;
use vidgif::{
    ConversionError, ConversionRequest, ConversionState, DEFAULT_FRAME_RATE, Dither, ErrorKind,
    FfmpegLogLevel, FrameSource, GifOptions, VideoFile, parse_frame_rate, parse_target_height,
    spawn_conversion,
};

const CLI_AFTER_HELP: &str = "Examples:\n  vidgif convert clip.mp4 --out-dir gifs --fps 12 --height 240\n  vidgif convert clip.mp4 --name preview --colors 64 --dither bayer\n  vidgif info clip.mp4 --fps 15 --json\n  vidgif completions zsh > _vidgif";

/// How often the terminal polls the worker.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(
    name = "vidgif",
    version,
    about = "Convert video files to animated GIFs",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, error, warning, info, verbose, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

/// Dithering applied when frames are mapped onto the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DitherArg {
    SierraLite,
    FloydSteinberg,
    Bayer,
    None,
}

impl From<DitherArg> for Dither {
    fn from(value: DitherArg) -> Self {
        match value {
            DitherArg::SierraLite => Dither::SierraLite,
            DitherArg::FloydSteinberg => Dither::FloydSteinberg,
            DitherArg::Bayer => Dither::Bayer,
            DitherArg::None => Dither::None,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a video into an animated GIF.
    #[command(
        about = "Convert a video to GIF",
        after_help = "Examples:\n  vidgif convert clip.mp4\n  vidgif convert clip.mp4 --out-dir gifs --fps 8 --height 180 --loop-count 3"
    )]
    Convert {
        /// Input video path.
        input: PathBuf,
        /// Directory the GIF is written to.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Output file name; defaults to the input's file stem.
        #[arg(long, default_value = "")]
        name: String,
        /// Output frames per second.
        #[arg(long, default_value_t = DEFAULT_FRAME_RATE.to_string())]
        fps: String,
        /// Output height in pixels; empty keeps the native size.
        #[arg(long, default_value = "")]
        height: String,
        /// Maximum palette size (4-256).
        #[arg(long, default_value_t = 256)]
        colors: u16,
        /// Dithering used when mapping frames onto the palette.
        #[arg(long, value_enum, default_value_t = DitherArg::SierraLite)]
        dither: DitherArg,
        /// Map colours without dithering (same as `--dither none`).
        #[arg(long, conflicts_with = "dither")]
        no_dither: bool,
        /// Play the animation this many extra times instead of looping forever.
        #[arg(long)]
        loop_count: Option<u16>,
    },

    /// Print video metadata and the expected GIF frame count.
    #[command(
        about = "Print video metadata",
        after_help = "Examples:\n  vidgif info clip.mp4\n  vidgif info clip.mp4 --fps 15 --json"
    )]
    Info {
        /// Input video path.
        input: PathBuf,
        /// Output frame rate used for the frame estimate.
        #[arg(long, default_value_t = DEFAULT_FRAME_RATE.to_string())]
        fps: String,
        /// Output metadata as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .format(|buf, record| {
            let label = match record.level() {
                log::Level::Error => "ERROR".bright_red(),
                log::Level::Warn => "WARN ".yellow(),
                log::Level::Info => "INFO ".green(),
                log::Level::Debug => "DEBUG".blue(),
                log::Level::Trace => "TRACE".magenta(),
            };
            writeln!(
                buf,
                "{} {} {}",
                buf.timestamp().to_string().white(),
                label,
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global.verbose);

    let level = match &global.log_level {
        Some(level) => level
            .parse::<FfmpegLogLevel>()
            .map_err(|_| format!("unsupported --log-level: {level}"))?,
        None => FfmpegLogLevel::Error,
    };
    vidgif::set_ffmpeg_log_level(level);
    Ok(())
}

fn gif_options(
    colors: u16,
    dither: DitherArg,
    no_dither: bool,
    loop_count: Option<u16>,
) -> GifOptions {
    let dither = if no_dither {
        Dither::None
    } else {
        Dither::from(dither)
    };
    GifOptions::new()
        .max_colors(colors)
        .dither(dither)
        .repeat(loop_count)
}

fn error_label(error: &ConversionError) -> &'static str {
    match error.kind() {
        ErrorKind::InvalidParameter => "invalid input:",
        ErrorKind::ResourceOpen => "cannot open:",
        ErrorKind::Decode => "decode failed:",
        ErrorKind::Encode => "encode failed:",
        ErrorKind::Write => "write failed:",
        ErrorKind::Worker => "worker failed:",
        _ => "error:",
    }
}

fn stage_message(state: ConversionState) -> &'static str {
    match state {
        ConversionState::Idle | ConversionState::Opening => "opening",
        ConversionState::Streaming => "converting",
        ConversionState::Finalizing => "writing gif",
        ConversionState::Done => "done",
        ConversionState::Failed => "failed",
    }
}

fn run_convert(request: ConversionRequest) -> Result<(), Box<dyn std::error::Error>> {
    let progress_bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}",
    )?;
    progress_bar.set_style(style.progress_chars("##-"));

    let handle = spawn_conversion(request)?;
    while !handle.is_finished() {
        if let Some(percent) = handle.poll_progress() {
            progress_bar.set_position(percent.round() as u64);
        }
        progress_bar.set_message(stage_message(handle.state()));
        progress_bar.tick();
        thread::sleep(POLL_INTERVAL);
    }
    if let Some(percent) = handle.poll_progress() {
        progress_bar.set_position(percent.round() as u64);
    }

    match handle.join() {
        Ok(path) => {
            progress_bar.finish_with_message("done");
            println!(
                "{} {}",
                "saved".green().bold(),
                path.display().to_string().green()
            );
            Ok(())
        }
        Err(error) => {
            progress_bar.abandon_with_message("failed");
            Err(Box::new(error))
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Convert {
            input,
            out_dir,
            name,
            fps,
            height,
            colors,
            dither,
            no_dither,
            loop_count,
        } => {
            let frame_rate = parse_frame_rate(&fps)?;
            let target_height = parse_target_height(&height)?;
            let request = ConversionRequest::builder(&input, &out_dir)
                .output_name(name)
                .frame_rate(i64::from(frame_rate))
                .maybe_target_height(target_height)
                .gif_options(gif_options(colors, dither, no_dither, loop_count))
                .build()?;
            log::debug!("Converting {} -> {}", input.display(), request.output_path().display());
            run_convert(request)?;
        }
        Commands::Info { input, fps, json } => {
            let frame_rate = parse_frame_rate(&fps)?;
            let video = VideoFile::open(&input, frame_rate)?;
            let metadata = video.metadata();
            let expected = metadata.expected_frames(frame_rate);
            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "width": metadata.width,
                    "height": metadata.height,
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "fps": metadata.frames_per_second,
                    "codec": metadata.codec,
                    "gif_fps": frame_rate,
                    "expected_gif_frames": expected,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Duration: {:?}", metadata.duration);
                println!(
                    "Video: {}x{} @ {:.2} fps [{}]",
                    metadata.width, metadata.height, metadata.frames_per_second, metadata.codec,
                );
                println!("GIF frames at {frame_rate} fps: {expected}");
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "vidgif", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        let label = error
            .downcast_ref::<ConversionError>()
            .map_or("error:", error_label);
        eprintln!("{} {error}", label.red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn convert_defaults() {
        let cli = Cli::try_parse_from(["vidgif", "convert", "clip.mp4"]).unwrap();
        match cli.command {
            Commands::Convert {
                out_dir,
                name,
                fps,
                height,
                colors,
                dither,
                no_dither,
                loop_count,
                ..
            } => {
                assert_eq!(out_dir, PathBuf::from("."));
                assert!(name.is_empty());
                assert_eq!(parse_frame_rate(&fps).unwrap(), DEFAULT_FRAME_RATE);
                assert_eq!(parse_target_height(&height).unwrap(), None);
                assert_eq!(colors, 256);
                assert_eq!(dither, DitherArg::SierraLite);
                assert!(!no_dither);
                assert_eq!(loop_count, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["vidgif", "info", "clip.mp4", "--verbose", "--log-level", "quiet"])
                .unwrap();
        assert!(cli.global.verbose);
        assert_eq!(cli.global.log_level.as_deref(), Some("quiet"));
    }

    #[test]
    fn gif_options_from_flags() {
        let options = gif_options(64, DitherArg::Bayer, true, Some(2));
        assert_eq!(options.max_colors, 64);
        assert_eq!(options.dither, Dither::None);
        assert_eq!(options.repeat, Some(2));

        let options = gif_options(256, DitherArg::FloydSteinberg, false, None);
        assert_eq!(options.dither, Dither::FloydSteinberg);
    }

    #[test]
    fn dither_flags_conflict() {
        assert!(
            Cli::try_parse_from(["vidgif", "convert", "clip.mp4", "--dither", "bayer", "--no-dither"])
                .is_err()
        );
        let cli = Cli::try_parse_from(["vidgif", "convert", "clip.mp4", "--dither", "floyd-steinberg"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Convert { dither: DitherArg::FloydSteinberg, .. }
        ));
    }

    #[test]
    fn error_labels_follow_kind() {
        let error = ConversionError::InvalidParameter("frame rate".to_string());
        assert_eq!(error_label(&error), "invalid input:");
        assert_eq!(error_label(&ConversionError::Write("disk full".to_string())), "write failed:");
    }
}
