use castsync::config::Config;
use castsync::episode::EpisodeMetadata;
use castsync::media_controls::SouvlakiSurface;
use castsync::playback::native::NativeTransport;
use castsync::playback::{PlaybackHandle, PlaybackService, RemoteCommand};
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info, warn};

#[derive(Debug, PartialEq)]
struct Args {
    url: String,
    title: Option<String>,
    podcast: Option<String>,
    episode_image: Option<String>,
    podcast_cover: Option<String>,
    config_file: Option<String>,
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <episode-url> [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --title <title>      Episode title");
    eprintln!("  --podcast <title>    Podcast title");
    eprintln!("  --image <url>        Episode artwork");
    eprintln!("  --cover <url>        Podcast cover, used when the episode has no artwork");
    eprintln!("  --config <file>      Load settings from an env file");
    eprintln!();
    eprintln!("Commands on stdin: play, pause, toggle, stop, seek <secs>, ff, rw,");
    eprintln!("                   percent <0-100>, rate <speed>, quit");
}

fn parse_args(args: &[String]) -> Option<Args> {
    let mut url = None;
    let mut parsed = Args {
        url: String::new(),
        title: None,
        podcast: None,
        episode_image: None,
        podcast_cover: None,
        config_file: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let slot = match flag {
            "--title" => &mut parsed.title,
            "--podcast" => &mut parsed.podcast,
            "--image" => &mut parsed.episode_image,
            "--cover" => &mut parsed.podcast_cover,
            "--config" => &mut parsed.config_file,
            _ if flag.starts_with("--") => {
                error!("Unknown argument: {}", flag);
                return None;
            }
            _ => {
                url = Some(args[i].clone());
                i += 1;
                continue;
            }
        };
        let Some(value) = args.get(i + 1) else {
            error!("{} requires a value", flag);
            return None;
        };
        *slot = Some(value.clone());
        i += 2;
    }

    parsed.url = url?;
    Some(parsed)
}

/// A line typed on stdin
#[derive(Debug, PartialEq)]
enum LineCommand {
    Remote(RemoteCommand),
    SeekPercent(f64),
    SetRate(f64),
    Quit,
}

fn parse_line(line: &str, seek_step: f64) -> Option<LineCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let value = parts.next().and_then(|v| v.parse::<f64>().ok());

    let parsed = match (command, value) {
        ("play", _) => LineCommand::Remote(RemoteCommand::Play),
        ("pause", _) => LineCommand::Remote(RemoteCommand::Pause),
        ("toggle", _) | ("", _) => LineCommand::Remote(RemoteCommand::Toggle),
        ("stop", _) => LineCommand::Remote(RemoteCommand::Stop),
        ("ff", _) => LineCommand::Remote(RemoteCommand::SeekBy(seek_step)),
        ("rw", _) => LineCommand::Remote(RemoteCommand::SeekBy(-seek_step)),
        ("seek", Some(seconds)) => LineCommand::Remote(RemoteCommand::SeekTo(seconds)),
        ("percent", Some(percent)) => LineCommand::SeekPercent(percent),
        ("rate", Some(rate)) => LineCommand::SetRate(rate),
        ("quit", _) | ("q", _) => LineCommand::Quit,
        _ => return None,
    };
    Some(parsed)
}

/// Apply one line typed on stdin. Returns false on quit.
fn apply_line(handle: &PlaybackHandle, line: &str, seek_step: f64) -> bool {
    match parse_line(line, seek_step) {
        Some(LineCommand::Remote(RemoteCommand::Play)) => handle.play(),
        Some(LineCommand::Remote(RemoteCommand::Pause)) => handle.pause(),
        Some(LineCommand::Remote(RemoteCommand::Toggle)) => handle.toggle(),
        Some(LineCommand::Remote(RemoteCommand::Stop)) => handle.stop(),
        Some(LineCommand::Remote(RemoteCommand::SeekBy(offset))) => handle.seek_by(offset),
        Some(LineCommand::Remote(RemoteCommand::SeekTo(seconds))) => handle.seek(seconds),
        Some(LineCommand::SeekPercent(percent)) => handle.seek_percent(percent),
        Some(LineCommand::SetRate(rate)) => handle.set_rate(rate),
        Some(LineCommand::Quit) => return false,
        None => warn!("Unrecognized command: {}", line),
    }
    true
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info for this crate
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "castsync=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(args_parsed) = parse_args(&args) else {
        print_usage(&args[0]);
        std::process::exit(1);
    };

    let config = match &args_parsed.config_file {
        Some(path) => Config::from_env_file(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (transport, transport_rx) = match NativeTransport::new() {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to initialize audio output: {}", e);
            std::process::exit(1);
        }
    };

    let (remote_tx, remote_rx) = tokio_mpsc::unbounded_channel();
    let surface = match SouvlakiSurface::new(&config.platform, remote_tx, config.sync.seek_step_secs)
    {
        Ok(surface) => surface,
        Err(e) => {
            error!("Failed to initialize media controls: {}", e);
            std::process::exit(1);
        }
    };

    let handle = PlaybackService::start(
        transport,
        transport_rx,
        surface,
        config.sync,
        Some(remote_rx),
        tokio::runtime::Handle::current(),
    );

    // Progress goes to stdout as JSON lines
    let mut progress_rx = handle.subscribe_progress();
    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            match serde_json::to_string(&progress) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize progress: {}", e),
            }
        }
    });

    let metadata = EpisodeMetadata::for_episode(
        args_parsed.title.as_deref().unwrap_or(&args_parsed.url),
        args_parsed.podcast.as_deref().unwrap_or_default(),
        args_parsed.episode_image.as_deref(),
        args_parsed.podcast_cover.as_deref(),
    );
    handle.load_and_play(args_parsed.url.clone(), Some(metadata));
    info!("Playing {}", args_parsed.url);

    let seek_step = config.sync.seek_step_secs;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !apply_line(&handle, line.trim(), seek_step) {
                        break;
                    }
                }
                Ok(None) => {
                    // stdin closed; keep playing until interrupted
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    info!("Exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("castsync")
            .chain(values.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_with_options() {
        let parsed = parse_args(&args(&[
            "--title",
            "Episode 12",
            "https://cdn.example.com/ep12.mp3",
            "--cover",
            "https://cdn.example.com/cover.jpg",
        ]))
        .unwrap();
        assert_eq!(parsed.url, "https://cdn.example.com/ep12.mp3");
        assert_eq!(parsed.title.as_deref(), Some("Episode 12"));
        assert_eq!(
            parsed.podcast_cover.as_deref(),
            Some("https://cdn.example.com/cover.jpg")
        );
        assert_eq!(parsed.podcast, None);
        assert_eq!(parsed.config_file, None);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert_eq!(parse_args(&args(&[])), None);
        assert_eq!(parse_args(&args(&["--title", "No url"])), None);
        assert_eq!(parse_args(&args(&["ep.mp3", "--volume", "3"])), None);
        assert_eq!(parse_args(&args(&["ep.mp3", "--config"])), None);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("seek 90", 15.0),
            Some(LineCommand::Remote(RemoteCommand::SeekTo(90.0)))
        );
        assert_eq!(
            parse_line("rw", 15.0),
            Some(LineCommand::Remote(RemoteCommand::SeekBy(-15.0)))
        );
        assert_eq!(
            parse_line("", 15.0),
            Some(LineCommand::Remote(RemoteCommand::Toggle))
        );
        assert_eq!(parse_line("percent 25", 15.0), Some(LineCommand::SeekPercent(25.0)));
        assert_eq!(parse_line("rate 1.5", 15.0), Some(LineCommand::SetRate(1.5)));
        assert_eq!(parse_line("q", 15.0), Some(LineCommand::Quit));
    }

    #[test]
    fn test_parse_line_needs_numeric_values() {
        assert_eq!(parse_line("seek", 15.0), None);
        assert_eq!(parse_line("rate fast", 15.0), None);
        assert_eq!(parse_line("volume 3", 15.0), None);
    }
}
