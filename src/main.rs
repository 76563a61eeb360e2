use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use screenmix::recorder::Record;
use screenmix::{
    create_router, AppState, AudioMode, Config, HeadlessHost, SegmentReader, Studio,
    StudioSettings, SyntheticCapture,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "screenmix")]
#[command(about = "Screen recording with camera overlay and audio mixing")]
struct Cli {
    /// Config file (TOML); missing files fall back to defaults
    #[arg(short, long, global = true, default_value = "config/screenmix.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API over a synthetic studio
    Serve,

    /// Record synthetic sources for a fixed time and save the artifact
    Record {
        /// Duration to record in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Overlay the camera
        #[arg(long)]
        camera: bool,

        /// Audio source: none, microphone, system or both
        #[arg(short, long)]
        audio: Option<AudioMode>,

        /// Output directory (defaults to [output] directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the header and record counts of a saved artifact
    Inspect { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Screenmix v{} ({})", env!("CARGO_PKG_VERSION"), cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Record {
            seconds,
            camera,
            audio,
            output,
        } => record(cfg, seconds, camera, audio, output).await,
        Command::Inspect { file } => inspect(file).await,
    }
}

fn build_studio(cfg: &Config, settings: StudioSettings) -> Arc<Studio> {
    let host = Arc::new(HeadlessHost::new(cfg.compositor.paint_hz));
    Arc::new(Studio::new(Arc::new(SyntheticCapture::default()), host, settings))
}

async fn serve(cfg: Config) -> Result<()> {
    let studio = build_studio(&cfg, StudioSettings::from_config(&cfg));
    let app = create_router(AppState::new(Arc::clone(&studio))).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    studio.shutdown().await;
    Ok(())
}

async fn record(
    cfg: Config,
    seconds: u64,
    camera: bool,
    audio: Option<AudioMode>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut settings = StudioSettings::from_config(&cfg);
    settings.camera.enabled = camera;
    if let Some(audio) = audio {
        settings.recording.audio_source = audio;
    }
    let mode = settings.recording.audio_source;
    let output = output.unwrap_or_else(|| PathBuf::from(&cfg.output.directory));

    let studio = build_studio(&cfg, settings);
    studio.share_screen(mode.wants_system()).await?;
    if mode.wants_microphone() {
        if let Err(e) = studio.enable_microphone().await {
            warn!("{}", e);
        }
    }

    studio.start_recording().await?;
    info!("Recording for {} seconds (audio: {:?})", seconds, mode);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    studio.stop_recording().await?;

    let artifact = studio.artifact().await;
    studio.shutdown().await;

    let Some(artifact) = artifact else {
        bail!("Recording produced no artifact");
    };
    let path = artifact.save(&output).await?;
    info!(
        "Recording complete: {} ({} chunks, {}s)",
        path.display(),
        artifact.chunk_count,
        artifact.duration_secs
    );
    Ok(())
}

async fn inspect(file: PathBuf) -> Result<()> {
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let segment = SegmentReader::parse(&data)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let video = segment.video_frames().count();
    let audio = segment.audio_frames().count();
    let samples: usize = segment
        .records
        .iter()
        .map(|r| match r {
            Record::Audio(frame) => frame.samples.len(),
            Record::Video(_) => 0,
        })
        .sum();

    println!("file:      {}", file.display());
    println!("format:    {}", segment.header.format);
    println!("canvas:    {}x{}", segment.header.width, segment.header.height);
    println!("bitrate:   {} bps", segment.header.video_bits_per_second);
    println!("video:     {} frames over {:.2}s", video, segment.video_span_us() as f64 / 1e6);
    println!("audio:     {} records, {} samples", audio, samples);
    Ok(())
}
