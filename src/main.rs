use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};
use volustream::{
    Collaborators, Player, PlayerCallbacks,
    codec::{PassthroughDecoder, PresentationSink, StaticCapabilities},
    common::{
        banner::{BannerInfo, print_banner},
        http::HttpClient,
        logger,
        types::AnyResult,
    },
    compositor::{Presentation, TextureSource, TickOutcome},
    configs::Config,
    fetch::HttpFetcher,
};

const DEFAULT_RENDER_FPS: f64 = 60.0;
const STATUS_EVERY: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: volustream <manifest-url> [--render-fps N]";

struct CliArgs {
    manifest_url: String,
    render_fps: f64,
}

fn parse_args() -> AnyResult<CliArgs> {
    let mut manifest_url = None;
    let mut render_fps = DEFAULT_RENDER_FPS;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--render-fps" => {
                let value = args.next().ok_or("--render-fps needs a value")?;
                render_fps = parse_render_fps(&value)?;
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ if manifest_url.is_none() => manifest_url = Some(arg),
            other => return Err(format!("unexpected argument `{}`\n{}", other, USAGE).into()),
        }
    }

    Ok(CliArgs {
        manifest_url: manifest_url.ok_or(USAGE)?,
        render_fps,
    })
}

fn parse_render_fps(value: &str) -> AnyResult<f64> {
    let fps: f64 = value.parse()?;
    let period_ok = Duration::try_from_secs_f64(1.0 / fps).is_ok_and(|d| !d.is_zero());
    if !fps.is_finite() || fps <= 0.0 || !period_ok {
        return Err(format!("--render-fps must be a positive number, got `{}`", value).into());
    }
    Ok(fps)
}

/// Headless sink: logs what a renderer would have drawn.
struct LoggingSink;

impl PresentationSink for LoggingSink {
    fn present(&self, presentation: &Presentation) {
        let textures: Vec<String> = presentation
            .textures
            .iter()
            .map(|c| match c.source {
                TextureSource::Placeholder => format!("{}=pending", c.channel),
                _ => format!(
                    "{}={}#{}+{}",
                    c.channel,
                    c.target.as_deref().unwrap_or("?"),
                    c.segment,
                    c.sub_frame
                ),
            })
            .collect();
        debug!("frame {} [{}]", presentation.frame, textures.join(" "));
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let loaded = Config::load();
    let config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => Config::default(),
    };

    logger::init(config.logging.as_ref());
    print_banner(&BannerInfo::default());

    match loaded {
        Ok(Some(_)) => {}
        Ok(None) => info!("No config.toml found, using defaults"),
        Err(e) => warn!("Ignoring invalid config: {}", e),
    }

    let args = parse_args()?;
    let client = HttpClient::from_config(&config.network)?;
    let decoder = Arc::new(PassthroughDecoder);

    let callbacks = PlayerCallbacks {
        on_buffering: Some(Box::new(|progress: f32| {
            debug!("buffering {:.0}%", progress * 100.0);
        })),
        on_frame_shown: None,
        on_track_end: Some(Box::new(|| info!("Playback finished"))),
    };

    let mut player = Player::new(
        config.player.clone(),
        config.abr.clone(),
        Collaborators {
            fetcher: Arc::new(HttpFetcher::new(client)),
            geometry_decoder: decoder.clone(),
            texture_decoder: decoder,
            capabilities: Arc::new(StaticCapabilities::all()),
            sink: Arc::new(LoggingSink),
            media: None,
        },
        callbacks,
    );

    info!("Loading {}", args.manifest_url);
    player.load_track(&args.manifest_url).await?;

    let mut render = tokio::time::interval(Duration::from_secs_f64(1.0 / args.render_fps));
    let mut status = tokio::time::interval(STATUS_EVERY);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping playback");
                break;
            }
            _ = render.tick() => {
                match player.tick() {
                    None | Some(TickOutcome::Ended) => break,
                    Some(_) => {}
                }
            }
            _ = status.tick() => {
                if let Some(status) = player.status() {
                    info!(
                        "t={:.2}s geometry={} (hwm {}) textures={:?} buffered={}/{}",
                        status.current_time,
                        status.geometry_target,
                        status.geometry_high_water,
                        status.texture_targets,
                        status.buffered_geometry,
                        status.buffered_textures
                    );
                }
            }
        }
    }

    player.dispose();
    Ok(())
}
