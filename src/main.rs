use std::path::PathBuf;

use rustomato::{
    audio::transcode_file,
    common::{
        banner::{BuildInfo, print_banner},
        logger,
        types::AnyResult,
    },
    configs::Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let build = BuildInfo::default();
    print_banner(&build);

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Using built-in defaults: {}", e);
        Config::default()
    });
    logger::init(&config);
    info!(
        "rustomato {} ({} on {})",
        build.version,
        build.commit_display(),
        build.branch
    );

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        warn!("usage: rustomato <input> [output]");
        return Ok(());
    };
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| {
        let mut out = input.clone().into_os_string();
        out.push(".frames");
        PathBuf::from(out)
    });

    let source = input.clone();
    let stream = tokio::task::spawn_blocking(move || transcode_file(source))
        .await?
        .inspect_err(|e| error!("Failed to convert {}: {}", input.display(), e))?;

    tokio::fs::write(&output, stream.as_bytes()).await?;
    info!(
        "Wrote {} frames ({:.1?}) to {}",
        stream.frame_count(),
        stream.duration(),
        output.display()
    );

    Ok(())
}
