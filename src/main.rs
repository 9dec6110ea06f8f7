use std::path::PathBuf;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt};

use coursetrack::assessment::{AttemptCoordinator, CompletionSignal};
use coursetrack::error::{ApplicationError, MissingScriptSnafu, OpenCacheSnafu};
use coursetrack::host::LessonHost;
use coursetrack::progress::{FileCache, ProgressTracker};
use coursetrack::replay::{self, Replay};
use coursetrack::{config, logger};

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    let config = config::load()?;

    let _guard = logger::init(&config)?;

    let path = config
        .script
        .clone()
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
        .context(MissingScriptSnafu)?;
    let events = replay::load(&path)?;
    tracing::info!(script = %path.display(), events = events.len(), "loaded event script");

    let cache = FileCache::open(&config.cache_path).context(OpenCacheSnafu)?;
    let server = Arc::new(replay::demo_server());
    let completion = CompletionSignal::new();

    let tracker = ProgressTracker::new(server.clone(), Arc::new(cache), config.progress());
    let coordinator = AttemptCoordinator::new(server.clone(), config.assessment(), completion.clone());
    let host = LessonHost::new(tracker, coordinator, server.clone());

    let mut replay = Replay::new(host, completion);
    replay.run(events).await?;
    let completed = replay.finish().await;

    tracing::info!(calls = server.calls().len(), ?completed, "replay finished");
    Ok(())
}
