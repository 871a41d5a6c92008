use jsonsvr_core::is_object_storage_uri;
use jsonsvr_web::AxumServiceAdapter;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::hash_map::DefaultHasher;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Reload the service whenever the descriptor file changes.
pub fn spawn(adapter: AxumServiceAdapter, descriptor: &str) {
    if is_object_storage_uri(descriptor) {
        warn!(descriptor, "object storage descriptors cannot be watched");
        return;
    }
    let file = PathBuf::from(descriptor);
    tokio::spawn(async move {
        watch_loop(adapter, file).await;
    });
}

async fn watch_loop(adapter: AxumServiceAdapter, file: PathBuf) {
    let mut last = fingerprint(&file);
    let mut fallback_interval = tokio::time::interval(Duration::from_millis(1500));
    let mut events = match start_fs_watcher(&file) {
        Ok(watcher) => {
            info!(file = %file.display(), "watching service descriptor");
            Some(watcher)
        }
        Err(e) => {
            warn!(error = %e, "filesystem watcher unavailable; polling instead");
            None
        }
    };

    loop {
        if let Some((_, rx)) = events.as_mut() {
            tokio::select! {
                _ = fallback_interval.tick() => {
                    reload_if_changed(&adapter, &file, &mut last).await;
                }
                evt = rx.recv() => {
                    match evt {
                        Some(()) => {
                            debounce_fs_events(rx).await;
                            reload_if_changed(&adapter, &file, &mut last).await;
                        }
                        None => {
                            warn!("filesystem watcher channel closed; polling only");
                            events = None;
                        }
                    }
                }
            }
        } else {
            fallback_interval.tick().await;
            reload_if_changed(&adapter, &file, &mut last).await;
        }
    }
}

async fn reload_if_changed(adapter: &AxumServiceAdapter, file: &Path, last: &mut Option<u64>) {
    let path = file.to_path_buf();
    let now = tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .unwrap_or(*last);
    if now == *last {
        return;
    }
    *last = now;

    if now.is_none() {
        warn!(file = %file.display(), "service descriptor disappeared; keeping current routes");
        return;
    }
    match adapter.reload().await {
        Ok(routes) => info!(routes, "service descriptor changed; reloaded"),
        Err(e) => error!(error = %e, "service descriptor changed but failed to load"),
    }
}

async fn debounce_fs_events(rx: &mut mpsc::UnboundedReceiver<()>) {
    let debounce_window = Duration::from_millis(120);
    let sleep = tokio::time::sleep_until(Instant::now() + debounce_window);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => break,
            maybe = rx.recv() => {
                if maybe.is_none() {
                    break;
                }
                sleep.as_mut().reset(Instant::now() + debounce_window);
            }
        }
    }
}

/// Editors often replace files instead of writing in place, so the parent
/// directory is watched and events are filtered by file name.
fn start_fs_watcher(
    file: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>), String> {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let name = file
        .file_name()
        .map(OsStr::to_os_string)
        .ok_or_else(|| format!("{} does not name a file", file.display()))?;

    let (tx, rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if event_targets(&event, &name) {
                let _ = tx.send(());
            }
        }
        Err(_) => {
            let _ = tx.send(());
        }
    })
    .map_err(|e| format!("failed to initialize filesystem watcher: {e}"))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| format!("failed to watch {}: {e}", dir.display()))?;

    Ok((watcher, rx))
}

fn event_targets(event: &Event, name: &OsStr) -> bool {
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

/// Content hash of the file, `None` when it cannot be read.
fn fingerprint(file: &Path) -> Option<u64> {
    let bytes = std::fs::read(file).ok()?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Some(hasher.finish())
}
