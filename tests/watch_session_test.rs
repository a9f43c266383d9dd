//! End-to-end sessions against the real filesystem and notify backend.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bundlewatch::{ChannelSink, WatchCoordinator, WatchEvent, WatchSession, pipeline};
use dashmap::DashMap;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

const DELAY_MS: u64 = 100;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    handle: bundlewatch::PipelineHandle,
    events: UnboundedReceiver<WatchEvent>,
    cache: Arc<DashMap<String, String>>,
    session: WatchSession,
}

fn fixture() -> anyhow::Result<Fixture> {
    let dir = TempDir::new()?;
    // Resolve the temp root itself so expected identities match.
    let root = fs::canonicalize(dir.path())?;
    let cache = Arc::new(DashMap::new());
    let (sink, events) = ChannelSink::new();
    let (handle, source) = pipeline::channel();

    let session = WatchCoordinator::builder()
        .delay_ms(DELAY_MS)
        .build_cache(cache.clone())
        .sink(sink)
        .build()?
        .spawn(source);

    Ok(Fixture {
        _dir: dir,
        root,
        handle,
        events,
        cache,
        session,
    })
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn wait_for_update(events: &mut UnboundedReceiver<WatchEvent>) -> Option<Vec<String>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match timeout(deadline - tokio::time::Instant::now(), events.recv()).await {
            Ok(Some(WatchEvent::Update(changed))) => return Some(changed),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

/// Give watch installation time to complete before editing.
async fn let_watches_settle() {
    sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_edit_invalidates_and_updates() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let file = fx.root.join("a.js");
    fs::write(&file, "module.exports = 1;")?;

    fx.cache.insert(key(&file), "compiled".to_string());
    fx.cache.insert("a".to_string(), "compiled".to_string());
    fx.handle.module("a", &file);
    let_watches_settle().await;

    fs::write(&file, "module.exports = 2;")?;

    let changed = wait_for_update(&mut fx.events).await.expect("update");
    assert_eq!(changed, vec![key(&file)]);
    assert!(!fx.cache.contains_key("a"));
    assert!(!fx.cache.contains_key(&key(&file)));

    fx.session.close();
    fx.session.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_auxiliary_file_edit_reports_owner() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let owner = fx.root.join("a.js");
    let data = fx.root.join("a.json");
    fs::write(&owner, "require('./a.json')")?;
    fs::write(&data, "{}")?;

    fx.handle.module("a", &owner);
    fx.handle.transform(&owner).file_read(&data);
    let_watches_settle().await;

    fs::write(&data, "{\"changed\": true}")?;

    let changed = wait_for_update(&mut fx.events).await.expect("update");
    assert_eq!(changed, vec![key(&owner)]);

    fx.session.close();
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_reports_target_identity() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let target = fx.root.join("real.js");
    let link = fx.root.join("link.js");
    fs::write(&target, "1")?;
    std::os::unix::fs::symlink(&target, &link)?;

    fx.handle.file(&link);
    let_watches_settle().await;

    fs::write(&target, "2")?;

    let changed = wait_for_update(&mut fx.events).await.expect("update");
    assert_eq!(changed, vec![key(&target)]);

    fx.session.close();
    Ok(())
}

#[tokio::test]
async fn test_no_updates_after_close() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let file = fx.root.join("a.js");
    fs::write(&file, "1")?;

    fx.handle.file(&file);
    let_watches_settle().await;

    fx.session.close();
    fx.session.join().await?;

    fs::write(&file, "2")?;
    sleep(Duration::from_millis(DELAY_MS * 5)).await;

    while let Ok(event) = fx.events.try_recv() {
        assert!(!matches!(event, WatchEvent::Update(_)), "unexpected {event:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_hundreds_of_modules_share_one_os_watcher() -> anyhow::Result<()> {
    const MODULES: usize = 300;

    let mut fx = fixture()?;
    let mut files = Vec::with_capacity(MODULES);
    for i in 0..MODULES {
        let file = fx.root.join(format!("m{i}.js"));
        fs::write(&file, format!("module.exports = {i};"))?;
        fx.handle.module(format!("m{i}"), &file);
        files.push(file);
    }
    sleep(Duration::from_millis(1000)).await;

    // Every watch was installed; none hit a per-process watcher limit.
    while let Ok(event) = fx.events.try_recv() {
        assert!(!matches!(event, WatchEvent::Error(_)), "unexpected {event:?}");
    }

    let last = &files[MODULES - 1];
    fx.cache.insert(format!("m{}", MODULES - 1), "compiled".to_string());
    fs::write(last, "module.exports = 'edited';")?;

    let changed = wait_for_update(&mut fx.events).await.expect("update");
    assert_eq!(changed, vec![key(last)]);
    assert!(!fx.cache.contains_key(&format!("m{}", MODULES - 1)));

    fx.session.close();
    fx.session.join().await?;
    Ok(())
}
