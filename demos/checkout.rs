//! Check out a module from a pserver into a local directory.

use std::path::PathBuf;
use std::time::Duration;

use cvs::{CvsError, CvsRoot, CycleOutcome, EventKind, Registry, SessionConfig, handler};

fn main() -> cvs::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run())
}

async fn run() -> cvs::Result<()> {
    let root = match std::env::var("CVSROOT") {
        Ok(root) => CvsRoot::parse(&root)?,
        Err(_) => {
            eprintln!("Set CVSROOT=:pserver:user@host:/path (optional CVS_PASSWORD).");
            eprintln!("Then set CVS_MODULE=<module> and CVS_DEST=/path/to/output-dir.");
            return Ok(());
        }
    };
    let module = std::env::var("CVS_MODULE").unwrap_or_else(|_| ".".to_string());
    let dest = match std::env::var("CVS_DEST") {
        Ok(dest) => PathBuf::from(dest),
        Err(_) => {
            eprintln!("Set CVS_DEST=/path/to/output-dir");
            return Ok(());
        }
    };
    let password = std::env::var("CVS_PASSWORD")
        .ok()
        .or_else(|| root.password.clone())
        .unwrap_or_default();

    tokio::fs::create_dir_all(&dest).await?;

    let mut registry = Registry::new();
    let stop = registry.shutdown_handle();
    registry.register_global(
        EventKind::LoginFail,
        0,
        handler(move |_| {
            eprintln!("login rejected");
            stop.shutdown();
            Ok(())
        }),
    );
    let out = dest.clone();
    registry.register_global(
        EventKind::UpdatedFile,
        0,
        handler(move |event| {
            let Some(file) = event.file() else {
                return Ok(());
            };
            let target = out.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.data)?;
            println!("U {}", file.path);
            Ok(())
        }),
    );

    let config = SessionConfig::from_root(&root)
        .with_connect_timeout(Duration::from_secs(10))
        .with_read_timeout(Duration::from_secs(60));
    let session = registry.create_session(config);
    let id = session.id();
    session
        .login(&root.path, root.user_or_anonymous(), &password)
        .await?;

    // Queue the checkout once the data connection is authorized, then stop
    // after the server stayed quiet for a few rounds.
    let mut queued = false;
    let mut idle_rounds = 0;
    while !registry.is_shutdown() && idle_rounds < 4 {
        for (_, outcome) in registry.poll_all(Duration::from_millis(500)).await {
            match outcome {
                CycleOutcome::Progressed => idle_rounds = 0,
                CycleOutcome::NoData if queued => idle_rounds += 1,
                CycleOutcome::NoData => {}
                CycleOutcome::Failed(err) if err.is_transient() => eprintln!("retrying: {err}"),
                CycleOutcome::Failed(err) => return Err(err),
            }
        }
        let Some(session) = registry.session_mut(id) else {
            return Err(CvsError::Session("session vanished".into()));
        };
        if !queued && session.state().authorized {
            session.checkout(&module).await?;
            queued = true;
        }
    }
    if queued {
        println!("checked out {module} to {}", dest.display());
    }
    Ok(())
}
