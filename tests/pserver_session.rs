//! End-to-end tests against an in-process fake pserver.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cvs::{
    CycleOutcome, Event, EventKind, ExecutionMode, Handler, ProtocolState, Registry, Reply,
    SessionConfig, descramble_password, handler,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const ROOT: &str = "/cvsroot";

fn run_async<T>(f: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

struct FakeFile {
    path: &'static str,
    data: &'static [u8],
}

impl FakeFile {
    fn updated(&self) -> Vec<u8> {
        let (dir, name) = self.path.rsplit_once('/').unwrap_or(("", self.path));
        let mut out = format!(
            "Updated {dir}/\n{}\n/{name}/1.1///\nu=rw,g=r,o=r\n{}\n",
            self.path,
            self.data.len()
        )
        .into_bytes();
        out.extend_from_slice(self.data);
        out.extend_from_slice(b"ok\n");
        out
    }
}

async fn read_block(conn: &mut BufReader<TcpStream>) -> Vec<String> {
    let mut lines = Vec::new();
    for _ in 0..5 {
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        lines.push(line.trim_end().to_string());
    }
    lines
}

async fn accept(listener: &TcpListener) -> BufReader<TcpStream> {
    BufReader::new(listener.accept().await.unwrap().0)
}

/// Serves one login and one data connection; returns the request lines seen
/// on the data connection once the client hangs up.
async fn serve(listener: TcpListener, password: &'static str, files: Vec<FakeFile>) -> Vec<String> {
    let mut login = accept(&listener).await;
    let block = read_block(&mut login).await;
    assert_eq!(block[0], "BEGIN VERIFICATION REQUEST");
    assert_eq!(block[1], ROOT);
    if descramble_password(&block[3]).as_deref() != Some(password) {
        login.get_mut().write_all(b"I HATE YOU\n").await.unwrap();
        return Vec::new();
    }
    login.get_mut().write_all(b"I LOVE YOU\n").await.unwrap();

    let mut data = accept(&listener).await;
    let block = read_block(&mut data).await;
    assert_eq!(block[0], "BEGIN AUTH REQUEST");
    assert_eq!(block[4], "END AUTH REQUEST");
    data.get_mut().write_all(b"I LOVE YOU\n").await.unwrap();

    let mut seen = Vec::new();
    loop {
        let mut line = String::new();
        match data.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();
        seen.push(line.clone());
        match line.as_str() {
            "valid-requests" => {
                data.get_mut()
                    .write_all(b"Valid-requests Root Directory Argument co export UseUnchanged\nok\n")
                    .await
                    .unwrap();
            }
            "co" | "export" => {
                for file in &files {
                    data.get_mut().write_all(&file.updated()).await.unwrap();
                }
            }
            "expand-modules" => data.get_mut().write_all(b"ok\n").await.unwrap(),
            _ => {}
        }
    }
    seen
}

async fn bind() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SessionConfig::new("127.0.0.1")
        .with_port(port)
        .with_read_timeout(Duration::from_secs(5));
    (listener, config)
}

fn collector(log: &Arc<Mutex<Vec<Event>>>) -> Handler {
    let log = Arc::clone(log);
    handler(move |event| {
        log.lock().unwrap().push(event.clone());
        Ok(())
    })
}

/// Persists `updatedfile` artifacts below `dest`.
fn file_writer(dest: PathBuf) -> Handler {
    handler(move |event| {
        let Some(file) = event.file() else {
            return Ok(());
        };
        let target = dest.join(&file.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &file.data)?;
        Ok(())
    })
}

async fn poll_until(registry: &mut Registry, mut done: impl FnMut(&Registry) -> bool) {
    for _ in 0..200 {
        if done(registry) {
            return;
        }
        for (id, outcome) in registry.poll_all(Duration::from_millis(50)).await {
            if let CycleOutcome::Failed(err) = outcome {
                panic!("{id} failed: {err}");
            }
        }
    }
    panic!("condition not reached");
}

fn paths(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| event.file().map(|file| file.path.clone()))
        .collect()
}

#[test]
fn async_checkout_delivers_files_to_global_and_local_handlers() {
    run_async(async {
        let (listener, config) = bind().await;
        let server = tokio::spawn(serve(
            listener,
            "secret",
            vec![
                FakeFile {
                    path: "moduleX/a/b/c.txt",
                    data: b"hello",
                },
                FakeFile {
                    path: "moduleX/README",
                    data: b"read me\n",
                },
            ],
        ));

        let global = Arc::new(Mutex::new(Vec::new()));
        let local = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        for kind in EventKind::ALL {
            registry.register_global(kind, 0, collector(&global));
        }

        let session = registry.create_session(config);
        for kind in EventKind::ALL {
            session.register(kind, 0, collector(&local));
        }
        let id = session.id();
        assert_eq!(session.login(ROOT, "anonymous", "secret").await.unwrap(), Reply::Queued);

        poll_until(&mut registry, |r| r.session(id).unwrap().state().authorized).await;
        let session = registry.session_mut(id).unwrap();
        assert_eq!(session.checkout("moduleX").await.unwrap(), Reply::Queued);
        poll_until(&mut registry, |_| paths(&local.lock().unwrap()).len() == 2).await;

        let global = global.lock().unwrap().clone();
        let local = local.lock().unwrap().clone();
        assert_eq!(global, local);
        assert_eq!(paths(&local), ["moduleX/a/b/c.txt", "moduleX/README"]);
        let kinds: Vec<_> = local.iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds[..2],
            [EventKind::LoginOk, EventKind::Authorized]
        );
        let file = local[local.len() - 2].file().unwrap();
        assert_eq!(file.directory, "moduleX/a/b/");
        assert_eq!(file.entry_line, "/c.txt/1.1///");
        assert_eq!(file.size, 5);
        assert_eq!(file.data, b"hello");
        assert!(local.iter().all(|event| event.session == id));

        drop(registry);
        let seen = server.await.unwrap();
        assert_eq!(
            seen[..3],
            [format!("Root {ROOT}"), "valid-requests".into(), "UseUnchanged".into()]
        );
        assert!(seen.contains(&"Argument moduleX".to_string()));
        assert_eq!(seen.last().map(String::as_str), Some("co"));
    });
}

#[test]
fn rejected_password_emits_single_loginfail() {
    run_async(async {
        let (listener, config) = bind().await;
        let server = tokio::spawn(serve(listener, "secret", Vec::new()));

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register_global(EventKind::LoginFail, 0, collector(&events));
        registry.register_global(EventKind::LoginOk, 0, collector(&events));
        let session = registry.create_session(config);
        let id = session.id();
        session.login(ROOT, "anonymous", "wrong").await.unwrap();

        poll_until(&mut registry, |_| !events.lock().unwrap().is_empty()).await;
        // A few more rounds must not produce anything else.
        for _ in 0..3 {
            registry.poll_all(Duration::from_millis(10)).await;
        }
        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::LoginFail);
        let state = registry.session(id).unwrap().state();
        assert_eq!(state.state, ProtocolState::LoginFailed);
        assert!(state.pending.is_empty());
        assert!(server.await.unwrap().is_empty());
    });
}

#[test]
fn sync_session_exports_into_directory() {
    run_async(async {
        let dest = tempfile::tempdir().unwrap();
        let (listener, config) = bind().await;
        let server = tokio::spawn(serve(
            listener,
            "",
            vec![
                FakeFile {
                    path: "proj/src/main.c",
                    data: b"int main(void) { return 0; }\n",
                },
                FakeFile {
                    path: "proj/Makefile",
                    data: b"all:\n",
                },
            ],
        ));

        let mut registry = Registry::new();
        registry.register_global(EventKind::UpdatedFile, 0, file_writer(dest.path().to_path_buf()));
        let id = registry
            .create_session(config.with_mode(ExecutionMode::Sync))
            .id();
        let mut session = registry.remove_session(id).unwrap();
        assert!(registry.is_empty());

        assert_eq!(session.login(ROOT, "anonymous", "").await.unwrap(), Reply::Ok);
        assert_eq!(session.export("proj", "HEAD").await.unwrap(), Reply::Ok);
        // The verb returned at the first status; the second file is still in flight.
        assert!(session.poll(Duration::from_secs(2)).await.is_progress());

        let main = std::fs::read(dest.path().join("proj/src/main.c")).unwrap();
        assert_eq!(main, b"int main(void) { return 0; }\n");
        let makefile = std::fs::read_to_string(dest.path().join("proj/Makefile")).unwrap();
        assert_eq!(makefile, "all:\n");

        assert_eq!(session.list_modules().await.unwrap(), Reply::Ok);

        drop(session);
        let seen = server.await.unwrap();
        let export_at = seen.iter().position(|line| line == "export").unwrap();
        assert_eq!(
            seen[export_at - 5..export_at],
            ["Argument -r", "Argument HEAD", "Argument proj", "Directory .", ROOT]
        );
        assert_eq!(seen.last().map(String::as_str), Some("expand-modules"));
    });
}
