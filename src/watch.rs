//! Dev server, file watcher and live reload.
//!
//! The interactive session serves the source directory over HTTP, watches it
//! for changes, and owns the set of watch subscriptions plus the list of
//! connected websocket clients for its whole lifetime. A debounced change
//! event matching a subscription re-runs the subscribed task and then pushes
//! a reload signal: `refreshcss` for style-only changes (swapped in place on
//! the client) or `reload` for everything else.
//!
//! Pages rendered while the session is live carry an inline websocket client
//! (see [`inject_reload`]); a one-shot build never embeds it.

use std::collections::HashSet;
use std::env;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tungstenite::WebSocket;

use crate::error::WatchError;
use crate::graph::TaskGraph;
use crate::{Context, io::as_overhead};

/// A live (glob pattern → task name) binding, destroyed with the session.
pub struct WatchSubscription {
    pattern: glob::Pattern,
    task: &'static str,
    reload: ReloadKind,
}

/// What connected clients should do after the subscribed task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Swap stylesheets in place, no full page reload.
    Styles,
    /// Reload the whole page.
    Full,
}

impl WatchSubscription {
    pub fn new(
        pattern: &str,
        task: &'static str,
        reload: ReloadKind,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: glob::Pattern::new(pattern)?,
            task,
            reload,
        })
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

/// Serve the source directory and re-run tasks on file changes. Never returns
/// under normal operation; the session ends with the process.
pub fn watch(
    graph: &TaskGraph,
    context: &Context,
    subscriptions: &[WatchSubscription],
) -> Result<(), WatchError> {
    let root = env::current_dir()?;
    let (tcp, port) = reserve_port()?;
    let clients = Arc::new(Mutex::new(vec![]));

    let context = Context {
        port: Some(port),
        ..context.clone()
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;
    debouncer.watch(
        context.config.paths.source.as_std_path(),
        RecursiveMode::Recursive,
    )?;

    let _thread_incoming = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_reload) = new_thread_ws_reload(clients.clone());

    let _thread_http = server::start(&context.config.paths.source, context.config.server.port);

    // Compile the interactive assets once with the session context, so pages
    // served from the start already carry the reload client.
    for task in ["sass", "templates"] {
        if let Err(e) = graph.run(task, &context) {
            tracing::error!("Error during initial compile:\n{e}");
        }
    }

    loop {
        let Some((tasks, message)) = plan_rebuild(rx.recv()?, &root, subscriptions) else {
            continue;
        };

        let s = Instant::now();
        let mut failed = false;

        for task in tasks {
            if let Err(e) = graph.run(task, &context) {
                tracing::error!("Error while rebuilding:\n{e}");
                failed = true;
            }
        }

        // A failed rebuild sends nothing; the last good output stays up.
        if failed {
            continue;
        }

        if tx_reload.send(message).is_err() {
            tracing::warn!("Reload thread is gone");
        }

        tracing::info!("Refreshed {}", as_overhead(s));
    }
}

/// Turn one debounced batch into the tasks to re-run and the reload message
/// to push afterwards. Watcher errors and irrelevant changes produce `None`;
/// the session keeps going either way.
fn plan_rebuild(
    result: DebounceEventResult,
    root: &Path,
    subscriptions: &[WatchSubscription],
) -> Option<(Vec<&'static str>, &'static str)> {
    let events = match result {
        Ok(events) => events,
        Err(errors) => {
            for e in errors {
                tracing::warn!("Watcher error: {e}");
            }
            return None;
        }
    };

    let changed = match events
        .iter()
        .filter(|de| {
            matches!(
                de.event.kind,
                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
            )
        })
        .flat_map(|de| &de.event.paths)
        .try_fold(
            HashSet::new(),
            |mut acc, path| -> Result<_, anyhow::Error> {
                let path = path.strip_prefix(root).unwrap_or(path);
                let path = Utf8PathBuf::try_from(path.to_path_buf())?;
                acc.insert(path);
                Ok(acc)
            },
        ) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("Ignoring change event: {e}");
            return None;
        }
    };

    let triggered: Vec<&WatchSubscription> = subscriptions
        .iter()
        .filter(|sub| {
            changed
                .iter()
                .any(|path| sub.pattern.matches_path(path.as_std_path()))
        })
        .collect();

    if triggered.is_empty() {
        return None;
    }

    let tasks: Vec<&'static str> = {
        let mut seen = HashSet::new();
        triggered
            .iter()
            .map(|sub| sub.task)
            .filter(|task| seen.insert(*task))
            .collect()
    };

    let styles_only = triggered.iter().all(|sub| sub.reload == ReloadKind::Styles);
    let message = if styles_only { "refreshcss" } else { "reload" };

    Some((tasks, message))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Websocket accept failed: {e}");
                    continue;
                }
            };
            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap().push(socket),
                Err(e) => tracing::warn!("Websocket handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<&'static str>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel::<&'static str>();

    let thread = std::thread::spawn(move || {
        while let Ok(message) = rx.recv() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(message.into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Websocket send failed: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// The client-side reload snippet, inlined into rendered pages.
fn reload_script(ws_port: u16) -> String {
    format!(
        r#"const socket = new WebSocket("ws://localhost:{ws_port}");
socket.addEventListener("message", (event) => {{
    if (event.data === "refreshcss") {{
        for (const link of document.querySelectorAll("link[rel=stylesheet]")) {{
            const url = new URL(link.href);
            url.searchParams.set("v", Date.now().toString());
            link.href = url.toString();
        }}
    }} else {{
        window.location.reload();
    }}
}});
"#
    )
}

/// Embed the reload client into a rendered page, before `</body>` when the
/// page has one and at the end otherwise.
pub(crate) fn inject_reload(html: &str, ws_port: u16) -> String {
    let script = format!("<script>{}</script>", reload_script(ws_port));

    match html.rfind("</body>") {
        Some(i) => format!("{}{script}{}", &html[..i], &html[i..]),
        None => format!("{html}{script}"),
    }
}

mod server {
    use std::net::SocketAddr;
    use std::thread;

    use axum::Router;
    use camino::{Utf8Path, Utf8PathBuf};
    use console::style;
    use tower_http::services::ServeDir;

    pub fn start(root: &Utf8Path, port: u16) -> thread::JoinHandle<Result<(), anyhow::Error>> {
        let url = style(format!("http://localhost:{port}/")).yellow();
        eprintln!("Starting a HTTP server on {url}");

        let root = root.to_path_buf();
        thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(serve(root, port))
        })
    }

    async fn serve(root: Utf8PathBuf, port: u16) -> Result<(), anyhow::Error> {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let address = tokio::net::TcpListener::bind(address).await?;

        let router = Router::new().fallback_service(ServeDir::new(root));

        axum::serve(address, router).await?;

        Ok(())
    }
}
