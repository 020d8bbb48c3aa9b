//! Server facade.
//!
//! [`Bootstrap`] walks a single server instance through its lifecycle:
//!
//! ```text
//! Created -> Configured -> Initialized -> Started -> Stopped
//! ```
//!
//! - `configuration()` validates once (temp directory, TLS material)
//! - `server()` builds connectors, the handler router and the worker runtime
//! - `start()` binds every listener and optionally joins
//! - `stop()` shuts the listeners down gracefully; `Stopped` is terminal
//!
//! Handlers can only be registered before the server is initialized.
//!
//! The facade owns its tokio runtime and blocks the caller in `start`,
//! `join` and `stop`, so it must not be driven from inside another runtime.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use tokio::runtime::Runtime;
use tower_http::trace::TraceLayer;

use crate::config::{ServerConfig, CONTEXT_PATH_ROOT, RESOURCE_WEBAPP};
use crate::connector::{self, ConnectorSpec};
use crate::error::{BootstrapError, LifecycleError, Result};
use crate::handlers::{ArchiveSource, HandlerRegistry, Mount};
use crate::http::{self, ServeTask};
use crate::middleware::request_id_layer;
use crate::validate::{self, FinalizedConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Created,
    Configured,
    Initialized,
    Started,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Configured => "configured",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Started => "started",
            Lifecycle::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server instance: connectors, handler router and the runtime serving them
pub struct ServerHandle {
    runtime: Runtime,
    connectors: Vec<ConnectorSpec>,
    router: Option<Router>,
    handles: Vec<Handle>,
    tasks: Vec<ServeTask>,
    addrs: Vec<SocketAddr>,
}

impl ServerHandle {
    fn new(runtime: Runtime, connectors: Vec<ConnectorSpec>, router: Router) -> Self {
        Self {
            runtime,
            connectors,
            router: Some(router),
            handles: Vec::new(),
            tasks: Vec::new(),
            addrs: Vec::new(),
        }
    }

    pub fn connectors(&self) -> &[ConnectorSpec] {
        &self.connectors
    }

    /// Whether any listener is bound and serving
    pub fn is_started(&self) -> bool {
        !self.handles.is_empty() && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Bound listener addresses, in connector order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Wait for every listener task, returning the first failure.
    fn wait_all(&mut self) -> Result<(), LifecycleError> {
        let tasks = std::mem::take(&mut self.tasks);
        let results = self
            .runtime
            .block_on(futures::future::join_all(tasks.into_iter().map(http::wait)));
        results.into_iter().collect()
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("connectors", &self.connectors)
            .field("addrs", &self.addrs)
            .finish_non_exhaustive()
    }
}

type ShutdownSignal = Pin<Box<dyn Future<Output = &'static str> + Send>>;

pub struct Bootstrap {
    config: ServerConfig,
    finalized: Option<FinalizedConfig>,
    registry: HandlerRegistry,
    server: Option<ServerHandle>,
    state: Lifecycle,
    shutdown_hook: bool,
    /// Signal awaited by the shutdown hook, until the hook is spawned
    shutdown_signal: Option<ShutdownSignal>,
    stop_requested: Arc<AtomicBool>,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Bootstrap {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            finalized: None,
            registry: HandlerRegistry::new(),
            server: None,
            state: Lifecycle::Created,
            shutdown_hook: false,
            shutdown_signal: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.state == Lifecycle::Started && self.server.as_ref().is_some_and(ServerHandle::is_started)
    }

    /// Bound listener addresses; empty until started
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.server
            .as_ref()
            .map(|server| server.local_addrs().to_vec())
            .unwrap_or_default()
    }

    fn transition_error(&self, action: &'static str) -> BootstrapError {
        LifecycleError::InvalidTransition {
            action,
            state: self.state.as_str(),
        }
        .into()
    }

    /// Validate the configuration. Runs once; later calls return the same result.
    pub fn configuration(&mut self) -> Result<&FinalizedConfig> {
        match self.state {
            Lifecycle::Created => {
                let finalized = validate::validate(&self.config)?;
                self.finalized = Some(finalized);
                self.state = Lifecycle::Configured;
            }
            Lifecycle::Configured | Lifecycle::Initialized => {
                tracing::debug!("Configuration already initialized");
            }
            Lifecycle::Started | Lifecycle::Stopped => return Err(self.transition_error("configure")),
        }
        self.finalized
            .as_ref()
            .ok_or_else(|| self.transition_error("configure"))
    }

    /// Build the server instance, configuring first when needed.
    pub fn server(&mut self) -> Result<&ServerHandle> {
        match self.state {
            Lifecycle::Created | Lifecycle::Configured => self.initialize()?,
            Lifecycle::Initialized | Lifecycle::Started => {}
            Lifecycle::Stopped => return Err(self.transition_error("initialize")),
        }
        self.server
            .as_ref()
            .ok_or_else(|| self.transition_error("initialize"))
    }

    fn initialize(&mut self) -> Result<()> {
        tracing::debug!("Init Server...");
        let finalized = self.configuration()?.clone();
        let connectors = connector::build_connectors(&finalized)?;

        let registry = std::mem::take(&mut self.registry);
        tracing::debug!(handlers = registry.len(), "Attaching handlers");
        let router = registry
            .into_router(&finalized.temp_dir)?
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_id_layer));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(finalized.server.max_threads.max(1))
            .thread_name("embark-worker")
            .enable_all()
            .build()
            .map_err(LifecycleError::Runtime)?;

        self.server = Some(ServerHandle::new(runtime, connectors, router));
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    /// Start, joining when `auto_join` is set.
    pub fn start(&mut self) -> Result<()> {
        self.start_with_join(None)
    }

    /// Start the server. `join` overrides the configured `auto_join`.
    ///
    /// Starting an already started server is a no-op.
    pub fn start_with_join(&mut self, join: Option<bool>) -> Result<()> {
        match self.state {
            Lifecycle::Started => {
                tracing::warn!("Server already started");
                return Ok(());
            }
            Lifecycle::Stopped => return Err(self.transition_error("start")),
            _ => {}
        }

        tracing::debug!("Start Server...");
        self.server()?;
        let redirect_to_tls = self.config.redirect_to_tls;
        let server = self
            .server
            .as_mut()
            .ok_or_else(|| LifecycleError::Server("server not initialized".to_string()))?;
        let router = server
            .router
            .as_ref()
            .ok_or_else(|| LifecycleError::Server("handlers released".to_string()))?;

        let listeners = server.runtime.block_on(http::start_listeners(
            &server.connectors,
            router,
            redirect_to_tls,
        ))?;
        for listener in listeners {
            server.handles.push(listener.handle);
            server.tasks.push(listener.task);
            server.addrs.push(listener.addr);
        }

        for (spec, addr) in server.connectors.iter().zip(&server.addrs) {
            tracing::info!(url = %format!("{}://{}/", spec.kind(), addr), "Server started");
        }

        self.state = Lifecycle::Started;
        self.spawn_shutdown_hook();

        if join.unwrap_or(self.config.auto_join) {
            self.join()?;
        }
        Ok(())
    }

    /// Block until every listener halts.
    ///
    /// When the listeners halted because the shutdown hook fired, the server
    /// is stopped before returning; stop failures are only logged.
    pub fn join(&mut self) -> Result<()> {
        if self.state != Lifecycle::Started {
            tracing::warn!(state = %self.state, "Server not started, nothing to join");
            return Ok(());
        }
        tracing::debug!("Join Server...");
        let result = match self.server.as_mut() {
            Some(server) => server.wait_all(),
            None => Ok(()),
        };
        if self.stop_requested.load(Ordering::SeqCst) {
            if let Err(e) = self.stop() {
                tracing::error!(error = %e, "Failed to stop server");
            }
        }
        Ok(result?)
    }

    /// Graceful shutdown bounded by `stop_timeout_ms`.
    ///
    /// A no-op when the server was never started.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != Lifecycle::Started {
            tracing::warn!(state = %self.state, "Server not started, nothing to stop");
            return Ok(());
        }
        tracing::debug!("Stop Server...");
        let stop_timeout = Duration::from_millis(self.config.stop_timeout_ms);
        self.state = Lifecycle::Stopped;

        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };
        for handle in &server.handles {
            handle.graceful_shutdown(Some(stop_timeout));
        }
        let result = server.wait_all();
        server.router = None;
        tracing::info!("Server stopped");
        Ok(result?)
    }

    /// Stop the server on SIGINT/SIGTERM.
    ///
    /// Installed immediately when started, otherwise on start.
    pub fn install_shutdown_hook(&mut self) {
        self.install_shutdown_hook_on(http::termination_signal());
    }

    /// Stop the server once `signal` resolves (with the name of the trigger).
    ///
    /// The listeners drain right away; the facade reaches `Stopped` in `join`.
    /// Only the first hook installed is kept.
    pub fn install_shutdown_hook_on<F>(&mut self, signal: F)
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        if self.shutdown_hook {
            tracing::debug!("Shutdown hook already installed");
            return;
        }
        self.shutdown_hook = true;
        self.shutdown_signal = Some(Box::pin(signal));
        if self.state == Lifecycle::Started {
            self.spawn_shutdown_hook();
        }
    }

    fn spawn_shutdown_hook(&mut self) {
        let Some(server) = self.server.as_ref() else {
            return;
        };
        let Some(signal) = self.shutdown_signal.take() else {
            return;
        };
        let _guard = server.runtime.enter();
        http::spawn_shutdown_hook(
            signal,
            server.handles.clone(),
            Duration::from_millis(self.config.stop_timeout_ms),
            self.stop_requested.clone(),
        );
    }

    fn register(&mut self, mount: Mount) -> Result<()> {
        match self.state {
            Lifecycle::Created | Lifecycle::Configured => {
                self.registry.push(mount);
                Ok(())
            }
            _ => Err(self.transition_error("register a handler")),
        }
    }

    /// Packaged application (tar archive) on disk
    pub fn add_war_app(&mut self, path: impl Into<PathBuf>, context_path: &str) -> Result<()> {
        self.register(Mount::archive(ArchiveSource::File(path.into()), context_path))
    }

    /// Packaged application embedded in the binary
    pub fn add_war_app_embedded(
        &mut self,
        name: &str,
        bytes: &'static [u8],
        context_path: &str,
    ) -> Result<()> {
        let source = ArchiveSource::Embedded {
            name: name.to_string(),
            bytes,
        };
        self.register(Mount::archive(source, context_path))
    }

    /// Application directory, with an optional descriptor overriding `WEB-INF/app.toml`
    pub fn add_exploded_war_app(
        &mut self,
        base: impl Into<PathBuf>,
        descriptor: Option<PathBuf>,
        context_path: &str,
    ) -> Result<()> {
        self.register(Mount::exploded(base, descriptor, context_path))
    }

    /// Application directory relative to the executable directory
    pub fn add_exploded_war_app_from_exe_dir(
        &mut self,
        relative: impl AsRef<Path>,
        descriptor: Option<PathBuf>,
        context_path: &str,
    ) -> Result<()> {
        if self.state >= Lifecycle::Initialized {
            return Err(self.transition_error("register a handler"));
        }
        let mount = Mount::exploded_from_exe_dir(relative, descriptor, context_path)?;
        self.register(mount)
    }

    /// Serve `<exe dir>/webapp` at the root
    pub fn add_self(&mut self) -> Result<()> {
        self.add_self_at(CONTEXT_PATH_ROOT)
    }

    /// Serve `<exe dir>/webapp` at `context_path`
    pub fn add_self_at(&mut self, context_path: &str) -> Result<()> {
        self.add_exploded_war_app_from_exe_dir(RESOURCE_WEBAPP, None, context_path)
    }

    /// `add_self` then `start`
    pub fn start_self(&mut self) -> Result<()> {
        self.add_self()?;
        self.start()
    }

    /// Any axum router
    pub fn add_handler(&mut self, router: Router, context_path: &str) -> Result<()> {
        self.register(Mount::custom(router, context_path))
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        if self.state == Lifecycle::Started {
            if let Err(e) = self.stop() {
                tracing::error!(error = %e, "Failed to stop server");
            }
        }
    }
}
