//! Stack assembly and the daemon event loop.
//!
//! The [`Orchestrator`] owns every configured [`PipelineStack`] and runs
//! all of them on a single control thread:
//!
//! ```text
//! UDP socket ──readable──▶ drain datagrams ──▶ ingest_datagram(stack) for each ULOG stack
//! SIGHUP     ──────────────▶ reload every stack (stop, then start)
//! SIGINT / SIGTERM ────────▶ stop every stack, remove PID file
//! ```
//!
//! Reload and shutdown are handled between datagrams, never during a
//! propagation cycle.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ironlog_core::config::IronlogConfig;
use ironlog_core::{PipelineStack, PluginRegistry};
use ironlog_packet::{DatagramStats, ingest_datagram, ulog};

use crate::registry::builtin_registry;

/// Control messages handled by the event loop between datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Stop then start every stage of every stack.
    Reload,
    /// Stop every stack and leave the loop.
    Shutdown,
}

/// A built stack plus the position of its ULOG source, if any.
struct StackHandle {
    stack: PipelineStack,
    source: Option<usize>,
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: IronlogConfig,
    stacks: Vec<StackHandle>,
}

impl Orchestrator {
    /// Load `ironlog.toml` and build every stack with the builtin plugins.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = IronlogConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration with the builtin plugins.
    pub fn build_from_config(config: IronlogConfig) -> Result<Self> {
        let registry = builtin_registry()?;
        Self::build_with_registry(config, &registry)
    }

    /// Build and configure every stack against `registry`.
    ///
    /// Unknown plugins, unresolved required keys and invalid stage options
    /// are all reported here, before any stage is started.
    pub fn build_with_registry(config: IronlogConfig, registry: &PluginRegistry) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let mut stacks = Vec::with_capacity(config.stacks.len());
        for stack_config in &config.stacks {
            let mut stack = PipelineStack::from_config(stack_config, registry).map_err(|e| {
                anyhow::anyhow!("failed to build stack '{}': {}", stack_config.name, e)
            })?;
            stack.configure().map_err(|e| {
                anyhow::anyhow!("failed to configure stack '{}': {}", stack_config.name, e)
            })?;

            let source = stack.source_index().filter(|&idx| {
                stack
                    .instance(idx)
                    .is_some_and(|inst| inst.plugin() == ulog::PLUGIN_NAME)
            });
            if source.is_none() {
                tracing::warn!(stack = %stack.name(), "stack has no ULOG source and will receive no events");
            }

            for line in stack.describe() {
                tracing::debug!(stack = %stack.name(), "{}", line);
            }
            stacks.push(StackHandle { stack, source });
        }

        tracing::info!(stacks = stacks.len(), "orchestrator initialized");
        Ok(Self { config, stacks })
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &IronlogConfig {
        &self.config
    }

    /// Number of built stacks.
    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    /// Look up a stack by name.
    pub fn stack(&self, name: &str) -> Option<&PipelineStack> {
        self.stacks
            .iter()
            .map(|h| &h.stack)
            .find(|s| s.name() == name)
    }

    /// Start every stack in configuration order.
    ///
    /// On failure, stacks that were already started are stopped again.
    pub fn start(&mut self) -> Result<()> {
        for idx in 0..self.stacks.len() {
            let result = self.stacks[idx].stack.start();
            if let Err(e) = result {
                let name = self.stacks[idx].stack.name().to_owned();
                tracing::warn!(stack = %name, "startup failed, stopping already-started stacks");
                for handle in self.stacks[..idx].iter_mut().rev() {
                    if let Err(stop_err) = handle.stack.stop() {
                        tracing::error!(stack = %handle.stack.name(), error = %stop_err, "rollback stop failed");
                    }
                }
                return Err(anyhow::anyhow!("failed to start stack '{}': {}", name, e));
            }
        }
        tracing::info!(stacks = self.stacks.len(), "all stacks started");
        Ok(())
    }

    /// Reload every stack. Failures are logged; the daemon keeps running.
    pub fn reload(&mut self) {
        tracing::info!("reloading all stacks");
        for handle in &mut self.stacks {
            if let Err(e) = handle.stack.reload() {
                tracing::error!(stack = %handle.stack.name(), error = %e, "stack reload failed");
            }
        }
    }

    /// Stop every stack in reverse configuration order.
    pub fn stop(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for handle in self.stacks.iter_mut().rev() {
            if let Err(e) = handle.stack.stop() {
                tracing::error!(stack = %handle.stack.name(), error = %e, "failed to stop stack");
                errors.push(format!("{}: {}", handle.stack.name(), e));
            }
        }

        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "errors stopping stacks: {}",
                errors.join("; ")
            ));
        }
        tracing::info!("all stacks stopped");
        Ok(())
    }

    /// Hand one datagram to every stack with a ULOG source.
    pub fn dispatch(&mut self, datagram: Bytes) -> DatagramStats {
        let mut total = DatagramStats::default();
        for handle in &mut self.stacks {
            let Some(origin) = handle.source else {
                continue;
            };
            let stats = ingest_datagram(&mut handle.stack, origin, datagram.clone());
            total.records += stats.records;
            total.stage_failures += stats.stage_failures;
            total.discarded |= stats.discarded;
        }
        total
    }

    /// Bind the source socket, start all stacks and run until SIGINT/SIGTERM.
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        let result = self.run_inner().await;

        if !pid_file.is_empty() {
            remove_pid_file(Path::new(&pid_file));
        }
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.source.bind)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", self.config.source.bind, e))?;
        tracing::info!(bind = %self.config.source.bind, "listening for ULOG datagrams");

        let (control_tx, control_rx) = mpsc::channel(8);
        let signals = tokio::spawn(forward_signals(control_tx));

        self.start()?;
        let result = self.serve(socket, control_rx).await;
        signals.abort();
        result
    }

    /// Run the event loop on an already-bound socket.
    ///
    /// Returns after a [`Control::Shutdown`] message (or when every control
    /// sender is dropped) once all stacks are stopped. Stacks must already
    /// be started.
    pub async fn serve(
        &mut self,
        socket: UdpSocket,
        mut control: mpsc::Receiver<Control>,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.config.source.recv_buffer_size];

        loop {
            tokio::select! {
                // control messages win over pending datagrams
                biased;

                msg = control.recv() => match msg {
                    Some(Control::Reload) => self.reload(),
                    Some(Control::Shutdown) | None => break,
                },
                ready = socket.readable() => {
                    ready?;
                    self.drain(&socket, &mut buf)?;
                }
            }
        }

        tracing::info!("leaving event loop");
        self.stop()
    }

    /// Read every datagram currently queued on the socket.
    fn drain(&mut self, socket: &UdpSocket, buf: &mut [u8]) -> Result<()> {
        loop {
            match socket.try_recv_from(buf) {
                Ok((len, peer)) => {
                    tracing::trace!(len, %peer, "datagram received");
                    let stats = self.dispatch(Bytes::copy_from_slice(&buf[..len]));
                    if stats.discarded {
                        tracing::debug!(%peer, records = stats.records, "datagram partially discarded");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to receive datagram");
                    return Ok(());
                }
            }
        }
    }
}

/// Translate process signals into [`Control`] messages.
///
/// SIGHUP reloads; SIGINT and SIGTERM shut down.
async fn forward_signals(tx: mpsc::Sender<Control>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("failed to install SIGHUP handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    loop {
        let (name, msg) = tokio::select! {
            _ = sighup.recv() => ("SIGHUP", Control::Reload),
            _ = sigterm.recv() => ("SIGTERM", Control::Shutdown),
            _ = sigint.recv() => ("SIGINT", Control::Shutdown),
        };
        tracing::info!(signal = name, "signal received");
        if tx.send(msg).await.is_err() || msg == Control::Shutdown {
            return Ok(());
        }
    }
}

/// Write the current process PID to `path`.
///
/// Fails if the file already exists, so two daemons never share one.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o644))?;
    }

    writeln!(file, "{}", pid)?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Logs a warning if it cannot be removed.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}
