// Shared ONNX Runtime session construction and pooling
//
// CPU execution only. Both the detector and the recognizer build their
// sessions here so thread settings stay consistent across models.

use anyhow::{Context, Result};
use crossbeam::channel::{bounded, Receiver, RecvError, Sender};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, info};

/// Intra-op thread count for one session.
///
/// Windows shows heavy synchronization overhead past ~6 threads, so it is
/// capped there; other platforms use every core.
pub fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Build a CPU session for the ONNX model at `model_path`.
///
/// `intra_threads` of `None` uses [`optimal_intra_op_threads`].
pub fn build_cpu_session(
    model_path: &Path,
    model_name: &str,
    intra_threads: Option<usize>,
) -> Result<Session> {
    if !model_path.exists() {
        anyhow::bail!(
            "{} model not found at: {}",
            model_name,
            model_path.display()
        );
    }

    let threads = intra_threads.unwrap_or_else(optimal_intra_op_threads);

    let session = Session::builder()
        .context(format!("Failed to create ONNX session builder for {}", model_name))?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context(format!("Failed to configure CPU execution provider for {}", model_name))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context(format!("Failed to set graph optimization level for {}", model_name))?
        .with_intra_threads(threads)
        .context(format!("Failed to configure intra-op threads for {}", model_name))?
        .with_inter_threads(1)
        .context(format!("Failed to configure inter-op threads for {}", model_name))?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load {} ONNX model from {}. \
            This usually indicates:\n  \
            1. Model file corruption\n  \
            2. ONNX Runtime version/platform mismatch\n  \
            3. Model created with incompatible ONNX opset version",
            model_name,
            model_path.display()
        ))?;

    info!("✓ Loaded {} model from {} (CPU, {} threads)", model_name, model_path.display(), threads);
    Ok(session)
}

/// Fixed-size pool of ONNX sessions.
///
/// Each in-flight inference holds one session exclusively; callers block
/// while all sessions are busy. Uses a crossbeam bounded channel as the
/// free list.
pub struct OnnxSessionPool {
    sender: Sender<Session>,
    receiver: Receiver<Session>,
    capacity: usize,
}

impl OnnxSessionPool {
    /// Create a pool from already-built sessions
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        let capacity = sessions.len().max(1);
        let (sender, receiver) = bounded(capacity);
        for session in sessions {
            // Capacity matches the session count, so this never blocks
            let _ = sender.try_send(session);
        }
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Build `size` sessions for the same model
    pub fn build(model_path: &Path, model_name: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        // Split cores across sessions so concurrent inferences don't oversubscribe
        let threads = (optimal_intra_op_threads() / size).max(1);

        let sessions = (0..size)
            .map(|i| {
                debug!("Creating {} session {} of {}", model_name, i + 1, size);
                build_cpu_session(model_path, model_name, Some(threads))
            })
            .collect::<Result<Vec<_>>>()?;

        info!("✓ {} session pool ready ({} sessions)", model_name, size);
        Ok(Self::from_sessions(sessions))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle sessions
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Take a session, blocking until one is free.
    ///
    /// The session goes back to the pool when the guard drops, including
    /// during unwinding.
    pub fn acquire(&self) -> Result<PooledSession<'_>, RecvError> {
        let session = self.receiver.recv()?;
        Ok(PooledSession {
            pool: self,
            session: Some(session),
        })
    }
}

/// Exclusive handle to one pooled session
pub struct PooledSession<'a> {
    pool: &'a OnnxSessionPool,
    session: Option<Session>,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session.as_ref().expect("session is held until drop")
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("session is held until drop")
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = self.pool.sender.try_send(session);
        }
    }
}
