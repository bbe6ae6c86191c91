//! # Analysis Worker
//!
//! Runs a [`TunerEngine`] on its own thread. Windows arrive on one crossbeam
//! channel and snapshots leave on another, so nothing mutable is shared with
//! the capture or UI side; settings still flow through the engine's
//! [`TunerControl`](crate::TunerControl).

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use crate::TunerOutputState;
use crate::audio::AudioWindow;
use crate::engine::TunerEngine;

pub struct AnalysisWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<TunerEngine>>,
}

impl AnalysisWorker {
    /// Moves `engine` onto a new thread that processes `windows` in arrival
    /// order. Emitted snapshots come out of the returned receiver.
    ///
    /// The thread ends when the window channel disconnects or on
    /// [`shutdown`](Self::shutdown).
    pub fn spawn(
        mut engine: TunerEngine,
        windows: Receiver<AudioWindow>,
    ) -> (Self, Receiver<TunerOutputState>) {
        let (output_tx, output_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::spawn(move || {
            debug!("Analysis thread started");
            loop {
                crossbeam_channel::select! {
                    recv(windows) -> msg => match msg {
                        Ok(window) => {
                            if let Some(snapshot) = engine.process_window(&window) {
                                if output_tx.send(snapshot).is_err() {
                                    debug!("Snapshot receiver dropped, stopping analysis");
                                    break;
                                }
                            }
                        }
                        Err(_) => {
                            debug!("Window channel closed");
                            break;
                        }
                    },
                    recv(shutdown_rx) -> _ => {
                        debug!("Analysis thread received shutdown signal");
                        break;
                    },
                }
            }
            engine
        });

        let worker = Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        };
        (worker, output_rx)
    }

    /// Stops the thread and hands the engine back. Returns `None` if the
    /// thread panicked.
    pub fn shutdown(mut self) -> Option<TunerEngine> {
        let _ = self.shutdown_tx.try_send(());
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(engine) => Some(engine),
            Err(_) => {
                warn!("Analysis thread panicked");
                None
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.shutdown_tx.try_send(());
            let _ = handle.join();
        }
    }
}
