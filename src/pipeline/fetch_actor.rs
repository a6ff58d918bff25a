// src/pipeline/fetch_actor.rs

//! Fetch actor: prepares data sets on a background thread.
//!
//! The actor owns its `DataSetSource` outright, so the on-disk files of the set
//! being prepared have a single writer. `Kill` raises the shared cancel token
//! before it is queued, which lets a fetch in flight notice it between steps and
//! terminates any external tool it is waiting on.

use super::{DataSetSource, FetchCommand, FetchPort, FetchResponse};
use crate::error::MosaicError;
use crate::tools::CancelToken;
use anyhow::{anyhow, Context, Result};
use log::*;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

/// Commands in flight: one `Fetch` plus a shutdown command.
const COMMAND_CAPACITY: usize = 2;
/// Responses not yet collected. With one fetch outstanding at most one is queued.
const RESPONSE_CAPACITY: usize = 2;

pub struct FetchStage {
    command_tx: Option<SyncSender<FetchCommand>>,
    response_rx: Receiver<FetchResponse>,
    cancel: CancelToken,
    thread_handle: Option<JoinHandle<()>>,
}

impl FetchStage {
    /// Spawns the fetch thread. It runs until `Stop`, `Kill`, or the stage is dropped.
    pub fn spawn<S: DataSetSource>(source: S) -> Result<Self> {
        let (command_tx, command_rx) = sync_channel(COMMAND_CAPACITY);
        let (response_tx, response_rx) = sync_channel(RESPONSE_CAPACITY);
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();

        let thread_handle = thread::Builder::new()
            .name("fetch".to_string())
            .spawn(move || Self::actor_thread_main(source, command_rx, response_tx, thread_cancel))
            .context("Failed to spawn fetch thread")?;

        info!("FetchStage spawned successfully");
        Ok(Self {
            command_tx: Some(command_tx),
            response_rx,
            cancel,
            thread_handle: Some(thread_handle),
        })
    }

    fn actor_thread_main<S: DataSetSource>(
        mut source: S,
        command_rx: Receiver<FetchCommand>,
        response_tx: SyncSender<FetchResponse>,
        cancel: CancelToken,
    ) {
        debug!("FetchStage: Waiting for commands");
        loop {
            let set_name = match command_rx.recv() {
                Ok(FetchCommand::Fetch(set_name)) => set_name,
                Ok(FetchCommand::Stop) => {
                    info!("FetchStage: Stop received, exiting");
                    break;
                }
                Ok(FetchCommand::Kill) => {
                    info!("FetchStage: Kill received, exiting");
                    break;
                }
                Err(_) => {
                    info!("FetchStage: Command channel closed, exiting");
                    break;
                }
            };
            if cancel.is_cancelled() {
                debug!("FetchStage: Cancelled, dropping fetch of {}", set_name);
                break;
            }

            info!("FetchStage: Fetching {}", set_name);
            let response = match source.load(&set_name, &cancel) {
                Ok(image) => {
                    info!("FetchStage: {} ready", set_name);
                    FetchResponse::Ready(Box::new(image))
                }
                Err(e) if cancel.is_cancelled() => {
                    debug!("FetchStage: Fetch of {} abandoned: {:#}", set_name, e);
                    break;
                }
                Err(e) => {
                    warn!("FetchStage: Failed to fetch {}: {:#}", set_name, e);
                    FetchResponse::Failed {
                        set_name,
                        error: format!("{:#}", e),
                    }
                }
            };
            if response_tx.send(response).is_err() {
                info!("FetchStage: Response channel closed, exiting");
                break;
            }
        }
        debug!("FetchStage: Thread exiting");
    }

    /// Finishes the fetch in flight and waits for the thread to exit.
    pub fn stop(mut self) -> Result<()> {
        self.send(FetchCommand::Stop)?;
        self.join();
        Ok(())
    }

    /// Abandons the fetch in flight and waits for the thread to exit.
    pub fn kill(mut self) {
        // The thread may already be gone; nothing to report then.
        let _ = self.send(FetchCommand::Kill);
        self.join();
    }

    fn join(&mut self) {
        self.command_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("FetchStage thread panicked: {:?}", e);
            }
        }
    }
}

impl FetchPort for FetchStage {
    fn send(&mut self, command: FetchCommand) -> Result<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| anyhow!("fetch stage already shut down"))?;
        if command == FetchCommand::Kill {
            self.cancel.cancel();
            return match tx.try_send(command) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Disconnected(_)) => Err(anyhow!("fetch thread has exited")),
            };
        }
        debug!("FetchStage: Sending {:?}", command);
        tx.send(command).context("Fetch thread has exited")
    }

    fn recv(&mut self) -> Result<FetchResponse> {
        if self.cancel.is_cancelled() {
            return Err(MosaicError::Cancelled.into());
        }
        self.response_rx
            .recv()
            .map_err(|_| anyhow!("fetch thread exited without answering"))
    }
}

impl Drop for FetchStage {
    fn drop(&mut self) {
        debug!("FetchStage dropped");
        self.join();
    }
}
