//! Real-time-safe model replacement.
//!
//! The control thread builds a complete [`ModelBank`] (all allocation
//! happens here) and posts it over a bounded channel. The audio thread picks
//! it up with a non-blocking `try_recv` between blocks and posts the bank it
//! replaced back, so deallocation also happens on the control thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::error::{Error, Result};
use crate::model::InferenceModel;
use crate::stream::ModelBank;
use crate::weights::WeightBlob;

/// Pending installs. One is enough: the audio thread drains it every block.
const SWAP_CAPACITY: usize = 1;
/// Banks waiting to be dropped off the audio thread.
const RETIRE_CAPACITY: usize = 4;

/// Which bank a new model replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSlot {
    Primary,
    Alternate,
}

pub(crate) struct SwapRequest {
    pub slot: ModelSlot,
    pub bank: Box<ModelBank>,
}

/// Control-thread end.
pub struct ModelSender {
    tx: Sender<SwapRequest>,
    retired: Receiver<Box<ModelBank>>,
    channels: Arc<AtomicUsize>,
}

/// Audio-thread end, owned by the stream processor.
pub struct ModelReceiver {
    rx: Receiver<SwapRequest>,
    retire: Sender<Box<ModelBank>>,
    /// A bank that could not be retired yet (retire queue full).
    held: Option<Box<ModelBank>>,
}

pub(crate) fn model_swap(channels: Arc<AtomicUsize>) -> (ModelSender, ModelReceiver) {
    let (tx, rx) = bounded(SWAP_CAPACITY);
    let (retire, retired) = bounded(RETIRE_CAPACITY);
    (
        ModelSender {
            tx,
            retired,
            channels,
        },
        ModelReceiver {
            rx,
            retire,
            held: None,
        },
    )
}

impl ModelSender {
    /// Build a bank for the processor's current channel count and queue it.
    ///
    /// Fails if the weights cannot drive an audio stream, if a previous
    /// swap has not been picked up yet, or if the processor is gone.
    pub fn send(&self, blob: Arc<WeightBlob>, slot: ModelSlot) -> Result<()> {
        self.collect_retired();

        let template = InferenceModel::new(blob)?;
        let channels = self.channels.load(Ordering::Acquire);
        let bank = Box::new(ModelBank::new(template, channels));

        match self.tx.try_send(SwapRequest { slot, bank }) {
            Ok(()) => {
                tracing::info!(?slot, channels, "queued model swap");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::SwapBusy),
            Err(TrySendError::Disconnected(_)) => Err(Error::SwapDisconnected),
        }
    }

    /// Drop banks the audio thread has finished with. Returns how many.
    pub fn collect_retired(&self) -> usize {
        let mut n = 0;
        while let Ok(bank) = self.retired.try_recv() {
            drop(bank);
            n += 1;
        }
        if n > 0 {
            tracing::debug!(count = n, "released retired model banks");
        }
        n
    }
}

impl ModelReceiver {
    /// Next request, if any. Holds off while a retired bank is still waiting
    /// for queue space, so at most one bank is ever parked here.
    pub(crate) fn try_take(&mut self) -> Option<SwapRequest> {
        if let Some(bank) = self.held.take() {
            self.retire(bank);
            if self.held.is_some() {
                return None;
            }
        }
        self.rx.try_recv().ok()
    }

    /// Hand a bank back to the control thread without freeing it here.
    pub(crate) fn retire(&mut self, bank: Box<ModelBank>) {
        match self.retire.try_send(bank) {
            Ok(()) => {}
            Err(TrySendError::Full(bank)) => self.held = Some(bank),
            // Control side is gone; nobody else can free it.
            Err(TrySendError::Disconnected(bank)) => self.held = Some(bank),
        }
    }
}
