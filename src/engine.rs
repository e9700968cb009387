use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error};

use crate::audio::{Frame, InstrumentRegistry};
use crate::error::EngineError;
use crate::events::{CorrelationId, Event, EventKind};
use crate::timing::{
    ControlHandle, ImmediateQueue, Lifecycle, RunMode, RunState, RunSummary, Scheduler,
};

/// Lifecycle news from the render thread.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    Lifecycle {
        tick: u64,
        what: Lifecycle,
        kind: Option<EventKind>,
        id: Option<CorrelationId>,
    },
    Finished(RunSummary),
}

/// Control side of a running render thread.
pub struct EngineHandle {
    control: ControlHandle,
    queue: ImmediateQueue,
    update_rx: Receiver<EngineUpdate>,
    thread: JoinHandle<(Scheduler, InstrumentRegistry, RunSummary)>,
}

/// Ring buffer carrying rendered frames to an output device callback.
pub fn frame_ring(capacity: usize) -> (HeapProd<Frame>, HeapCons<Frame>) {
    HeapRb::<Frame>::new(capacity.max(1)).split()
}

/// Moves the scheduler and registry onto a dedicated render thread and starts
/// a run. Any observer already set on the scheduler is replaced by one that
/// forwards updates to the returned handle.
pub fn spawn_engine(
    mut scheduler: Scheduler,
    mut registry: InstrumentRegistry,
    start_sample: u64,
    end_sample: u64,
    mode: RunMode,
) -> Result<EngineHandle, EngineError> {
    let (update_tx, update_rx) =
        crossbeam::channel::bounded(scheduler.config().update_capacity.max(1));

    let forward = update_tx.clone();
    scheduler.set_observer(move |tick: u64, what: Lifecycle, event: Option<&Event>| {
        send_update(
            &forward,
            EngineUpdate::Lifecycle {
                tick,
                what,
                kind: event.map(|e| e.kind),
                id: event.map(|e| e.id),
            },
        );
    });

    let control = scheduler.control();
    let queue = scheduler.immediate_queue().clone();

    let thread = std::thread::Builder::new()
        .name("seqcore-render".into())
        .spawn(move || {
            let summary = scheduler.run(&mut registry, start_sample, end_sample, mode);
            send_update(&update_tx, EngineUpdate::Finished(summary));
            (scheduler, registry, summary)
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        control,
        queue,
        update_rx,
        thread,
    })
}

/// Never blocks the render thread: updates are dropped when nobody keeps up.
fn send_update(tx: &Sender<EngineUpdate>, update: EngineUpdate) {
    match tx.try_send(update) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("update channel full, update dropped"),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

impl EngineHandle {
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn halt(&self) {
        self.control.halt();
    }

    /// Queues a live event for the next tick.
    pub fn push_event(&self, event: Event) {
        self.queue.push(event);
    }

    pub fn updates(&self) -> &Receiver<EngineUpdate> {
        &self.update_rx
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the run to end and hands back everything the thread owned.
    pub fn join(self) -> Result<(Scheduler, InstrumentRegistry, RunSummary), EngineError> {
        self.thread.join().map_err(|_| {
            error!("render thread panicked");
            EngineError::Panicked
        })
    }
}
