use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Running = 1,
    /// Pause requested; the render thread has not reached its safe point yet.
    Pausing = 2,
    Paused = 3,
    Halting = 4,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Pausing,
            3 => RunState::Paused,
            4 => RunState::Halting,
            _ => RunState::Stopped,
        }
    }
}

/// Flags shared between the render thread and any number of control threads.
/// The gate mutex only guards the condition variable; the flags themselves are
/// atomics so the render thread never takes a lock while running.
#[derive(Debug)]
struct Control {
    state: AtomicU8,
    pause: AtomicBool,
    halt: AtomicBool,
    gate: Mutex<()>,
    wake: Condvar,
}

impl Control {
    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable handle to a scheduler's run state.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    inner: Arc<Control>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Control {
                state: AtomicU8::new(RunState::Stopped as u8),
                pause: AtomicBool::new(false),
                halt: AtomicBool::new(false),
                gate: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.state()
    }

    /// Requests a pause at the next safe point. Does not wait for it; poll
    /// `state()` for `Paused`.
    pub fn pause(&self) {
        let _gate = self.inner.gate.lock();
        self.inner.pause.store(true, Ordering::Release);
        self.inner.transition(RunState::Running, RunState::Pausing);
    }

    /// Clears a pending or active pause. Returns false when there was nothing
    /// to resume.
    pub fn resume(&self) -> bool {
        let _gate = self.inner.gate.lock();
        if !self.inner.pause.swap(false, Ordering::AcqRel) {
            return false;
        }
        if !self.inner.transition(RunState::Pausing, RunState::Running) {
            self.inner.transition(RunState::Paused, RunState::Running);
        }
        self.inner.wake.notify_all();
        true
    }

    /// Asks the render loop to exit at the top of its next iteration, waking
    /// it if it is paused.
    pub fn halt(&self) {
        let _gate = self.inner.gate.lock();
        self.inner.halt.store(true, Ordering::Release);
        if self.inner.state() != RunState::Stopped {
            self.inner.set_state(RunState::Halting);
        }
        self.inner.wake.notify_all();
    }

    pub fn is_halt_requested(&self) -> bool {
        self.inner.halt.load(Ordering::Acquire)
    }

    pub fn is_pause_requested(&self) -> bool {
        self.inner.pause.load(Ordering::Acquire)
    }

    /// Render side. Requests made before the run starts apply to it.
    pub(crate) fn begin_run(&self) {
        let _gate = self.inner.gate.lock();
        let state = if self.is_halt_requested() {
            RunState::Halting
        } else if self.is_pause_requested() {
            RunState::Pausing
        } else {
            RunState::Running
        };
        self.inner.set_state(state);
    }

    /// Render side. Clears whatever requests are left over.
    pub(crate) fn end_run(&self) {
        let _gate = self.inner.gate.lock();
        self.inner.pause.store(false, Ordering::Release);
        self.inner.halt.store(false, Ordering::Release);
        self.inner.set_state(RunState::Stopped);
    }

    /// Render side safe point. Blocks while a pause is in effect. Returns
    /// false if the run was halted.
    pub(crate) fn wait_while_paused(&self) -> bool {
        let mut gate = self.inner.gate.lock();
        if self.is_halt_requested() {
            return false;
        }
        if !self.is_pause_requested() {
            return true;
        }

        self.inner.set_state(RunState::Paused);
        while self.is_pause_requested() && !self.is_halt_requested() {
            self.inner.wake.wait(&mut gate);
        }

        if self.is_halt_requested() {
            return false;
        }
        self.inner.set_state(RunState::Running);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn wait_for(control: &ControlHandle, state: RunState) {
        for _ in 0..5000 {
            if control.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("never reached {state:?}, stuck in {:?}", control.state());
    }

    #[test]
    fn test_pause_twice_is_pause_once() {
        let control = ControlHandle::new();
        control.begin_run();

        control.pause();
        control.pause();
        assert_eq!(control.state(), RunState::Pausing);

        assert!(control.resume());
        assert_eq!(control.state(), RunState::Running);
        assert!(!control.resume());
    }

    #[test]
    fn test_resume_while_running_is_a_no_op() {
        let control = ControlHandle::new();
        control.begin_run();

        assert!(!control.resume());
        assert_eq!(control.state(), RunState::Running);
        assert!(control.wait_while_paused());
    }

    #[test]
    fn test_requests_before_run_carry_into_it() {
        let control = ControlHandle::new();
        control.pause();
        assert_eq!(control.state(), RunState::Stopped);

        control.begin_run();
        assert_eq!(control.state(), RunState::Pausing);

        control.halt();
        control.end_run();
        assert!(!control.is_pause_requested());
        assert!(!control.is_halt_requested());
        assert_eq!(control.state(), RunState::Stopped);
    }

    #[test]
    fn test_resume_wakes_paused_thread() {
        let control = ControlHandle::new();
        control.begin_run();
        control.pause();

        let render = control.clone();
        let worker = thread::spawn(move || render.wait_while_paused());

        wait_for(&control, RunState::Paused);
        assert!(control.resume());

        assert!(worker.join().unwrap());
        assert_eq!(control.state(), RunState::Running);
    }

    #[test]
    fn test_halt_wakes_paused_thread() {
        let control = ControlHandle::new();
        control.begin_run();
        control.pause();

        let render = control.clone();
        let worker = thread::spawn(move || render.wait_while_paused());

        wait_for(&control, RunState::Paused);
        control.halt();

        assert!(!worker.join().unwrap());
        assert_eq!(control.state(), RunState::Halting);
    }
}
