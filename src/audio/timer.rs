//! Periodic callbacks, each running on its own thread.

use crate::audio::device::raise_thread_priority;
use crate::audio::pool::{SlotPool, TimerHandle};
use crate::error::TimerError;
use crate::logging::AudioLogger;
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Called with the timer's user value on every tick
pub type TimerCallback = Arc<dyn Fn(u32) + Send + Sync>;

pub const DEFAULT_TIMER_PERIOD_US: u64 = 1000;
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

struct TimerWorker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

impl TimerWorker {
    /// Signal the thread and wait a bounded time for it to finish.
    /// A thread stuck in its callback is left detached, as is a timer
    /// stopped from inside its own callback.
    fn shutdown(self, index: usize) {
        let _ = self.stop_tx.send(());
        if thread::current().id() == self.thread.thread().id() {
            debug!("Timer {} stopped from its own callback", index);
            return;
        }
        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.thread.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Timer {} did not stop within {:?}, detaching it", index, STOP_TIMEOUT);
            }
        }
    }
}

struct TimerSlot {
    callback: TimerCallback,
    period_us: Arc<AtomicU64>,
    user_data: Arc<AtomicU32>,
    worker: Option<TimerWorker>,
}

pub struct TimerManager {
    slots: Mutex<SlotPool<TimerSlot>>,
    logger: AudioLogger,
}

impl TimerManager {
    pub fn new(capacity: usize, logger: AudioLogger) -> Self {
        Self {
            slots: Mutex::new(SlotPool::with_capacity(capacity)),
            logger,
        }
    }

    fn slots(&self) -> MutexGuard<'_, SlotPool<TimerSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.slots().capacity()
    }

    /// Reserve a timer slot. The timer does not run until started.
    pub fn register<F>(&self, callback: F) -> Result<TimerHandle, TimerError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let mut slots = self.slots();
        let slot = TimerSlot {
            callback: Arc::new(callback),
            period_us: Arc::new(AtomicU64::new(DEFAULT_TIMER_PERIOD_US)),
            user_data: Arc::new(AtomicU32::new(0)),
            worker: None,
        };
        match slots.insert(slot) {
            Some(handle) => {
                self.logger.log_slot_allocated("timer", handle.index());
                Ok(TimerHandle(handle))
            }
            None => {
                let capacity = slots.capacity();
                self.logger.log_pool_exhausted("timer", capacity);
                Err(TimerError::PoolExhausted { capacity })
            }
        }
    }

    /// Stop the timer if it runs and free its slot
    pub fn release(&self, handle: TimerHandle) {
        let removed = self.slots().remove(handle.0);
        if let Some(mut slot) = removed {
            if let Some(worker) = slot.worker.take() {
                worker.shutdown(handle.index());
                self.logger.log_timer_stopped(handle.index());
            }
            self.logger.log_slot_released("timer", handle.index());
        }
    }

    /// Period in microseconds; a running timer picks it up on its next tick
    pub fn set_period(&self, handle: TimerHandle, period_us: u64) {
        if let Some(slot) = self.slots().get(handle.0) {
            slot.period_us.store(period_us, Ordering::Relaxed);
        }
    }

    pub fn set_user_data(&self, handle: TimerHandle, value: u32) {
        if let Some(slot) = self.slots().get(handle.0) {
            slot.user_data.store(value, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self, handle: TimerHandle) -> bool {
        self.slots()
            .get(handle.0)
            .map_or(false, |slot| slot.worker.is_some())
    }

    /// Spawn the timer's thread. Starting a running timer does nothing.
    pub fn start(&self, handle: TimerHandle) -> Result<(), TimerError> {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(handle.0) else {
            return Ok(());
        };
        if slot.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let callback = Arc::clone(&slot.callback);
        let period_us = Arc::clone(&slot.period_us);
        let user_data = Arc::clone(&slot.user_data);

        let thread = thread::Builder::new()
            .name(format!("audio-timer-{}", handle.index()))
            .spawn(move || {
                raise_thread_priority();
                loop {
                    let wait = Duration::from_millis((period_us.load(Ordering::Relaxed) / 1000).max(1));
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => callback(user_data.load(Ordering::Relaxed)),
                        _ => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        slot.worker = Some(TimerWorker {
            stop_tx,
            done_rx,
            thread,
        });
        self.logger
            .log_timer_started(handle.index(), slot.period_us.load(Ordering::Relaxed));
        Ok(())
    }

    /// Stop the timer's thread; the slot stays registered
    pub fn stop(&self, handle: TimerHandle) {
        let worker = self.slots().get_mut(handle.0).and_then(|slot| slot.worker.take());
        if let Some(worker) = worker {
            worker.shutdown(handle.index());
            self.logger.log_timer_stopped(handle.index());
        }
    }

    /// Stop and free every timer
    pub fn release_all(&self) {
        let handles = self.slots().handles();
        for raw in handles {
            self.release(TimerHandle(raw));
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.release_all();
    }
}
