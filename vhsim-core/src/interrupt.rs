//! Fan-in interrupt controller: peripherals notify it, it stamps and
//! queues the event, then forwards it to the single CPU sink.

use parking_lot::Mutex;

/// An interrupt raised by a peripheral.
#[derive(Debug, Clone)]
pub struct InterruptEvent {
    pub source: String,
    pub vector: Option<u32>,
    pub timestamp: Option<u64>,
}

/// The CPU side of interrupt delivery. `CortexM` implements this;
/// tests can supply a recording double.
pub trait InterruptTarget: Send {
    fn handle_interrupt(&mut self, event: &InterruptEvent);
}

struct Inner {
    pending: Vec<InterruptEvent>,
    cpu: Option<Box<dyn InterruptTarget>>,
    subscribers: Vec<String>,
}

/// Pub/sub interrupt bus wiring peripherals to the CPU.
pub struct InterruptController {
    inner: Mutex<Inner>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: Vec::new(),
                cpu: None,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, peripheral_name: impl Into<String>) {
        let mut inner = self.inner.lock();
        let name = peripheral_name.into();
        if !inner.subscribers.contains(&name) {
            inner.subscribers.push(name);
        }
    }

    pub fn attach_cpu(&self, cpu: Box<dyn InterruptTarget>) {
        self.inner.lock().cpu = Some(cpu);
    }

    /// Stamps and queues an interrupt, then forwards it to the CPU
    /// sink (if attached). `cycle_count` is the clock's current cycle
    /// count, supplied by the caller since the controller does not
    /// itself own the clock.
    pub fn notify(
        &self,
        source: impl Into<String>,
        vector: Option<u32>,
        cycle_count: Option<u64>,
    ) -> InterruptEvent {
        let event = InterruptEvent {
            source: source.into(),
            vector,
            timestamp: cycle_count,
        };
        let mut inner = self.inner.lock();
        inner.pending.push(event.clone());
        if let Some(cpu) = inner.cpu.as_mut() {
            cpu.handle_interrupt(&event);
        }
        event
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn reset(&self) {
        self.inner.lock().pending.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Recorder(Vec<InterruptEvent>);
    impl InterruptTarget for Recorder {
        fn handle_interrupt(&mut self, event: &InterruptEvent) {
            self.0.push(event.clone());
        }
    }

    #[test]
    fn notify_stamps_and_forwards() {
        let ctrl = InterruptController::new();
        ctrl.attach_cpu(Box::new(Recorder(Vec::new())));
        ctrl.notify("GPIOF", Some(30), Some(42));
        assert_eq!(ctrl.pending_count(), 1);
    }

    #[test]
    fn reset_clears_pending() {
        let ctrl = InterruptController::new();
        ctrl.notify("GPIOF", None, None);
        ctrl.reset();
        assert_eq!(ctrl.pending_count(), 0);
    }
}
