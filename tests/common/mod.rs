//! Shared helpers for integration tests.
//!
//! Each test binary uses a subset of these.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use cps_sim::ecs::Entity;
use cps_sim::kernel::{wait_for_event, EventId, Scheduler};

/// Records every `(time_ms, entity)` pair published on an entity-carrying
/// event channel.
pub fn record_entity_events(
    scheduler: &Scheduler,
    event: EventId,
) -> Rc<RefCell<Vec<(u64, Entity)>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let handle = scheduler.handle();
    scheduler
        .spawn(async move {
            loop {
                let entity = wait_for_event::<Entity>(event).await;
                sink.borrow_mut().push((handle.now().as_millis(), entity));
            }
        })
        .detach();
    log
}

/// `Write` adapter over a shared buffer, so a test can hand a writer to the
/// data log and still read the output afterwards.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("log output is UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
