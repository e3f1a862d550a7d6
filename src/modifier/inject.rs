use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

use crate::connection::Tracking;
use crate::iface::Bridge;
use crate::injector::{InjectionJob, Injector};

/// Keeps an injector running while the window is open.
///
/// Closing the window only signals the thread; stopped injectors are parked
/// in `retired` and reaped once they have exited, so nothing here ever
/// blocks on a join while the connection is locked.
pub struct Inject {
    job: InjectionJob,
    tracking: Arc<Mutex<Tracking>>,
    bridge: Arc<Bridge>,
    current: Option<Injector>,
    retired: Vec<Injector>,
}

impl Inject {
    pub fn new(job: InjectionJob, tracking: Arc<Mutex<Tracking>>, bridge: Arc<Bridge>) -> Self {
        Self {
            job,
            tracking,
            bridge,
            current: None,
            retired: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|i| !i.is_finished())
    }

    pub fn set_active(&mut self, active: bool) {
        self.retired.retain(|i| !i.is_finished());

        if active {
            if self.current.is_none() {
                let mut injector = Injector::new(
                    self.job.clone(),
                    Arc::clone(&self.tracking),
                    Arc::clone(&self.bridge),
                );
                match injector.start() {
                    Ok(()) => self.current = Some(injector),
                    Err(e) => error!("inject: could not spawn sender thread: {}", e),
                }
            }
        } else if let Some(mut injector) = self.current.take() {
            injector.stop();
            self.retired.push(injector);
        }
    }

    /// Stops and joins every injector this modifier started.
    pub fn shutdown(mut self) {
        if let Some(mut injector) = self.current.take() {
            injector.stop();
            injector.join();
        }
        for mut injector in self.retired.drain(..) {
            injector.join();
        }
    }
}
