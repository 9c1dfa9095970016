//! Single-threaded reactor that owns connection I/O and callbacks.
//!
//! An [`EventLoop`] runs a current-thread tokio runtime and a `LocalSet` on a
//! dedicated thread. Work from other threads is marshaled through a
//! thread-safe queue and executed in submission order; work submitted from
//! the loop thread itself runs inline.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Run(Task),
    Quit,
}

/// Owner of the loop thread; stops and joins it on drop
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start a loop on a new thread called `name`
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (queue, mut incoming) = mpsc::unbounded_channel::<LoopMessage>();

        let thread_name = name.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let local = LocalSet::new();
            local.block_on(&runtime, async move {
                while let Some(message) = incoming.recv().await {
                    match message {
                        LoopMessage::Run(task) => task(),
                        LoopMessage::Quit => break,
                    }
                }
            });
            tracing::debug!(event_loop = %thread_name, "event loop stopped");
        })?;

        let handle = EventLoopHandle {
            shared: Arc::new(Shared {
                name,
                thread_id: thread.thread().id(),
                queue,
            }),
        };

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = self.handle.shared.queue.send(LoopMessage::Quit);
        if let Some(thread) = self.thread.take() {
            if !self.handle.is_in_loop_thread() {
                let _ = thread.join();
            }
        }
    }
}

/// Cloneable, thread-safe reference to an [`EventLoop`]
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    thread_id: ThreadId,
    queue: mpsc::UnboundedSender<LoopMessage>,
}

impl EventLoopHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    /// Run `task` on the loop thread: inline when already there, queued otherwise.
    ///
    /// When the loop has stopped the task is dropped unexecuted.
    pub fn run_in_loop<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            task();
            Ok(())
        } else {
            self.queue_in_loop(task)
        }
    }

    /// Queue `task` for the loop's next iteration, even from the loop thread
    pub fn queue_in_loop<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .queue
            .send(LoopMessage::Run(Box::new(task)))
            .map_err(|_| Error::EventLoopClosed)
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}
