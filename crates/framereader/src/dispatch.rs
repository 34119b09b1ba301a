//! Listener dispatch thread, decoupled from the render thread so a slow
//! listener can never stall frame production.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

type DispatchJob = Box<dyn FnOnce() + Send>;

enum Message {
    Job(DispatchJob),
    Quit,
}

/// Owns the callback thread; dropping it drains nothing and exits promptly.
pub struct CallbackThread {
    tx: Sender<Message>,
    join: Option<JoinHandle<()>>,
}

impl CallbackThread {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Message>();
        let join = thread::Builder::new()
            .name("frame-callbacks".into())
            .spawn(move || {
                for message in rx.iter() {
                    match message {
                        Message::Job(job) => job(),
                        Message::Quit => break,
                    }
                }
            })?;
        Ok(Self {
            tx,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> CallbackHandle {
        CallbackHandle {
            tx: self.tx.clone(),
        }
    }
}

impl Drop for CallbackThread {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Quit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Cloneable posting handle. Jobs run in order on the callback thread.
#[derive(Clone)]
pub struct CallbackHandle {
    tx: Sender<Message>,
}

impl CallbackHandle {
    /// Posts a job; `false` means the callback thread is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Message::Job(Box::new(job))).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread::ThreadId;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_order_off_the_caller_thread() {
        let callbacks = CallbackThread::spawn().unwrap();
        let handle = callbacks.handle();
        let (tx, rx) = mpsc::channel::<(u32, ThreadId)>();
        for i in 0..3 {
            let tx = tx.clone();
            assert!(handle.post(move || {
                tx.send((i, thread::current().id())).unwrap();
            }));
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (i, id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_ne!(id, thread::current().id());
            seen.push(i);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn post_after_shutdown_reports_failure() {
        let callbacks = CallbackThread::spawn().unwrap();
        let handle = callbacks.handle();
        drop(callbacks);
        assert!(!handle.post(|| {}));
    }
}
