//! Deadline-ordered scheduler for retries.
//!
//! A single task owns a min-heap of `(deadline, ticket)` pairs and hands each
//! ticket to a callback once its deadline passes. Waiting tickets cost a heap
//! slot, nothing more.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Identifies one scheduled piece of work.
pub type Ticket = u64;

enum Command {
    Schedule { at: Instant, ticket: Ticket },
    Cancel(Ticket),
}

/// Handle to the scheduler task. Dropping it stops the scheduler.
pub struct WakeupManager {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl WakeupManager {
    /// Spawn the scheduler; `fire` runs on the scheduler task for every due ticket.
    pub fn spawn<F>(fire: F) -> Self
    where
        F: Fn(Ticket) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, fire));
        Self { tx, task }
    }

    /// Fire `ticket` at `at`, replacing any earlier deadline for it.
    pub fn schedule(&self, at: Instant, ticket: Ticket) -> bool {
        self.tx.send(Command::Schedule { at, ticket }).is_ok()
    }

    /// Forget `ticket` if it has not fired yet.
    pub fn cancel(&self, ticket: Ticket) {
        let _ = self.tx.send(Command::Cancel(ticket));
    }

    /// Stop the scheduler. Pending deadlines never fire.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for WakeupManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F>(mut rx: mpsc::UnboundedReceiver<Command>, fire: F)
where
    F: Fn(Ticket),
{
    let mut heap: BinaryHeap<Reverse<(Instant, Ticket)>> = BinaryHeap::new();
    // Live deadline per ticket; heap entries that disagree are stale.
    let mut deadlines: HashMap<Ticket, Instant> = HashMap::new();

    loop {
        let next = heap.peek().map(|Reverse((at, _))| *at);
        let sleep = async {
            match next {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Schedule { at, ticket }) => {
                    trace!(ticket, "wakeup scheduled");
                    deadlines.insert(ticket, at);
                    heap.push(Reverse((at, ticket)));
                }
                Some(Command::Cancel(ticket)) => {
                    trace!(ticket, "wakeup cancelled");
                    deadlines.remove(&ticket);
                }
                None => break,
            },
            _ = sleep => {
                let now = Instant::now();
                while let Some(&Reverse((at, ticket))) = heap.peek() {
                    if at > now {
                        break;
                    }
                    heap.pop();
                    if deadlines.get(&ticket) == Some(&at) {
                        deadlines.remove(&ticket);
                        trace!(ticket, "wakeup fired");
                        fire(ticket);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let wakeup = WakeupManager::spawn(move |t| {
            let _ = tx.send((t, Instant::now()));
        });
        let start = Instant::now();
        wakeup.schedule(start + Duration::from_secs(30), 3);
        wakeup.schedule(start + Duration::from_secs(10), 1);
        wakeup.schedule(start + Duration::from_secs(20), 2);

        for expected in 1..=3u64 {
            let (ticket, at) = rx.recv().await.unwrap();
            assert_eq!(ticket, expected);
            assert!(at >= start + Duration::from_secs(10 * expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_and_replaced_tickets_do_not_fire_twice() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let wakeup = WakeupManager::spawn(move |t| {
            let _ = tx.send(t);
        });
        let start = Instant::now();
        wakeup.schedule(start + Duration::from_secs(5), 1);
        wakeup.cancel(1);
        wakeup.schedule(start + Duration::from_secs(5), 2);
        wakeup.schedule(start + Duration::from_secs(50), 2);
        wakeup.schedule(start + Duration::from_secs(60), 3);

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
        assert!(Instant::now() >= start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_manager_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Ticket>();
        let wakeup = WakeupManager::spawn(move |t| {
            let _ = tx.send(t);
        });
        wakeup.schedule(Instant::now() + Duration::from_secs(1), 9);
        wakeup.stop();
        // The fire closure (and its sender) is dropped with the aborted task.
        assert_eq!(rx.recv().await, None);
    }
}
