//! Lease window for the job in flight
//!
//! The job loop owns the lease deadline and may move it forward when a
//! renewal succeeds. The executor only observes it: before and after each
//! stage it checks [`LeaseWindow::is_expired`], and while a stage runs it
//! races the stage against [`LeaseWindow::expired`].

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

/// Read side of the lease deadline
#[derive(Debug, Clone)]
pub struct LeaseWindow {
    deadline: watch::Receiver<DateTime<Utc>>,
}

/// Write side of the lease deadline, held by whoever renews the lease
#[derive(Debug)]
pub struct LeaseHandle {
    deadline: watch::Sender<DateTime<Utc>>,
}

/// Creates a lease window starting at `expires_at`
pub fn lease_window(expires_at: DateTime<Utc>) -> (LeaseHandle, LeaseWindow) {
    let (tx, rx) = watch::channel(expires_at);
    (LeaseHandle { deadline: tx }, LeaseWindow { deadline: rx })
}

impl LeaseWindow {
    /// A window that can never be renewed
    pub fn fixed(expires_at: DateTime<Utc>) -> Self {
        lease_window(expires_at).1
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        *self.deadline.borrow()
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        (self.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Resolves once the deadline has passed, following renewals
    pub async fn expired(&mut self) {
        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                changed = self.deadline.changed() => {
                    if changed.is_err() {
                        // Renewer is gone; the current deadline is final
                        tokio::time::sleep(self.remaining()).await;
                    }
                }
            }
        }
    }
}

impl LeaseHandle {
    /// Moves the deadline to `expires_at`
    pub fn extend_to(&self, expires_at: DateTime<Utc>) {
        self.deadline.send_replace(expires_at);
    }
}
