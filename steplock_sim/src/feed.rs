//! Concurrent external producers.
//!
//! Each producer is a tokio task appending agent responses through its own
//! boundary clone, racing the other producers and the step thread's drain.
//! Producer `p` talks to viewer `p + 1` and numbers its messages, so the
//! per-producer order is visible in the stored sessions afterwards.

use crate::error::ScenarioFailure;
use steplock_core::{Command, InboundBoundary};
use steplock_env::ViewerId;
use tracing::debug;

/// Totals over every producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub sent: u64,
    pub rejected: u64,
}

/// A set of concurrent producers.
#[derive(Debug, Clone, Copy)]
pub struct ExternalFeed {
    producers: u32,
    per_producer: u32,
}

impl ExternalFeed {
    pub fn new(producers: u32, per_producer: u32) -> Self {
        Self {
            producers: producers.max(1),
            per_producer,
        }
    }

    pub fn producers(&self) -> u32 {
        self.producers
    }

    pub fn per_producer(&self) -> u32 {
        self.per_producer
    }

    /// Viewer a producer delivers to.
    pub fn viewer_of(producer: u32) -> ViewerId {
        ViewerId(producer + 1)
    }

    /// Text of a producer's `n`th message.
    pub fn text_of(producer: u32, n: u32) -> String {
        format!("p{}:{}", producer, n)
    }

    /// Runs every producer to completion.
    ///
    /// Odd-numbered messages go through the JSON wire form, even ones
    /// through the typed call.
    pub async fn run(self, boundary: InboundBoundary) -> Result<FeedReport, ScenarioFailure> {
        let mut handles = Vec::with_capacity(self.producers as usize);
        for producer in 0..self.producers {
            let boundary = boundary.clone();
            let count = self.per_producer;
            handles.push(tokio::spawn(async move {
                let mut report = FeedReport::default();
                let viewer = Self::viewer_of(producer);
                for n in 0..count {
                    let text = Self::text_of(producer, n);
                    let result = if n % 2 == 1 {
                        let command = Command::DeliverResponse { viewer, agent: None, text };
                        match command.to_wire() {
                            Ok(line) => boundary.submit_wire(&line).map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        }
                    } else {
                        boundary
                            .deliver_response(viewer, None, text)
                            .map_err(|e| e.to_string())
                    };
                    match result {
                        Ok(_) => report.sent += 1,
                        Err(reason) => {
                            debug!(producer, n, %reason, "producer append rejected");
                            report.rejected += 1;
                        }
                    }
                    tokio::task::yield_now().await;
                }
                report
            }));
        }

        let mut total = FeedReport::default();
        for handle in handles {
            let report = handle
                .await
                .map_err(|e| ScenarioFailure::Join(e.to_string()))?;
            total.sent += report.sent;
            total.rejected += report.rejected;
        }
        Ok(total)
    }
}
