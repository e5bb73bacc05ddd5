//! JSON trace exporter.
//!
//! Records what every step applied and what each replica's state hashed to,
//! so a failing seed can be inspected without re-running it.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use steplock_core::StepReport;

/// One step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub step: u64,

    /// Sequence numbers of the applied batch, in order
    pub seqs: Vec<u64>,

    /// Command kind of each batch entry
    pub kinds: Vec<String>,

    /// Presentation events emitted
    pub events: usize,

    /// Chat requests produced
    pub outbound: usize,

    /// State digest of every replica after the step
    pub digests: Vec<String>,
}

impl TraceFrame {
    pub fn new(report: &StepReport, kinds: Vec<String>, digests: Vec<String>) -> Self {
        Self {
            step: report.step,
            seqs: report.seqs.clone(),
            kinds,
            events: report.events.len(),
            outbound: report.outbound.len(),
            digests,
        }
    }
}

/// Complete trace of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceExport {
    pub scenario: String,
    pub seed: u64,
    pub replicas: usize,
    pub frames: Vec<TraceFrame>,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TraceExport {
    pub fn new(scenario: &str, seed: u64, replicas: usize) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            replicas,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: TraceFrame) {
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes the trace as pretty JSON.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_serializes_frames() {
        let report = StepReport {
            step: 3,
            seqs: vec![4, 5],
            ..StepReport::default()
        };
        let mut trace = TraceExport::new("conversation", 42, 2);
        trace.add_frame(TraceFrame::new(
            &report,
            vec!["deliver_response".into(), "set_status".into()],
            vec!["ab".into(), "ab".into()],
        ));
        trace.finalize(true, None);

        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["frames"][0]["step"], 3);
        assert_eq!(json["frames"][0]["kinds"][1], "set_status");
        assert!(json.get("failure_reason").is_none());
    }
}
