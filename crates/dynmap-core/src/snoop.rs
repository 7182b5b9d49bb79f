//! Payload capture lifecycle for rule authoring.
//!
//! ```text
//! NONE --enable--> ENABLED --first message--> STARTED --stop--> STOPPED
//!   ^                                                              |
//!   +---------------------------- reset ---------------------------+
//! ```
//!
//! Captured payloads land in a bounded ring; the oldest sample is evicted
//! once the ring is full. Samples are handed out only after capture stopped.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::defaults;
use crate::error::{Error, Result};
use crate::mapping::{MappingRule, SnoopStatus};

/// Supplies authoring-time sample payloads.
pub trait SampleSource {
    /// Currently selected sample.
    fn current(&self) -> Option<&str>;

    /// Advance to the next sample, wrapping around, and return it.
    fn next(&mut self) -> Option<&str>;
}

/// Capture state of a single mapping rule.
#[derive(Debug, Clone)]
pub struct SnoopSession {
    status: SnoopStatus,
    capacity: usize,
    samples: VecDeque<String>,
    selected: usize,
}

impl Default for SnoopSession {
    fn default() -> Self {
        Self::new(defaults::SNOOP_CAPACITY)
    }
}

impl SnoopSession {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            status: SnoopStatus::None,
            capacity,
            samples: VecDeque::with_capacity(capacity),
            selected: 0,
        }
    }

    /// Restore the session stored on a rule.
    pub fn from_rule(rule: &MappingRule, capacity: usize) -> Self {
        let mut session = Self::new(capacity);
        session.status = rule.snoop_status;
        for sample in &rule.snooped_templates {
            session.push(sample.clone());
        }
        session
    }

    pub fn status(&self) -> SnoopStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arm capture. Operator triggered.
    pub fn enable(&mut self) -> Result<()> {
        self.transition(SnoopStatus::None, SnoopStatus::Enabled)
    }

    /// Record a live payload observed by the transport.
    ///
    /// The first payload while ENABLED moves the session to STARTED. Payloads
    /// arriving in any other state than ENABLED or STARTED are dropped and
    /// `false` is returned.
    pub fn record(&mut self, payload: impl Into<String>) -> bool {
        match self.status {
            SnoopStatus::Enabled => {
                debug!("First snooped payload, capture started");
                self.status = SnoopStatus::Started;
            }
            SnoopStatus::Started => {}
            _ => return false,
        }
        self.push(payload.into());
        true
    }

    /// End capture and expose the samples. Operator triggered.
    pub fn stop(&mut self) -> Result<()> {
        match self.status {
            SnoopStatus::Enabled | SnoopStatus::Started => {
                self.status = SnoopStatus::Stopped;
                self.selected = 0;
                Ok(())
            }
            other => Err(Error::SnoopTransition(format!(
                "cannot stop capture in state {:?}",
                other
            ))),
        }
    }

    /// Drop all samples and return to NONE. Idempotent.
    pub fn reset(&mut self) {
        self.status = SnoopStatus::None;
        self.samples.clear();
        self.selected = 0;
    }

    /// Captured samples, oldest first. Only available once stopped.
    pub fn samples(&self) -> Result<impl Iterator<Item = &str>> {
        self.ensure_stopped()?;
        Ok(self.samples.iter().map(String::as_str))
    }

    /// Write the selected sample into the rule's source template together
    /// with the capture state.
    pub fn apply_to(&self, rule: &mut MappingRule) -> Result<()> {
        self.ensure_stopped()?;
        if let Some(sample) = self.samples.get(self.selected) {
            rule.source_template = sample.clone();
        }
        rule.snoop_status = self.status;
        rule.snooped_templates = self.samples.iter().cloned().collect();
        Ok(())
    }

    fn push(&mut self, sample: String) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn transition(&mut self, from: SnoopStatus, to: SnoopStatus) -> Result<()> {
        if self.status != from {
            return Err(Error::SnoopTransition(format!(
                "expected state {:?} but was {:?}",
                from, self.status
            )));
        }
        self.status = to;
        Ok(())
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.status == SnoopStatus::Stopped {
            Ok(())
        } else {
            Err(Error::SnoopTransition(format!(
                "samples are only available when stopped, state is {:?}",
                self.status
            )))
        }
    }
}

impl SampleSource for SnoopSession {
    fn current(&self) -> Option<&str> {
        if self.status != SnoopStatus::Stopped {
            return None;
        }
        self.samples.get(self.selected).map(String::as_str)
    }

    fn next(&mut self) -> Option<&str> {
        if self.status != SnoopStatus::Stopped || self.samples.is_empty() {
            return None;
        }
        self.selected = (self.selected + 1) % self.samples.len();
        self.current()
    }
}
