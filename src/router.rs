//! In-memory view router: one "current page" plus a back stack.

use crate::models::DiagnosisResult;
use crate::scan_workflow::{ScanOutcome, ScanPhase};

/// Why the generic failure page is shown
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Backend could not analyse the image
    Analysis,
    /// No result in time
    Timeout,
    /// Upload or network failure
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Page {
    #[default]
    Home,
    Upload,
    Scanner,
    Result(DiagnosisResult),
    Failure(FailureReason),
    Literature,
    History,
    Subscription,
}

#[derive(Debug, Default)]
pub struct Navigator {
    current: Page,
    back_stack: Vec<Page>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Page {
        &self.current
    }

    pub fn navigate(&mut self, page: Page) {
        if page != self.current {
            let previous = std::mem::replace(&mut self.current, page);
            self.back_stack.push(previous);
        }
    }

    /// Return to the previous page; stays on `Home` when there is none
    pub fn back(&mut self) -> &Page {
        self.current = self.back_stack.pop().unwrap_or_default();
        &self.current
    }

    /// Route a terminal workflow outcome: results to `Result`, everything else to
    /// the single `Failure` page
    pub fn apply(&mut self, outcome: &ScanOutcome) -> &Page {
        let page = match outcome {
            ScanOutcome::Completed(diagnosis) => Page::Result(diagnosis.clone()),
            ScanOutcome::BackendFailure => Page::Failure(FailureReason::Analysis),
            ScanOutcome::TimeoutFailure => Page::Failure(FailureReason::Timeout),
            ScanOutcome::Fatal(e) => Page::Failure(FailureReason::Error(e.to_string())),
        };
        self.navigate(page);
        &self.current
    }

    /// Follow the UI slot: scanner while uploading/polling, outcome page when finished
    pub fn follow(&mut self, phase: &ScanPhase) -> &Page {
        match phase {
            ScanPhase::Idle => {}
            ScanPhase::Uploading | ScanPhase::Polling { .. } => {
                if self.current != Page::Scanner {
                    self.navigate(Page::Scanner);
                }
            }
            ScanPhase::Finished { outcome, .. } => {
                self.apply(outcome);
            }
        }
        &self.current
    }
}
