/// Local candidates held back until the remote description has been applied.
///
/// Opening the gate hands out the buffered candidates once, in discovery order;
/// after that every candidate passes straight through.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    state: Gate,
}

#[derive(Debug)]
enum Gate {
    Buffering(Vec<String>),
    Open,
}

impl Default for Gate {
    fn default() -> Self {
        Gate::Buffering(Vec::new())
    }
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `candidate`, or hands it back for immediate relay once open.
    pub fn admit(&mut self, candidate: String) -> Option<String> {
        match &mut self.state {
            Gate::Buffering(queued) => {
                queued.push(candidate);
                None
            }
            Gate::Open => Some(candidate),
        }
    }

    /// Opens the gate and returns what was buffered. Empty on every later call.
    pub fn open(&mut self) -> Vec<String> {
        match std::mem::replace(&mut self.state, Gate::Open) {
            Gate::Buffering(queued) => queued,
            Gate::Open => Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, Gate::Open)
    }

    pub fn len(&self) -> usize {
        match &self.state {
            Gate::Buffering(queued) => queued.len(),
            Gate::Open => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
