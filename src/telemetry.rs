/// Events recorded while servicing one client connection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A query completed and its rows were delivered to the client.
    QueryCompleted { rows_emitted: u64 },
    /// A query failed at any stage before or during emission.
    QueryFailed,
}

/// Counters aggregated from session events, logged when a connection closes.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub queries_served: usize,
    pub queries_failed: usize,
    pub rows_emitted: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a session event.
    pub fn update(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::QueryCompleted { rows_emitted } => {
                self.queries_served += 1;
                self.rows_emitted += rows_emitted;
            }
            SessionEvent::QueryFailed => {
                self.queries_served += 1;
                self.queries_failed += 1;
            }
        }
    }
}
