//! Driver-side client liveness tracking.

/// One connected client, identified by the id it stamps on its commands.
/// Kept alive by keepalive commands; timing out tears down everything the
/// client owns.
#[derive(Debug)]
pub struct ClientSession {
    client_id: i64,
    time_of_last_keepalive_ms: i64,
    liveness_timeout_ms: i64,
    closed_by_command: bool,
    has_reached_end_of_life: bool,
}

impl ClientSession {
    pub fn new(client_id: i64, now_ms: i64, liveness_timeout_ns: i64) -> Self {
        Self {
            client_id,
            time_of_last_keepalive_ms: now_ms,
            liveness_timeout_ms: liveness_timeout_ns / 1_000_000,
            closed_by_command: false,
            has_reached_end_of_life: false,
        }
    }

    #[inline]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    pub fn on_keepalive(&mut self, now_ms: i64) {
        self.time_of_last_keepalive_ms = now_ms;
    }

    /// Client asked to close; torn down on the next sweep without a
    /// timeout notification.
    pub fn on_closed_by_command(&mut self) {
        self.closed_by_command = true;
        self.has_reached_end_of_life = true;
    }

    pub fn on_time_event(&mut self, now_ms: i64) {
        if now_ms > self.time_of_last_keepalive_ms + self.liveness_timeout_ms {
            self.has_reached_end_of_life = true;
        }
    }

    #[inline]
    pub fn has_reached_end_of_life(&self) -> bool {
        self.has_reached_end_of_life
    }

    /// Whether teardown is a timeout (true) or a requested close (false).
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.has_reached_end_of_life && !self.closed_by_command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalives_hold_off_timeout() {
        let mut client = ClientSession::new(1, 0, 10_000_000_000);

        client.on_time_event(5_000);
        assert!(!client.has_reached_end_of_life());

        client.on_keepalive(9_000);
        client.on_time_event(15_000);
        assert!(!client.has_reached_end_of_life());

        client.on_time_event(19_001);
        assert!(client.has_reached_end_of_life());
        assert!(client.timed_out());
    }

    #[test]
    fn close_by_command_is_not_a_timeout() {
        let mut client = ClientSession::new(1, 0, 10_000_000_000);
        client.on_closed_by_command();
        assert!(client.has_reached_end_of_life());
        assert!(!client.timed_out());
    }
}
