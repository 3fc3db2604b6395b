//! Links between clients and the resources they registered.
//!
//! A `SubscriptionLink` records one add-subscription command and the
//! subscriber position counters it has been wired to. A
//! `PublicationLink` records one add-publication command and keeps its
//! publication referenced until removed (or its client dies).

/// Settings a subscription joins a channel with. `reliable`/`rejoin`
/// must agree across subscriptions sharing an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionParams {
    pub is_tether: bool,
    pub is_reliable: bool,
    pub is_rejoin: bool,
}

impl Default for SubscriptionParams {
    fn default() -> Self {
        Self {
            is_tether: true,
            is_reliable: true,
            is_rejoin: true,
        }
    }
}

/// A subscriber position wired to a publication.
#[derive(Debug, Clone, Copy)]
pub struct LinkedPosition {
    pub publication_registration_id: i64,
    pub counter_id: i32,
}

/// One subscription registered by a client.
#[derive(Debug)]
pub struct SubscriptionLink {
    registration_id: i64,
    stream_id: i32,
    channel: String,
    client_id: i64,
    params: SubscriptionParams,
    positions: Vec<LinkedPosition>,
}

impl SubscriptionLink {
    pub fn new(
        registration_id: i64,
        stream_id: i32,
        channel: String,
        client_id: i64,
        params: SubscriptionParams,
    ) -> Self {
        Self {
            registration_id,
            stream_id,
            channel,
            client_id,
            params,
            positions: Vec::new(),
        }
    }

    #[inline]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[inline]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[inline]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    #[inline]
    pub fn params(&self) -> SubscriptionParams {
        self.params
    }

    #[inline]
    pub fn is_tether(&self) -> bool {
        self.params.is_tether
    }

    /// Whether this subscription wants frames from a publication on
    /// `(stream_id, channel)`.
    pub fn matches(&self, stream_id: i32, channel: &str) -> bool {
        self.stream_id == stream_id && self.channel == channel
    }

    /// `reliable`/`rejoin` clash with another subscription on the same
    /// channel endpoint.
    pub fn clashes_with(&self, stream_id: i32, channel: &str, params: SubscriptionParams) -> bool {
        self.stream_id == stream_id
            && self.channel == channel
            && (self.params.is_reliable != params.is_reliable
                || self.params.is_rejoin != params.is_rejoin)
    }

    pub fn link(&mut self, publication_registration_id: i64, counter_id: i32) {
        self.positions.push(LinkedPosition {
            publication_registration_id,
            counter_id,
        });
    }

    /// Drop the wiring to a publication. The counter itself is owned and
    /// freed by the publication's subscriber list, not here.
    pub fn unlink(&mut self, publication_registration_id: i64) -> Option<i32> {
        let index = self
            .positions
            .iter()
            .position(|p| p.publication_registration_id == publication_registration_id)?;
        Some(self.positions.swap_remove(index).counter_id)
    }

    pub fn is_linked(&self, publication_registration_id: i64) -> bool {
        self.positions
            .iter()
            .any(|p| p.publication_registration_id == publication_registration_id)
    }

    pub fn positions(&self) -> &[LinkedPosition] {
        &self.positions
    }
}

/// One add-publication registration by a client.
#[derive(Debug, Clone, Copy)]
pub struct PublicationLink {
    pub registration_id: i64,
    pub publication_registration_id: i64,
    pub client_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_and_clash_rules() {
        let link = SubscriptionLink::new(
            1,
            10,
            "hermes:ipc".to_string(),
            7,
            SubscriptionParams::default(),
        );

        assert!(link.matches(10, "hermes:ipc"));
        assert!(!link.matches(11, "hermes:ipc"));

        let clashing = SubscriptionParams {
            is_reliable: false,
            ..Default::default()
        };
        assert!(link.clashes_with(10, "hermes:ipc", clashing));
        assert!(!link.clashes_with(10, "hermes:ipc", SubscriptionParams::default()));
        assert!(!link.clashes_with(11, "hermes:ipc", clashing));
    }

    #[test]
    fn link_unlink_roundtrip() {
        let mut link = SubscriptionLink::new(
            1,
            10,
            "hermes:ipc".to_string(),
            7,
            SubscriptionParams::default(),
        );

        link.link(100, 5);
        assert!(link.is_linked(100));
        assert_eq!(link.unlink(100), Some(5));
        assert!(!link.is_linked(100));
        assert_eq!(link.unlink(100), None);
    }
}
