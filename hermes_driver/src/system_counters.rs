//! Well-known driver counters, allocated first in the counters file so
//! their ids are stable and external tooling can find them by label.

use hermes_core::concurrent::counters::{CountersManager, Position};
use hermes_core::error::HermesResult;

/// Counter type id for system counters in the counters file.
pub const SYSTEM_COUNTER_TYPE_ID: i32 = 0;

/// Descriptors for the driver's own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCounterDescriptor {
    Errors,
    UnblockedPublications,
    UnblockedCommands,
    FreeFails,
    ClientTimeouts,
    HeartbeatsReceived,
}

impl SystemCounterDescriptor {
    pub const ALL: [SystemCounterDescriptor; 6] = [
        SystemCounterDescriptor::Errors,
        SystemCounterDescriptor::UnblockedPublications,
        SystemCounterDescriptor::UnblockedCommands,
        SystemCounterDescriptor::FreeFails,
        SystemCounterDescriptor::ClientTimeouts,
        SystemCounterDescriptor::HeartbeatsReceived,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SystemCounterDescriptor::Errors => "Errors",
            SystemCounterDescriptor::UnblockedPublications => "Unblocked Publications",
            SystemCounterDescriptor::UnblockedCommands => "Unblocked Commands",
            SystemCounterDescriptor::FreeFails => "Failed attempts to free resources",
            SystemCounterDescriptor::ClientTimeouts => "Client liveness timeouts",
            SystemCounterDescriptor::HeartbeatsReceived => "Client heartbeats received",
        }
    }
}

/// The allocated system counters.
pub struct SystemCounters {
    counters: Vec<Position>,
}

impl SystemCounters {
    /// Allocate every system counter, in descriptor order.
    pub fn new(manager: &mut CountersManager) -> HermesResult<Self> {
        let mut counters = Vec::with_capacity(SystemCounterDescriptor::ALL.len());
        for descriptor in SystemCounterDescriptor::ALL {
            let id = manager.allocate(descriptor.label(), SYSTEM_COUNTER_TYPE_ID)?;
            counters.push(manager.position(id));
        }
        Ok(Self { counters })
    }

    #[inline]
    pub fn get(&self, descriptor: SystemCounterDescriptor) -> &Position {
        &self.counters[descriptor as usize]
    }

    #[inline]
    pub fn value(&self, descriptor: SystemCounterDescriptor) -> i64 {
        self.get(descriptor).get_volatile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::concurrent::atomic_buffer::AtomicBuffer;
    use hermes_core::concurrent::counters::{COUNTER_LENGTH, METADATA_LENGTH};

    #[test]
    fn counters_allocate_in_order_with_labels() {
        let slots = 16;
        let mut backing = vec![0u64; slots * (METADATA_LENGTH + COUNTER_LENGTH) / 8];
        // SAFETY: Vec allocation is 8-byte aligned and outlives the test.
        let whole =
            unsafe { AtomicBuffer::new(backing.as_mut_ptr() as *mut u8, backing.len() * 8) };
        let metadata = whole.view(0, slots * METADATA_LENGTH).unwrap();
        let values = whole
            .view(slots * METADATA_LENGTH, slots * COUNTER_LENGTH)
            .unwrap();

        let mut manager = CountersManager::new(metadata, values);
        let system = SystemCounters::new(&mut manager).unwrap();

        system
            .get(SystemCounterDescriptor::UnblockedPublications)
            .increment_ordered();
        assert_eq!(
            system.value(SystemCounterDescriptor::UnblockedPublications),
            1
        );
        assert_eq!(system.value(SystemCounterDescriptor::Errors), 0);

        let reader = hermes_core::concurrent::counters::CountersReader::new(metadata, values);
        assert_eq!(
            reader
                .label(SystemCounterDescriptor::UnblockedPublications as i32)
                .unwrap(),
            "Unblocked Publications"
        );
    }
}
