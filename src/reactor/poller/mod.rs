//! Readiness polling.
//!
//! The engine rebuilds its interest set on every update pass, so the poller is
//! a flat `poll(2)` array rather than a persistent kernel registration.

mod poll;

pub(crate) use poll::PollSet;

/// What a descriptor is waiting for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
    pub(crate) priority: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
        priority: false,
    };

    pub(crate) const WRITE: Interest = Interest {
        read: false,
        write: true,
        priority: false,
    };

    pub(crate) const PRIORITY: Interest = Interest {
        read: false,
        write: false,
        priority: true,
    };
}

/// What the OS reported for a descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) priority: bool,
    /// Error condition or invalid descriptor.
    pub(crate) error: bool,
    /// Peer hang-up.
    pub(crate) hangup: bool,
}

impl Readiness {
    pub(crate) fn is_empty(self) -> bool {
        !(self.readable || self.writable || self.priority || self.error || self.hangup)
    }
}
