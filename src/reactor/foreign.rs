//! Host-supplied descriptors polled alongside the engine's own sockets.
//!
//! This lets a host splice descriptors it owns (pipes, device handles, another
//! library's sockets) into the same readiness poll. Their handlers run with no
//! engine access and sit outside the stream/event model.

use std::os::unix::io::RawFd;

/// A descriptor owned by the host, plus the handler to run when it is ready.
pub trait ForeignDescriptor {
    fn raw_fd(&self) -> RawFd;

    fn on_ready(&mut self);
}

impl<F> ForeignDescriptor for (RawFd, F)
where
    F: FnMut(),
{
    fn raw_fd(&self) -> RawFd {
        self.0
    }

    fn on_ready(&mut self) {
        (self.1)()
    }
}

/// Which readiness condition a foreign descriptor set waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForeignSet {
    Read,
    Write,
    /// Exceptional conditions such as out-of-band data.
    Except,
}

/// The three descriptor sets, plus a generation bumped on every replacement so
/// positions recorded at poll time can be checked before use.
#[derive(Default)]
pub(crate) struct ForeignDescriptors {
    read: Vec<Box<dyn ForeignDescriptor>>,
    write: Vec<Box<dyn ForeignDescriptor>>,
    except: Vec<Box<dyn ForeignDescriptor>>,
    generation: u64,
}

impl ForeignDescriptors {
    pub(crate) fn replace(
        &mut self,
        set: ForeignSet,
        descriptors: Vec<Box<dyn ForeignDescriptor>>,
    ) -> Vec<Box<dyn ForeignDescriptor>> {
        self.generation += 1;
        std::mem::replace(self.set_mut(set), descriptors)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set(&self, set: ForeignSet) -> &[Box<dyn ForeignDescriptor>] {
        match set {
            ForeignSet::Read => &self.read,
            ForeignSet::Write => &self.write,
            ForeignSet::Except => &self.except,
        }
    }

    pub(crate) fn set_mut(&mut self, set: ForeignSet) -> &mut Vec<Box<dyn ForeignDescriptor>> {
        match set {
            ForeignSet::Read => &mut self.read,
            ForeignSet::Write => &mut self.write,
            ForeignSet::Except => &mut self.except,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.generation += 1;
        self.read.clear();
        self.write.clear();
        self.except.clear();
    }
}
