use super::{Interest, Readiness};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, nfds_t, pollfd};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// One `poll(2)` call worth of descriptors, each tagged with a caller token.
pub(crate) struct PollSet<T> {
    descriptors: Vec<pollfd>,
    tokens: Vec<T>,
}

impl<T: Copy> PollSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            descriptors: Vec::with_capacity(64),
            tokens: Vec::with_capacity(64),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.descriptors.clear();
        self.tokens.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Adds `file_descriptor`. Error and hang-up conditions are always
    /// reported, even with an empty interest.
    pub(crate) fn register(&mut self, file_descriptor: RawFd, interest: Interest, token: T) {
        let mut events = 0;
        if interest.read {
            events |= POLLIN;
        }
        if interest.write {
            events |= POLLOUT;
        }
        if interest.priority {
            events |= POLLPRI;
        }

        self.descriptors.push(pollfd {
            fd: file_descriptor,
            events,
            revents: 0,
        });
        self.tokens.push(token);
    }

    /// Blocks for at most `timeout`, returning how many descriptors are ready.
    /// An interrupted wait counts as nothing ready.
    pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let millis = timeout.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32;

        let result = unsafe {
            libc::poll(
                self.descriptors.as_mut_ptr(),
                self.descriptors.len() as nfds_t,
                millis,
            )
        };

        if result < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(error);
        }

        Ok(result as usize)
    }

    /// Tokens with a non-empty readiness after the last [`wait`](Self::wait).
    pub(crate) fn ready(&self) -> Vec<(T, Readiness)> {
        self.descriptors
            .iter()
            .zip(self.tokens.iter())
            .filter_map(|(descriptor, token)| {
                let revents = descriptor.revents;
                let readiness = Readiness {
                    readable: revents & POLLIN != 0,
                    writable: revents & POLLOUT != 0,
                    priority: revents & POLLPRI != 0,
                    error: revents & (POLLERR | POLLNVAL) != 0,
                    hangup: revents & POLLHUP != 0,
                };

                (!readiness.is_empty()).then_some((*token, readiness))
            })
            .collect()
    }
}
