//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: how request bytes reach a meter and reply bytes come back
//! - **Codec**: what those bytes mean (handled separately)
//!
//! A transport performs one complete exchange per call and holds no
//! connection between calls. Retries, pacing and decoding belong to the
//! transaction runner.
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Implement the `Transport` trait
//! 3. Add `pub mod my_transport;` here

pub mod tcp;

pub use tcp::{TcpSettings, TcpTransport};

use bytes::Bytes;

use crate::error::Result;

/// Milestone of one exchange, reported as soon as it is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Connection established
    Connected,
    /// About to write the request
    Sending,
    /// Request written, reply not yet read
    AwaitingResponse,
}

/// One request/response exchange with a meter
///
/// # Errors
///
/// Implementations report socket failures as `EmopError::Transport` with the
/// phase that failed, so the runner can decide whether to retry.
pub trait Transport: Send {
    /// Send `request` and return whatever the meter answered with
    ///
    /// Every milestone reached is passed to `progress`, in order, before the
    /// work it announces starts. A failure stops the sequence.
    fn exchange_with(
        &mut self,
        request: &[u8],
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bytes>;

    /// `exchange_with` without progress reporting
    fn exchange(&mut self, request: &[u8]) -> Result<Bytes> {
        self.exchange_with(request, &mut |_| {})
    }

    /// `host:port` style label for logs and errors
    fn endpoint(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange_with(
        &mut self,
        request: &[u8],
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bytes> {
        (**self).exchange_with(request, progress)
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}
