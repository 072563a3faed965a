//! Byte-level I/O abstraction underlying [`crate::rsp::transport::RspTransport`].
//!
//! Grounded directly on the teacher crate's own `Connection` trait; trimmed
//! of the `no_std`/`poll_readable`-as-a-`Future` machinery this crate
//! doesn't need, since every adapter method here is synchronous end to end
//! (spec §5: "single-threaded cooperative from the caller's standpoint").

mod impls;

/// A bidirectional, byte-oriented connection to a remote stub.
///
/// Implemented for [`std::net::TcpStream`] directly, and for
/// `Box<dyn Connection<Error = E>>` so adapters can hold a type-erased
/// connection without becoming generic themselves.
pub trait Connection {
    /// The error type this connection's operations may produce.
    type Error: std::fmt::Debug + std::fmt::Display;

    /// Read a single byte.
    fn read(&mut self) -> Result<u8, Self::Error>;

    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write a single byte.
    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Write all of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Peek at the next byte without consuming it, if one is immediately
    /// available. Used by `vCont`-style polling for the interrupt byte.
    fn peek(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Called once, right after the underlying connection is established.
    /// The `TcpStream` impl uses this to disable Nagle's algorithm, matching
    /// the teacher's own rationale (see `connection::impls::tcpstream`).
    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub use impls::*;
