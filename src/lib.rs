//! A mirror and verifier for Certificate Transparency (CT) logs.
//!
//! This crate fetches a log's Signed Tree Head (STH), verifies its ECDSA
//! signature, downloads the log's entries into a local append-only archive,
//! and independently recomputes the RFC 6962 Merkle Tree Hash over that
//! archive to confirm it matches the STH's root hash.
//!
//! It does not implement inclusion or consistency proofs, certificate
//! submission, or X.509 chain validation: it only answers "is this log
//! telling the truth about what it has committed to so far".
//!
//! See [the RFC](https://tools.ietf.org/html/rfc6962) and
//! [draft-laurie-pki-sunlight](https://tools.ietf.org/html/draft-laurie-pki-sunlight-12)
//! for the wire formats this crate speaks.

use std::{fmt, io, path};

pub use archive::{Archive, EntryAndPosition, ScanResult};
pub use entry::RawEntry;
pub use known_logs::KnownLogs;
pub use log_client::Log;
pub use orchestrator::{sync, sync_and_verify, SyncConfig, SyncOutcome};
pub use progress::{CoalescingReporter, OperationStatus};
pub use sth::SignedTreeHead;
pub use tree_hash::hash_archive;

mod archive;
mod entry;
mod jsons;
mod known_logs;
mod log_client;
mod orchestrator;
mod progress;
mod sth;
mod tree_hash;
pub mod utils;

#[cfg(not(any(feature = "native-tls", feature = "rustls-tls")))]
compile_error!("You must enable either the `native-tls` or `rustls-tls` feature.");

#[cfg(all(feature = "native-tls", feature = "rustls-tls"))]
compile_error!("You must enable only one of the `native-tls` and `rustls-tls` features, not both.");

/// Errors that this library could produce.
#[derive(Debug)]
pub enum Error {
    /// You provided something bad.
    InvalidArgument(String),

    /// Local archive file I/O error.
    FileIO(path::PathBuf, io::Error),

    /// Network IO error.
    NetIO(reqwest::Error),

    /// The server responded with something other than 200.
    InvalidResponseStatus(reqwest::StatusCode),

    /// The server's response did not carry a usable `Content-Length`.
    MissingContentLength,

    /// The server's response body was bigger than this endpoint's cap.
    ResponseTooLarge { got: u64, max: u64 },

    /// Server responded with something bad (e.g. malformed JSON, wrong base64).
    MalformedResponseBody(String),

    /// The CT server provided us with an invalid STH signature.
    InvalidSignature(String),

    /// The local entries archive is corrupt: a truncated frame, a failed
    /// decompression, or a leaf that doesn't parse.
    ArchiveCorrupt(String),

    /// The recomputed Merkle Tree Hash does not match the STH's root hash.
    RootHashMismatch {
        computed: [u8; 32],
        expected: [u8; 32],
    },

    /// We asked for a certain entry expecting it to be there, but the archive
    /// ran out first.
    ExpectedEntry(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(desc) => write!(f, "Invalid argument: {}", desc),
            Error::FileIO(path, e) => write!(f, "{}: {}", path.to_string_lossy(), e),
            Error::NetIO(e) => write!(f, "Network IO error: {}", e),
            Error::InvalidResponseStatus(code) => {
                write!(f, "Server responded with {} {}", code.as_u16(), code.as_str())
            }
            Error::MissingContentLength => write!(f, "Server response is missing Content-Length"),
            Error::ResponseTooLarge { got, max } => write!(
                f,
                "Server response of {} bytes exceeds the {} byte cap for this endpoint",
                got, max
            ),
            Error::MalformedResponseBody(desc) => write!(f, "Unable to parse server response: {}", desc),
            Error::InvalidSignature(desc) => write!(f, "Invalid signature received: {}", desc),
            Error::ArchiveCorrupt(desc) => write!(f, "Entries archive is corrupt: {}", desc),
            Error::RootHashMismatch { computed, expected } => write!(
                f,
                "Computed tree hash {} does not match STH root hash {}",
                utils::u8_to_hex(computed),
                utils::u8_to_hex(expected)
            ),
            Error::ExpectedEntry(index) => write!(
                f,
                "Expected the archive to contain entry {}, but it ran out first",
                index
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::NetIO(e) => Some(e),
            Error::FileIO(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::NetIO(e)
    }
}
