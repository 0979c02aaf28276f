//! A small, read-only catalogue of well-known log descriptors.
//!
//! Unlike the source this crate descends from, which built these as
//! process-wide mutable globals populated by an `init()` side effect, each
//! entry here is a plain constructor invoked on demand.

use crate::log_client::Log;
use crate::Error;

const PILOT_URL: &str = "http://ct.googleapis.com/pilot/";
const PILOT_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEfahLEimAoz2t01p3uMziiLOl/fHT
DM0YDOhBRuiBARsV4UvxG2LdNgoIGLrtCzWE0J5APC2em4JlvR8EEEFMoA==
-----END PUBLIC KEY-----";

const DIGICERT_URL: &str = "https://ct1.digicert-ct.com/log/";
const DIGICERT_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEAkbFvhu7gkAW6MHSrBlpE1n4+HCF
RkC5OLAjgqhkTH+/uzSfSl8ois8ZxAD2NgaTZe1M9akhYlrYkes4JECs6A==
-----END PUBLIC KEY-----";

/// Factory functions for the logs this crate ships a public key for.
pub struct KnownLogs;

impl KnownLogs {
    /// Google's "Pilot" log.
    pub fn pilot() -> Result<Log, Error> {
        Log::new(PILOT_URL, PILOT_KEY_PEM)
    }

    /// DigiCert's log server.
    pub fn digicert() -> Result<Log, Error> {
        Log::new(DIGICERT_URL, DIGICERT_KEY_PEM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pilot_key_parses() {
        KnownLogs::pilot().unwrap();
    }

    #[test]
    fn digicert_key_parses() {
        KnownLogs::digicert().unwrap();
    }
}
