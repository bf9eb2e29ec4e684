//! Setup-code pairing for controllers.
//!
//! A controller pairs by presenting the accessory's setup code once and
//! receives a controller id that authorizes every later request. Pairings
//! are held in memory only and disappear when the process exits.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::error::{PairingError, PinError};

/// Setup codes that are trivially guessable and therefore refused
const TRIVIAL_CODES: [&str; 2] = ["12345678", "87654321"];

/// An 8-digit accessory setup code
///
/// Parsed from either `XXX-XX-XXX` or `XXXXXXXX`; displayed as `XXX-XX-XXX`.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingPin(String);

impl PairingPin {
    /// Digits without separators
    pub fn digits(&self) -> &str {
        &self.0
    }
}

impl Default for PairingPin {
    fn default() -> Self {
        Self("12341234".to_string())
    }
}

impl FromStr for PairingPin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits: String = match s.len() {
            8 => s.to_string(),
            10 => {
                let bytes = s.as_bytes();
                if bytes[3] != b'-' || bytes[6] != b'-' {
                    return Err(PinError::Format(s.to_string()));
                }
                s.chars().filter(|c| *c != '-').collect()
            }
            _ => return Err(PinError::Format(s.to_string())),
        };

        if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinError::Format(s.to_string()));
        }

        let first = digits.as_bytes()[0];
        if digits.bytes().all(|b| b == first) || TRIVIAL_CODES.contains(&digits.as_str()) {
            return Err(PinError::Trivial);
        }

        Ok(Self(digits))
    }
}

impl fmt::Display for PairingPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", &self.0[..3], &self.0[3..5], &self.0[5..])
    }
}

impl fmt::Debug for PairingPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keep setup codes out of debug logs.
        f.write_str("PairingPin(***)")
    }
}

/// Wrong setup codes accepted before pairing is locked
pub const MAX_FAILED_ATTEMPTS: u32 = 100;

/// Upper bound on concurrently paired controllers
pub const MAX_PAIRINGS: usize = 16;

#[derive(Debug, Default)]
struct PairingState {
    controllers: HashSet<String>,
    failed_attempts: u32,
}

/// In-memory registry of paired controllers
///
/// After [`MAX_FAILED_ATTEMPTS`] wrong setup codes every further attempt is
/// refused, including ones with the right code, until the process restarts.
#[derive(Debug)]
pub struct Pairings {
    pin: PairingPin,
    state: RwLock<PairingState>,
}

impl Pairings {
    pub fn new(pin: PairingPin) -> Self {
        Self {
            pin,
            state: RwLock::new(PairingState::default()),
        }
    }

    /// Pair a controller that presents `code`
    ///
    /// Returns the new controller id.
    pub fn pair(&self, code: &str) -> Result<String, PairingError> {
        let mut state = self.state.write();
        if state.failed_attempts >= MAX_FAILED_ATTEMPTS {
            return Err(PairingError::LockedOut(state.failed_attempts));
        }

        let matches = code
            .parse::<PairingPin>()
            .map(|presented| presented == self.pin)
            .unwrap_or(false);
        if !matches {
            state.failed_attempts += 1;
            return Err(PairingError::WrongCode);
        }

        if state.controllers.len() >= MAX_PAIRINGS {
            return Err(PairingError::MaxPairings(MAX_PAIRINGS));
        }

        let controller_id = uuid::Uuid::new_v4().to_string();
        state.controllers.insert(controller_id.clone());
        Ok(controller_id)
    }

    pub fn is_paired(&self, controller_id: &str) -> bool {
        self.state.read().controllers.contains(controller_id)
    }

    /// Remove a pairing, returning whether it existed
    pub fn remove(&self, controller_id: &str) -> bool {
        self.state.write().controllers.remove(controller_id)
    }

    pub fn count(&self) -> usize {
        self.state.read().controllers.len()
    }

    /// Wrong setup codes presented so far
    pub fn failed_attempts(&self) -> u32 {
        self.state.read().failed_attempts
    }

    pub fn is_locked(&self) -> bool {
        self.failed_attempts() >= MAX_FAILED_ATTEMPTS
    }
}
