//! Fingerprint identifier pool.
//!
//! The access scanner stores templates in slots 1..=255, so the id space is
//! fixed. Occupancy is tracked in a 256-bit map (bit 0 unused) instead of
//! scanning members per allocation. The storage layer's unique index on
//! `fingerprint_id` still has the final say.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const MIN_FINGERPRINT_ID: i64 = 1;
pub const MAX_FINGERPRINT_ID: i64 = 255;
pub const POOL_CAPACITY: usize = 255;

pub const ENROLLMENT_PURPOSE: &str = "fingerprint_enroll";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("Fingerprint ID must be an integer between 1 and 255, got {0}")]
    OutOfRange(i64),
    #[error("Fingerprint ID is not an integer: {0:?}")]
    Malformed(String),
    #[error("Fingerprint ID {0} is already assigned to another member")]
    Taken(FingerprintId),
    #[error("Fingerprint pool exhausted: all 255 IDs are assigned")]
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct FingerprintId(u8);

impl FingerprintId {
    pub fn new(value: i64) -> Result<Self, FingerprintError> {
        if !(MIN_FINGERPRINT_ID..=MAX_FINGERPRINT_ID).contains(&value) {
            return Err(FingerprintError::OutOfRange(value));
        }

        Ok(FingerprintId(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Parses raw scanner input. Blank input means "no scan" and yields `None`.
    pub fn parse_scan(raw: &str) -> Result<Option<Self>, FingerprintError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        raw.parse().map(Some)
    }
}

impl TryFrom<i64> for FingerprintId {
    type Error = FingerprintError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        FingerprintId::new(value)
    }
}

impl From<FingerprintId> for i64 {
    fn from(id: FingerprintId) -> Self {
        id.0 as i64
    }
}

impl FromStr for FingerprintId {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| FingerprintError::Malformed(s.to_string()))?;
        FingerprintId::new(value)
    }
}

impl fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FingerprintPool {
    words: [u64; 4],
}

/// Result of planning a backfill over members without an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackfillPlan<T> {
    pub assignments: Vec<(T, FingerprintId)>,
    /// Members left without an id because the pool ran out.
    pub remaining: usize,
}

impl FingerprintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_assigned<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = FingerprintId>,
    {
        let mut pool = Self::new();
        for id in ids {
            pool.insert(id);
        }
        pool
    }

    fn slot(id: FingerprintId) -> (usize, u64) {
        let bit = id.get() as usize;
        (bit / 64, 1u64 << (bit % 64))
    }

    pub fn contains(&self, id: FingerprintId) -> bool {
        let (word, mask) = Self::slot(id);
        self.words[word] & mask != 0
    }

    /// Marks `id` as used. Returns false if it already was.
    pub fn insert(&mut self, id: FingerprintId) -> bool {
        let (word, mask) = Self::slot(id);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    pub fn remove(&mut self, id: FingerprintId) -> bool {
        let (word, mask) = Self::slot(id);
        let was_set = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        was_set
    }

    pub fn assigned(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn available(&self) -> usize {
        POOL_CAPACITY - self.assigned()
    }

    pub fn is_exhausted(&self) -> bool {
        self.available() == 0
    }

    pub fn lowest_free(&self) -> Option<FingerprintId> {
        for (index, word) in self.words.iter().enumerate() {
            let mut free = !word;
            if index == 0 {
                // slot 0 does not exist on the scanner
                free &= !1;
            }
            if free != 0 {
                let bit = index * 64 + free.trailing_zeros() as usize;
                return Some(FingerprintId(bit as u8));
            }
        }
        None
    }

    /// Reserves the candidate if given, otherwise the lowest free id.
    pub fn reserve(
        &mut self,
        candidate: Option<FingerprintId>,
    ) -> Result<FingerprintId, FingerprintError> {
        if self.is_exhausted() {
            return Err(FingerprintError::Exhausted);
        }

        let id = match candidate {
            Some(id) if self.contains(id) => return Err(FingerprintError::Taken(id)),
            Some(id) => id,
            None => self.lowest_free().ok_or(FingerprintError::Exhausted)?,
        };

        self.insert(id);
        Ok(id)
    }

    /// Hands out the lowest free ids to `pending` in order, stopping quietly
    /// once the pool is full.
    pub fn backfill<T: Clone>(&mut self, pending: &[T]) -> BackfillPlan<T> {
        let mut assignments = Vec::with_capacity(pending.len().min(self.available()));

        for item in pending {
            match self.lowest_free() {
                Some(id) => {
                    self.insert(id);
                    assignments.push((item.clone(), id));
                }
                None => break,
            }
        }

        BackfillPlan {
            remaining: pending.len() - assignments.len(),
            assignments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Fingerprint scan token is malformed")]
    Malformed,
    #[error("Fingerprint scan token signature is invalid")]
    BadSignature,
    #[error("Fingerprint scan token was issued for {0:?}, not enrollment")]
    WrongPurpose(String),
    #[error("Fingerprint scan token was issued for ID {actual}, not {expected}")]
    WrongFingerprint {
        expected: FingerprintId,
        actual: FingerprintId,
    },
    #[error("Fingerprint scan token expired")]
    Expired,
    #[error("Invalid token signing key")]
    Key,
}

#[derive(Debug, Deserialize, Serialize)]
struct EnrollmentClaims {
    purpose: String,
    fingerprint_id: FingerprintId,
    exp: i64,
}

/// Proof that an id was free and scanned for enrollment at issue time.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnrollmentProof {
    pub fingerprint_id: FingerprintId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct EnrollmentSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl EnrollmentSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)
    }

    pub fn issue(
        &self,
        fingerprint_id: FingerprintId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentProof, TokenError> {
        let expires_at = now + self.ttl;
        let claims = EnrollmentClaims {
            purpose: ENROLLMENT_PURPOSE.to_string(),
            fingerprint_id,
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(EnrollmentProof {
            fingerprint_id,
            token: format!("{payload}.{signature}"),
            expires_at,
        })
    }

    pub fn verify(
        &self,
        token: &str,
        expected: FingerprintId,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: EnrollmentClaims =
            serde_json::from_slice(&claims).map_err(|_| TokenError::Malformed)?;

        if claims.purpose != ENROLLMENT_PURPOSE {
            return Err(TokenError::WrongPurpose(claims.purpose));
        }
        if claims.fingerprint_id != expected {
            return Err(TokenError::WrongFingerprint {
                expected,
                actual: claims.fingerprint_id,
            });
        }
        if now.timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(())
    }
}
