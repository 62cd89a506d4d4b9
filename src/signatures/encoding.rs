//! Conversions between `der` types and the crate's own representations.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use der::asn1::{Any, GeneralizedTime, ObjectIdentifier, UtcTime};
use der::{Decode, DecodeOwned, Encode, Reader, SliceReader, Tag};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::time::Time;

/// Parse a dotted OID.
pub(crate) fn object_id(dotted: &str) -> Result<ObjectIdentifier> {
    ObjectIdentifier::new(dotted).map_err(|e| Error::Asn1(format!("bad OID {}: {}", dotted, e)))
}

/// `AlgorithmIdentifier` for `oid`, with NULL parameters when `null_params`.
pub(crate) fn algorithm(oid: ObjectIdentifier, null_params: bool) -> Result<AlgorithmIdentifierOwned> {
    let parameters = if null_params {
        Some(Any::new(Tag::Null, Vec::<u8>::new())?)
    } else {
        None
    };
    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

/// Digest `AlgorithmIdentifier`; SHA-2 parameters are absent.
pub(crate) fn digest_algorithm(digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
    algorithm(object_id(digest.oid())?, false)
}

/// `sha*WithRSAEncryption` with NULL parameters.
pub(crate) fn rsa_signature_algorithm(digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
    algorithm(object_id(digest.rsa_signature_oid())?, true)
}

/// The digest named by an `AlgorithmIdentifier`, if supported.
pub(crate) fn digest_of(alg: &AlgorithmIdentifierOwned) -> Option<DigestAlgorithm> {
    DigestAlgorithm::from_oid(&alg.oid.to_string())
}

/// Decode one `T` from the start of `der`. Zero bytes after it (placeholder
/// padding) are accepted, anything else is an error.
pub(crate) fn decode_padded<'a, T: Decode<'a>>(der: &'a [u8]) -> Result<T> {
    let mut reader = SliceReader::new(der)?;
    let value = T::decode(&mut reader)?;
    let left = reader.remaining_len();
    let rest = reader.read_slice(left)?;
    if rest.iter().any(|&b| b != 0) {
        return Err(Error::Asn1(format!("{} unexpected bytes after the structure", rest.len())));
    }
    Ok(value)
}

/// Wrap an encodable value as `ANY`.
pub(crate) fn to_any<T: Encode>(value: &T) -> Result<Any> {
    Ok(Any::from_der(&value.to_der()?)?)
}

/// Decode an `ANY` as `T`.
pub(crate) fn from_any<T: DecodeOwned>(any: &Any) -> Result<T> {
    Ok(T::from_der(&any.to_der()?)?)
}

fn unix(t: &DateTime<Utc>) -> Result<Duration> {
    u64::try_from(t.timestamp())
        .map(Duration::from_secs)
        .map_err(|_| Error::Asn1(format!("time {} before 1970", t)))
}

/// Seconds since the epoch as a UTC time.
pub(crate) fn datetime(since_epoch: Duration) -> Result<DateTime<Utc>> {
    i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| Error::Asn1("time out of range".to_string()))
}

/// `GeneralizedTime` with whole seconds.
pub(crate) fn generalized_time(t: &DateTime<Utc>) -> Result<GeneralizedTime> {
    Ok(GeneralizedTime::from_unix_duration(unix(t)?)?)
}

/// X.509 `Time`: UTCTime through 2049, GeneralizedTime after.
pub(crate) fn x509_time(t: &DateTime<Utc>) -> Result<Time> {
    let since_epoch = unix(t)?;
    if t.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

/// Convert an X.509 `Time`.
pub(crate) fn from_x509_time(t: &Time) -> Result<DateTime<Utc>> {
    datetime(t.to_unix_duration())
}
