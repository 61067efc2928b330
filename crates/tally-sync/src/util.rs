//! Shared time helpers.
//!
//! All wire timestamps are ISO 8601 with explicit seconds precision.
//! Comparisons always happen on parsed instants, never on strings.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::{Error, Result};

/// Current wall-clock instant truncated to whole seconds, so a locally
/// stamped record compares equal after a wire round trip.
pub(crate) fn now_secs() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Format an instant for the wire.
#[must_use]
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a wire timestamp into an instant.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| Error::Decoding(format!("invalid timestamp {raw:?}: {error}")))
}
