//! Text encoding of a chunk's record of marked positions.
//!
//! The legacy format is entries of `world,x,y,z` joined by `;`, with no header and no escaping.
//! A world name containing `,` or `;`, or starting with `v2|`, can't be represented in it.
//!
//! The escaped format is the legacy format prefixed with `v2|`, wherein `%`, `,`, and `;` in
//! world names are percent-escaped. Readers accept both, so switching a deployment to the
//! escaped format needs no migration: each chunk's record is rewritten in the new format the next
//! time it changes. A record already in the escaped format is never rewritten in the legacy one.
//!
//! Entries that don't decode are kept verbatim when a record is rewritten.
//!
//! An empty set encodes to the empty string, which callers treat as "remove the record".

use chunk_data::Position;
use std::{
    collections::HashSet,
    sync::Arc,
};
use serde::{Serialize, Deserialize};


const ESCAPED_PREFIX: &str = "v2|";
const ENTRY_DELIM: char = ';';


/// Format records are written in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// Exact legacy shape.
    #[default]
    Legacy,
    /// Versioned, with world name escaping.
    Escaped,
}

/// Result of decoding a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub positions: HashSet<Position>,
    /// Entries which failed to decode, verbatim and in record order.
    pub unparsed: Vec<String>,
    /// Whether the record was in the escaped format.
    pub escaped: bool,
}

impl Decoded {
    /// Number of entries which failed to decode.
    pub fn malformed(&self) -> u64 {
        self.unparsed.len() as u64
    }
}


/// Encode a set of positions into a record. Entries are sorted, so output is deterministic.
pub fn serialize<'a, I>(positions: I, format: RecordFormat) -> String
where
    I: IntoIterator<Item=&'a Position>,
{
    serialize_with_unparsed(positions, &[], format)
}

/// Like `serialize`, but also carry over entries from a previous decoding that weren't
/// understood. They're appended verbatim after the sorted entries.
pub fn serialize_with_unparsed<'a, I>(
    positions: I,
    unparsed: &[String],
    format: RecordFormat,
) -> String
where
    I: IntoIterator<Item=&'a Position>,
{
    let mut positions = positions.into_iter().collect::<Vec<_>>();
    positions.sort();

    let mut entries = Vec::with_capacity(positions.len() + unparsed.len());
    for pos in positions {
        match format {
            RecordFormat::Legacy => {
                if !legacy_representable(&pos.world) {
                    warn!(%pos, "world name not representable in legacy record format, not persisting");
                    continue;
                }
                entries.push(pos.to_string());
            }
            RecordFormat::Escaped => entries.push(format!(
                "{},{},{},{}",
                escape_world(&pos.world), pos.gtc.x, pos.gtc.y, pos.gtc.z,
            )),
        }
    }
    for entry in unparsed {
        // a leading one of these would make the record read back as escaped
        if format == RecordFormat::Legacy && entries.is_empty() && entry.starts_with(ESCAPED_PREFIX) {
            debug!(?entry, "dropping unparsed entry not representable in legacy record format");
            continue;
        }
        entries.push(entry.clone());
    }

    if entries.is_empty() {
        return String::new();
    }
    let mut buf = String::new();
    if format == RecordFormat::Escaped {
        buf.push_str(ESCAPED_PREFIX);
    }
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            buf.push(ENTRY_DELIM);
        }
        buf.push_str(entry);
    }
    buf
}

// the legacy format has no escaping, and a leading escaped prefix would change how it's read
fn legacy_representable(world: &str) -> bool {
    !world.contains(&[',', ';'][..]) && !world.starts_with(ESCAPED_PREFIX)
}

/// Decode a record, dropping malformed entries.
pub fn deserialize(blob: &str) -> HashSet<Position> {
    deserialize_counted(blob).positions
}

/// Decode a record, setting aside malformed entries.
pub fn deserialize_counted(blob: &str) -> Decoded {
    let (body, escaped) = match blob.strip_prefix(ESCAPED_PREFIX) {
        Some(body) => (body, true),
        None => (blob, false),
    };

    let mut decoded = Decoded { escaped, ..Default::default() };
    for entry in body.split(ENTRY_DELIM).filter(|entry| !entry.is_empty()) {
        let parsed = entry
            .parse::<Position>()
            .map_err(|e| e.to_string())
            .and_then(|pos| {
                if escaped {
                    let world = unescape_world(&pos.world)
                        .ok_or_else(|| format!("bad escape in world name {:?}", pos.world))?;
                    Ok(Position { world: Arc::from(world), ..pos })
                } else {
                    Ok(pos)
                }
            });
        match parsed {
            Ok(pos) => {
                decoded.positions.insert(pos);
            }
            Err(e) => {
                debug!(%e, ?entry, "malformed record entry");
                decoded.unparsed.push(entry.to_owned());
            }
        }
    }
    decoded
}

fn escape_world(world: &str) -> String {
    let mut buf = String::with_capacity(world.len());
    for c in world.chars() {
        match c {
            '%' => buf.push_str("%25"),
            ',' => buf.push_str("%2C"),
            ';' => buf.push_str("%3B"),
            c => buf.push(c),
        }
    }
    buf
}

fn unescape_world(world: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(world.len());
    let mut iter = world.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = (iter.next()? as char).to_digit(16)?;
            let lo = (iter.next()? as char).to_digit(16)?;
            bytes.push((hi * 16 + lo) as u8);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}
