//! Websafe pagination cursors.
//!
//! A cursor is a small CBOR document encoded with URL-safe base64 (no
//! padding). The first field is the format version so that a cursor minted
//! by a different build is rejected instead of being misread.
//!
//! # Invariants
//!
//! - A cursor is opaque to clients.
//! - Decoding rejects any format version other than [`CURSOR_FORMAT_VERSION`].

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Current cursor format version.
pub const CURSOR_FORMAT_VERSION: u8 = 1;

/// Which listing a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Rows changed since a dataETag.
    RowsSince,
    /// Rows of one changeset.
    ChangeSetRows,
    /// Every row of a table.
    AllRows,
}

/// A position in `(sequence value, row id)` order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Commit sequence of the row's last modification.
    pub sequence_value: u64,
    /// Row identifier.
    pub row_id: String,
}

impl Position {
    /// Creates a position.
    pub fn new(sequence_value: u64, row_id: impl Into<String>) -> Self {
        Self {
            sequence_value,
            row_id: row_id.into(),
        }
    }
}

/// A decoded pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Listing the cursor belongs to.
    pub kind: CursorKind,
    /// Request anchor (the dataETag the listing was asked for), if any.
    pub anchor: Option<String>,
    /// Last position already delivered; `None` means the start.
    pub after: Option<Position>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    kind: CursorKind,
    #[serde(default)]
    anchor: Option<String>,
    #[serde(default)]
    after: Option<Position>,
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u8,
}

impl Cursor {
    /// Creates a cursor at the start of a listing.
    pub fn start(kind: CursorKind, anchor: Option<String>) -> Self {
        Self {
            kind,
            anchor,
            after: None,
        }
    }

    /// Returns a cursor for the same listing resuming after `position`.
    pub fn resume_after(&self, position: Position) -> Self {
        Self {
            kind: self.kind,
            anchor: self.anchor.clone(),
            after: Some(position),
        }
    }

    /// Encodes the cursor as a websafe string.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Encoding` if CBOR serialization fails.
    pub fn encode(&self) -> ProtocolResult<String> {
        let envelope = Envelope {
            v: CURSOR_FORMAT_VERSION,
            kind: self.kind,
            anchor: self.anchor.clone(),
            after: self.after.clone(),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&envelope, &mut buf)
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(buf))
    }

    /// Decodes a websafe cursor string.
    ///
    /// # Errors
    ///
    /// - `UnsupportedCursorVersion` if the cursor carries another format version
    /// - `MalformedCursor` for anything that is not a cursor
    pub fn decode(encoded: &str) -> ProtocolResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| ProtocolError::MalformedCursor(e.to_string()))?;

        let probe: VersionProbe = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| ProtocolError::MalformedCursor(e.to_string()))?;
        if probe.v != CURSOR_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedCursorVersion {
                found: probe.v,
                expected: CURSOR_FORMAT_VERSION,
            });
        }

        let envelope: Envelope = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| ProtocolError::MalformedCursor(e.to_string()))?;
        Ok(Self {
            kind: envelope.kind,
            anchor: envelope.anchor,
            after: envelope.after,
        })
    }
}
