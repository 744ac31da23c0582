use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Number of `:`-separated fields a segment may carry.
const MAX_FIELDS: usize = 5;

/// How an instruction takes part in internal function calls.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum JumpType {
    /// Jump into a function.
    #[serde(rename = "i")]
    In,
    /// Return out of a function.
    #[serde(rename = "o")]
    Out,
    #[default]
    #[serde(rename = "-")]
    Regular,
}

impl JumpType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::In => "i",
            Self::Out => "o",
            Self::Regular => "-",
        }
    }

    pub const fn description(&self) -> &'static str {
        match self {
            Self::In => "jump_into_function",
            Self::Out => "jump_out_of_function",
            Self::Regular => "regular_instruction",
        }
    }
}

impl Display for JumpType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JumpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" => Ok(Self::In),
            "o" => Ok(Self::Out),
            "-" => Ok(Self::Regular),
            other => Err(format!("unknown jump type `{other}`")),
        }
    }
}

/// A fully resolved source map entry, describing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// Byte offset of the source range, `-1` when the compiler knows no location.
    pub start: i32,
    /// Byte length of the source range, `-1` when the compiler knows no location.
    pub length: i32,
    /// Source id of the file, `-1` when the instruction has no source.
    pub file_index: i32,
    pub jump_type: JumpType,
    pub modifier_depth: u32,
}

impl SourceMapEntry {
    /// Returns `true` if the entry points at a byte range of a source file.
    pub const fn has_source(&self) -> bool {
        self.file_index >= 0 && self.start >= 0 && self.length >= 0
    }

    /// Exclusive end offset of the source range. Entries without a location end at 0.
    pub const fn end(&self) -> usize {
        if self.start < 0 || self.length < 0 {
            return 0;
        }
        self.start as usize + self.length as usize
    }
}

/// The fields a single segment spells out. `None` means "same as the previous entry".
#[derive(Debug, Default)]
struct Segment {
    start: Option<i32>,
    length: Option<i32>,
    file_index: Option<i32>,
    jump_type: Option<JumpType>,
    modifier_depth: Option<u32>,
}

impl Segment {
    fn parse(index: usize, raw: &str) -> Result<Self, DecodeError> {
        let malformed = |reason: String| DecodeError::MalformedMap { segment: index, reason };

        let fields: Vec<&str> = raw.split(':').collect();
        if fields.len() > MAX_FIELDS {
            return Err(malformed(format!(
                "expected at most {MAX_FIELDS} fields, found {} in `{raw}`",
                fields.len()
            )));
        }

        fn field<T: FromStr>(
            fields: &[&str],
            at: usize,
            name: &str,
        ) -> Result<Option<T>, String> {
            match fields.get(at) {
                None | Some(&"") => Ok(None),
                Some(value) => value
                    .parse()
                    .map(Some)
                    .map_err(|_| format!("invalid {name} `{value}`")),
            }
        }

        // `-1` is the only negative value solc writes, for "no location" or "no file".
        let signed = |at: usize, name: &str| -> Result<Option<i32>, DecodeError> {
            let value: Option<i32> = field(&fields, at, name).map_err(malformed)?;
            match value {
                Some(v) if v < -1 => Err(malformed(format!("invalid {name} `{v}`"))),
                value => Ok(value),
            }
        };

        Ok(Self {
            start: signed(0, "start offset")?,
            length: signed(1, "length")?,
            file_index: signed(2, "file index")?,
            jump_type: match fields.get(3) {
                None | Some(&"") => None,
                Some(value) => Some(value.parse().map_err(malformed)?),
            },
            modifier_depth: field(&fields, 4, "modifier depth").map_err(malformed)?,
        })
    }

    /// Fills the omitted fields from `prev`. Without a previous entry, every field but the
    /// modifier depth must be present.
    fn resolve(
        self,
        index: usize,
        prev: Option<&SourceMapEntry>,
    ) -> Result<SourceMapEntry, DecodeError> {
        let missing = |name: &str| DecodeError::MalformedMap {
            segment: index,
            reason: format!("the first segment must specify the {name}"),
        };

        match prev {
            Some(prev) => Ok(SourceMapEntry {
                start: self.start.unwrap_or(prev.start),
                length: self.length.unwrap_or(prev.length),
                file_index: self.file_index.unwrap_or(prev.file_index),
                jump_type: self.jump_type.unwrap_or(prev.jump_type),
                modifier_depth: self.modifier_depth.unwrap_or(prev.modifier_depth),
            }),
            None => Ok(SourceMapEntry {
                start: self.start.ok_or_else(|| missing("start offset"))?,
                length: self.length.ok_or_else(|| missing("length"))?,
                file_index: self.file_index.ok_or_else(|| missing("file index"))?,
                jump_type: self.jump_type.ok_or_else(|| missing("jump type"))?,
                // Compilers before 0.6 never emit the modifier depth.
                modifier_depth: self.modifier_depth.unwrap_or_default(),
            }),
        }
    }
}

/// A decoded source map: one entry per instruction of the bytecode it was emitted for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    /// Decodes the compact `start:length:file:jump:modifier;...` form.
    pub fn parse(map: &str) -> Result<Self, DecodeError> {
        let map = map.trim();
        if map.is_empty() {
            return Ok(Self::default());
        }

        let entries = map.split(';').enumerate().try_fold(
            Vec::new(),
            |mut entries: Vec<SourceMapEntry>, (index, raw)| {
                let entry = Segment::parse(index, raw)?.resolve(index, entries.last())?;
                entries.push(entry);
                Ok::<_, DecodeError>(entries)
            },
        )?;

        trace!(entries = entries.len(), "decoded source map");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SourceMapEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceMapEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that the map has exactly one entry per instruction.
    pub fn check_instruction_count(&self, instructions: usize) -> Result<(), DecodeError> {
        if self.entries.len() != instructions {
            return Err(DecodeError::CountMismatch { instructions, entries: self.entries.len() });
        }
        Ok(())
    }

    /// Encodes the entries back into the compact form, omitting every field that equals the
    /// one of the previous entry.
    pub fn to_compact(&self) -> String {
        let mut prev: Option<&SourceMapEntry> = None;
        let mut segments = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let differs = |same: fn(&SourceMapEntry, &SourceMapEntry) -> bool| {
                prev.map_or(true, |prev| !same(prev, entry))
            };

            let mut fields = vec![
                if differs(|a, b| a.start == b.start) { entry.start.to_string() } else { String::new() },
                if differs(|a, b| a.length == b.length) {
                    entry.length.to_string()
                } else {
                    String::new()
                },
                if differs(|a, b| a.file_index == b.file_index) {
                    entry.file_index.to_string()
                } else {
                    String::new()
                },
                if differs(|a, b| a.jump_type == b.jump_type) {
                    entry.jump_type.to_string()
                } else {
                    String::new()
                },
                match prev {
                    Some(prev) if prev.modifier_depth == entry.modifier_depth => String::new(),
                    None if entry.modifier_depth == 0 => String::new(),
                    _ => entry.modifier_depth.to_string(),
                },
            ];
            while fields.last().is_some_and(String::is_empty) {
                fields.pop();
            }

            segments.push(fields.join(":"));
            prev = Some(entry);
        }

        segments.join(";")
    }
}

impl FromStr for SourceMap {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromIterator<SourceMapEntry> for SourceMap {
    fn from_iter<I: IntoIterator<Item = SourceMapEntry>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}
