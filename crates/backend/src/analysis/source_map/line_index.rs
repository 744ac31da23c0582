/// Newline offsets of a source file, for turning byte offsets into line/column positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineIndex {
    newlines: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let newlines = content
            .bytes()
            .enumerate()
            .filter_map(|(offset, byte)| (byte == b'\n').then_some(offset))
            .collect();
        Self { newlines, len: content.len() }
    }

    /// Returns the 1-based `(line, column)` of a byte offset. Columns count bytes.
    ///
    /// `offset == len` is allowed so that exclusive span ends can be resolved.
    pub fn position(&self, offset: usize) -> Option<(usize, usize)> {
        if offset > self.len {
            return None;
        }

        let line = self.newlines.partition_point(|&newline| newline < offset);
        let line_start = if line == 0 { 0 } else { self.newlines[line - 1] + 1 };
        Some((line + 1, offset - line_start + 1))
    }

    pub fn line_count(&self) -> usize {
        self.newlines.len() + 1
    }

    /// Length of the indexed content in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
