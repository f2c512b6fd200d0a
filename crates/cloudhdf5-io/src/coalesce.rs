//! Merging nearby byte ranges into fewer requests.

/// A requested byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }
}

/// One request covering several input ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRange {
    pub offset: u64,
    pub len: u64,
    /// Indices into the planned input slice, in offset order.
    pub parts: Vec<usize>,
}

impl MergedRange {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Cut the bytes of this merged request back into its parts; `None`
    /// when `bytes` does not cover every part.
    pub fn split(&self, bytes: &[u8], ranges: &[ByteRange]) -> Option<Vec<(usize, Vec<u8>)>> {
        self.parts
            .iter()
            .map(|&i| {
                let r = ranges.get(i)?;
                let start = usize::try_from(r.offset.checked_sub(self.offset)?).ok()?;
                let part = bytes.get(start..start.checked_add(usize::try_from(r.len).ok()?)?)?;
                Some((i, part.to_vec()))
            })
            .collect()
    }
}

/// Group `ranges` into requests.
///
/// Two ranges share a request when the gap between them is at most `gap`
/// bytes (overlaps count as no gap) and the merged span stays within
/// `max_span`. A single range larger than `max_span` is never split.
pub fn plan(ranges: &[ByteRange], gap: u64, max_span: u64) -> Vec<MergedRange> {
    let mut order: Vec<usize> = (0..ranges.len()).collect();
    order.sort_by_key(|&i| (ranges[i].offset, ranges[i].len));

    let mut out: Vec<MergedRange> = Vec::new();
    for i in order {
        let r = ranges[i];
        if let Some(cur) = out.last_mut() {
            let new_end = cur.end().max(r.end());
            let close = r.offset <= cur.end().saturating_add(gap);
            if close && new_end - cur.offset <= max_span {
                cur.len = new_end - cur.offset;
                cur.parts.push(i);
                continue;
            }
        }
        out.push(MergedRange {
            offset: r.offset,
            len: r.len,
            parts: vec![i],
        });
    }
    out
}
