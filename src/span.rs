/// A source location inside a textual HIR file: file ID + byte offset range.
///
/// Sequence points carry these through lowering unchanged so the backend
/// can map bytecode offsets back to source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub file_id: u16,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u16, start: u32, end: u32) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    pub fn dummy() -> Self {
        Self {
            file_id: 0,
            start: 0,
            end: 0,
        }
    }

    /// A zero-width span, used for end-of-input diagnostics.
    pub fn point(file_id: u16, at: u32) -> Self {
        Self {
            file_id,
            start: at,
            end: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_is_zero_width() {
        let p = Span::point(1, 37);
        assert_eq!(p.file_id, 1);
        assert_eq!(p.start, p.end);
    }
}
