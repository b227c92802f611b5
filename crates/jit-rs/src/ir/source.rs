use std::fmt;
use std::sync::Arc;

/// Byte range into a shared source buffer, used for diagnostics.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceRange {
    source: Arc<str>,
    start: usize,
    end: usize,
}

impl SourceRange {
    pub fn new(source: Arc<str>, start: usize, end: usize) -> Self {
        assert!(
            start <= end && end <= source.len(),
            "source range {start}..{end} out of bounds for {} bytes",
            source.len()
        );
        SourceRange { source, start, end }
    }

    /// Range covering the whole of `label`, for locations that are not script text.
    pub fn from_label(label: impl Into<String>) -> Self {
        let source: Arc<str> = Arc::from(label.into());
        let end = source.len();
        SourceRange::new(source, 0, end)
    }

    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.source[self.start..self.end]
    }

    /// Smallest range covering both `self` and `other`.
    pub fn merge(&self, other: &SourceRange) -> SourceRange {
        SourceRange::new(
            Arc::clone(&self.source),
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }

    /// One-based line and column of the range start.
    pub fn line_col(&self) -> (usize, usize) {
        let before = &self.source[..self.start];
        let line = before.matches('\n').count() + 1;
        let col = match before.rfind('\n') {
            Some(pos) => self.start - pos,
            None => self.start + 1,
        };
        (line, col)
    }
}

impl fmt::Debug for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (line, col) = self.line_col();
        write!(f, "SourceRange({line}:{col} {:?})", self.text())
    }
}

/// Renders the line containing the range with a `~~~` marker beneath it.
impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line_start = self.source[..self.start].rfind('\n').map_or(0, |p| p + 1);
        let line_end = self.source[self.start..]
            .find('\n')
            .map_or(self.source.len(), |p| self.start + p);
        let (line, col) = self.line_col();
        writeln!(f, "at {line}:{col}:")?;
        writeln!(f, "{}", &self.source[line_start..line_end])?;
        let width = self.end.min(line_end).saturating_sub(self.start).max(1);
        write!(
            f,
            "{}{}",
            " ".repeat(self.start - line_start),
            "~".repeat(width)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_range_on_its_line() {
        let src: Arc<str> = Arc::from("def f(x):\n  return y\n");
        let start = src.find('y').expect("y present");
        let range = SourceRange::new(src, start, start + 1);
        assert_eq!(range.line_col(), (2, 10));
        let rendered = range.to_string();
        assert!(rendered.contains("  return y\n         ~"), "{rendered}");
    }
}
