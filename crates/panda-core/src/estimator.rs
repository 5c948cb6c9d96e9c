//! Job-size estimation for priority scheduling.
//!
//! A metric turns a source file into a scalar used to order the priority
//! worklist. Reading is best-effort: a file that cannot be read estimates to
//! zero and scheduling proceeds.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

/// Scalar measure taken over a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMetric {
    /// Number of newline bytes.
    Loc,
    /// Number of `;` bytes.
    Semicolon,
    /// Number of `,` bytes.
    Comma,
}

impl SizeMetric {
    const fn delimiter(self) -> u8 {
        match self {
            Self::Loc => b'\n',
            Self::Semicolon => b';',
            Self::Comma => b',',
        }
    }

    /// Measure `path`. I/O errors count as zero.
    #[must_use]
    pub fn measure(self, path: &Path) -> u64 {
        match fs::read(path) {
            Ok(bytes) => {
                let delimiter = self.delimiter();
                bytes.iter().filter(|&&b| b == delimiter).count() as u64
            },
            Err(error) => {
                debug!(path = %path.display(), %error, "size estimation failed, using 0");
                0
            },
        }
    }
}

impl FromStr for SizeMetric {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "loc" => Ok(Self::Loc),
            "semicolon" => Ok(Self::Semicolon),
            "comma" => Ok(Self::Comma),
            other => Err(format!("unknown job-size metric `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_metrics_count_their_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.c");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "int a, b;\nint c;\n").unwrap();

        assert_eq!(SizeMetric::Loc.measure(&path), 2);
        assert_eq!(SizeMetric::Semicolon.measure(&path), 2);
        assert_eq!(SizeMetric::Comma.measure(&path), 1);
    }

    #[test]
    fn test_unreadable_file_measures_zero() {
        assert_eq!(
            SizeMetric::Loc.measure(Path::new("/nonexistent/file.c")),
            0
        );
    }

    #[test]
    fn test_metric_names() {
        assert_eq!("loc".parse::<SizeMetric>().unwrap(), SizeMetric::Loc);
        assert_eq!(
            "semicolon".parse::<SizeMetric>().unwrap(),
            SizeMetric::Semicolon
        );
        assert_eq!("comma".parse::<SizeMetric>().unwrap(), SizeMetric::Comma);
        assert!("bytes".parse::<SizeMetric>().is_err());
    }
}
