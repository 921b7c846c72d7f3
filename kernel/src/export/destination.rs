//! Output files for exports, gzip-compressed when the path ends in `.gz`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::PitrResult;

/// Whether exports to `path` are gzip-compressed. This looks at the name only, never the content.
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// An open export file. Dropping it closes the file; [`Destination::finish`] also reports errors
/// from the final flush.
pub(crate) enum Destination {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Destination {
    pub(crate) fn create(path: &Path) -> PitrResult<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if is_gzip_path(path) {
            Self::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Self::Plain(file)
        })
    }

    pub(crate) fn finish(self) -> PitrResult<()> {
        let mut file = match self {
            Self::Plain(file) => file,
            Self::Gzip(encoder) => encoder.finish()?,
        };
        file.flush()?;
        Ok(())
    }
}

impl Write for Destination {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(file) => file.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(file) => file.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    #[test]
    fn test_gzip_by_suffix() {
        assert!(is_gzip_path(&PathBuf::from("/tmp/export.csv.gz")));
        assert!(is_gzip_path(&PathBuf::from("export.gz")));
        assert!(!is_gzip_path(&PathBuf::from("export.csv")));
        assert!(!is_gzip_path(&PathBuf::from("export.gzip")));
        assert!(!is_gzip_path(&PathBuf::from("gz")));
    }
}
