use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use super::constants::ENCODING_SNIFF_BYTES;
use super::error::DataFileError;

/// Common interface to reading raw source files stored plain on disk or in
/// the root of a zip container.
///
/// The whole file is held in memory with NUL bytes stripped; the Terrameter's
/// logger occasionally emits them mid-line after a power cut. The text
/// encoding is sniffed from the first bytes on construction.
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    cursor: Cursor<Vec<u8>>,
    encoding: &'static Encoding,
    encoding_confidence: f32,
}

impl DataFile {
    /// Load a file into memory. If the direct parent of `path` has a `.zip`
    /// extension, the file is read out of that archive instead.
    pub fn new(path: &Path) -> Result<Self, DataFileError> {
        let parent_is_zip = path
            .parent()
            .map(|p| p.extension().is_some_and(|ext| ext == "zip"))
            .unwrap_or(false);

        let raw = if parent_is_zip {
            Self::read_zipped(path)?
        } else {
            Self::read_plain(path)?
        };

        let cleaned: Vec<u8> = raw.into_iter().filter(|b| *b != 0u8).collect();
        let (encoding, encoding_confidence) = Self::detect_encoding(&cleaned);

        Ok(Self {
            path: path.to_path_buf(),
            cursor: Cursor::new(cleaned),
            encoding,
            encoding_confidence,
        })
    }

    fn read_plain(path: &Path) -> Result<Vec<u8>, DataFileError> {
        if !path.exists() {
            return Err(DataFileError::NotFound(path.to_path_buf()));
        }
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read a file from the root of a zip container. Entries in
    /// subdirectories of the archive are not supported.
    fn read_zipped(path: &Path) -> Result<Vec<u8>, DataFileError> {
        let container = path
            .parent()
            .ok_or_else(|| DataFileError::NotFound(path.to_path_buf()))?;
        if !container.exists() {
            return Err(DataFileError::NotFound(container.to_path_buf()));
        }
        let name = path
            .file_name()
            .ok_or_else(|| DataFileError::NotFound(path.to_path_buf()))?
            .to_string_lossy()
            .into_owned();

        let mut archive = zip::ZipArchive::new(File::open(container)?)?;
        let mut entry = match archive.by_name(&name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(DataFileError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(DataFileError::ZipError(e)),
        };
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Best-effort encoding sniff over the first `ENCODING_SNIFF_BYTES` bytes.
    fn detect_encoding(data: &[u8]) -> (&'static Encoding, f32) {
        let sample = &data[..data.len().min(ENCODING_SNIFF_BYTES)];
        let mut detector = EncodingDetector::new();
        detector.feed(sample, true);
        let (encoding, definitive) = detector.guess_assess(None, true);
        let confidence = if definitive { 1.0 } else { 0.5 };
        (encoding, confidence)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn size_bytes(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn encoding_confidence(&self) -> f32 {
        self.encoding_confidence
    }

    /// Decode the buffer to text using the sniffed encoding.
    pub fn decode(&self) -> String {
        let (text, _, _) = self.encoding.decode(self.as_bytes());
        text.into_owned()
    }
}

impl Read for DataFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for DataFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_nul_bytes_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile");
        File::create(&path)
            .unwrap()
            .write_all(b"12.5;V\x00;1\x00\n")
            .unwrap();

        let datf = DataFile::new(&path).unwrap();
        assert_eq!(datf.as_bytes(), b"12.5;V;1\n");
    }

    #[test]
    fn test_missing_file() {
        let result = DataFile::new(Path::new("/no/such/file.dat"));
        assert!(matches!(result, Err(DataFileError::NotFound(_))));
    }

    #[test]
    fn test_zipped_entry() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("archive.zip");
        let file = File::create(&container).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("inner.dat", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello\x00 zip").unwrap();
        writer.finish().unwrap();

        let datf = DataFile::new(&container.join("inner.dat")).unwrap();
        assert_eq!(datf.as_bytes(), b"hello zip");

        let missing = DataFile::new(&container.join("absent.dat"));
        assert!(matches!(missing, Err(DataFileError::NotFound(_))));
    }

    #[test]
    fn test_buffer_accessor_alongside_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.dat");
        File::create(&path).unwrap().write_all(b"12.5;V;1\n").unwrap();

        // The accessor must return the raw buffer even though the type also
        // implements std::io::Read.
        let mut datf = DataFile::new(&path).unwrap();
        let mut via_read = Vec::new();
        Read::read_to_end(&mut datf, &mut via_read).unwrap();
        assert_eq!(via_read, datf.as_bytes());
    }

    #[test]
    fn test_encoding_detected_for_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ascii.dat");
        File::create(&path)
            .unwrap()
            .write_all(b"2021-06-27 10:00:00(+0000);12.5;V;1;ok\n")
            .unwrap();

        let datf = DataFile::new(&path).unwrap();
        assert!(datf.encoding_confidence() > 0.0);
        assert!(datf.decode().starts_with("2021-06-27"));
    }
}
