//! Streaming extraction of raw rows from a published archive
//!
//! Each archive holds a single delimited data member whose extension is not
//! predictable (`.CNAECSV`, `.EMPRECSV`, ...). The first file member is read as
//! a stream and cut into bounded chunks:
//!
//! - `;` separated, no header row, double-quote quoting
//! - single-byte legacy encoding (decoded as windows-1252, the WHATWG
//!   decoder behind the `iso-8859-1` label)
//! - every field kept as raw text
//! - rows whose field count differs from the layout are dropped
//!
//! The stream is single-pass and pulled synchronously by the orchestrator.

use csv::ByteRecord;
use encoding_rs::WINDOWS_1252;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{IngestError, Result};

/// Default number of rows per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// A batch of raw decoded rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Zero-based position of the chunk within its archive
    pub index: usize,
    pub rows: Vec<Vec<String>>,
    /// Malformed source rows skipped while filling this chunk
    pub dropped: usize,
}

impl RawChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An opened archive with its data member located
pub struct DataArchive {
    name: String,
    member_index: usize,
    member_name: String,
    file_members: usize,
    archive: ZipArchive<BufReader<File>>,
}

impl DataArchive {
    /// Open `path` and locate its data member
    ///
    /// Only the first file member is used; any further members are ignored
    /// with a warning.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let archive_err = |message: String| IngestError::Archive {
            archive: name.clone(),
            message,
        };

        let file = File::open(path).map_err(|e| archive_err(e.to_string()))?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| archive_err(e.to_string()))?;

        let mut member = None;
        let mut file_members = 0;
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| archive_err(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            file_members += 1;
            if member.is_none() {
                member = Some((index, entry.name().to_string()));
            }
        }

        let (member_index, member_name) =
            member.ok_or_else(|| IngestError::EmptyArchive(name.clone()))?;

        if file_members > 1 {
            warn!(
                arquivo = %name,
                members = file_members,
                used = %member_name,
                "Archive has more than one member; only the first data member is loaded"
            );
        }

        debug!(arquivo = %name, member = %member_name, "Located data member");

        Ok(Self {
            name,
            member_index,
            member_name,
            file_members,
            archive,
        })
    }

    /// File name of the archive itself
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the member being streamed
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// Number of file members, directory entries excluded
    pub fn file_members(&self) -> usize {
        self.file_members
    }

    /// Stream the data member as chunks of rows exactly `width` fields wide
    pub fn chunks(
        &mut self,
        width: usize,
        chunk_size: usize,
    ) -> Result<ChunkStream<impl Read + '_>> {
        let name = self.name.clone();
        let member = self
            .archive
            .by_index(self.member_index)
            .map_err(|e| IngestError::Archive {
                archive: name.clone(),
                message: e.to_string(),
            })?;

        Ok(ChunkStream::new(member, name, width, chunk_size))
    }
}

/// Lazy, finite sequence of [`RawChunk`]s read from one data member
///
/// An IO or decompression failure ends the sequence: rows already read into
/// the current chunk are yielded first, then the error, then `None`.
pub struct ChunkStream<R: Read> {
    reader: csv::Reader<R>,
    record: ByteRecord,
    archive: String,
    width: usize,
    chunk_size: usize,
    next_index: usize,
    dropped_total: usize,
    pending_error: Option<IngestError>,
    finished: bool,
}

impl<R: Read> ChunkStream<R> {
    /// Wrap any reader producing the delimited record format
    pub fn new(source: R, archive: impl Into<String>, width: usize, chunk_size: usize) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(source);

        Self {
            reader,
            record: ByteRecord::new(),
            archive: archive.into(),
            width,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            dropped_total: 0,
            pending_error: None,
            finished: false,
        }
    }

    /// Malformed rows skipped so far across all chunks
    pub fn dropped_rows(&self) -> usize {
        self.dropped_total
    }

    fn decode_record(record: &ByteRecord) -> Vec<String> {
        record
            .iter()
            .map(|field| WINDOWS_1252.decode_without_bom_handling(field).0.into_owned())
            .collect()
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }
        if self.finished {
            return None;
        }

        let mut rows = Vec::with_capacity(self.chunk_size.min(8192));
        let mut dropped = 0;

        while rows.len() < self.chunk_size {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(true) => {
                    if self.record.len() == self.width {
                        rows.push(Self::decode_record(&self.record));
                    } else {
                        dropped += 1;
                        debug!(
                            arquivo = %self.archive,
                            fields = self.record.len(),
                            expected = self.width,
                            line = self.record.position().map(|p| p.line()),
                            "Skipping malformed row"
                        );
                    }
                },
                Ok(false) => {
                    self.finished = true;
                    break;
                },
                Err(e) => {
                    self.finished = true;
                    let err = IngestError::Decode {
                        archive: self.archive.clone(),
                        message: e.to_string(),
                    };
                    if rows.is_empty() {
                        self.dropped_total += dropped;
                        return Some(Err(err));
                    }
                    self.pending_error = Some(err);
                    break;
                },
            }
        }

        self.dropped_total += dropped;

        if rows.is_empty() {
            return None;
        }

        let chunk = RawChunk {
            index: self.next_index,
            rows,
            dropped,
        };
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    /// Yields `data` and then fails every read
    struct FailAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "boom")),
                n => Ok(n),
            }
        }
    }

    fn stream(data: &[u8], width: usize, chunk_size: usize) -> ChunkStream<Cursor<Vec<u8>>> {
        ChunkStream::new(Cursor::new(data.to_vec()), "test.zip", width, chunk_size)
    }

    #[test]
    fn test_chunks_are_bounded_and_ordered() {
        let data = b"\"01\";\"A\"\n\"02\";\"B\"\n\"03\";\"C\"\n\"04\";\"D\"\n\"05\";\"E\"\n";
        let chunks: Vec<_> = stream(data, 2, 2).map(|c| c.unwrap()).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].rows, vec![vec!["01", "A"], vec!["02", "B"]]);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunks[2].rows, vec![vec!["05", "E"]]);
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let data = b"\"01\";\"A\"\n\"02\";\"B\";\"extra\"\n\"03\"\n\"04\";\"D\"\n";
        let mut s = stream(data, 2, 10);
        let chunk = s.next().unwrap().unwrap();

        assert_eq!(chunk.rows, vec![vec!["01", "A"], vec!["04", "D"]]);
        assert_eq!(chunk.dropped, 2);
        assert!(s.next().is_none());
        assert_eq!(s.dropped_rows(), 2);
    }

    #[test]
    fn test_legacy_encoding_is_decoded() {
        // "SÃO PAULO" in latin-1
        let data = b"\"7107\";\"S\xc3O PAULO\"\n";
        let chunk = stream(data, 2, 10).next().unwrap().unwrap();
        assert_eq!(chunk.rows[0][1], "S\u{c3}O PAULO");
    }

    #[test]
    fn test_fields_stay_raw_text() {
        let data = b"\"0001\";\"  00000000 \"\n";
        let chunk = stream(data, 2, 10).next().unwrap().unwrap();
        assert_eq!(chunk.rows[0], vec!["0001", "  00000000 "]);
    }

    #[test]
    fn test_empty_member_yields_nothing() {
        assert!(stream(b"", 2, 10).next().is_none());
    }

    #[test]
    fn test_read_failure_yields_partial_chunk_then_error() {
        let source = FailAfter {
            data: Cursor::new(b"\"01\";\"A\"\n\"02\";\"B\"\n\"03\";\"C".to_vec()),
        };
        let mut s = ChunkStream::new(source, "x.zip", 2, 10);

        let chunk = s.next().unwrap().unwrap();
        assert_eq!(chunk.rows, vec![vec!["01", "A"], vec!["02", "B"]]);

        let err = s.next().unwrap().unwrap_err();
        assert!(matches!(err, IngestError::Decode { ref archive, .. } if archive == "x.zip"));
        assert!(err.to_string().contains("boom"));

        assert!(s.next().is_none());
    }

    #[test]
    fn test_read_failure_at_chunk_boundary_yields_error_next() {
        let source = FailAfter {
            data: Cursor::new(b"\"01\";\"A\"\n\"02\";\"B\"\n".to_vec()),
        };
        let mut s = ChunkStream::new(source, "x.zip", 2, 2);

        assert_eq!(s.next().unwrap().unwrap().len(), 2);
        assert!(matches!(s.next(), Some(Err(IngestError::Decode { .. }))));
        assert!(s.next().is_none());
    }

    #[test]
    fn test_directory_entries_are_not_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Municipios.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("dados/", options).unwrap();
        writer.start_file("dados/F.K03200$Z.D50614.MUNICCSV", options).unwrap();
        writer.write_all(b"\"7107\";\"SAO PAULO\"\n").unwrap();
        writer.finish().unwrap();

        let archive = DataArchive::open(&path).unwrap();
        assert_eq!(archive.member_name(), "dados/F.K03200$Z.D50614.MUNICCSV");
        assert_eq!(archive.file_members(), 1);
    }

    #[test]
    fn test_open_zip_reads_first_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cnaes.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("F.K03200$Z.D50614.CNAECSV", options).unwrap();
        writer.write_all(b"\"0111301\";\"Cultivo de arroz\"\n").unwrap();
        writer.start_file("ignored.txt", options).unwrap();
        writer.write_all(b"noise").unwrap();
        writer.finish().unwrap();

        let mut archive = DataArchive::open(&path).unwrap();
        assert_eq!(archive.name(), "Cnaes.zip");
        assert_eq!(archive.member_name(), "F.K03200$Z.D50614.CNAECSV");
        assert_eq!(archive.file_members(), 2);

        let chunks: Vec<_> = archive.chunks(2, 10).unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].rows[0], vec!["0111301", "Cultivo de arroz"]);
    }

    #[test]
    fn test_open_empty_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Paises.zip");
        zip::ZipWriter::new(File::create(&path).unwrap()).finish().unwrap();

        assert!(matches!(
            DataArchive::open(&path),
            Err(IngestError::EmptyArchive(name)) if name == "Paises.zip"
        ));
    }

    #[test]
    fn test_open_garbage_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Motivos.zip");
        std::fs::write(&path, b"not a zip file").unwrap();

        assert!(matches!(DataArchive::open(&path), Err(IngestError::Archive { .. })));
    }
}
