//! The local, append-only, framed-and-compressed entries archive (§3, §4.3).
//!
//! A record on disk is `outer_length: u32 LE` followed by that many bytes of
//! a DEFLATE stream ([`crate::entry::RawEntry::to_compressed`]). The file is
//! always a concatenation of complete records; [`Archive::scan`] is the one
//! place that tolerates (and reports) a trailing partial record.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as stdmpsc;
use std::sync::{Arc, Mutex};

use crate::entry::RawEntry;
use crate::Error;

/// A parsed entry plus the byte offset at which its outer frame begins.
/// Produced by [`Archive::map`]; read-only to callers.
#[derive(Debug, Clone)]
pub struct EntryAndPosition {
    pub entry: RawEntry,
    pub position: u64,
    pub index: u64,
}

/// The result of scanning an archive from the start: how many complete
/// records it holds, the byte offset just past the last complete one, and
/// whether a trailing partial record follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub count: u64,
    pub end_offset: u64,
    pub truncated: bool,
}

/// A single writable, seekable archive file. Exclusively owned for the
/// duration of one operation (append, count, map, or sequential iteration);
/// callers must not interleave operations from multiple threads.
pub struct Archive {
    file: File,
    path: PathBuf,
}

impl Archive {
    /// Open (creating if necessary) the archive file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::FileIO(path.clone(), e))?;
        Ok(Archive { file, path })
    }

    /// Append one entry to the end of the archive.
    pub fn append(&mut self, entry: &RawEntry) -> Result<(), Error> {
        let compressed = entry.to_compressed()?;
        self.file
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        self.file
            .write_all(&(compressed.len() as u32).to_le_bytes())
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        self.file
            .write_all(&compressed)
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        Ok(())
    }

    /// Scan the file from offset 0, counting complete records without fully
    /// decompressing each one: read the outer length, skip that many bytes,
    /// repeat. A short read of either the length prefix or the body is
    /// reported as a truncated trailing record rather than an error.
    pub fn scan(&mut self) -> Result<ScanResult, Error> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;

        let mut count = 0u64;
        let mut offset = 0u64;
        loop {
            let mut len_buf = [0u8; 4];
            match read_exact_or_short(&mut self.file, &mut len_buf)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Short => {
                    return Ok(ScanResult {
                        count,
                        end_offset: offset,
                        truncated: true,
                    })
                }
                ReadOutcome::Full => {}
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            let mut body = vec![0u8; len as usize];
            match read_exact_or_short(&mut self.file, &mut body)? {
                ReadOutcome::Full => {
                    count += 1;
                    offset += 4 + len;
                }
                ReadOutcome::Short | ReadOutcome::Eof => {
                    return Ok(ScanResult {
                        count,
                        end_offset: offset,
                        truncated: true,
                    })
                }
            }
        }
        Ok(ScanResult {
            count,
            end_offset: offset,
            truncated: false,
        })
    }

    /// Convenience wrapper around [`Self::scan`] for callers that only need
    /// the count (e.g. the sync orchestrator's "how much do I already have").
    pub fn count(&mut self) -> Result<u64, Error> {
        Ok(self.scan()?.count)
    }

    /// Truncate the file to `offset`, discarding any trailing partial
    /// record. Used by the sync orchestrator to recover from a crash mid-append
    /// (§7, §9) before resuming a download.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), Error> {
        self.file
            .set_len(offset)
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        Ok(())
    }

    /// Fan record decoding out to `workers` threads (defaulting to the
    /// logical CPU count). A single reader thread walks the file
    /// sequentially and ships each compressed blob, with its starting
    /// offset and log-index ordinal, onto a bounded work queue; the workers
    /// decompress, parse, and invoke `visitor`. No ordering is guaranteed
    /// across workers (`EntryAndPosition::position` lets the visitor
    /// recover absolute position). A per-record decode error is delivered to
    /// the visitor with no entry; it does not abort the scan.
    pub fn map<F>(&self, workers: Option<usize>, visitor: F) -> Result<(), Error>
    where
        F: Fn(Option<EntryAndPosition>, Option<Error>) + Sync,
    {
        let worker_count = workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
            .max(1);

        let mut reader = self
            .file
            .try_clone()
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;

        let (tx, rx) = stdmpsc::sync_channel::<WorkItem>(worker_count * 4);
        let rx = Arc::new(Mutex::new(rx));
        let path = self.path.clone();

        let reader_result = std::thread::scope(|scope| {
            scope.spawn(move || reader_loop(reader, tx));

            let mut handles = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                let rx = Arc::clone(&rx);
                let visitor = &visitor;
                handles.push(scope.spawn(move || {
                    worker_loop(rx, visitor);
                }));
            }
            for h in handles {
                let _ = h.join();
            }
        });
        let _ = reader_result;
        let _ = path;
        Ok(())
    }

    /// A serial variant that yields records in-order, required because tree
    /// hashing is position-sensitive.
    pub fn iter(&self) -> Result<ArchiveIter, Error> {
        let mut file = File::open(&self.path).map_err(|e| Error::FileIO(self.path.clone(), e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        Ok(ArchiveIter {
            file,
            path: self.path.clone(),
            index: 0,
            done: false,
        })
    }
}

enum WorkItem {
    Record { index: u64, offset: u64, data: Vec<u8> },
}

enum ReadOutcome {
    Full,
    Short,
    Eof,
}

/// Reads exactly `buf.len()` bytes, distinguishing "clean EOF before any
/// byte was read" from "EOF partway through" (a truncated trailing record).
fn read_exact_or_short(mut r: impl Read, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
    let mut total = 0;
    while total < buf.len() {
        let n = r
            .read(&mut buf[total..])
            .map_err(|e| Error::ArchiveCorrupt(format!("reading archive: {}", e)))?;
        if n == 0 {
            return Ok(if total == 0 { ReadOutcome::Eof } else { ReadOutcome::Short });
        }
        total += n;
    }
    Ok(ReadOutcome::Full)
}

fn reader_loop(mut file: File, tx: stdmpsc::SyncSender<WorkItem>) {
    let mut index = 0u64;
    let mut offset = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        match read_exact_or_short(&mut file, &mut len_buf) {
            Ok(ReadOutcome::Full) => {}
            _ => return, // clean EOF or a truncated trailing record: nothing more to send
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        match read_exact_or_short(&mut file, &mut data) {
            Ok(ReadOutcome::Full) => {}
            _ => return,
        }
        let record_offset = offset;
        offset += 4 + len as u64;
        if tx
            .send(WorkItem::Record {
                index,
                offset: record_offset,
                data,
            })
            .is_err()
        {
            return; // all workers gone
        }
        index += 1;
    }
}

fn worker_loop<F>(rx: Arc<Mutex<stdmpsc::Receiver<WorkItem>>>, visitor: &F)
where
    F: Fn(Option<EntryAndPosition>, Option<Error>) + Sync,
{
    loop {
        let item = {
            let rx = rx.lock().unwrap();
            rx.recv()
        };
        match item {
            Ok(WorkItem::Record { index, offset, data }) => match RawEntry::from_compressed(&data) {
                Ok(entry) => visitor(
                    Some(EntryAndPosition {
                        entry,
                        position: offset,
                        index,
                    }),
                    None,
                ),
                Err(e) => visitor(None, Some(e)),
            },
            Err(_) => return,
        }
    }
}

/// Sequential, in-order iterator over an archive's entries.
pub struct ArchiveIter {
    file: File,
    path: PathBuf,
    index: u64,
    done: bool,
}

impl Iterator for ArchiveIter {
    type Item = Result<RawEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut len_buf = [0u8; 4];
        match read_exact_or_short(&mut self.file, &mut len_buf) {
            Ok(ReadOutcome::Eof) => {
                self.done = true;
                None
            }
            Ok(ReadOutcome::Short) => {
                self.done = true;
                Some(Err(Error::ArchiveCorrupt("truncated archive frame".to_owned())))
            }
            Ok(ReadOutcome::Full) => {
                let len = u32::from_le_bytes(len_buf) as usize;
                let mut data = vec![0u8; len];
                match read_exact_or_short(&mut self.file, &mut data) {
                    Ok(ReadOutcome::Full) => {
                        self.index += 1;
                        Some(RawEntry::from_compressed(&data))
                    }
                    _ => {
                        self.done = true;
                        Some(Err(Error::ArchiveCorrupt("truncated archive frame".to_owned())))
                    }
                }
            }
            Err(e) => {
                self.done = true;
                let _ = &self.path;
                Some(Err(e))
            }
        }
    }
}
