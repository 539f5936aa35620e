use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Record;

/// A frame longer than this is treated as corruption, not as a huge record.
const MAX_FRAME_BYTES: usize = 1 << 20;

/// Returns the number of bytes written.
fn write_frame(writer: &mut impl Write, record: &Record) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record, or `None` at end of file or at the first damaged frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Record, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let Ok(record) = bincode::deserialize::<Record>(&payload) else {
        return Ok(None);
    };
    Ok(Some((record, 8 + len as u64)))
}

/// Append-only record log.
///
/// Each frame is `[u32 LE: len][bincode Record][u32 LE: crc32 of payload]`.
/// A crash can leave a torn last frame; it is dropped on open and the file
/// truncated back to the last intact frame so new appends stay reachable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Length of the log as of the last successful sync.
    synced_len: u64,
    unsynced: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay `path` (creating it if missing) and open it for appending.
    pub fn open(path: &Path) -> io::Result<(Wal, Vec<Record>)> {
        let (records, valid_len) = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!(
                "{}: discarding damaged tail after {} records",
                path.display(),
                records.len()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Wal {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len: valid_len,
            unsynced: 0,
            appends_since_compact: records.len() as u64,
        };
        Ok((wal, records))
    }

    /// Every intact record and the byte length they occupy.
    pub fn replay(path: &Path) -> io::Result<(Vec<Record>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;
        while let Some((record, frame_len)) = read_frame(&mut reader)? {
            records.push(record);
            valid_len += frame_len;
        }
        Ok((records, valid_len))
    }

    /// Buffer one record. Not durable until `sync`.
    pub fn append_buffered(&mut self, record: &Record) -> io::Result<()> {
        self.unsynced += write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered frames and fsync.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced;
        self.unsynced = 0;
        Ok(())
    }

    /// Throw away frames appended since the last successful sync, so records
    /// reported as failed never reappear on replay.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        // The old writer flushes what it still buffers when dropped; truncate after.
        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `records`: write a temp file, fsync, rename over
    /// the log and reopen for appending.
    pub fn rewrite(&mut self, records: &[Record]) -> io::Result<()> {
        self.sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut len = 0;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                len += write_frame(&mut tmp, record)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.synced_len = len;
        self.unsynced = 0;
        self.appends_since_compact = 0;
        Ok(())
    }
}
