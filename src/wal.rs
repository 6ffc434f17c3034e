use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Payloads larger than this are a corrupt length prefix, not a real event.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Append-only log of ledger events, one frame per event:
/// `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
///
/// Nothing in the ledger is ever deleted, so the log is the full history and
/// is never compacted. A torn or corrupt tail left by a crash is dropped on
/// replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appended: u64,
}

enum Frame {
    Payload(Vec<u8>),
    /// Clean end of file, or a frame cut short by a crash.
    End,
    Corrupt(&'static str),
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(false)` if the reader ran out before `buf` was full.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::Corrupt("length prefix out of range"));
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Frame::Corrupt("bad checksum"));
    }
    Ok(Frame::Payload(payload))
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appended: 0,
        })
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appended += 1;
        Ok(())
    }

    /// Flush the buffer and fsync, committing every buffered event as one batch.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events appended since this handle was opened.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Every intact event in the log, oldest first. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let payload = match read_frame(&mut reader)? {
                Frame::Payload(payload) => payload,
                Frame::End => break,
                Frame::Corrupt(why) => {
                    warn!("WAL {}: {why} after {} events, dropping tail", path.display(), events.len());
                    break;
                }
            };
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("WAL {}: undecodable event after {}: {e}", path.display(), events.len());
                    break;
                }
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    use crate::model::{BoatId, Span, TimeslotId};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("boathouse_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    /// A timeslot, a boat on it, and one booking.
    fn booking_day() -> Vec<Event> {
        vec![
            Event::TimeslotCreated {
                id: TimeslotId(0),
                span: Span::new(1_406_052_000_000, 1_406_059_200_000),
            },
            Event::BoatCreated {
                id: BoatId(0),
                capacity: 8,
                name: "Amazon Express".into(),
            },
            Event::BoatAssigned {
                timeslot_id: TimeslotId(0),
                boat_id: BoatId(0),
            },
            Event::BookingPlaced {
                id: Ulid::new(),
                timeslot_id: TimeslotId(0),
                boat_id: BoatId(0),
                size: 3,
            },
        ]
    }

    #[test]
    fn history_survives_reopen() {
        let path = tmp_path("reopen.wal");
        let events = booking_day();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events[1..] {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
            assert_eq!(wal.appended(), 3);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_booking_is_dropped() {
        let path = tmp_path("torn.wal");
        let events = booking_day();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        // Cut the last frame in half.
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 10).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), events[..3]);
    }

    #[test]
    fn corrupt_frame_ends_replay() {
        let path = tmp_path("corrupt.wal");
        let events = booking_day();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        {
            let payload = bincode::serialize(&events[1]).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events[..1]);
    }

    #[test]
    fn absurd_length_prefix_is_corrupt() {
        let path = tmp_path("absurd_len.wal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }
}
