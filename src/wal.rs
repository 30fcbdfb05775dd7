use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Larger length prefixes are treated as corruption rather than allocated.
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only booking journal.
///
/// Frame: `[u32 len][bincode Event][u32 crc32]`, little endian. `len` covers the
/// payload only. A torn or corrupt tail ends replay; everything before it survives.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Write one frame and fsync it. The buffer is flushed even when encoding
    /// fails, so a half-written frame never sits in front of the next append.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let encoded = encode_event(&mut self.writer, event);
        if encoded.is_ok() {
            self.appends_since_compact += 1;
        }
        let flushed = self
            .writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all());
        encoded.and(flushed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a replacement journal next to `path`. Slow; does not touch the live file.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live journal and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record from `path`. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                warn!("journal {}: implausible record length {len}", path.display());
                break;
            }

            let mut payload = vec![0u8; len];
            if !read_frame_part(&mut reader, &mut payload)? {
                warn!("journal {}: truncated record after {} events", path.display(), events.len());
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                warn!("journal {}: truncated record after {} events", path.display(), events.len());
                break;
            }

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                warn!("journal {}: checksum mismatch after {} events", path.display(), events.len());
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("journal {}: undecodable record: {e}", path.display());
                    break;
                }
            }
        }

        Ok(events)
    }
}

/// `Ok(false)` on a clean or torn end of file.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, FacilitySettings, NewBooking};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn booking(date: &str, periods: &[&str]) -> Booking {
        NewBooking {
            date: date.parse().unwrap(),
            facility: "Auditorium".into(),
            periods: periods.iter().map(|p| p.to_string()).collect(),
            booker: "Mr. Chen".into(),
            reason: "rehearsal".into(),
            device_id: "dev_a".into(),
        }
        .into_booking(Ulid::new(), 1_740_000_000_000)
    }

    fn committed(date: &str) -> Event {
        Event::BatchCommitted {
            bookings: vec![booking(date, &["period1", "period2"])],
            settings: vec![],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let b = booking("2025/03/03", &["period1"]);
        let events = vec![
            Event::BatchCommitted { bookings: vec![b.clone()], settings: vec![] },
            Event::BookingPeriodsUpdated { id: b.id, periods: vec![] },
            Event::BatchCommitted {
                bookings: vec![],
                settings: vec![(
                    "Forest Cabin".into(),
                    FacilitySettings {
                        unavailable_slots: vec!["mon_period1".into()],
                        updated_at: Some(5),
                    },
                )],
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let path = tmp_path("torn.wal");
        let event = committed("2025/03/03");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = committed("2025/03/03");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&committed("2025/03/04")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compaction_shrinks_and_accepts_new_appends() {
        let path = tmp_path("compact.wal");
        let b = booking("2025/03/03", &["period1"]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::BatchCommitted { bookings: vec![b.clone()], settings: vec![] })
                .unwrap();
            for _ in 0..10 {
                wal.append(&Event::BookingPeriodsUpdated { id: b.id, periods: vec![] }).unwrap();
                wal.append(&Event::BookingPeriodsUpdated {
                    id: b.id,
                    periods: vec!["period1".into()],
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![Event::BatchCommitted { bookings: vec![b.clone()], settings: vec![] }];
        let later = committed("2025/03/10");
        {
            let mut wal = Wal::open(&path).unwrap();
            Wal::write_compact_file(&path, &snapshot).unwrap();
            wal.swap_compact_file().unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), later]);
    }

    #[test]
    fn every_append_is_durable_and_counted() {
        let path = tmp_path("durable.wal");
        let events: Vec<Event> = (3..8).map(|d| committed(&format!("2025/03/{d:02}"))).collect();
        let mut wal = Wal::open(&path).unwrap();
        for (i, e) in events.iter().enumerate() {
            wal.append(e).unwrap();
            // readable before the writer is dropped
            assert_eq!(Wal::replay(&path).unwrap(), events[..=i]);
        }
        assert_eq!(wal.appends_since_compact(), 5);
    }
}
