use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use super::{AvailabilityStore, BookingFilter, StoreError, WriteOp};
use crate::calendar::CalendarDate;
use crate::limits::COMPACT_CHUNK;
use crate::model::{Booking, Event, FacilitySettings, now_ms};
use crate::wal::Wal;

// ── Journal writer channel ───────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the journal file. Each append is written and fsynced before its caller
/// hears back; callers already hold the table write lock, so appends arrive one
/// at a time.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let flush_start = std::time::Instant::now();
                let result = wal.append(&event);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                let _ = response.send(result);
            }
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

#[derive(Default)]
struct Tables {
    bookings: HashMap<Ulid, Booking>,
    by_date: BTreeMap<CalendarDate, Vec<Ulid>>,
    settings: HashMap<String, FacilitySettings>,
}

impl Tables {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::BatchCommitted { bookings, settings } => {
                for booking in bookings {
                    self.by_date.entry(booking.date).or_default().push(booking.id);
                    self.bookings.insert(booking.id, booking.clone());
                }
                for (facility, doc) in settings {
                    self.settings.insert(facility.clone(), doc.clone());
                }
            }
            Event::BookingPeriodsUpdated { id, periods } => {
                if let Some(booking) = self.bookings.get_mut(id) {
                    booking.periods = periods.clone();
                }
            }
        }
    }

    fn live_on<'a>(
        &'a self,
        date: CalendarDate,
        facility: &'a str,
    ) -> impl Iterator<Item = &'a Booking> + 'a {
        self.by_date
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.bookings.get(id))
            .filter(move |b| b.is_live() && b.facility == facility)
    }

    /// Records that recreate the current state, bookings in date order.
    fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let mut settings: Vec<(String, FacilitySettings)> = self
            .settings
            .iter()
            .map(|(f, s)| (f.clone(), s.clone()))
            .collect();
        settings.sort_by(|a, b| a.0.cmp(&b.0));
        if !settings.is_empty() {
            events.push(Event::BatchCommitted {
                bookings: Vec::new(),
                settings,
            });
        }

        let ordered: Vec<Booking> = self
            .by_date
            .values()
            .flatten()
            .filter_map(|id| self.bookings.get(id).cloned())
            .collect();
        for chunk in ordered.chunks(COMPACT_CHUNK) {
            events.push(Event::BatchCommitted {
                bookings: chunk.to_vec(),
                settings: Vec::new(),
            });
        }
        events
    }
}

/// In-memory tables with an optional write-ahead journal.
///
/// Every mutation holds the table write lock across its journal append, so readers
/// only ever observe durable state and a batch is visible all at once.
pub struct JournalStore {
    tables: RwLock<Tables>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl JournalStore {
    /// Replay the journal at `path` and keep appending to it. Must be called
    /// inside a tokio runtime (spawns the writer task).
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut tables = Tables::default();
        for event in &events {
            tables.apply(event);
        }
        info!(
            "journal {}: replayed {} records, {} bookings",
            path.display(),
            events.len(),
            tables.bookings.len()
        );
        Ok(Self {
            tables: RwLock::new(tables),
            wal_tx: Some(wal_tx),
        })
    }

    /// No journal; state lives as long as the value.
    pub fn ephemeral() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            wal_tx: None,
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Transient("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Transient("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Transient(format!("journal append failed: {e}")))
    }

    /// Rewrite the journal as a snapshot of the current state. Writers wait until
    /// the swap completes so no append can land in the file being replaced.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let tables = self.tables.read().await;
        let events = tables.snapshot();
        let records = events.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Transient("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Transient("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Transient(format!("journal compaction failed: {e}")))?;
        drop(tables);
        info!("journal compacted to {records} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl AvailabilityStore for JournalStore {
    async fn query_by_date_range(
        &self,
        start: CalendarDate,
        end: CalendarDate,
        filter: &BookingFilter,
    ) -> Result<Vec<Booking>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        let found: Vec<Booking> = tables
            .by_date
            .range(start..=end)
            .flat_map(|(_, ids)| ids)
            .filter_map(|id| tables.bookings.get(id))
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        debug!("range {start}..={end} {filter:?}: {} bookings", found.len());
        Ok(found)
    }

    async fn query_facility_settings(
        &self,
        facility: &str,
    ) -> Result<Option<FacilitySettings>, StoreError> {
        Ok(self.tables.read().await.settings.get(facility).cloned())
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn atomic_batch_write(&self, ops: Vec<WriteOp>) -> Result<Vec<Ulid>, StoreError> {
        let mut tables = self.tables.write().await;
        let created_at = now_ms();
        let mut bookings = Vec::new();
        let mut settings = Vec::new();

        for op in ops {
            match op {
                WriteOp::RequireVacant {
                    date,
                    facility,
                    periods,
                } => {
                    let taken = tables.live_on(date, &facility).find_map(|b| {
                        periods.iter().find(|p| b.claims(p)).map(|p| (p.clone(), b.booker.clone()))
                    });
                    if let Some((period, booker)) = taken {
                        return Err(StoreError::SlotTaken {
                            date,
                            facility,
                            period,
                            booker,
                        });
                    }
                }
                WriteOp::CreateBooking(new) => {
                    bookings.push(new.into_booking(Ulid::new(), created_at));
                }
                WriteOp::PutFacilitySettings { facility, settings: doc } => {
                    settings.push((facility, doc));
                }
            }
        }

        let ids: Vec<Ulid> = bookings.iter().map(|b| b.id).collect();
        if bookings.is_empty() && settings.is_empty() {
            return Ok(ids);
        }
        let event = Event::BatchCommitted { bookings, settings };
        self.wal_append(&event).await?;
        tables.apply(&event);
        Ok(ids)
    }

    async fn update_periods(&self, id: Ulid, periods: Vec<String>) -> Result<Booking, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.bookings.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::BookingPeriodsUpdated { id, periods };
        self.wal_append(&event).await?;
        tables.apply(&event);
        tables.bookings.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewBooking;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    fn new_booking(date: &str, facility: &str, periods: &[&str]) -> NewBooking {
        NewBooking {
            date: d(date),
            facility: facility.into(),
            periods: periods.iter().map(|p| p.to_string()).collect(),
            booker: "Ms. Wang".into(),
            reason: "science fair".into(),
            device_id: "dev_a".into(),
        }
    }

    #[tokio::test]
    async fn range_query_filters_and_orders() {
        let store = JournalStore::ephemeral();
        store
            .atomic_batch_write(vec![
                WriteOp::CreateBooking(new_booking("2025/03/05", "Auditorium", &["period1"])),
                WriteOp::CreateBooking(new_booking("2025/03/03", "Auditorium", &["period2"])),
                WriteOp::CreateBooking(new_booking("2025/03/04", "Forest Cabin", &["period2"])),
                WriteOp::CreateBooking(new_booking("2025/03/20", "Auditorium", &["period2"])),
            ])
            .await
            .unwrap();

        let found = store
            .query_by_date_range(d("2025/03/01"), d("2025/03/10"), &BookingFilter::facility("Auditorium"))
            .await
            .unwrap();
        let dates: Vec<String> = found.iter().map(|b| b.date.to_string()).collect();
        assert_eq!(dates, ["2025/03/03", "2025/03/05"]);

        let all = store
            .query_by_date_range(d("2025/03/01"), d("2025/03/31"), &BookingFilter::any_facility())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);

        let backwards = store
            .query_by_date_range(d("2025/03/31"), d("2025/03/01"), &BookingFilter::any_facility())
            .await
            .unwrap();
        assert!(backwards.is_empty());
    }

    #[tokio::test]
    async fn require_vacant_rejects_whole_batch() {
        let store = JournalStore::ephemeral();
        store
            .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                "2025/03/10",
                "Auditorium",
                &["period3"],
            ))])
            .await
            .unwrap();

        let err = store
            .atomic_batch_write(vec![
                WriteOp::RequireVacant {
                    date: d("2025/03/03"),
                    facility: "Auditorium".into(),
                    periods: vec!["period3".into()],
                },
                WriteOp::RequireVacant {
                    date: d("2025/03/10"),
                    facility: "Auditorium".into(),
                    periods: vec!["period3".into()],
                },
                WriteOp::CreateBooking(new_booking("2025/03/03", "Auditorium", &["period3"])),
                WriteOp::CreateBooking(new_booking("2025/03/10", "Auditorium", &["period3"])),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SlotTaken { ref period, .. } if period == "period3"));

        let all = store
            .query_by_date_range(d("2025/03/01"), d("2025/03/31"), &BookingFilter::any_facility())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn empty_bookings_are_hidden_unless_requested() {
        let store = JournalStore::ephemeral();
        let ids = store
            .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                "2025/03/03",
                "Auditorium",
                &["period1"],
            ))])
            .await
            .unwrap();
        let updated = store.update_periods(ids[0], vec![]).await.unwrap();
        assert!(!updated.is_live());

        let filter = BookingFilter::facility("Auditorium");
        let live = store.query_by_date_range(d("2025/03/03"), d("2025/03/03"), &filter).await.unwrap();
        assert!(live.is_empty());
        let everything = store
            .query_by_date_range(d("2025/03/03"), d("2025/03/03"), &filter.with_empty())
            .await
            .unwrap();
        assert_eq!(everything.len(), 1);

        // A vacated slot passes the precondition again
        store
            .atomic_batch_write(vec![WriteOp::RequireVacant {
                date: d("2025/03/03"),
                facility: "Auditorium".into(),
                periods: vec!["period1".into()],
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_unknown_booking() {
        let store = JournalStore::ephemeral();
        let id = Ulid::new();
        assert_eq!(store.update_periods(id, vec![]).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let path = test_wal_path("restart.wal");
        let id = {
            let store = JournalStore::open(&path).unwrap();
            let ids = store
                .atomic_batch_write(vec![
                    WriteOp::CreateBooking(new_booking("2025/03/03", "Auditorium", &["period1", "period2"])),
                    WriteOp::PutFacilitySettings {
                        facility: "Auditorium".into(),
                        settings: FacilitySettings {
                            unavailable_slots: vec!["fri_period8".into()],
                            updated_at: Some(7),
                        },
                    },
                ])
                .await
                .unwrap();
            store.update_periods(ids[0], vec!["period2".into()]).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 2);
            ids[0]
        };

        let store = JournalStore::open(&path).unwrap();
        let booking = store.get_booking(id).await.unwrap().unwrap();
        assert_eq!(booking.periods, ["period2"]);
        let settings = store.query_facility_settings("Auditorium").await.unwrap().unwrap();
        assert_eq!(settings.unavailable_slots, ["fri_period8"]);
        assert!(store.query_facility_settings("Forest Cabin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compaction_preserves_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        {
            let store = JournalStore::open(&path).unwrap();
            let ids = store
                .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                    "2025/03/03",
                    "Auditorium",
                    &["period1"],
                ))])
                .await
                .unwrap();
            for _ in 0..20 {
                store.update_periods(ids[0], vec![]).await.unwrap();
                store.update_periods(ids[0], vec!["period1".into()]).await.unwrap();
            }
            let before = std::fs::metadata(&path).unwrap().len();
            store.compact().await.unwrap();
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted ({after}) should be smaller than {before}");
            assert_eq!(store.appends_since_compact().await, 0);

            store
                .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                    "2025/03/04",
                    "Auditorium",
                    &["period2"],
                ))])
                .await
                .unwrap();
        }

        let store = JournalStore::open(&path).unwrap();
        let all = store
            .query_by_date_range(d("2025/03/01"), d("2025/03/31"), &BookingFilter::any_facility())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].periods, ["period1"]);
    }

    #[tokio::test]
    async fn each_acknowledged_write_is_on_disk() {
        let path = test_wal_path("acknowledged.wal");
        let store = std::sync::Arc::new(JournalStore::open(&path).unwrap());

        for day in 1..=4 {
            store
                .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                    &format!("2025/04/{day:02}"),
                    "Auditorium",
                    &["period1"],
                ))])
                .await
                .unwrap();
            assert_eq!(Wal::replay(&path).unwrap().len(), day);
        }

        let writers: Vec<_> = (10..26)
            .map(|day| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .atomic_batch_write(vec![WriteOp::CreateBooking(new_booking(
                            &format!("2025/04/{day:02}"),
                            "Forest Cabin",
                            &["period2"],
                        ))])
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(store.appends_since_compact().await, 20);
        assert_eq!(Wal::replay(&path).unwrap().len(), 20);
        let reopened = JournalStore::open(&path).unwrap();
        let all = reopened
            .query_by_date_range(d("2025/04/01"), d("2025/04/30"), &BookingFilter::any_facility())
            .await
            .unwrap();
        assert_eq!(all.len(), 20);
    }
}
