//! Typed command objects dispatched from the protocol adapter to the engine.

use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::{Value, json};
use thiserror::Error;
use ulid::Ulid;

use crate::calendar::{CalendarDate, PARSE_ERROR_PREFIX};
use crate::engine::{BookingDraft, BookingRequest, Engine, EngineError, expand_dates};
use crate::model::{Ms, now_ms};
use crate::session::Session;

/// One request line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CheckRateLimit,
    RecordBooking,
    FindConflicts {
        dates: Vec<CalendarDate>,
        facility: String,
        periods: Vec<String>,
    },
    ExpandDates {
        date: CalendarDate,
        #[serde(default)]
        repeat_weekly_until: Option<CalendarDate>,
        #[serde(default)]
        extra_dates: Vec<CalendarDate>,
    },
    CommitBooking {
        dates: Vec<CalendarDate>,
        #[serde(flatten)]
        draft: BookingDraft,
    },
    SubmitBooking(BookingRequest),
    CancelBookingPeriod {
        booking_id: Ulid,
        #[serde(default)]
        period: Option<String>,
    },
    SuggestAlternatives {
        date: CalendarDate,
        period: String,
        facility: String,
    },
    SlotBoard {
        date: CalendarDate,
        facility: String,
    },
    ListBookings {
        start: CalendarDate,
        end: CalendarDate,
        #[serde(default)]
        facility: Option<String>,
    },
    WeekBookings {
        facility: String,
        date: CalendarDate,
    },
    MonthHistory {
        year: i32,
        month: u32,
    },
    SearchBookings {
        #[serde(default)]
        keyword: Option<String>,
        #[serde(default)]
        period: Option<String>,
    },
    FacilitySettings {
        facility: String,
    },
    SaveFacilitySettings {
        facility: String,
        unavailable_slots: Vec<String>,
    },
    Catalog,
    CurrentPeriod {
        /// `HH:MM` or `HH:MM:SS`; the server clock when absent.
        #[serde(default)]
        time: Option<String>,
    },
}

impl Command {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CheckRateLimit => "check_rate_limit",
            Command::RecordBooking => "record_booking",
            Command::FindConflicts { .. } => "find_conflicts",
            Command::ExpandDates { .. } => "expand_dates",
            Command::CommitBooking { .. } => "commit_booking",
            Command::SubmitBooking(_) => "submit_booking",
            Command::CancelBookingPeriod { .. } => "cancel_booking_period",
            Command::SuggestAlternatives { .. } => "suggest_alternatives",
            Command::SlotBoard { .. } => "slot_board",
            Command::ListBookings { .. } => "list_bookings",
            Command::WeekBookings { .. } => "week_bookings",
            Command::MonthHistory { .. } => "month_history",
            Command::SearchBookings { .. } => "search_bookings",
            Command::FacilitySettings { .. } => "facility_settings",
            Command::SaveFacilitySettings { .. } => "save_facility_settings",
            Command::Catalog => "catalog",
            Command::CurrentPeriod { .. } => "current_period",
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed request: {0}")]
    BadRequest(String),
    /// A date field in the request did not parse.
    #[error("{0}")]
    Parse(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::BadRequest(_) => "bad_request",
            CommandError::Parse(_) => "parse",
            CommandError::Engine(e) => e.kind(),
        }
    }
}

/// Decode one request line. A date that fails to parse is reported with the
/// same `parse` kind the engine uses; anything else is a `bad_request`.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    serde_json::from_str(line).map_err(|e| {
        let message = e.to_string();
        if e.classify() == Category::Data && message.starts_with(PARSE_ERROR_PREFIX) {
            CommandError::Parse(message)
        } else {
            CommandError::BadRequest(message)
        }
    })
}

/// The clock reading an operation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub now: Ms,
    pub today: CalendarDate,
    pub time: NaiveTime,
}

impl Moment {
    pub fn current() -> Self {
        let local = Local::now();
        Self {
            now: now_ms(),
            today: CalendarDate::new(local.date_naive()),
            time: local.time(),
        }
    }
}

/// Response envelope: `{"status":"ok","data":…}` or
/// `{"status":"error","kind":…,"message":…}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok { data: Value },
    Error { kind: String, message: String },
}

impl Reply {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn from_result(result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(data) => Reply::Ok { data },
            Err(e) => Reply::error(e.kind(), e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok { .. })
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::BadRequest(format!("unencodable reply: {e}")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, CommandError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| CommandError::BadRequest(format!("invalid time {raw:?}, expected HH:MM")))
}

pub async fn execute_command(
    engine: &Engine,
    session: &Session,
    cmd: Command,
    at: Moment,
) -> Result<Value, CommandError> {
    match cmd {
        Command::CheckRateLimit => to_value(engine.check_rate_limit(session, at.now).await),
        Command::RecordBooking => {
            engine.record_booking(session, at.now).await?;
            Ok(json!({ "recorded": 1 }))
        }
        Command::FindConflicts {
            dates,
            facility,
            periods,
        } => to_value(engine.find_conflicts(&dates, &facility, &periods).await?),
        Command::ExpandDates {
            date,
            repeat_weekly_until,
            extra_dates,
        } => to_value(expand_dates(date, repeat_weekly_until, &extra_dates)?),
        Command::CommitBooking { dates, draft } => {
            let ids = engine.commit_booking(session, &dates, draft, at.now).await?;
            Ok(json!({ "booking_ids": ids }))
        }
        Command::SubmitBooking(request) => {
            let ids = engine.submit_booking(session, request, at.now).await?;
            Ok(json!({ "booking_ids": ids }))
        }
        Command::CancelBookingPeriod { booking_id, period } => to_value(
            engine
                .cancel_booking_period(session, booking_id, period.as_deref())
                .await?,
        ),
        Command::SuggestAlternatives {
            date,
            period,
            facility,
        } => to_value(
            engine
                .suggest_alternatives(date, &period, &facility, at.today)
                .await?,
        ),
        Command::SlotBoard { date, facility } => to_value(engine.slot_board(date, &facility).await?),
        Command::ListBookings {
            start,
            end,
            facility,
        } => to_value(engine.list_bookings(start, end, facility.as_deref()).await?),
        Command::WeekBookings { facility, date } => {
            to_value(engine.week_bookings(&facility, date).await?)
        }
        Command::MonthHistory { year, month } => to_value(engine.month_history(year, month).await?),
        Command::SearchBookings { keyword, period } => to_value(
            engine
                .search_bookings(keyword.as_deref(), period.as_deref(), at.today)
                .await?,
        ),
        Command::FacilitySettings { facility } => {
            to_value(engine.facility_settings(&facility).await?)
        }
        Command::SaveFacilitySettings {
            facility,
            unavailable_slots,
        } => to_value(
            engine
                .save_facility_settings(session, &facility, unavailable_slots, at.now)
                .await?,
        ),
        Command::Catalog => to_value(engine.catalog()),
        Command::CurrentPeriod { time } => {
            let time = match time {
                Some(raw) => parse_time(&raw)?,
                None => at.time,
            };
            to_value(engine.current_period(time))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::AuthContext;
    use crate::catalog::Catalog;
    use crate::engine::EngineOptions;
    use crate::rate_limit::{RateLimitPolicy, RateLimiter};
    use crate::store::JournalStore;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(JournalStore::ephemeral()),
            Arc::new(Catalog::default()),
            EngineOptions::default(),
        )
    }

    fn session() -> Session {
        Session::new(
            AuthContext::device("dev_cmd"),
            RateLimiter::in_memory(RateLimitPolicy::default()),
        )
    }

    fn moment() -> Moment {
        Moment {
            now: 1_740_000_000_000,
            today: "2025/03/01".parse().unwrap(),
            time: NaiveTime::from_hms_opt(10, 45, 0).unwrap(),
        }
    }

    async fn run(engine: &Engine, session: &Session, line: &str) -> Reply {
        let result = match parse_command(line) {
            Ok(cmd) => execute_command(engine, session, cmd, moment()).await,
            Err(e) => Err(e),
        };
        Reply::from_result(result)
    }

    #[test]
    fn parses_tagged_commands() {
        let cmd = parse_command(
            r#"{"op":"submit_booking","date":"2025/03/03","facility":"Auditorium","periods":["period1"],"booker":"Mr. Wu","reason":"exam","repeat_weekly_until":"2025-03-24"}"#,
        )
        .unwrap();
        match cmd {
            Command::SubmitBooking(req) => {
                assert_eq!(req.draft.facility, "Auditorium");
                assert_eq!(req.repeat_weekly_until, Some("2025/03/24".parse().unwrap()));
                assert!(req.extra_dates.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let cmd = parse_command(r#"{"op":"cancel_booking_period","booking_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV"}"#).unwrap();
        assert_eq!(cmd.label(), "cancel_booking_period");

        assert!(matches!(parse_command(r#"{"op":"launch_rockets"}"#), Err(CommandError::BadRequest(_))));
        assert!(matches!(parse_command("not json"), Err(CommandError::BadRequest(_))));
    }

    #[test]
    fn malformed_dates_are_parse_errors() {
        let bad_date = parse_command(r#"{"op":"slot_board","date":"2025/13/40","facility":"Auditorium"}"#);
        let err = bad_date.unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert!(err.to_string().contains("2025/13/40"));

        let in_list = parse_command(
            r#"{"op":"find_conflicts","dates":["2025/03/05","March 6"],"facility":"Auditorium","periods":["period1"]}"#,
        );
        assert_eq!(in_list.unwrap_err().kind(), "parse");

        // a wrongly typed date is still a malformed request
        let not_a_string = parse_command(r#"{"op":"slot_board","date":20250305,"facility":"Auditorium"}"#);
        assert_eq!(not_a_string.unwrap_err().kind(), "bad_request");
        let missing = parse_command(r#"{"op":"slot_board","facility":"Auditorium"}"#);
        assert_eq!(missing.unwrap_err().kind(), "bad_request");
    }

    #[tokio::test]
    async fn replies_wrap_data_and_errors() {
        let engine = engine();
        let s = session();

        let reply = run(&engine, &s, r#"{"op":"expand_dates","date":"2025/03/03","repeat_weekly_until":"2025/03/17"}"#).await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["data"], json!(["2025/03/03", "2025/03/10", "2025/03/17"]));

        let reply = run(
            &engine,
            &s,
            r#"{"op":"commit_booking","dates":["2025/03/03"],"facility":"Auditorium","periods":["period1"],"booker":"","reason":"x"}"#,
        )
        .await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "validation");
        assert_eq!(json["message"], "booker name is required");
    }

    #[tokio::test]
    async fn booking_flow_through_commands() {
        let engine = engine();
        let s = session();

        let reply = run(
            &engine,
            &s,
            r#"{"op":"commit_booking","dates":["2025/03/05"],"facility":"Auditorium","periods":["period3"],"booker":"Ms. Lin","reason":"assembly"}"#,
        )
        .await;
        assert!(reply.is_ok(), "{reply:?}");

        let reply = run(&engine, &s, r#"{"op":"slot_board","date":"2025/03/05","facility":"Auditorium"}"#).await;
        let Reply::Ok { data } = reply else { panic!("expected ok") };
        assert_eq!(data[3]["period"], "period3");
        assert_eq!(data[3]["state"], "booked");
        assert_eq!(data[3]["booker"], "Ms. Lin");

        let reply = run(
            &engine,
            &s,
            r#"{"op":"suggest_alternatives","date":"2025/03/05","period":"period3","facility":"Auditorium"}"#,
        )
        .await;
        let Reply::Ok { data } = reply else { panic!("expected ok") };
        assert_eq!(data.as_array().unwrap().len(), 3);
        assert_eq!(data[0]["type"], "date");

        let reply = run(&engine, &s, r#"{"op":"check_rate_limit"}"#).await;
        assert_eq!(reply, Reply::Ok { data: json!({"decision": "allowed"}) });

        let reply = run(&engine, &s, r#"{"op":"current_period"}"#).await;
        let Reply::Ok { data } = reply else { panic!("expected ok") };
        assert_eq!(data["id"], "period3");

        let reply = run(&engine, &s, r#"{"op":"current_period","time":"25:99"}"#).await;
        assert!(matches!(reply, Reply::Error { ref kind, .. } if kind == "bad_request"));
    }

    #[tokio::test]
    async fn settings_need_administrator() {
        let engine = engine();
        let reply = run(
            &engine,
            &session(),
            r#"{"op":"save_facility_settings","facility":"Auditorium","unavailable_slots":["mon_period1"]}"#,
        )
        .await;
        assert!(matches!(reply, Reply::Error { ref kind, .. } if kind == "permission_denied"));

        let admin = Session::new(
            AuthContext::new("dev_admin", true),
            RateLimiter::in_memory(RateLimitPolicy::default()),
        );
        let reply = run(
            &engine,
            &admin,
            r#"{"op":"save_facility_settings","facility":"Auditorium","unavailable_slots":["mon_period1"]}"#,
        )
        .await;
        assert!(reply.is_ok());
    }
}
