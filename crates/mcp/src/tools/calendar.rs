use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use gsuite_tools_core::{
    Attendee, Event, EventTime, GatewayError, NewEvent, Result, ServiceProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    default_max_results, deserialize_max_results, parse_args, ParamKind, ParamDef, ToolDescriptor,
};

pub fn definitions() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "calendar_list_events",
            description: "List upcoming events on the primary calendar, soonest first",
            params: vec![ParamDef::optional(
                "max_results",
                ParamKind::Number,
                "Maximum number of events to return",
            )
            .with_default(json!(10))],
        },
        ToolDescriptor {
            name: "calendar_create_event",
            description: "Create an event on the primary calendar and return its link",
            params: vec![
                ParamDef::required("summary", ParamKind::String, "Event title"),
                ParamDef::required(
                    "start_time",
                    ParamKind::String,
                    "Start time (ISO 8601, UTC unless an offset is given)",
                ),
                ParamDef::required(
                    "end_time",
                    ParamKind::String,
                    "End time (ISO 8601, UTC unless an offset is given)",
                ),
                ParamDef::optional("description", ParamKind::String, "Event description")
                    .with_default(json!("")),
                ParamDef::optional(
                    "attendees",
                    ParamKind::StringArray,
                    "Email addresses to invite",
                )
                .with_default(json!([])),
            ],
        },
    ]
}

pub fn call(name: &str, arguments: Value, services: &dyn ServiceProvider) -> Result<Value> {
    match name {
        "calendar_list_events" => list_events(parse_args(arguments)?, services),
        "calendar_create_event" => create_event(parse_args(arguments)?, services),
        _ => Err(GatewayError::UnknownTool(name.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ListEventsArgs {
    #[serde(default = "default_max_results", deserialize_with = "deserialize_max_results")]
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct CreateEventArgs {
    summary: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attendees: Vec<String>,
}

/// Event as returned to callers; `start`/`end` hold either a timestamp or an
/// all-day date.
#[derive(Debug, Serialize)]
struct CalendarEvent {
    id: Option<String>,
    summary: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

impl From<Event> for CalendarEvent {
    fn from(event: Event) -> Self {
        Self {
            start: event.start.resolved().map(str::to_string),
            end: event.end.resolved().map(str::to_string),
            id: event.id,
            summary: event.summary,
        }
    }
}

fn list_events(args: ListEventsArgs, services: &dyn ServiceProvider) -> Result<Value> {
    let max_results = args.max_results;
    let services = services.services()?;

    let events: Vec<CalendarEvent> = services
        .calendar
        .list_events(Utc::now(), max_results)?
        .into_iter()
        .map(CalendarEvent::from)
        .collect();

    tracing::debug!(count = events.len(), "listed calendar events");
    Ok(serde_json::to_value(events)?)
}

fn create_event(args: CreateEventArgs, services: &dyn ServiceProvider) -> Result<Value> {
    let start = parse_utc("start_time", &args.start_time)?;
    let end = parse_utc("end_time", &args.end_time)?;
    if end < start {
        return Err(GatewayError::validation("`end_time` is before `start_time`"));
    }

    let event = NewEvent {
        summary: args.summary,
        description: args.description,
        start: EventTime::utc(start),
        end: EventTime::utc(end),
        attendees: args
            .attendees
            .into_iter()
            .map(|email| Attendee { email })
            .collect(),
    };

    let services = services.services()?;
    let created = services.calendar.insert_event(&event)?;

    Ok(json!({
        "event_link": created.html_link,
        "id": created.id,
    }))
}

/// Offsets are converted to UTC; naive timestamps are taken as UTC.
fn parse_utc(field: &str, value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            GatewayError::validation(format!(
                "`{}` is not an ISO 8601 timestamp: {}",
                field, value
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_timestamps_are_converted_to_utc() {
        let at = parse_utc("start_time", "2025-03-01T10:00:00+02:00").unwrap();
        assert_eq!(at.to_rfc3339(), "2025-03-01T08:00:00+00:00");
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let at = parse_utc("start_time", "2025-03-01T10:00:00").unwrap();
        assert_eq!(at.to_rfc3339(), "2025-03-01T10:00:00+00:00");

        let short = parse_utc("start_time", "2025-03-01T10:00").unwrap();
        assert_eq!(short, at);
    }

    #[test]
    fn garbage_timestamp_names_the_field() {
        let err = parse_utc("end_time", "next tuesday").unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(err.to_string().contains("end_time"));
    }

    #[test]
    fn all_day_events_use_their_date() {
        let event: Event = serde_json::from_value(json!({
            "id": "evt1",
            "summary": "Offsite",
            "start": {"date": "2025-03-01"},
            "end": {"date": "2025-03-02"}
        }))
        .unwrap();
        let shaped = serde_json::to_value(CalendarEvent::from(event)).unwrap();

        assert_eq!(
            shaped,
            json!({"id": "evt1", "summary": "Offsite", "start": "2025-03-01", "end": "2025-03-02"})
        );
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let args = json!({"summary": "x", "start_time": "2025-03-01T10:00:00Z"});
        let err = parse_args::<CreateEventArgs>(args).unwrap_err();
        assert!(err.to_string().contains("end_time"));
    }
}
