use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{execute, CalendarApi, Event, NewEvent};
use crate::error::Result;

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

pub struct CalendarClient {
    http: Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<Event>,
}

impl CalendarClient {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", CALENDAR_API)
    }
}

impl CalendarApi for CalendarClient {
    fn list_events(&self, time_min: DateTime<Utc>, max_results: u32) -> Result<Vec<Event>> {
        let time_min = time_min.to_rfc3339_opts(SecondsFormat::Secs, true);
        tracing::debug!(%time_min, max_results, "calendar events.list");

        let request = self
            .http
            .get(self.events_url())
            .bearer_auth(&self.token)
            .query(&[
                ("timeMin", time_min),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ]);

        let list: EventList = execute(request)?;
        Ok(list.items)
    }

    fn insert_event(&self, event: &NewEvent) -> Result<Event> {
        tracing::debug!(summary = %event.summary, "calendar events.insert");

        let request = self
            .http
            .post(self.events_url())
            .bearer_auth(&self.token)
            .json(event);

        execute(request)
    }
}
