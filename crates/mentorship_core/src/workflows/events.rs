//! Calendar events and the mentor-hour accounting they drive.
//!
//! The event write is the prerequisite. Hour adjustments, calendar federation,
//! notifications and emails run best-effort; hours only ever move by an atomic
//! delta, in whole minutes, on the mentor's `committedMinutes` counter.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{deliver_notification, send_email, Orchestrator};
use crate::domain::{new_id, CalendarEvent, EventKind, Notification, NotificationKind, Role, User};
use crate::duration::parse_minutes;
use crate::executor::{BestEffort, SideEffects};
use crate::ports::{EmailKind, PortError, PortResult};
use crate::session::SessionContext;
use crate::store::{to_document, StoreClient};

const MINUTES_FIELD: &str = "committedMinutes";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub time: Option<String>,
    pub duration: String,
    pub mentor_id: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    pub kind: EventKind,
}

/// Fields to change on an event. `mentor_id: Some(None)` unassigns the mentor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub mentor_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_ids: Option<Vec<String>>,
}

/// Distinguishes an explicit `null` (unassign) from an absent field.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl EventChanges {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.date.is_none()
            && self.time.is_none()
            && self.duration.is_none()
            && self.mentor_id.is_none()
            && self.participant_ids.is_none()
    }

    fn apply_to(&self, event: &CalendarEvent) -> CalendarEvent {
        let mut next = event.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(description) = &self.description {
            next.description = Some(description.clone());
        }
        if let Some(date) = self.date {
            next.date = date;
        }
        if let Some(time) = &self.time {
            next.time = Some(time.clone());
        }
        if let Some(duration) = &self.duration {
            next.duration = duration.clone();
        }
        if let Some(mentor_id) = &self.mentor_id {
            next.mentor_id = mentor_id.clone();
        }
        if let Some(participants) = &self.participant_ids {
            next.participant_ids = participants.clone();
        }
        next
    }
}

#[derive(Debug)]
pub struct EventOutcome {
    pub event: CalendarEvent,
    pub side_effects: SideEffects,
}

/// A signed change, in minutes, to one mentor's committed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourAdjustment {
    pub mentor_id: String,
    pub minutes: i64,
}

/// Works out the counter changes implied by moving an event from
/// `(old_mentor, old_minutes)` to `(new_mentor, new_minutes)`.
pub fn hour_adjustments(
    old_mentor: Option<&str>,
    old_minutes: i64,
    new_mentor: Option<&str>,
    new_minutes: i64,
) -> Vec<HourAdjustment> {
    let mut adjustments = Vec::new();
    match (old_mentor, new_mentor) {
        (Some(old), Some(new)) if old == new => {
            adjustments.push(HourAdjustment {
                mentor_id: new.to_string(),
                minutes: new_minutes - old_minutes,
            });
        }
        _ => {
            if let Some(old) = old_mentor {
                adjustments.push(HourAdjustment {
                    mentor_id: old.to_string(),
                    minutes: -old_minutes,
                });
            }
            if let Some(new) = new_mentor {
                adjustments.push(HourAdjustment {
                    mentor_id: new.to_string(),
                    minutes: new_minutes,
                });
            }
        }
    }
    adjustments.retain(|a| a.minutes != 0);
    adjustments
}

/// Minutes for an already stored event. Unreadable durations count as zero.
fn stored_minutes(event: &CalendarEvent) -> i64 {
    parse_minutes(&event.duration).unwrap_or_else(|| {
        warn!(event_id = %event.id, duration = %event.duration, "unreadable event duration");
        0
    })
}

fn required_minutes(duration: &str) -> PortResult<i64> {
    parse_minutes(duration)
        .ok_or_else(|| PortError::Validation(format!("cannot read duration '{}'", duration)))
}

impl Orchestrator {
    pub async fn create_event(
        &self,
        context: &SessionContext,
        input: NewEvent,
    ) -> PortResult<EventOutcome> {
        if input.title.trim().is_empty() {
            return Err(PortError::Validation("event title is required".to_string()));
        }
        let minutes = required_minutes(&input.duration)?;
        let org = context.organization_id.as_str();
        if let Some(mentor_id) = input.mentor_id.as_deref() {
            self.load_participant(org, mentor_id, Role::Mentor).await?;
        }

        let meeting_link = if input.kind.needs_meeting_link() {
            match self.providers.meetings.create_meeting_link(&input.title).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "meeting link creation failed; continuing without link");
                    None
                }
            }
        } else {
            None
        };

        let event = CalendarEvent {
            id: new_id(),
            organization_id: org.to_string(),
            title: input.title,
            description: input.description,
            date: input.date,
            time: input.time,
            duration: input.duration,
            mentor_id: input.mentor_id,
            participant_ids: input.participant_ids,
            kind: input.kind,
            meeting_link,
            sync: Default::default(),
            created_by: context.user_id.clone(),
            created_at: Utc::now(),
        };
        let event = self.store.create(org, event).await?;
        info!(event_id = %event.id, organization_id = org, "calendar event created");

        let mut effects = BestEffort::new("event_creation");
        if event.kind.needs_meeting_link() {
            effects.push(
                "calendar_sync",
                sync_to_calendars(self.clone(), event.clone(), context.user_id.clone()),
            );
        }
        if let Some(mentor_id) = &event.mentor_id {
            self.push_hour_adjustment(
                &mut effects,
                org,
                HourAdjustment {
                    mentor_id: mentor_id.clone(),
                    minutes,
                },
            );
        }
        self.push_participant_notices(&mut effects, &event, &context.user_id);

        Ok(EventOutcome {
            event,
            side_effects: effects.submit(),
        })
    }

    pub async fn update_event(
        &self,
        context: &SessionContext,
        event_id: &str,
        changes: EventChanges,
    ) -> PortResult<EventOutcome> {
        if changes.is_empty() {
            return Err(PortError::Validation("no event fields to update".to_string()));
        }
        if matches!(&changes.title, Some(t) if t.trim().is_empty()) {
            return Err(PortError::Validation("event title is required".to_string()));
        }
        let new_minutes = changes.duration.as_deref().map(required_minutes).transpose()?;
        let org = context.organization_id.as_str();
        if let Some(Some(mentor_id)) = changes.mentor_id.as_ref() {
            self.load_participant(org, mentor_id, Role::Mentor).await?;
        }

        let old: CalendarEvent = self.store.get_scoped(org, event_id).await?;
        self.require_event_editor(context, &old)?;

        self.store
            .update::<CalendarEvent>(org, event_id, to_document(&changes)?)
            .await?;
        let event = changes.apply_to(&old);
        info!(event_id, organization_id = org, "calendar event updated");

        let old_minutes = stored_minutes(&old);
        let new_minutes = new_minutes.unwrap_or(old_minutes);
        let mut effects = BestEffort::new("event_update");
        for adjustment in hour_adjustments(
            old.mentor_id.as_deref(),
            old_minutes,
            event.mentor_id.as_deref(),
            new_minutes,
        ) {
            self.push_hour_adjustment(&mut effects, org, adjustment);
        }

        Ok(EventOutcome {
            event,
            side_effects: effects.submit(),
        })
    }

    pub async fn delete_event(
        &self,
        context: &SessionContext,
        event_id: &str,
    ) -> PortResult<EventOutcome> {
        let org = context.organization_id.as_str();
        let event: CalendarEvent = self.store.get_scoped(org, event_id).await?;
        self.require_event_editor(context, &event)?;

        self.store.delete::<CalendarEvent>(org, event_id).await?;
        info!(event_id, organization_id = org, "calendar event deleted");

        let mut effects = BestEffort::new("event_deletion");
        if let Some(mentor_id) = &event.mentor_id {
            let minutes = -stored_minutes(&event);
            if minutes != 0 {
                self.push_hour_adjustment(
                    &mut effects,
                    org,
                    HourAdjustment {
                        mentor_id: mentor_id.clone(),
                        minutes,
                    },
                );
            }
        }
        Ok(EventOutcome {
            event,
            side_effects: effects.submit(),
        })
    }

    /// Creator, assigned mentor, or an admin.
    fn require_event_editor(&self, context: &SessionContext, event: &CalendarEvent) -> PortResult<()> {
        if event.created_by == context.user_id
            || event.mentor_id.as_deref() == Some(context.user_id.as_str())
        {
            return Ok(());
        }
        context.require_admin()
    }

    fn push_hour_adjustment(&self, effects: &mut BestEffort, org: &str, adjustment: HourAdjustment) {
        let store = self.store.clone();
        let org = org.to_string();
        effects.push(format!("mentor_hours:{}", adjustment.mentor_id), async move {
            store
                .adjust_counter::<User>(&org, &adjustment.mentor_id, MINUTES_FIELD, adjustment.minutes)
                .await
        });
    }

    fn push_participant_notices(&self, effects: &mut BestEffort, event: &CalendarEvent, creator: &str) {
        let mut recipients: Vec<&String> = event.participant_ids.iter().collect();
        if let Some(mentor_id) = &event.mentor_id {
            if !recipients.contains(&mentor_id) {
                recipients.push(mentor_id);
            }
        }
        for recipient in recipients.into_iter().filter(|id| id.as_str() != creator) {
            let notification = Notification::new(
                &event.organization_id,
                recipient,
                NotificationKind::Meeting,
                "New meeting scheduled",
                format!("{} on {}", event.title, event.date),
            );
            effects.push(
                format!("notification:{}", recipient),
                deliver_notification(self.store.clone(), self.providers.push.clone(), notification),
            );

            let store = self.store.clone();
            let email = self.providers.email.clone();
            let user_id = recipient.clone();
            let data = json!({
                "title": event.title,
                "date": event.date,
                "time": event.time,
                "duration": event.duration,
                "meetingLink": event.meeting_link,
            });
            effects.push(format!("email:{}", recipient), async move {
                let user: User = store
                    .get(&user_id)
                    .await?
                    .ok_or_else(|| PortError::NotFound(format!("users {}", user_id)))?;
                send_email(email, EmailKind::MeetingScheduled, user.email, data).await
            });
        }
    }
}

/// Federates the event to external calendars, then records the sync markers.
async fn sync_to_calendars(
    orchestrator: Orchestrator,
    event: CalendarEvent,
    owner_id: String,
) -> PortResult<()> {
    let ids = orchestrator
        .providers
        .calendar
        .create_event_everywhere(&event, &owner_id, event.meeting_link.as_deref())
        .await?;
    let store: &StoreClient = &orchestrator.store;
    store
        .update::<CalendarEvent>(
            &event.organization_id,
            &event.id,
            json!({
                "sync": {
                    "googleSynced": ids.google_id.is_some(),
                    "googleEventId": ids.google_id,
                    "outlookSynced": ids.outlook_id.is_some(),
                    "outlookEventId": ids.outlook_id,
                    "appleSynced": ids.apple_id.is_some(),
                    "appleEventId": ids.apple_id,
                }
            }),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_change_moves_the_difference() {
        let adjustments = hour_adjustments(Some("m1"), 60, Some("m1"), 150);
        assert_eq!(
            adjustments,
            vec![HourAdjustment {
                mentor_id: "m1".to_string(),
                minutes: 90
            }]
        );
    }

    #[test]
    fn mentor_change_moves_hours_between_mentors() {
        let adjustments = hour_adjustments(Some("m1"), 60, Some("m2"), 120);
        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[0].mentor_id, "m1");
        assert_eq!(adjustments[0].minutes, -60);
        assert_eq!(adjustments[1].mentor_id, "m2");
        assert_eq!(adjustments[1].minutes, 120);
    }

    #[test]
    fn unchanged_events_adjust_nothing() {
        assert!(hour_adjustments(Some("m1"), 60, Some("m1"), 60).is_empty());
        assert!(hour_adjustments(None, 60, None, 180).is_empty());
    }

    #[test]
    fn unassigning_a_mentor_returns_their_hours() {
        let adjustments = hour_adjustments(Some("m1"), 90, None, 90);
        assert_eq!(
            adjustments,
            vec![HourAdjustment {
                mentor_id: "m1".to_string(),
                minutes: -90
            }]
        );
    }

    #[test]
    fn explicit_null_unassigns_the_mentor() {
        let changes: EventChanges = serde_json::from_str(r#"{ "mentorId": null }"#).unwrap();
        assert_eq!(changes.mentor_id, Some(None));
        let changes: EventChanges = serde_json::from_str(r#"{ "title": "Sync" }"#).unwrap();
        assert_eq!(changes.mentor_id, None);

        let patch = to_document(&EventChanges {
            mentor_id: Some(None),
            ..Default::default()
        })
        .unwrap();
        assert!(patch["mentorId"].is_null());
        assert!(patch.get("title").is_none());
    }
}
