//! Match creation: the match record is the prerequisite; chat seeding,
//! notifications and emails are best-effort.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{deliver_notification, send_email, Orchestrator};
use crate::domain::{
    new_id, ChatMessage, Match, MatchStatus, Notification, NotificationKind, Role, User,
};
use crate::executor::{BestEffort, SideEffects};
use crate::ports::{EmailKind, PortError, PortResult};
use crate::session::SessionContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    pub mentor_id: String,
    pub mentee_id: String,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub record: Match,
    pub side_effects: SideEffects,
}

impl Orchestrator {
    pub async fn create_match(
        &self,
        context: &SessionContext,
        input: NewMatch,
    ) -> PortResult<MatchOutcome> {
        context.require_admin()?;
        if input.mentor_id.trim().is_empty() || input.mentee_id.trim().is_empty() {
            return Err(PortError::Validation(
                "both a mentor and a mentee are required".to_string(),
            ));
        }
        if input.mentor_id == input.mentee_id {
            return Err(PortError::Validation(
                "a user cannot be matched with themselves".to_string(),
            ));
        }

        let org = context.organization_id.as_str();
        let (mentor, mentee) = futures::try_join!(
            self.load_participant(org, &input.mentor_id, Role::Mentor),
            self.load_participant(org, &input.mentee_id, Role::Mentee),
        )?;

        let record = Match {
            id: new_id(),
            organization_id: org.to_string(),
            mentor_id: mentor.id.clone(),
            mentee_id: mentee.id.clone(),
            status: MatchStatus::Active,
            start_date: Utc::now(),
        };
        let record = self.store.create(org, record).await?;
        info!(match_id = %record.id, mentor_id = %mentor.id, mentee_id = %mentee.id, "match created");

        let mut effects = BestEffort::new("match_creation");
        let welcome = format!(
            "Welcome! {} and {} are now matched. Say hello to get started.",
            mentor.name, mentee.name
        );
        // The mentor's chat view lists the thread under the mentee's id, and vice versa.
        for chat_id in [&mentee.id, &mentor.id] {
            let message = ChatMessage {
                id: new_id(),
                organization_id: org.to_string(),
                chat_id: chat_id.clone(),
                sender_id: mentor.id.clone(),
                text: welcome.clone(),
                created_at: Utc::now(),
            };
            let store = self.store.clone();
            effects.push(format!("chat_message:{}", chat_id), async move {
                store.create(&message.organization_id.clone(), message).await?;
                Ok(())
            });
        }

        let to_mentee = Notification::new(
            org,
            &mentee.id,
            NotificationKind::Match,
            "You have a new mentor",
            format!("You have been matched with {}.", mentor.name),
        )
        .with_chat_link(&mentor.id);
        let to_mentor = Notification::new(
            org,
            &mentor.id,
            NotificationKind::Match,
            "You have a new mentee",
            format!("You have been matched with {}.", mentee.name),
        )
        .with_chat_link(&mentee.id);
        for notification in [to_mentee, to_mentor] {
            let step = format!("notification:{}", notification.user_id);
            effects.push(
                step,
                deliver_notification(self.store.clone(), self.providers.push.clone(), notification),
            );
        }

        for (recipient, counterpart) in [(&mentee, &mentor), (&mentor, &mentee)] {
            effects.push(
                format!("email:{}", recipient.id),
                send_email(
                    self.providers.email.clone(),
                    EmailKind::MatchCreated,
                    recipient.email.clone(),
                    json!({ "name": recipient.name, "matchName": counterpart.name }),
                ),
            );
        }

        Ok(MatchOutcome {
            record,
            side_effects: effects.submit(),
        })
    }

    pub(super) async fn load_participant(
        &self,
        org: &str,
        user_id: &str,
        expected: Role,
    ) -> PortResult<User> {
        let user: User = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("users {}", user_id)))?;
        if user.organization_id != org {
            return Err(PortError::tenant_mismatch("users", user_id, org));
        }
        if user.role != expected {
            return Err(PortError::Validation(format!(
                "{} has role {} but a {} is required",
                user.name, user.role, expected
            )));
        }
        Ok(user)
    }
}
