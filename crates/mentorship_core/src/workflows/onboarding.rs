//! First-run onboarding. The payload shape is chosen by role and checked
//! against the signed-in user's role before anything is written.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::Orchestrator;
use crate::domain::{Goal, Role, User};
use crate::ports::{PortError, PortResult};
use crate::session::SessionContext;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorOnboarding {
    pub title: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub expertise: Vec<String>,
    pub availability: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialGoal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenteeOnboarding {
    pub title: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub goals: Vec<InitialGoal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum OnboardingPayload {
    Mentor(MentorOnboarding),
    Mentee(MenteeOnboarding),
}

impl OnboardingPayload {
    pub fn role(&self) -> Role {
        match self {
            OnboardingPayload::Mentor(_) => Role::Mentor,
            OnboardingPayload::Mentee(_) => Role::Mentee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OnboardingOutcome {
    pub user: User,
    pub goals: Vec<Goal>,
}

fn put_text(fields: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(text) = value.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        fields.insert(key.to_string(), json!(text));
    }
}

impl Orchestrator {
    pub async fn complete_onboarding(
        &self,
        context: &SessionContext,
        payload: OnboardingPayload,
    ) -> PortResult<OnboardingOutcome> {
        let org = context.organization_id.as_str();
        let user: User = self.store.get_scoped(org, &context.user_id).await?;
        if user.role != payload.role() {
            return Err(PortError::Validation(format!(
                "{} onboarding does not apply to a {}",
                payload.role(),
                user.role
            )));
        }

        let mut fields = Map::new();
        let mut new_goals = Vec::new();
        match &payload {
            OnboardingPayload::Mentor(mentor) => {
                put_text(&mut fields, "title", &mentor.title);
                put_text(&mut fields, "company", &mentor.company);
                put_text(&mut fields, "bio", &mentor.bio);
                put_text(&mut fields, "availability", &mentor.availability);
                fields.insert("skills".to_string(), json!(mentor.expertise));
            }
            OnboardingPayload::Mentee(mentee) => {
                if mentee.goals.iter().any(|g| g.title.trim().is_empty()) {
                    return Err(PortError::Validation("goal titles cannot be blank".to_string()));
                }
                put_text(&mut fields, "title", &mentee.title);
                put_text(&mut fields, "company", &mentee.company);
                put_text(&mut fields, "bio", &mentee.bio);
                fields.insert(
                    "goals".to_string(),
                    json!(mentee.goals.iter().map(|g| g.title.trim()).collect::<Vec<_>>()),
                );
                if !mentee.interests.is_empty() {
                    fields.insert("skills".to_string(), json!(mentee.interests));
                }
                new_goals = mentee
                    .goals
                    .iter()
                    .map(|g| Goal::new(org, &user.id, g.title.trim(), g.description.clone(), g.due_date))
                    .collect();
            }
        }
        fields.insert("onboardingComplete".to_string(), json!(true));

        let mut goals = Vec::with_capacity(new_goals.len());
        for goal in new_goals {
            goals.push(self.store.create(org, goal).await?);
        }
        self.store
            .update::<User>(org, &user.id, Value::Object(fields))
            .await?;
        let user: User = self.store.get_scoped(org, &user.id).await?;
        info!(user_id = %user.id, role = %user.role, goals = goals.len(), "onboarding complete");

        Ok(OnboardingOutcome { user, goals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape_is_selected_by_role() {
        let payload: OnboardingPayload = serde_json::from_value(json!({
            "role": "mentee",
            "bio": "Learning Rust",
            "goals": [{ "title": "Ship a crate" }]
        }))
        .unwrap();
        assert_eq!(payload.role(), Role::Mentee);
        let OnboardingPayload::Mentee(mentee) = payload else {
            panic!("expected mentee payload");
        };
        assert_eq!(mentee.goals[0].title, "Ship a crate");

        let payload: OnboardingPayload =
            serde_json::from_value(json!({ "role": "mentor", "expertise": ["systems"] })).unwrap();
        assert_eq!(payload.role(), Role::Mentor);

        assert!(serde_json::from_value::<OnboardingPayload>(json!({ "role": "admin" })).is_err());
    }
}
