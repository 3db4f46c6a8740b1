//! Invitations, invitation acceptance, and self-signup by join code.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{send_email, Orchestrator};
use crate::domain::{new_id, Invitation, InvitationStatus, Organization, Role, User};
use crate::executor::{BestEffort, SideEffects};
use crate::ports::{EmailKind, Filter, PortError, PortResult};
use crate::session::SessionContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvitation {
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug)]
pub struct InvitationOutcome {
    pub invitation: Invitation,
    /// True when a pending invitation for the same address was returned instead.
    pub reused: bool,
    pub side_effects: SideEffects,
}

/// Identity details of someone completing a signup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signup {
    pub name: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
}

fn normalize_email(email: &str) -> PortResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(PortError::Validation(format!("'{}' is not an email address", email))),
    }
}

impl Orchestrator {
    pub async fn invite(
        &self,
        context: &SessionContext,
        input: NewInvitation,
    ) -> PortResult<InvitationOutcome> {
        context.require_admin()?;
        if input.role == Role::PlatformAdmin {
            return Err(PortError::Validation(
                "platform admins cannot be invited into an organization".to_string(),
            ));
        }
        let email = normalize_email(&input.email)?;
        let org = context.organization_id.as_str();

        let pending = self
            .store
            .list_by_organization::<Invitation>(
                org,
                &[
                    Filter::eq("email", email.as_str()),
                    Filter::eq("status", "pending"),
                ],
            )
            .await?;

        let (invitation, reused) = match pending.into_iter().next() {
            Some(existing) => (existing, true),
            None => {
                let token = new_id().replace('-', "");
                let invitation = Invitation {
                    id: new_id(),
                    organization_id: org.to_string(),
                    email,
                    name: input.name.trim().to_string(),
                    role: input.role,
                    status: InvitationStatus::Pending,
                    link: format!(
                        "{}/join?token={}",
                        self.settings.app_base_url.trim_end_matches('/'),
                        token
                    ),
                    token,
                    invited_by: context.user_id.clone(),
                    created_at: Utc::now(),
                    accepted_at: None,
                };
                (self.store.create(org, invitation).await?, false)
            }
        };
        info!(invitation_id = %invitation.id, organization_id = org, reused, "invitation ready");

        let organization: Organization = self.store.get_scoped(org, org).await?;
        let mut effects = BestEffort::new("invitation");
        effects.push(
            format!("email:{}", invitation.email),
            send_email(
                self.providers.email.clone(),
                EmailKind::Invitation,
                invitation.email.clone(),
                json!({
                    "name": invitation.name,
                    "organizationName": organization.name,
                    "role": invitation.role,
                    "link": invitation.link,
                }),
            ),
        );

        Ok(InvitationOutcome {
            invitation,
            reused,
            side_effects: effects.submit(),
        })
    }

    pub async fn find_invitation(&self, token: &str) -> PortResult<Option<Invitation>> {
        self.store.find_one_by::<Invitation>("token", token).await
    }

    /// Accepts a pending invitation, creating the invited user. Succeeds at most once.
    pub async fn complete_signup(&self, token: &str, signup: Signup) -> PortResult<User> {
        let invitation = self
            .find_invitation(token)
            .await?
            .ok_or_else(|| PortError::NotFound("invitation".to_string()))?;
        match invitation.status {
            InvitationStatus::Pending => {}
            InvitationStatus::Accepted => {
                return Err(PortError::Validation(
                    "invitation has already been accepted".to_string(),
                ))
            }
            InvitationStatus::Expired => {
                return Err(PortError::Validation("invitation has expired".to_string()))
            }
        }
        if Utc::now() - invitation.created_at > self.settings.invitation_ttl {
            return Err(PortError::Validation("invitation has expired".to_string()));
        }

        let org = invitation.organization_id.as_str();
        // Only one caller can move the invitation out of pending.
        let claimed = self
            .store
            .update_if::<Invitation>(
                org,
                &invitation.id,
                &[Filter::eq("status", "pending")],
                json!({ "status": InvitationStatus::Accepted, "acceptedAt": Utc::now() }),
            )
            .await?;
        if !claimed {
            return Err(PortError::Validation("invitation is no longer pending".to_string()));
        }

        let name = signup
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| invitation.name.clone());
        let mut user = User::new(org, invitation.role, name, invitation.email.clone());
        user.external_id = signup.external_id;
        let user = match self.store.create(org, user).await {
            Ok(user) => user,
            Err(e) => {
                warn!(
                    invitation_id = %invitation.id,
                    kind = e.kind(),
                    error = %e,
                    "signup failed; releasing invitation"
                );
                self.release_invitation(org, &invitation.id).await;
                return Err(e);
            }
        };
        info!(user_id = %user.id, organization_id = org, role = %user.role, "invitation accepted");

        self.welcome(&user).submit();
        Ok(user)
    }

    /// Puts a claimed invitation back to pending so the signup can be retried.
    async fn release_invitation(&self, org: &str, invitation_id: &str) {
        let released = self
            .store
            .update_if::<Invitation>(
                org,
                invitation_id,
                &[Filter::eq("status", "accepted")],
                json!({ "status": InvitationStatus::Pending, "acceptedAt": null }),
            )
            .await;
        if let Err(e) = released {
            error!(invitation_id, kind = e.kind(), error = %e, "could not release invitation");
        }
    }

    /// Marks pending invitations older than the configured lifetime as expired.
    pub async fn expire_stale_invitations(&self, context: &SessionContext) -> PortResult<usize> {
        context.require_admin()?;
        let org = context.organization_id.as_str();
        let cutoff = Utc::now() - self.settings.invitation_ttl;
        let pending = self
            .store
            .list_by_organization::<Invitation>(org, &[Filter::eq("status", "pending")])
            .await?;

        let mut expired = 0;
        for invitation in pending.into_iter().filter(|i| i.created_at < cutoff) {
            self.store
                .update::<Invitation>(org, &invitation.id, json!({ "status": InvitationStatus::Expired }))
                .await?;
            expired += 1;
        }
        if expired > 0 {
            info!(organization_id = org, expired, "stale invitations expired");
        }
        Ok(expired)
    }

    pub async fn find_organization_by_code(&self, join_code: &str) -> PortResult<Option<Organization>> {
        self.store
            .find_one_by::<Organization>("joinCode", &join_code.trim().to_uppercase())
            .await
    }

    /// Self-signup into an organization. The new user is always a mentee.
    pub async fn join_with_code(&self, join_code: &str, signup: Signup) -> PortResult<User> {
        let organization = self
            .find_organization_by_code(join_code)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("organization with code {}", join_code)))?;
        let email = normalize_email(signup.email.as_deref().unwrap_or_default())?;
        let name = signup
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| PortError::Validation("name is required".to_string()))?;

        let org = organization.id.as_str();
        if let Some(external_id) = signup.external_id.as_deref() {
            let existing = self
                .store
                .list_by_organization::<User>(org, &[Filter::eq("externalId", external_id)])
                .await?;
            if !existing.is_empty() {
                return Err(PortError::Validation(
                    "this account already belongs to the organization".to_string(),
                ));
            }
        }

        let mut user = User::new(org, Role::Mentee, name, email);
        user.external_id = signup.external_id;
        let user = self.store.create(org, user).await?;
        info!(user_id = %user.id, organization_id = org, "mentee joined with code");

        self.welcome(&user).submit();
        Ok(user)
    }

    fn welcome(&self, user: &User) -> BestEffort {
        let mut effects = BestEffort::new("signup");
        effects.push(
            format!("email:{}", user.id),
            send_email(
                self.providers.email.clone(),
                EmailKind::Welcome,
                user.email.clone(),
                json!({ "name": user.name, "role": user.role }),
            ),
        );
        effects
    }
}
