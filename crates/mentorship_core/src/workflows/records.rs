//! Single-record workflows: goals, ratings, library content, blog posts,
//! organization settings and billing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{deliver_notification, Orchestrator};
use crate::domain::{
    new_id, BlogPost, Branding, Content, Goal, Notification, NotificationKind, Organization,
    ProgramSettings, Rating, SubscriptionStatus, User,
};
use crate::executor::BestEffort;
use crate::ports::{PortError, PortResult};
use crate::session::SessionContext;
use crate::store::{to_document, ContentCollection};

//=========================================================================================
// Inputs
//=========================================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGoal {
    /// Defaults to the signed-in user.
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRating {
    pub to_user_id: String,
    pub score: i32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Blog posts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlogPost {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branding: Option<Branding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramSettings>,
}

/// A subscription change reported by the billing provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingUpdate {
    pub organization_id: String,
    pub subscription_status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

fn require_title(title: &str) -> PortResult<()> {
    if title.trim().is_empty() {
        return Err(PortError::Validation("title is required".to_string()));
    }
    Ok(())
}

impl Orchestrator {
    //=====================================================================================
    // Goals and ratings
    //=====================================================================================

    pub async fn create_goal(&self, context: &SessionContext, input: NewGoal) -> PortResult<Goal> {
        require_title(&input.title)?;
        let owner = input.user_id.unwrap_or_else(|| context.user_id.clone());
        context.require_self_or_admin(&owner)?;
        let org = context.organization_id.as_str();

        let organization: Organization = self.store.get_scoped(org, org).await?;
        if !organization.program.goals_enabled {
            return Err(PortError::Validation(
                "goals are disabled for this program".to_string(),
            ));
        }

        let goal = Goal::new(org, owner, input.title.trim(), input.description, input.due_date);
        let goal = self.store.create(org, goal).await?;
        info!(goal_id = %goal.id, user_id = %goal.user_id, "goal created");
        Ok(goal)
    }

    pub async fn submit_rating(&self, context: &SessionContext, input: NewRating) -> PortResult<Rating> {
        if !(1..=5).contains(&input.score) {
            return Err(PortError::Validation(format!(
                "rating score must be between 1 and 5, got {}",
                input.score
            )));
        }
        if input.to_user_id == context.user_id {
            return Err(PortError::Validation("users cannot rate themselves".to_string()));
        }
        let org = context.organization_id.as_str();
        let organization: Organization = self.store.get_scoped(org, org).await?;
        if !organization.program.ratings_enabled {
            return Err(PortError::Validation(
                "ratings are disabled for this program".to_string(),
            ));
        }
        let rated: User = self.store.get_scoped(org, &input.to_user_id).await?;

        let rating = Rating {
            id: new_id(),
            organization_id: org.to_string(),
            from_user_id: context.user_id.clone(),
            to_user_id: rated.id.clone(),
            score: input.score as u8,
            comment: input.comment,
            is_approved: !organization.program.require_rating_approval,
            created_at: Utc::now(),
        };
        let rating = self.store.create(org, rating).await?;
        info!(rating_id = %rating.id, approved = rating.is_approved, "rating submitted");

        if rating.is_approved {
            let mut effects = BestEffort::new("rating");
            let notification = Notification::new(
                org,
                &rated.id,
                NotificationKind::Rating,
                "You received a rating",
                format!("You were rated {} out of 5.", rating.score),
            );
            effects.push(
                format!("notification:{}", rated.id),
                deliver_notification(self.store.clone(), self.providers.push.clone(), notification),
            );
            effects.submit();
        }
        Ok(rating)
    }

    //=====================================================================================
    // Library content
    //=====================================================================================

    /// Admins add organization items; with `platform` set, platform admins add
    /// items every organization sees.
    pub async fn create_content<K: ContentCollection>(
        &self,
        context: &SessionContext,
        input: NewContent,
        platform: bool,
    ) -> PortResult<Content<K>> {
        require_title(&input.title)?;
        let owner = self.content_owner(context, platform)?;
        let mut item = Content::<K>::new(
            owner.clone(),
            input.title.trim(),
            input.description,
            context.authorizer.user_id.clone(),
        );
        item.url = input.url;
        item.body = input.body;
        item.category = input.category;

        let item = match owner {
            Some(org) => self.store.create(&org, item).await?,
            None => self.store.create_platform(item).await?,
        };
        info!(kind = K::LABEL, id = %item.id, platform, "content created");
        Ok(item)
    }

    pub async fn update_content<K: ContentCollection>(
        &self,
        context: &SessionContext,
        id: &str,
        changes: ContentChanges,
    ) -> PortResult<Content<K>> {
        if changes.published.is_some() {
            return Err(PortError::Validation(format!(
                "a {} has no published flag",
                K::LABEL
            )));
        }
        if matches!(&changes.title, Some(t) if t.trim().is_empty()) {
            return Err(PortError::Validation("title is required".to_string()));
        }
        let org = context.organization_id.as_str();
        let existing: Content<K> = self.store.get_scoped(org, id).await?;
        let fields = to_document(&changes)?;
        if existing.is_platform {
            context.require_platform_admin()?;
            self.store.update_platform::<Content<K>>(id, fields).await?;
        } else {
            context.require_admin()?;
            self.store.update::<Content<K>>(org, id, fields).await?;
        }
        self.store.get_scoped(org, id).await
    }

    pub async fn delete_content<K: ContentCollection>(
        &self,
        context: &SessionContext,
        id: &str,
    ) -> PortResult<()> {
        let org = context.organization_id.as_str();
        let existing: Content<K> = self.store.get_scoped(org, id).await?;
        if existing.is_platform {
            context.require_platform_admin()?;
            self.store.delete_platform::<Content<K>>(id).await?;
        } else {
            context.require_admin()?;
            self.store.delete::<Content<K>>(org, id).await?;
        }
        info!(kind = K::LABEL, id, "content deleted");
        Ok(())
    }

    pub async fn create_blog_post(
        &self,
        context: &SessionContext,
        input: NewBlogPost,
        platform: bool,
    ) -> PortResult<BlogPost> {
        require_title(&input.title)?;
        let owner = self.content_owner(context, platform)?;
        let post = BlogPost {
            id: new_id(),
            is_platform: owner.is_none(),
            organization_id: owner.clone(),
            title: input.title.trim().to_string(),
            body: input.body,
            author_id: context.authorizer.user_id.clone(),
            published: input.published,
            created_at: Utc::now(),
        };
        let post = match owner {
            Some(org) => self.store.create(&org, post).await?,
            None => self.store.create_platform(post).await?,
        };
        info!(id = %post.id, platform, published = post.published, "blog post created");
        Ok(post)
    }

    pub async fn update_blog_post(
        &self,
        context: &SessionContext,
        id: &str,
        changes: ContentChanges,
    ) -> PortResult<BlogPost> {
        if changes.url.is_some() || changes.category.is_some() || changes.description.is_some() {
            return Err(PortError::Validation(
                "blog posts only change title, body and published".to_string(),
            ));
        }
        let org = context.organization_id.as_str();
        let existing: BlogPost = self.store.get_scoped(org, id).await?;
        let fields = to_document(&changes)?;
        if existing.is_platform {
            context.require_platform_admin()?;
            self.store.update_platform::<BlogPost>(id, fields).await?;
        } else {
            context.require_admin()?;
            self.store.update::<BlogPost>(org, id, fields).await?;
        }
        self.store.get_scoped(org, id).await
    }

    pub async fn delete_blog_post(&self, context: &SessionContext, id: &str) -> PortResult<()> {
        let org = context.organization_id.as_str();
        let existing: BlogPost = self.store.get_scoped(org, id).await?;
        if existing.is_platform {
            context.require_platform_admin()?;
            self.store.delete_platform::<BlogPost>(id).await
        } else {
            context.require_admin()?;
            self.store.delete::<BlogPost>(org, id).await
        }
    }

    fn content_owner(&self, context: &SessionContext, platform: bool) -> PortResult<Option<String>> {
        if platform {
            context.require_platform_admin()?;
            Ok(None)
        } else {
            context.require_admin()?;
            Ok(Some(context.organization_id.clone()))
        }
    }

    //=====================================================================================
    // Organization settings and billing
    //=====================================================================================

    pub async fn update_organization_settings(
        &self,
        context: &SessionContext,
        settings: OrganizationSettings,
    ) -> PortResult<Organization> {
        context.require_admin()?;
        if matches!(&settings.name, Some(n) if n.trim().is_empty()) {
            return Err(PortError::Validation("organization name is required".to_string()));
        }
        let org = context.organization_id.as_str();
        self.store
            .update::<Organization>(org, org, to_document(&settings)?)
            .await?;
        info!(organization_id = org, "organization settings updated");
        self.store.get_scoped(org, org).await
    }

    /// Returns the hosted checkout URL for the requested plan.
    pub async fn start_checkout(&self, context: &SessionContext, plan: &str) -> PortResult<String> {
        context.require_admin()?;
        if plan.trim().is_empty() {
            return Err(PortError::Validation("a plan is required".to_string()));
        }
        let org = context.organization_id.as_str();
        let organization: Organization = self.store.get_scoped(org, org).await?;
        let url = self.providers.billing.create_checkout(&organization, plan).await?;
        info!(organization_id = org, plan, "checkout started");
        Ok(url)
    }

    /// Records a subscription change reported by the billing provider.
    pub async fn apply_billing_status(&self, update: BillingUpdate) -> PortResult<Organization> {
        let org = update.organization_id.as_str();
        self.store
            .update::<Organization>(
                org,
                org,
                json!({
                    "subscriptionStatus": update.subscription_status,
                    "trialEndsAt": update.trial_ends_at,
                }),
            )
            .await?;
        info!(organization_id = org, status = ?update.subscription_status, "billing status applied");
        self.store.get_scoped(org, org).await
    }
}
