mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{seed_organization, seed_user, Harness};
use mentorship_core::domain::{
    BlogPost, Goal, GoalStatus, Notification, NotificationKind, Rating, Resource, Role, User,
};
use mentorship_core::ports::{Collection, PortError};
use mentorship_core::session::{SessionContext, SyncSession};
use mentorship_core::workflows::{NewContent, NewGoal};
use mentorship_core::{DataAggregator, Paginator};

async fn notify(h: &Harness, user: &User, title: &str) -> Notification {
    let notification = Notification::new(&h.org.id, &user.id, NotificationKind::System, title, "");
    h.client.create(&h.org.id, notification).await.unwrap()
}

async fn wait_until(session: &SyncSession, done: impl Fn(&mentorship_core::OrgSnapshot) -> bool) {
    let mut changes = session.aggregator().subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done(&session.snapshot()) {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("snapshot never reached the expected state");
}

//=========================================================================================
// Snapshot loading
//=========================================================================================

#[tokio::test]
async fn guests_never_read_the_store() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let before = h.store.reads();

    let guest = DataAggregator::new(h.client.clone(), None, Some(&h.org.id));
    assert!(guest.is_guest());
    guest.refresh().await?;

    assert_eq!(h.store.reads(), before);
    let state = guest.state();
    assert!(!state.loading);
    assert!(state.snapshot.users.is_empty());
    assert!(state.snapshot.current_user.is_none());
    Ok(())
}

#[tokio::test]
async fn snapshots_only_hold_the_tenants_records() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let other = seed_organization(&h.client, "Globex").await;
    let outsider = seed_user(&h.client, &other, Role::Mentee, "Otto").await;
    h.client
        .create(&other.id, Goal::new(&other.id, &outsider.id, "Elsewhere", "", None))
        .await?;
    h.client
        .create(&h.org.id, Goal::new(&h.org.id, &h.mentee.id, "Here", "", None))
        .await?;
    notify(&h, &h.mentee, "for the mentee").await;
    notify(&h, &h.mentor, "for the mentor").await;

    let aggregator = DataAggregator::new(h.client.clone(), Some(&h.mentee.id), Some(&h.org.id));
    aggregator.refresh().await?;
    let snapshot = aggregator.snapshot();

    assert_eq!(snapshot.current_user.as_ref().map(|u| u.id.as_str()), Some(h.mentee.id.as_str()));
    assert_eq!(snapshot.users.len(), 3);
    assert!(snapshot.users.iter().all(|u| u.organization_id == h.org.id));
    assert_eq!(snapshot.goals.len(), 1);
    assert_eq!(snapshot.goals[0].title, "Here");
    assert_eq!(snapshot.notifications.len(), 1);
    assert_eq!(snapshot.notifications[0].user_id, h.mentee.id);
    assert_eq!(
        snapshot.organization.as_ref().map(|o| o.id.as_str()),
        Some(h.org.id.as_str())
    );
    assert!(snapshot.program_settings.is_some());
    Ok(())
}

#[tokio::test]
async fn platform_content_is_listed_before_the_tenants_own() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let platform_org = seed_organization(&h.client, "Platform").await;
    let operator = seed_user(&h.client, &platform_org, Role::PlatformAdmin, "Op").await;

    let own = h
        .orchestrator
        .create_content::<mentorship_core::domain::ResourceKind>(
            &SessionContext::for_user(&h.admin),
            NewContent {
                title: "Our handbook".to_string(),
                ..Default::default()
            },
            false,
        )
        .await?;
    let shared = h
        .orchestrator
        .create_content::<mentorship_core::domain::ResourceKind>(
            &SessionContext::for_user(&operator),
            NewContent {
                title: "Platform guide".to_string(),
                ..Default::default()
            },
            true,
        )
        .await?;
    let draft = BlogPost {
        id: mentorship_core::domain::new_id(),
        organization_id: None,
        is_platform: true,
        title: "Draft".to_string(),
        body: String::new(),
        author_id: operator.id.clone(),
        published: false,
        created_at: chrono::Utc::now(),
    };
    h.client.create_platform(draft).await?;

    let aggregator = DataAggregator::new(h.client.clone(), Some(&h.admin.id), Some(&h.org.id));
    aggregator.refresh().await?;
    let snapshot = aggregator.snapshot();

    let ids: Vec<&str> = snapshot.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![shared.id.as_str(), own.id.as_str()]);
    assert!(snapshot.blog_posts.is_empty());
    Ok(())
}

#[tokio::test]
async fn a_failed_refresh_keeps_the_previous_snapshot() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let aggregator = DataAggregator::new(h.client.clone(), Some(&h.admin.id), Some(&h.org.id));
    aggregator.refresh().await?;
    let loaded = aggregator.snapshot();

    h.store.fail_reads();
    let err = aggregator.refresh().await.unwrap_err();
    assert!(matches!(err, PortError::Transient(_)));

    let state = aggregator.state();
    assert!(Arc::ptr_eq(&state.snapshot, &loaded));
    assert_eq!(state.error, Some(err));
    assert!(!state.loading);

    h.store.heal();
    aggregator.refresh().await?;
    assert!(aggregator.state().error.is_none());
    Ok(())
}

#[tokio::test]
async fn a_superseded_refresh_never_replaces_the_newer_snapshot() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let aggregator = DataAggregator::new(h.client.clone(), Some(&h.admin.id), Some(&h.org.id));
    aggregator.refresh().await?;
    let initial = aggregator.snapshot();
    let mut changes = aggregator.subscribe();

    h.store.slow_reads(Duration::from_millis(50));
    let (older, (newer, after_newer), seen) = tokio::join!(
        aggregator.refresh(),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.store.slow_reads(Duration::ZERO);
            h.client
                .create(&h.org.id, Goal::new(&h.org.id, &h.mentee.id, "Fresh", "", None))
                .await
                .unwrap();
            let result = aggregator.refresh().await;
            (result, aggregator.snapshot())
        },
        async {
            let mut seen = Vec::new();
            loop {
                let changed =
                    tokio::time::timeout(Duration::from_millis(150), changes.changed()).await;
                if !matches!(changed, Ok(Ok(()))) {
                    break;
                }
                seen.push(changes.borrow_and_update().snapshot.clone());
            }
            seen
        },
    );
    older?;
    newer?;

    assert_eq!(after_newer.goals.len(), 1);
    assert!(Arc::ptr_eq(&aggregator.snapshot(), &after_newer));
    // Observers only ever see whole snapshots: the old one or the newest.
    assert!(seen
        .iter()
        .all(|s| Arc::ptr_eq(s, &initial) || Arc::ptr_eq(s, &after_newer)));
    assert!(!aggregator.state().loading);
    Ok(())
}

//=========================================================================================
// Sessions and optimistic mutations
//=========================================================================================

#[tokio::test]
async fn failed_writes_roll_the_snapshot_back() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let notification = notify(&h, &h.mentee, "hello").await;
    let session =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.mentee), Duration::ZERO)
            .await?;

    h.store.fail_writes_to(Collection::Notifications);
    let err = session
        .mark_notification_read(&notification.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Transient(_)));
    assert!(!session.snapshot().notifications[0].is_read);
    // Supersedes the resync scheduled by the failure.
    session.refresh().await?;

    h.store.heal();
    session.mark_notification_read(&notification.id).await?;
    wait_until(&session, |s| s.notifications[0].is_read).await;
    let stored: Notification = h.client.get_scoped(&h.org.id, &notification.id).await?;
    assert!(stored.is_read);
    session.close();
    Ok(())
}

#[tokio::test]
async fn only_owners_touch_their_notifications() -> anyhow::Result<()> {
    let h = Harness::new().await;
    notify(&h, &h.mentee, "one").await;
    notify(&h, &h.mentee, "two").await;
    let session =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.mentee), Duration::ZERO)
            .await?;

    session.mark_all_notifications_read().await?;
    wait_until(&session, |s| s.notifications.iter().all(|n| n.is_read)).await;

    let first = session.snapshot().notifications[0].id.clone();
    session.delete_notification(&first).await?;
    assert!(h.client.get::<Notification>(&first).await?.is_none());
    wait_until(&session, |s| s.notifications.len() == 1).await;

    // Notifications of other users are not part of this session's snapshot.
    let theirs = notify(&h, &h.mentor, "not yours").await;
    let err = session.delete_notification(&theirs.id).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
    assert!(h.client.get::<Notification>(&theirs.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn goal_progress_is_clamped_and_drives_status() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let goal = h
        .client
        .create(&h.org.id, Goal::new(&h.org.id, &h.mentee.id, "Ship it", "", None))
        .await?;
    let session =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.mentee), Duration::ZERO)
            .await?;

    let updated = session.update_goal_progress(&goal.id, 150).await?;
    assert_eq!(updated.progress, 100);
    assert_eq!(updated.status, GoalStatus::Completed);

    let updated = session.update_goal_progress(&goal.id, 40).await?;
    assert_eq!(updated.status, GoalStatus::InProgress);
    let stored: Goal = h.client.get_scoped(&h.org.id, &goal.id).await?;
    assert_eq!(stored.progress, 40);
    assert_eq!(stored.status, GoalStatus::InProgress);

    session.delete_goal(&goal.id).await?;
    wait_until(&session, |s| s.goals.is_empty()).await;
    assert!(h.client.get::<Goal>(&goal.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rating_moderation_is_for_admins() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let submit = |score: i32| mentorship_core::workflows::NewRating {
        to_user_id: h.mentor.id.clone(),
        score,
        comment: String::new(),
    };
    let mentee = SessionContext::for_user(&h.mentee);
    let kept = h.orchestrator.submit_rating(&mentee, submit(5)).await?;
    let dropped = h.orchestrator.submit_rating(&mentee, submit(1)).await?;

    let as_mentor =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.mentor), Duration::ZERO)
            .await?;
    let err = as_mentor.approve_rating(&kept.id).await.unwrap_err();
    assert!(matches!(err, PortError::PermissionDenied(_)));

    let as_admin =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.admin), Duration::ZERO)
            .await?;
    as_admin.approve_rating(&kept.id).await?;
    as_admin.reject_rating(&dropped.id).await?;

    let ratings = h.client.list_by_organization::<Rating>(&h.org.id, &[]).await?;
    assert_eq!(ratings.len(), 1);
    assert!(ratings[0].is_approved);
    Ok(())
}

#[tokio::test]
async fn sessions_follow_store_changes_until_closed() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let session =
        SyncSession::open(h.client.clone(), SessionContext::for_user(&h.mentee), Duration::ZERO)
            .await?;
    assert!(session.snapshot().goals.is_empty());

    h.orchestrator
        .create_goal(
            &SessionContext::for_user(&h.mentee),
            NewGoal {
                user_id: None,
                title: "Follow along".to_string(),
                description: String::new(),
                due_date: None,
            },
        )
        .await?;
    wait_until(&session, |s| s.goals.len() == 1).await;

    session.close();
    assert!(session.is_closed());
    Ok(())
}

#[tokio::test]
async fn impersonated_sessions_show_the_target_but_authorize_as_the_operator() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let platform_org = seed_organization(&h.client, "Platform").await;
    let operator = seed_user(&h.client, &platform_org, Role::PlatformAdmin, "Op").await;
    let context = SessionContext::for_user(&operator).impersonate(&h.mentee)?;

    let session = SyncSession::open(h.client.clone(), context, Duration::ZERO).await?;
    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.current_user.as_ref().map(|u| u.id.as_str()),
        Some(h.mentee.id.as_str())
    );
    assert!(snapshot.users.iter().all(|u| u.organization_id == h.org.id));
    assert!(session.context().require_admin().is_ok());
    Ok(())
}

//=========================================================================================
// Pagination
//=========================================================================================

#[tokio::test]
async fn pages_accumulate_until_the_end() -> anyhow::Result<()> {
    let h = Harness::new().await;
    seed_user(&h.client, &h.org, Role::Mentee, "Pat").await;
    seed_user(&h.client, &h.org, Role::Mentee, "Sam").await;
    let other = seed_organization(&h.client, "Globex").await;
    seed_user(&h.client, &other, Role::Mentee, "Otto").await;

    let pager = Paginator::<User>::new(h.client.clone(), h.org.id.clone(), 2);
    assert_eq!(pager.load_more().await?, 2);
    assert_eq!(pager.load_more().await?, 2);
    assert_eq!(pager.load_more().await?, 1);
    assert!(!pager.has_more());
    assert_eq!(pager.load_more().await?, 0);

    let names: Vec<String> = pager.items().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["Ann", "Max", "Eve", "Pat", "Sam"]);

    pager.refresh().await?;
    assert_eq!(pager.items().len(), 2);
    assert!(pager.has_more());
    Ok(())
}

async fn eight_users(h: &Harness) {
    for name in ["Pat", "Sam", "Kim", "Lee", "Ray"] {
        seed_user(&h.client, &h.org, Role::Mentee, name).await;
    }
}

fn names(pager: &Paginator<User>) -> Vec<String> {
    pager.items().into_iter().map(|u| u.name).collect()
}

#[tokio::test]
async fn refresh_claims_the_pager_before_a_load_can_append() -> anyhow::Result<()> {
    let h = Harness::new().await;
    eight_users(&h).await;
    let pager = Paginator::<User>::new(h.client.clone(), h.org.id.clone(), 2);
    for _ in 0..3 {
        pager.load_more().await?;
    }
    assert_eq!(pager.items().len(), 6);

    h.store.slow_reads(Duration::from_millis(10));
    let (refreshed, loaded) = tokio::join!(pager.refresh(), pager.load_more());
    refreshed?;
    assert_eq!(loaded?, 0);
    assert_eq!(names(&pager), vec!["Ann", "Max"]);
    assert!(pager.has_more());
    assert!(!pager.is_loading());
    Ok(())
}

#[tokio::test]
async fn a_refresh_discards_the_page_loading_underneath_it() -> anyhow::Result<()> {
    let h = Harness::new().await;
    eight_users(&h).await;
    let pager = Paginator::<User>::new(h.client.clone(), h.org.id.clone(), 2);
    for _ in 0..3 {
        pager.load_more().await?;
    }

    h.store.slow_reads(Duration::from_millis(10));
    let (loaded, refreshed) = tokio::join!(pager.load_more(), pager.refresh());
    refreshed?;
    assert_eq!(loaded?, 0);
    assert_eq!(names(&pager), vec!["Ann", "Max"]);

    // The pager is free again and continues from the refreshed cursor.
    assert_eq!(pager.load_more().await?, 2);
    assert_eq!(names(&pager), vec!["Ann", "Max", "Eve", "Pat"]);
    Ok(())
}

#[tokio::test]
async fn records_inserted_between_pages_are_never_duplicated() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let pager = Paginator::<User>::new(h.client.clone(), h.org.id.clone(), 2);
    assert_eq!(pager.load_more().await?, 2);

    let late = seed_user(&h.client, &h.org, Role::Mentee, "Zed").await;
    while pager.load_more().await? > 0 {}

    let items = pager.items();
    let mut ids: Vec<&str> = items.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids.len(), 4);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(items.iter().filter(|u| u.id == late.id).count(), 1);
    Ok(())
}

#[tokio::test]
async fn content_pages_ignore_other_tenants() -> anyhow::Result<()> {
    let h = Harness::new().await;
    let pager = Paginator::<Resource>::new(h.client.clone(), h.org.id.clone(), 10);
    assert_eq!(pager.load_more().await?, 0);
    assert!(!pager.has_more());
    Ok(())
}
