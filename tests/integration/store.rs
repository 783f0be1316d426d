use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;

use myth_forge::database::chapters::{
    Chapter, ChapterStatus, ChapterUpdate, ListChaptersParams, NewChapter,
};
use myth_forge::database::children::{Child, UpsertChildRequest};
use myth_forge::error::AppError;

use crate::common::{TestContext, OTHER_USER, USER};

async fn insert_chapter(
    ctx: &TestContext,
    user_id: &str,
    child_id: &str,
    created_at: DateTime<Utc>,
) -> Chapter {
    Chapter::create(
        &ctx.db,
        NewChapter {
            user_id: user_id.to_string(),
            child_id: child_id.to_string(),
            theme: "Fantasy".to_string(),
            seed_text: "A walk in the park".to_string(),
            created_at,
            visibility: None,
        },
    )
    .await
    .unwrap()
}

fn ids(chapters: &[Chapter]) -> Vec<String> {
    chapters.iter().map(|c| c.id.clone()).collect()
}

#[tokio::test]
async fn test_created_chapter_starts_generating_with_empty_fields() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;

    let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;

    assert_eq!(chapter.status, ChapterStatus::Generating);
    assert!(chapter.myth_title.is_empty());
    assert!(chapter.myth_text.is_empty());
    assert!(chapter.tags.is_empty());
    assert!(chapter.image_url.is_empty());

    let stored = Chapter::get_by_id(&ctx.db, &chapter.id).await.unwrap().unwrap();
    assert_eq!(stored, chapter);
}

#[tokio::test]
async fn test_pagination_has_no_gaps_or_overlap() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let base = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();

    for i in 0..7 {
        // Two pairs share a timestamp so the id tie-break is exercised
        let offset = match i {
            1 | 2 => 1,
            4 | 5 => 4,
            n => n,
        };
        insert_chapter(&ctx, USER, &child.id, base + Duration::seconds(offset)).await;
    }

    let mut all_params = ListChaptersParams::new(child.id.clone());
    all_params.page_size = 100;
    let all = Chapter::list(&ctx.db, &all_params, USER).await.unwrap();
    assert_eq!(all.len(), 7);
    assert!(all
        .windows(2)
        .all(|w| (w[0].created_at, &w[0].id) > (w[1].created_at, &w[1].id)));

    for page_size in 1..=4u32 {
        let mut collected = Vec::new();
        let mut after = None;

        loop {
            let params = ListChaptersParams {
                child_id: child.id.clone(),
                page_size,
                after: after.clone(),
            };
            let page = Chapter::list(&ctx.db, &params, USER).await.unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= page_size as usize);
            after = page.last().map(|c| c.id.clone());
            collected.extend(page);
        }

        assert_eq!(ids(&collected), ids(&all), "page size {}", page_size);
    }
}

#[tokio::test]
async fn test_list_is_scoped_to_user_and_child() {
    let ctx = TestContext::new().await;
    let luna = ctx.create_child(USER, "Luna").await;
    let sol = ctx.create_child(USER, "Sol").await;
    let theirs = ctx.create_child(OTHER_USER, "Mar").await;

    let mine = insert_chapter(&ctx, USER, &luna.id, Utc::now()).await;
    insert_chapter(&ctx, USER, &sol.id, Utc::now()).await;
    insert_chapter(&ctx, OTHER_USER, &theirs.id, Utc::now()).await;
    // A foreign user's chapter pointing at my child id stays invisible to me
    insert_chapter(&ctx, OTHER_USER, &luna.id, Utc::now()).await;

    let listed = Chapter::list(&ctx.db, &ListChaptersParams::new(luna.id.clone()), USER)
        .await
        .unwrap();
    assert_eq!(ids(&listed), vec![mine.id]);

    let listed = Chapter::list(&ctx.db, &ListChaptersParams::new(theirs.id.clone()), USER)
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_unknown_or_foreign_cursor_starts_from_the_beginning() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let other_child = ctx.create_child(OTHER_USER, "Mar").await;
    let base = Utc::now();

    for i in 0..3 {
        insert_chapter(&ctx, USER, &child.id, base + Duration::seconds(i)).await;
    }
    let foreign = insert_chapter(&ctx, OTHER_USER, &other_child.id, base).await;

    let first_page = Chapter::list(&ctx.db, &ListChaptersParams::new(child.id.clone()), USER)
        .await
        .unwrap();

    for cursor in ["does-not-exist".to_string(), foreign.id.clone()] {
        let params = ListChaptersParams {
            child_id: child.id.clone(),
            page_size: 20,
            after: Some(cursor),
        };
        let page = Chapter::list(&ctx.db, &params, USER).await.unwrap();
        assert_eq!(ids(&page), ids(&first_page));
    }
}

#[tokio::test]
async fn test_page_size_is_clamped() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    for _ in 0..3 {
        insert_chapter(&ctx, USER, &child.id, Utc::now()).await;
    }

    let params = ListChaptersParams {
        child_id: child.id.clone(),
        page_size: 0,
        after: None,
    };
    assert_eq!(Chapter::list(&ctx.db, &params, USER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recap_year_boundaries() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;

    let first_instant = insert_chapter(
        &ctx,
        USER,
        &child.id,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .await;
    let last_second = insert_chapter(
        &ctx,
        USER,
        &child.id,
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap(),
    )
    .await;
    insert_chapter(
        &ctx,
        USER,
        &child.id,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    )
    .await;
    insert_chapter(
        &ctx,
        USER,
        &child.id,
        Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap(),
    )
    .await;

    let recap = Chapter::list_recap(&ctx.db, &child.id, 2024, USER).await.unwrap();
    let recap_ids: Vec<_> = recap.iter().map(|r| r.id.clone()).collect();
    assert_eq!(recap_ids, vec![last_second.id, first_instant.id]);
    assert_eq!(recap[0].theme, "Fantasy");

    assert!(Chapter::list_recap(&ctx.db, &child.id, 2024, OTHER_USER)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_status_transitions_are_enforced_by_update() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;

    Chapter::update(
        &ctx.db,
        &chapter.id,
        ChapterUpdate {
            myth_title: Some("Title".to_string()),
            tags: Some(vec!["a".to_string()]),
            status: Some(ChapterStatus::Ready),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let result = Chapter::update(
        &ctx.db,
        &chapter.id,
        ChapterUpdate::status(ChapterStatus::Generating),
    )
    .await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition {
            from: ChapterStatus::Ready,
            to: ChapterStatus::Generating
        })
    ));

    let result = Chapter::update(&ctx.db, &chapter.id, ChapterUpdate::status(ChapterStatus::Failed)).await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    // Rewriting the same status is allowed
    Chapter::update(&ctx.db, &chapter.id, ChapterUpdate::status(ChapterStatus::Ready))
        .await
        .unwrap();

    let stored = Chapter::get_by_id(&ctx.db, &chapter.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ChapterStatus::Ready);
    assert_eq!(stored.myth_title, "Title");
    assert_eq!(stored.tags, vec!["a"]);
}

#[tokio::test]
async fn test_failed_is_terminal() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;

    Chapter::update(&ctx.db, &chapter.id, ChapterUpdate::status(ChapterStatus::Failed))
        .await
        .unwrap();

    let result = Chapter::update(&ctx.db, &chapter.id, ChapterUpdate::status(ChapterStatus::Ready)).await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_update_of_missing_chapter_is_not_found() {
    let ctx = TestContext::new().await;
    let result = Chapter::update(&ctx.db, "missing", ChapterUpdate::status(ChapterStatus::Ready)).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_get_for_user_distinguishes_missing_and_foreign() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;

    assert!(Chapter::get_for_user(&ctx.db, &chapter.id, USER).await.is_ok());
    assert!(matches!(
        Chapter::get_for_user(&ctx.db, &chapter.id, OTHER_USER).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        Chapter::get_for_user(&ctx.db, "missing", USER).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_edit_text_only_when_ready() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;

    let result = Chapter::edit_text(&ctx.db, &chapter.id, USER, Some("New".to_string()), None).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    Chapter::update(&ctx.db, &chapter.id, ChapterUpdate::status(ChapterStatus::Ready))
        .await
        .unwrap();

    let edited = Chapter::edit_text(&ctx.db, &chapter.id, USER, Some(" New ".to_string()), None)
        .await
        .unwrap();
    assert_eq!(edited.myth_title, "New");
    assert_eq!(edited.status, ChapterStatus::Ready);

    let result = Chapter::edit_text(&ctx.db, &chapter.id, USER, None, Some("  ".to_string())).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let result = Chapter::edit_text(&ctx.db, &chapter.id, OTHER_USER, Some("x".to_string()), None).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn test_fail_abandoned_only_touches_generating() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let stuck = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;
    let done = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;
    Chapter::update(&ctx.db, &done.id, ChapterUpdate::status(ChapterStatus::Ready))
        .await
        .unwrap();

    assert_eq!(Chapter::fail_abandoned(&ctx.db).await.unwrap(), 1);

    let stuck = Chapter::get_by_id(&ctx.db, &stuck.id).await.unwrap().unwrap();
    let done = Chapter::get_by_id(&ctx.db, &done.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, ChapterStatus::Failed);
    assert_eq!(done.status, ChapterStatus::Ready);
}

#[tokio::test]
async fn test_child_upsert_create_update_and_ownership() {
    let ctx = TestContext::new().await;

    let created = ctx
        .create_child_with(
            USER,
            UpsertChildRequest {
                name: "Luna".to_string(),
                birth_date: Some("2022-03-14".to_string()),
                avatar_url: Some("https://cdn.test/a.png".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(created.user_id, USER);

    let updated = Child::upsert(
        &ctx.db,
        UpsertChildRequest {
            id: Some(created.id.clone()),
            name: "Luna Maria".to_string(),
            description: Some("red boots".to_string()),
            ..Default::default()
        },
        USER,
    )
    .await
    .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name, "Luna Maria");
    assert_eq!(updated.avatar_url.as_deref(), Some("https://cdn.test/a.png"));
    assert_eq!(updated.created_at, created.created_at);

    let foreign = Child::upsert(
        &ctx.db,
        UpsertChildRequest {
            id: Some(created.id.clone()),
            name: "Hijack".to_string(),
            ..Default::default()
        },
        OTHER_USER,
    )
    .await;
    assert!(matches!(foreign, Err(AppError::Forbidden(_))));

    let missing = Child::upsert(
        &ctx.db,
        UpsertChildRequest {
            id: Some("missing".to_string()),
            name: "Ghost".to_string(),
            ..Default::default()
        },
        USER,
    )
    .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let mine = Child::list_by_user(&ctx.db, USER).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(Child::list_by_user(&ctx.db, OTHER_USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_avatar_url() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;

    assert!(Child::set_avatar_url(&ctx.db, &child.id, "https://cdn.test/b.png")
        .await
        .unwrap());
    assert!(!Child::set_avatar_url(&ctx.db, "missing", "x").await.unwrap());

    let stored = Child::get_by_id(&ctx.db, &child.id).await.unwrap().unwrap();
    assert_eq!(stored.avatar_url.as_deref(), Some("https://cdn.test/b.png"));
}

#[tokio::test]
async fn test_ids_are_unique() {
    let ctx = TestContext::new().await;
    let child = ctx.create_child(USER, "Luna").await;
    let mut seen = HashSet::new();
    for _ in 0..10 {
        let chapter = insert_chapter(&ctx, USER, &child.id, Utc::now()).await;
        assert!(seen.insert(chapter.id));
    }
}
