use super::*;
use crate::resolver::EncodingPreference;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn plan_resolves_flat_members_and_picks_best_rendition() {
    let backend = Arc::new(
        ScriptedBackend::new().with_collection("XYZ", vec![flat("A"), flat("B"), flat("C")]),
    );
    let (downloader, _temp_dir) = create_test_downloader(backend.clone(), |_| {}).await;

    let items = downloader
        .lookup(
            "https://www.youtube.com/playlist?list=XYZ",
            RequestMode::Collection,
        )
        .await
        .unwrap()
        .into_items();
    let plan = downloader
        .plan_tasks(items, &EncodingPreference::container("mp4"))
        .await;

    assert!(plan.rejected.is_empty());
    assert_eq!(plan.tasks.len(), 3);
    assert!(plan.tasks.iter().all(|t| t.encoding.token == "22"));
    assert_eq!(backend.resolve_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn plan_skips_resolution_for_resolved_items() {
    let backend = Arc::new(ScriptedBackend::new());
    let (downloader, _temp_dir) = create_test_downloader(backend.clone(), |_| {}).await;

    let plan = downloader
        .plan_tasks(
            vec![media("A", "Clip")],
            &EncodingPreference::container("mp4").with_max_height(480),
        )
        .await;

    assert_eq!(plan.tasks[0].encoding.token, "18");
    assert_eq!(backend.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn plan_rejects_unresolvable_and_unmatched_items() {
    let backend = Arc::new(ScriptedBackend::new().with_item(media("A", "Clip")));
    let (downloader, _temp_dir) = create_test_downloader(backend, |_| {}).await;

    let plan = downloader
        .plan_tasks(
            vec![flat("GONE"), flat("A")],
            &EncodingPreference::container("webm"),
        )
        .await;

    assert!(plan.tasks.is_empty());
    assert_eq!(plan.rejected.len(), 2);
    assert!(matches!(plan.rejected[0].1, Error::NotFound(_)));
    assert!(matches!(
        plan.rejected[1].1,
        Error::NoMatchingEncoding { .. }
    ));
}

#[tokio::test]
async fn download_url_single_item_then_pack() {
    let backend = Arc::new(ScriptedBackend::new().with_item(media("ABC123", "Clip")));
    let (downloader, _temp_dir) = create_test_downloader(backend, |_| {}).await;

    let result = downloader
        .download_url(
            "https://www.youtube.com/watch?v=ABC123",
            RequestMode::Single,
            &EncodingPreference::container("mp4"),
        )
        .await
        .unwrap();
    assert_eq!(result.completed.len(), 1);

    let archive = downloader.pack(&result).await.unwrap();
    assert_eq!(archive.entries, vec!["Clip [ABC123].mp4"]);
    assert!(archive.is_complete());
}

#[tokio::test]
async fn download_url_reports_unplanned_items_as_failed() {
    let backend = Arc::new(
        ScriptedBackend::new().with_collection("XYZ", vec![flat("A"), flat("B")]),
    );
    let (downloader, _temp_dir) = create_test_downloader(backend, |_| {}).await;

    let result = downloader
        .download_url(
            "https://www.youtube.com/playlist?list=XYZ",
            RequestMode::Collection,
            &EncodingPreference::container("flv"),
        )
        .await
        .unwrap();

    assert!(result.completed.is_empty());
    assert_eq!(result.failed.len(), 2);
    assert!(
        result
            .failed
            .iter()
            .all(|f| f.attempts == 0 && f.code == "no_matching_encoding")
    );
}

#[tokio::test]
async fn download_url_uses_partially_listed_collection() {
    let members = (0..5).map(|i| flat(&format!("m{i}"))).collect();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_collection("XYZ", members)
            .fail_page("XYZ", 1, BackendError::AuthRequired("Sign in".into())),
    );
    let (downloader, _temp_dir) = create_test_downloader(backend, |c| {
        c.resolver.page_size = 2;
    })
    .await;

    let result = downloader
        .download_url(
            "https://www.youtube.com/playlist?list=XYZ",
            RequestMode::Collection,
            &EncodingPreference::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.completed.len(), 2);
    assert!(result.failed.is_empty());
    assert_eq!(
        result.listing_interrupted,
        Some(BackendError::AuthRequired("Sign in".into()))
    );
    assert!(!result.is_complete());
}

#[tokio::test]
async fn download_url_fully_listed_collection_is_not_flagged() {
    let backend = Arc::new(
        ScriptedBackend::new().with_collection("XYZ", vec![flat("A"), flat("B"), flat("C")]),
    );
    let (downloader, _temp_dir) = create_test_downloader(backend, |c| {
        c.resolver.page_size = 2;
    })
    .await;

    let result = downloader
        .download_url(
            "https://www.youtube.com/playlist?list=XYZ",
            RequestMode::Collection,
            &EncodingPreference::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.completed.len(), 3);
    assert_eq!(result.listing_interrupted, None);
    assert!(result.is_complete());
}

#[tokio::test]
async fn download_url_rejects_garbage() {
    let backend = Arc::new(ScriptedBackend::new());
    let (downloader, _temp_dir) = create_test_downloader(backend, |_| {}).await;

    let err = downloader
        .download_url("not a link", RequestMode::Single, &EncodingPreference::default())
        .await
        .unwrap_err();
    assert_eq!(err.user_facing(), crate::error::UserFacing::Malformed);
}
