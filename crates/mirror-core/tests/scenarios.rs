mod common;

use common::{event, Harness};
use mirror_core::{EventKind, Gid, JobPhase, Policy};

#[tokio::test]
async fn test_scenario_upload_succeeds() {
    let h = Harness::new();
    h.storage.set_link("https://x/1");
    h.daemon.assign_next("g1");

    let gid = h.submit(1, 10, "a", "http://x/file.bin").await;
    assert_eq!(gid, Gid::from("g1"));
    let dir = h.work_dir(&gid).await;
    std::fs::write(dir.join("file.bin"), vec![0u8; 1000]).unwrap();
    h.daemon.set_active_file(&gid, &dir, "file.bin", 1000, 0);

    event(&h, EventKind::Start, &gid).await;
    h.daemon.set_active_file(&gid, &dir, "file.bin", 1000, 1000);
    event(&h, EventKind::Complete, &gid).await;

    let sent = h.chat.sent_to(1);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("https://x/1"));
    assert_eq!(sent[0].text, "<a href='https://x/1'>file.bin</a> (1000B)");
    assert!(h.coordinator.registry().get_by_gid(&gid).await.is_none());
    assert!(common::eventually(|| !dir.exists()).await);

    assert!(common::eventually(|| h.notifier.notices().len() == 1).await);
    let notice = &h.notifier.notices()[0];
    assert!(notice.successful);
    assert_eq!(notice.file.url.as_deref(), Some("https://x/1"));
    assert_eq!(notice.file.name.as_deref(), Some("file.bin"));
    assert_eq!(notice.file.size.as_deref(), Some("1000B"));
}

#[tokio::test]
async fn test_scenario_metadata_rekeys() {
    let h = Harness::new();
    h.daemon.assign_next("g1");
    let g1 = h.submit(1, 10, "a", "magnet:?xt=urn:btih:abc").await;
    let before = h.coordinator.registry().get_by_gid(&g1).await.unwrap();
    h.daemon.edit(&g1, |j| j.follow_up = Some(Gid::from("g2")));

    event(&h, EventKind::Start, &g1).await;
    event(&h, EventKind::Complete, &g1).await;

    assert!(h.coordinator.registry().get_by_gid(&g1).await.is_none());
    let job = h.coordinator.registry().get_by_gid(&Gid::from("g2")).await.unwrap();
    assert_eq!(job.phase, JobPhase::Queued);
    assert_eq!(job.key, before.key);
    assert!(h.chat.sent().is_empty());
    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_scenario_blacklisted_name_cancels() {
    let h = Harness::with_settings(|s| {
        s.policy = Policy { filtered_domains: vec![], filtered_filenames: Some(vec!["bad".into()]) }
    });
    let gid = h.submit(1, 10, "a", "http://x/download").await;
    let dir = h.work_dir(&gid).await;
    h.daemon.set_active_file(&gid, &dir, "bad.mkv", 1000, 10);

    event(&h, EventKind::Start, &gid).await;
    assert_eq!(h.daemon.removed(), vec![gid.clone()]);

    event(&h, EventKind::Stop, &gid).await;
    let sent = h.chat.sent_to(1);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Blacklisted"));
    assert_eq!(sent[0].text, "Download stopped. Blacklisted file name.");
}
