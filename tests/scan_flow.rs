// tests/scan_flow.rs - 扫描流程集成测试
mod common;

use std::time::{Duration, SystemTime};

use filetime::FileTime;

use common::{bag_of_words, TestLibrary};
use media_index::identity;
use media_index::{MediaKind, MediaQuery, ScanMode};

#[test]
fn test_first_incremental_scan_runs_as_full() {
    let t = TestLibrary::new();
    t.write("beach.jpg", b"jpeg bytes");
    t.write("clip.mp4", b"video bytes");
    t.write("notes.txt", b"meeting notes about the budget");

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.mode, ScanMode::Full);
    assert_eq!(report.stats.processed, 3);
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.discovered, 3);
    assert_eq!(t.library.store().len(), 3);
    assert_eq!(t.library.vectors().len(), 3);
}

#[test]
fn test_rescan_without_changes_is_idempotent() {
    let t = TestLibrary::new();
    t.write("beach.jpg", b"jpeg bytes");
    t.write("notes.txt", b"some text");
    t.scan(ScanMode::Incremental);

    let before: Vec<_> = t.library.store().iter().map(|r| r.unwrap()).collect();
    let report = t.scan(ScanMode::Incremental);

    assert_eq!(report.mode, ScanMode::Incremental);
    assert_eq!(report.stats.processed, 0);
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.stats.deleted, 0);

    let after: Vec<_> = t.library.store().iter().map(|r| r.unwrap()).collect();
    assert_eq!(before, after);
    assert_eq!(t.library.vectors().len(), 2);
}

#[test]
fn test_new_file_is_picked_up() {
    let t = TestLibrary::new();
    t.write("beach.jpg", b"jpeg bytes");
    t.scan(ScanMode::Incremental);

    let path = t.write("mountain_lake.png", b"png bytes");
    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.processed, 1);

    let record = t.library.get_by_path(&path).unwrap().unwrap();
    assert_eq!(record.kind, MediaKind::Image);
    assert_eq!(record.mime_type, "image/png");
    assert_eq!(record.description.as_deref(), Some("image of mountain lake"));
    assert_eq!(record.tags, vec!["mountain", "lake"]);
    assert_eq!(record.content_hash.len(), 64);
}

#[test]
fn test_move_keeps_id_and_annotations() {
    let t = TestLibrary::new();
    let old_path = t.write("sunset_beach.jpg", b"the same picture");
    t.scan(ScanMode::Incremental);
    let original = t.library.get_by_path(&old_path).unwrap().unwrap();

    let new_path = t.path_of("trips/sunset_beach.jpg");
    std::fs::create_dir_all(t.root().join("trips")).unwrap();
    std::fs::rename(&old_path, &new_path).unwrap();

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.deleted, 0);
    assert_eq!(report.stats.errors, 0);

    assert!(t.library.get_by_path(&old_path).unwrap().is_none());
    let moved = t.library.get_by_path(&new_path).unwrap().unwrap();
    assert_eq!(moved.id, original.id);
    assert_eq!(moved.description, original.description);
    assert_eq!(moved.tags, original.tags);
    assert_eq!(moved.content_hash, original.content_hash);
    assert_eq!(t.library.store().len(), 1);

    let links = t.library.store().tag_links(moved.id).unwrap();
    assert_eq!(links.len(), 2);

    let results = t.library.query(&MediaQuery::new().text("sunset")).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, new_path);

    // 移动不会追加新向量
    assert_eq!(t.library.vectors().len(), 1);
}

#[test]
fn test_deleted_file_leaves_query_but_stays_in_vectors() {
    let t = TestLibrary::new();
    let gone = t.write("lonely_cat.jpg", b"cat picture");
    t.write("happy_dog.jpg", b"dog picture");
    t.scan(ScanMode::Incremental);
    assert_eq!(t.library.query_text("lonely").unwrap().len(), 1);

    std::fs::remove_file(&gone).unwrap();
    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.deleted, 1);
    assert_eq!(report.stats.processed, 0);

    assert!(t.library.get_by_path(&gone).unwrap().is_none());
    assert!(t.library.query_text("lonely").unwrap().is_empty());
    assert!(t.library.store().tag("lonely").unwrap().is_some());
    assert!(t.library.query(&MediaQuery::new().tag("lonely")).unwrap().is_empty());

    // 向量索引只追加：旧向量仍能命中，但已没有对应记录
    assert_eq!(t.library.vectors().len(), 2);
    let hits = t.library.semantic_search("image of lonely cat", 5).unwrap();
    let top = &hits[0];
    assert_eq!(top.path, gone);
    assert!(top.is_stale());
    assert!(top.record.is_none());
    assert!(hits.iter().any(|h| h.record.is_some()));
}

#[test]
fn test_modify_and_touch_end_to_end() {
    let t = TestLibrary::new();
    let image = t.write("beach.jpg", b"original pixels");
    t.write("harbor.png", b"harbor pixels");
    let doc = t.write("notes.txt", b"quarterly report draft");

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.processed, 3);
    let original = t.library.get_by_path(&image).unwrap().unwrap();

    std::fs::write(&image, b"edited pixels").unwrap();
    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(report.stats.errors, 0);

    let edited = t.library.get_by_path(&image).unwrap().unwrap();
    assert_eq!(edited.id, original.id);
    assert_ne!(edited.content_hash, original.content_hash);
    assert_eq!(t.library.store().len(), 3);

    // 内容不变、仅修改 mtime 也会被重新处理
    let later = SystemTime::now() + Duration::from_secs(120);
    filetime::set_file_mtime(&doc, FileTime::from_system_time(later)).unwrap();
    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.skipped, 0);

    let checkpoint = t.library.checkpoint_status().unwrap();
    assert_eq!(checkpoint.processed_count, 1);
}

#[test]
fn test_full_scan_skips_known_content_and_keeps_missing_files() {
    let t = TestLibrary::new();
    t.write("a.jpg", b"aaa");
    t.write("b.jpg", b"bbb");
    let c = t.write("c.txt", b"ccc text");
    t.scan(ScanMode::Incremental);

    std::fs::remove_file(&c).unwrap();
    // 与已有内容相同的新副本同样被跳过
    t.write("copies/a_copy.jpg", b"aaa");

    let report = t.scan(ScanMode::Full);
    assert_eq!(report.mode, ScanMode::Full);
    assert_eq!(report.stats.processed, 0);
    assert_eq!(report.stats.skipped, 3);
    assert_eq!(report.stats.deleted, 0);
    assert!(t.library.get_by_path(&c).unwrap().is_some());

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.deleted, 1);
    assert!(t.library.get_by_path(&c).unwrap().is_none());
}

#[test]
fn test_reset_checkpoint_forces_full_scan() {
    let t = TestLibrary::new();
    t.write("a.jpg", b"aaa");
    t.write("b.mov", b"bbb");
    t.scan(ScanMode::Incremental);
    assert!(t.checkpoint_path().exists());

    t.library.reset_checkpoint().unwrap();
    assert!(!t.checkpoint_path().exists());
    assert!(t.library.checkpoint_status().unwrap().last_scan_time.is_none());

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.mode, ScanMode::Full);
    assert_eq!(report.stats.skipped, 2);
    assert_eq!(report.stats.processed, 0);
    assert!(t.library.checkpoint_status().unwrap().last_scan_time.is_some());
}

#[test]
fn test_checkpoint_file_format() {
    let t = TestLibrary::new();
    let a = t.write("a.jpg", b"aaa");
    let b = t.write("b.txt", b"bbb text");
    let started = chrono::Utc::now();
    t.scan(ScanMode::Incremental);

    let content = std::fs::read_to_string(t.checkpoint_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["formatVersion"], "1.0");

    let time = json["lastScanTime"].as_str().unwrap();
    let time = chrono::DateTime::parse_from_rfc3339(time).unwrap().with_timezone(&chrono::Utc);
    assert!(time >= started);

    let paths: Vec<&str> = json["lastProcessedPaths"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(paths, vec![a.as_str(), b.as_str()]);
}

#[test]
fn test_corrupt_checkpoint_is_treated_as_fresh() {
    let t = TestLibrary::new();
    t.write("a.jpg", b"aaa");
    std::fs::create_dir_all(t.checkpoint_path().parent().unwrap()).unwrap();
    std::fs::write(t.checkpoint_path(), b"{ not json").unwrap();

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.mode, ScanMode::Full);
    assert_eq!(report.stats.processed, 1);
    assert!(t.library.checkpoint_status().unwrap().last_scan_time.is_some());
}

#[test]
fn test_item_failure_does_not_abort_scan() {
    let t = TestLibrary::new();
    let broken = t.write("broken_clip.mp4", b"bad");
    let good = t.write("good_clip.mp4", b"good");

    let report = t.scan(ScanMode::Incremental);
    assert_eq!(report.stats.errors, 1);
    assert_eq!(report.stats.processed, 1);
    assert!(t.library.get_by_path(&broken).unwrap().is_none());
    assert!(t.library.get_by_path(&good).unwrap().is_some());

    let content = std::fs::read_to_string(t.checkpoint_path()).unwrap();
    assert!(!content.contains("broken_clip"));
}

#[test]
fn test_content_hash_is_deterministic_and_path_independent() {
    let t = TestLibrary::new();
    let a = t.write("one/abc.txt", b"abc");
    let b = t.write("two/other_name.md", b"abc");

    let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    assert_eq!(identity::hash_file(std::path::Path::new(&a)).unwrap(), expected);
    assert_eq!(identity::hash_file(std::path::Path::new(&b)).unwrap(), expected);

    t.scan(ScanMode::Incremental);
    let ra = t.library.get_by_path(&a).unwrap().unwrap();
    let rb = t.library.get_by_path(&b).unwrap().unwrap();
    // 相同内容的两个路径各有一条记录
    assert_ne!(ra.id, rb.id);
    assert_eq!(ra.content_hash, expected);
    assert_eq!(rb.content_hash, expected);
    assert!(t.library.store().exists(expected).unwrap());
}

#[test]
fn test_progress_reports_phases_in_order() {
    let t = TestLibrary::new();
    t.write("a.jpg", b"aaa");
    t.write("b.jpg", b"bbb");

    let mut phases = Vec::new();
    let mut last_done = 0;
    t.library
        .scan_with_progress(&[t.root()], ScanMode::Incremental, |phase, done, total| {
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
            assert!(done <= total || total == 0);
            last_done = done;
        })
        .unwrap();

    use media_index::ScanPhase::*;
    assert_eq!(phases, vec![Detecting, Processing, Checkpointing, Idle]);
    assert_eq!(last_done, 2);
}

#[test]
fn test_semantic_search_ranks_by_similarity() {
    let t = TestLibrary::new();
    t.write("red_car.jpg", b"car");
    t.write("blue_ocean.jpg", b"ocean");
    let notes = t.write("notes.txt", b"red car maintenance log");
    t.scan(ScanMode::Incremental);

    let hits = t.library.semantic_search("red car", 3).unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    assert!(hits.iter().take(2).any(|h| h.path == notes));
    assert!(hits[2].path.ends_with("blue_ocean.jpg"));
    assert!(t.library.semantic_search("   ", 3).unwrap().is_empty());

    // similar_to 不返回自身
    let car = t.library.get_by_path(&t.path_of("red_car.jpg")).unwrap().unwrap();
    let similar = t.library.similar_to(car.id, 2).unwrap();
    assert!(similar.iter().all(|h| h.media_id != car.id));
    assert_eq!(similar.len(), 2);
    assert!(t.library.similar_to(9999, 2).is_err());

    assert_eq!(bag_of_words("Red car"), bag_of_words("red CAR"));
}
