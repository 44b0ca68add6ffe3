use super::*;
use std::fs;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> FileMeta {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    FileMeta {
        path: name.to_string(),
        last_modified: 100,
        language: "go".to_string(),
        size: content.len() as u64,
        domain: None,
    }
}

fn warm(files: Vec<(u32, FileMeta)>, root: &Path, budget: u64) -> FileCache {
    let cache = FileCache::new(budget);
    let map: HashMap<u32, FileMeta> = files.into_iter().collect();
    cache.warm_from_index(&map, root);
    cache
}

#[test]
fn test_warm_loads_lines_and_lowered_lines() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "a.go", "func Login() {\n\treturn\n}\n");
    let cache = warm(vec![(1, fm)], dir.path(), 0);

    let lines = cache.get_lines(1).unwrap();
    let lower = cache.get_lower_lines(1).unwrap();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines.len(), lower.len());
    assert_eq!(lower[0], "func login() {");
    assert!(cache.get_lines(2).is_none());
}

#[test]
fn test_trigram_lookup_finds_mixed_case_lines() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "s.go", "SessionID handler\nnothing here\nsessionid lower\n");
    let cache = warm(vec![(1, fm)], dir.path(), 0);
    assert!(cache.has_trigram_index());

    let hits = cache.trigram_lookup(&unique_trigrams("sessionid"));
    assert_eq!(
        hits,
        vec![
            ContentPosting { file_id: 1, line: 1 },
            ContentPosting { file_id: 1, line: 3 },
        ]
    );
}

#[test]
fn test_trigram_lookup_missing_trigram_is_empty() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "s.go", "alpha beta\n");
    let cache = warm(vec![(1, fm)], dir.path(), 0);
    assert!(cache.trigram_lookup(&unique_trigrams("alpzzz")).is_empty());
    assert!(cache.trigram_lookup(&[]).is_empty());
}

#[test]
fn test_trigram_postings_sorted_across_files() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.go", "token\n");
    let mut b = write(dir.path(), "b.go", "x\ntoken\n");
    b.last_modified = 500;
    let cache = warm(vec![(2, a), (1, b)], dir.path(), 0);

    let hits = cache.trigram_lookup(&unique_trigrams("token"));
    assert_eq!(
        hits,
        vec![
            ContentPosting { file_id: 1, line: 2 },
            ContentPosting { file_id: 2, line: 1 },
        ]
    );
}

#[test]
fn test_content_index_dedups_per_line() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "a.go", "token token\ntoken\n");
    let cache = warm(vec![(1, fm)], dir.path(), 0);

    assert!(cache.has_content_index());
    assert_eq!(
        cache.content_lookup("token"),
        vec![
            ContentPosting { file_id: 1, line: 1 },
            ContentPosting { file_id: 1, line: 2 },
        ]
    );
    assert!(cache.content_lookup("absent").is_empty());
}

#[test]
fn test_skips_binary_extension_and_empty_files() {
    let dir = TempDir::new().unwrap();
    let png = write(dir.path(), "logo.png", "not really a png");
    let mut empty = write(dir.path(), "empty.go", "");
    empty.size = 0;
    let cache = warm(vec![(1, png), (2, empty)], dir.path(), 0);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_skips_oversized_files() {
    let dir = TempDir::new().unwrap();
    let mut fm = write(dir.path(), "big.go", "x\n");
    fm.size = MAX_CACHE_FILE_SIZE + 1;
    let cache = warm(vec![(1, fm)], dir.path(), 0);
    assert!(!cache.contains(1));
}

#[test]
fn test_skips_files_with_nul_bytes() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "blob.go", "abc\0def\n");
    let cache = warm(vec![(1, fm)], dir.path(), 0);
    assert!(!cache.contains(1));
}

#[test]
fn test_missing_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let good = write(dir.path(), "a.go", "ok\n");
    let ghost = FileMeta {
        path: "ghost.go".to_string(),
        size: 10,
        ..Default::default()
    };
    let cache = warm(vec![(1, good), (2, ghost)], dir.path(), 0);
    assert!(cache.contains(1));
    assert!(!cache.contains(2));
}

#[test]
fn test_budget_prefers_recent_files_and_sets_capacity() {
    let dir = TempDir::new().unwrap();
    let mut old = write(dir.path(), "old.go", "0123456789\n");
    old.last_modified = 1;
    let mut new = write(dir.path(), "new.go", "0123456789\n");
    new.last_modified = 2;
    let cache = warm(vec![(1, old), (2, new)], dir.path(), 15);

    assert!(cache.contains(2));
    assert!(!cache.contains(1));
    let stats = cache.stats();
    assert!(stats.at_capacity);
    assert_eq!(stats.memory_bytes, 11);
    assert_eq!(stats.budget_bytes, 15);
}

#[test]
fn test_ninety_percent_sets_capacity() {
    let dir = TempDir::new().unwrap();
    let fm = write(dir.path(), "a.go", "123456789\n");
    let cache = warm(vec![(1, fm)], dir.path(), 10);
    assert!(cache.stats().at_capacity);
}

#[test]
fn test_update_file_replaces_slice() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.go", "alpha\n");
    let b = write(dir.path(), "b.go", "alpha\n");
    let cache = warm(vec![(1, a), (2, b)], dir.path(), 0);

    let a2 = write(dir.path(), "a.go", "gamma\nalpha again\n");
    cache.update_file(1, &a2, dir.path());

    assert_eq!(
        cache.content_lookup("alpha"),
        vec![
            ContentPosting { file_id: 1, line: 2 },
            ContentPosting { file_id: 2, line: 1 },
        ]
    );
    assert_eq!(cache.content_lookup("gamma"), vec![ContentPosting { file_id: 1, line: 1 }]);
    assert_eq!(cache.get_lines(1).unwrap().len(), 2);
}

#[test]
fn test_invalidate_drops_postings() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.go", "unique_word\n");
    let cache = warm(vec![(1, a)], dir.path(), 0);
    cache.invalidate(1);

    assert!(cache.get_lines(1).is_none());
    assert!(cache.content_lookup("unique").is_empty());
    assert!(cache.trigram_lookup(&unique_trigrams("uni")).is_empty());
    assert_eq!(cache.stats().memory_bytes, 0);
}

#[test]
fn test_text_header_detection() {
    assert!(is_text_header(b"package main\n"));
    assert!(is_text_header(b"<?xml version=\"1.0\"?>"));
    assert!(is_text_header(b"\xef\xbb\xbfnamespace App;"));
    assert!(!is_text_header(b"\x7fELF\x02\x01\x01\x00\x00"));
    assert!(!is_text_header(b"abc\x00def"));
    assert!(!is_text_header(b"\xff\xfeu\x00s\x00"));
}

#[test]
fn test_warm_skips_binary_content_with_text_extension() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("blob.txt");
    std::fs::write(&bin, b"\x7fELF\x02\x01\x01\x00\x00payload").unwrap();
    let fm = FileMeta {
        path: "blob.txt".to_string(),
        size: std::fs::metadata(&bin).unwrap().len(),
        ..Default::default()
    };
    let a = write(dir.path(), "a.go", "package main\n");
    let cache = warm(vec![(1, a), (2, fm)], dir.path(), 0);
    assert!(cache.contains(1));
    assert!(!cache.contains(2));
}

#[test]
fn test_is_binary_extension() {
    assert!(is_binary_extension("assets/Logo.PNG"));
    assert!(is_binary_extension("lib/libfoo.so"));
    assert!(!is_binary_extension("src/main.ts"));
    assert!(!is_binary_extension("Makefile"));
}
