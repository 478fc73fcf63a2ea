use camino::Utf8PathBuf;

use kira_annotations::store::Store;

fn scratch_store(temp: &tempfile::TempDir) -> Store {
    let project_root = Utf8PathBuf::from_path_buf(temp.path().join("project")).unwrap();
    let cache_root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    Store::new_with_paths(project_root, cache_root)
}

#[test]
fn layout_paths() {
    let temp = tempfile::tempdir().unwrap();
    let store = scratch_store(&temp);
    assert_eq!(
        store.annotations_cache_path(),
        store.project_root().join("all_annotations.json")
    );
    assert!(store.taxonomy_dir().starts_with(store.cache_root()));
    assert!(store.taxonomy_dir().ends_with("taxonomy"));
}

#[test]
fn atomic_writes_replace_content() {
    let temp = tempfile::tempdir().unwrap();
    let store = scratch_store(&temp);
    let path = store.annotations_cache_path();

    Store::write_bytes_atomic(&path, b"first").unwrap();
    Store::write_bytes_atomic(&path, b"second").unwrap();
    assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"second");
    assert!(!path.with_extension("tmp").as_std_path().exists());

    let copy = store.taxonomy_dir().join("nodes.dmp");
    Store::copy_file_atomic(&path, &copy).unwrap();
    Store::copy_file_atomic(&path, &copy).unwrap();
    assert_eq!(std::fs::read(copy.as_std_path()).unwrap(), b"second");
}

#[test]
fn clearing_missing_cache_is_fine() {
    let temp = tempfile::tempdir().unwrap();
    let store = scratch_store(&temp);
    assert!(!store.has_annotations_cache());
    store.clear_annotations_cache().unwrap();

    Store::write_bytes_atomic(&store.annotations_cache_path(), b"{}").unwrap();
    assert!(store.has_annotations_cache());
    store.clear_annotations_cache().unwrap();
    assert!(!store.has_annotations_cache());
}
