use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use lexis::prelude::*;
use lexis::storage::Storage;
use lexis::storage::memory::MemoryStorage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::builder()
        .field(FieldDefinition::keyword("id").stored().unique())
        .field(FieldDefinition::text("body").stored())
        .field(FieldDefinition::u64("year").stored())
        .build()
        .unwrap()
}

fn doc(id: &str, body: &str, year: u64) -> Document {
    Document::new().add("id", id).add("body", body).add("year", year)
}

fn no_merge() -> IndexWriterConfig {
    IndexWriterConfig {
        merge_policy: MergePolicyConfig::NoMerge,
        ..IndexWriterConfig::default()
    }
}

fn id_set(searcher: &Searcher, query: &Query) -> BTreeSet<String> {
    searcher
        .search(query, 10_000)
        .unwrap()
        .hits
        .iter()
        .map(|hit| hit.stored.get_text("id").unwrap().to_string())
        .collect()
}

#[test]
fn test_second_writer_gets_writer_locked() {
    let index = Index::create_in_memory(schema()).unwrap();
    let writer = index.writer(IndexWriterConfig::default()).unwrap();

    let second = index.writer(IndexWriterConfig::default());
    assert!(matches!(second, Err(LexisError::WriterLocked(_))));
    assert!(second.unwrap_err().is_retryable());

    writer.close().unwrap();
    let third = index.writer(IndexWriterConfig::default()).unwrap();
    third.cancel().unwrap();
}

#[test]
fn test_delete_is_idempotent() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();
    writer.add_document(doc("a", "one", 2000)).unwrap();
    writer.add_document(doc("b", "two", 2001)).unwrap();
    writer.commit().unwrap();

    assert_eq!(writer.delete_by_term("id", "a").unwrap(), 1);
    writer.commit().unwrap();
    let once = index.reader().unwrap();

    assert_eq!(writer.delete_by_term("id", "a").unwrap(), 0);
    writer.commit().unwrap();
    let twice = index.reader().unwrap();

    assert_eq!(once.doc_count(), 1);
    assert_eq!(twice.doc_count(), once.doc_count());
    let searcher = index.searcher().unwrap();
    assert_eq!(id_set(&searcher, &Query::every()), BTreeSet::from(["b".to_string()]));
    writer.close().unwrap();
}

#[test]
fn test_snapshot_isolation() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();
    writer.add_document(doc("old", "shared words", 1999)).unwrap();
    writer.commit().unwrap();

    let before = index.searcher().unwrap();

    writer.add_document(doc("new", "shared words", 2024)).unwrap();
    writer.delete_by_term("id", "old").unwrap();
    writer.commit().unwrap();

    let query = Query::term("body", "shared");
    assert_eq!(id_set(&before, &query), BTreeSet::from(["old".to_string()]));

    let after = Searcher::new(before.reader().reopen().unwrap());
    assert_eq!(id_set(&after, &query), BTreeSet::from(["new".to_string()]));
    assert!(after.reader().generation() > before.reader().generation());

    // The old snapshot still reads its segment after the writer retired it.
    assert_eq!(id_set(&before, &query), BTreeSet::from(["old".to_string()]));
    writer.close().unwrap();
}

#[test]
fn test_merge_preserves_results() {
    let words = ["red", "green", "blue", "cyan", "magenta", "yellow", "black"];
    let mut rng = StdRng::seed_from_u64(7);
    let mut docs = Vec::new();
    for i in 0..400 {
        let len = rng.random_range(2..9);
        let body: Vec<&str> = (0..len).map(|_| words[rng.random_range(0..words.len())]).collect();
        docs.push(doc(&format!("d{i:03}"), &body.join(" "), 1990 + (i % 30) as u64));
    }

    let build = |merge_policy: MergePolicyConfig| {
        let index = Index::create_in_memory(schema()).unwrap();
        let mut writer = index
            .writer(IndexWriterConfig {
                max_buffered_docs: 50,
                merge_policy,
                background_merges: false,
                ..IndexWriterConfig::default()
            })
            .unwrap();
        for (i, d) in docs.iter().enumerate() {
            writer.add_document(d.clone()).unwrap();
            if i % 90 == 89 {
                writer.commit().unwrap();
            }
        }
        for i in (0..400).step_by(7) {
            writer.delete_by_term("id", format!("d{i:03}").as_str()).unwrap();
        }
        writer.commit().unwrap();
        (index, writer)
    };

    let (plain, plain_writer) = build(MergePolicyConfig::NoMerge);
    plain_writer.close().unwrap();
    let (merged, mut merged_writer) = build(MergePolicyConfig::Tiered(TieredMergeConfig::default()));
    merged_writer.optimize().unwrap();
    merged_writer.close().unwrap();

    let plain = plain.searcher().unwrap();
    let merged = merged.searcher().unwrap();
    assert!(plain.reader().segments().len() > 1);
    assert_eq!(merged.reader().segments().len(), 1);
    assert_eq!(merged.reader().max_doc(), merged.reader().doc_count());

    let queries = vec![
        Query::term("body", "red"),
        Query::and(vec![Query::term("body", "green"), Query::term("body", "blue")]),
        Query::or(vec![Query::term("body", "cyan"), Query::term("body", "black")]),
        Query::not(Query::term("body", "yellow"), Query::term("body", "red")),
        Query::and_maybe(Query::term("body", "magenta"), Query::term("body", "green")),
        Query::phrase("body", vec!["red", "green"]),
        Query::sloppy_phrase("body", vec!["blue", "black"], 2),
        Query::term_range("body", "b", "d"),
        Query::prefix("body", "bl"),
        Query::numeric_range("year", Bound::Included(2000u64), Bound::Excluded(2010u64)),
        Query::every(),
    ];
    for query in &queries {
        assert_eq!(id_set(&plain, query), id_set(&merged, query), "{query:?}");
    }
}

#[test]
fn test_update_document_replaces_by_key() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();
    writer.add_document(doc("k", "first version", 2000)).unwrap();
    writer.commit().unwrap();
    writer.update_document(doc("k", "second version", 2001)).unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    assert_eq!(searcher.count(&Query::every()).unwrap(), 1);
    assert_eq!(searcher.count(&Query::term("body", "first")).unwrap(), 0);
    let hits = searcher.search(&Query::term("body", "second"), 1).unwrap();
    assert_eq!(hits.hits[0].stored.get("year"), Some(&FieldValue::U64(2001)));
}

#[test]
fn test_rejects_undeclared_field_without_buffering() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();

    let result = writer.add_document(doc("x", "text", 1).add("color", "blue"));
    assert!(matches!(result, Err(LexisError::SchemaMismatch(_))));
    assert_eq!(writer.pending_docs(), 0);

    let result = writer.add_document(Document::new().add("id", "y").add("year", "not a number"));
    assert!(matches!(result, Err(LexisError::SchemaMismatch(_))));
    assert_eq!(writer.pending_docs(), 0);
    writer.cancel().unwrap();
}

#[test]
fn test_reopen_from_disk() {
    let dir = TempDir::new().unwrap();

    {
        let index = Index::create_in_dir(dir.path(), schema()).unwrap();
        let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
        writer.add_document(doc("a", "persistent text", 2020)).unwrap();
        writer.add_document(doc("b", "more persistent text", 2021)).unwrap();
        writer.close().unwrap();
    }

    let index = Index::open_in_dir(dir.path()).unwrap();
    assert_eq!(index.schema(), &schema());
    let searcher = index.searcher().unwrap();
    assert_eq!(
        id_set(&searcher, &Query::term("body", "persistent")),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );

    let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
    writer.delete_by_term("id", "a").unwrap();
    writer.close().unwrap();

    let reopened = Index::open_in_dir(dir.path()).unwrap();
    assert_eq!(reopened.reader().unwrap().doc_count(), 1);
    assert!(Index::create_in_dir(dir.path(), schema()).is_err());
}

#[test]
fn test_corrupt_segment_fails_to_open() {
    let storage = Arc::new(MemoryStorage::new_default());
    let index = Index::create(storage.clone(), schema()).unwrap();
    let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
    writer.add_document(doc("a", "some words to index", 2000)).unwrap();
    writer.close().unwrap();

    let postings = storage
        .list_files()
        .unwrap()
        .into_iter()
        .find(|name| name.ends_with(".pst"))
        .unwrap();
    storage.corrupt_byte(&postings, 9).unwrap();

    let reopened = Index::open(storage.clone());
    assert!(matches!(reopened, Err(LexisError::CorruptSegment(_))));
}
