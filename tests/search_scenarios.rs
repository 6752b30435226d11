use std::collections::BTreeSet;
use std::ops::Bound;

use lexis::analysis::Token;
use lexis::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const VOCABULARY: [&str; 12] = [
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima",
];

fn schema() -> Schema {
    Schema::builder()
        .field(FieldDefinition::keyword("id").stored().unique())
        .field(FieldDefinition::text("body").stored())
        .build()
        .unwrap()
}

fn no_merge() -> IndexWriterConfig {
    IndexWriterConfig {
        merge_policy: MergePolicyConfig::NoMerge,
        ..IndexWriterConfig::default()
    }
}

fn stored_ids(results: &SearchResults) -> Vec<String> {
    results
        .hits
        .iter()
        .map(|hit| hit.stored.get_text("id").unwrap().to_string())
        .collect()
}

#[test]
fn test_fox_and_dog() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
    writer
        .add_document(Document::new().add("id", "1").add("body", "the quick brown fox"))
        .unwrap();
    writer
        .add_document(Document::new().add("id", "2").add("body", "the lazy dog"))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();

    let and = Query::and(vec![Query::term("body", "the"), Query::term("body", "fox")]);
    let results = searcher.search(&and, 10).unwrap();
    assert_eq!(stored_ids(&results), vec!["1"]);

    let or = Query::or(vec![Query::term("body", "fox"), Query::term("body", "dog")]);
    let results = searcher.search(&or, 10).unwrap();
    assert_eq!(results.total_hits, 2);
    let ids: BTreeSet<String> = stored_ids(&results).into_iter().collect();
    assert_eq!(ids, BTreeSet::from(["1".to_string(), "2".to_string()]));
    assert!(results.hits[0].score >= results.hits[1].score);
}

#[test]
fn test_term_search_matches_exact_tokens() {
    let mut rng = StdRng::seed_from_u64(42);
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index
        .writer(IndexWriterConfig {
            max_buffered_docs: 37,
            ..no_merge()
        })
        .unwrap();

    let mut bodies = Vec::new();
    for i in 0..300 {
        let len = rng.random_range(1..12);
        let words: Vec<&str> = (0..len)
            .map(|_| VOCABULARY[rng.random_range(0..VOCABULARY.len())])
            .collect();
        let body = words.join(" ");
        writer
            .add_document(Document::new().add("id", i.to_string()).add("body", body.as_str()))
            .unwrap();
        bodies.push(body);
    }
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    assert!(searcher.reader().segments().len() > 1);

    for word in VOCABULARY {
        let expected: BTreeSet<String> = bodies
            .iter()
            .enumerate()
            .filter(|(_, body)| body.split(' ').any(|w| w == word))
            .map(|(i, _)| i.to_string())
            .collect();

        let results = searcher.search(&Query::term("body", word), 1000).unwrap();
        let found: BTreeSet<String> = stored_ids(&results).into_iter().collect();
        assert_eq!(found, expected, "term {word}");
        assert_eq!(searcher.count(&Query::term("body", word)).unwrap(), expected.len() as u64);
    }
}

#[test]
fn test_phrase_slop_boundary() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();
    writer
        .add_document(Document::new().add("id", "adjacent").add_tokens(
            "body",
            "a b c",
            vec![Token::new("a", 0), Token::new("b", 1), Token::new("c", 2)],
        ))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    let exact = Query::phrase("body", vec!["a", "b", "c"]);
    assert_eq!(searcher.count(&exact).unwrap(), 1);

    let mut writer = index.writer(no_merge()).unwrap();
    writer
        .update_document(Document::new().add("id", "adjacent").add_tokens(
            "body",
            "a c b",
            vec![Token::new("a", 0), Token::new("c", 2), Token::new("b", 3)],
        ))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    assert_eq!(searcher.count(&exact).unwrap(), 0);
    assert_eq!(
        searcher
            .count(&Query::sloppy_phrase("body", vec!["a", "b", "c"], 1))
            .unwrap(),
        0
    );
    assert_eq!(
        searcher
            .count(&Query::sloppy_phrase("body", vec!["a", "b", "c"], 2))
            .unwrap(),
        1
    );
}

#[test]
fn test_correct_whoosj() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
    writer
        .add_document(Document::new().add("id", "1").add("body", "whoosh is a search library"))
        .unwrap();
    writer
        .add_document(Document::new().add("id", "2").add("body", "the swoosh of a whoosh"))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    let suggestions = searcher.correct("body", "whoosj", 5).unwrap();

    let whoosh = suggestions.iter().find(|s| s.term == "whoosh").unwrap();
    assert_eq!(whoosh.distance, 1);
    assert_eq!(whoosh.frequency, 2);
    assert_eq!(suggestions[0].term, "whoosh");
    assert!(suggestions.iter().all(|s| s.distance <= 2));
}

#[test]
fn test_scoring_prefers_rare_and_dense_terms() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(IndexWriterConfig::default()).unwrap();
    writer
        .add_document(Document::new().add("id", "dense").add("body", "rust rust rust"))
        .unwrap();
    writer
        .add_document(Document::new().add("id", "sparse").add("body", "rust and many other words here"))
        .unwrap();
    writer
        .add_document(Document::new().add("id", "none").add("body", "nothing relevant"))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();
    let results = searcher.search(&Query::term("body", "rust"), 10).unwrap();
    assert_eq!(stored_ids(&results), vec!["dense", "sparse"]);

    let boosted = searcher
        .search(
            &Query::or(vec![
                Query::term("body", "rust"),
                Query::term("body", "nothing").with_boost(10.0),
            ]),
            1,
        )
        .unwrap();
    assert_eq!(stored_ids(&boosted), vec!["none"]);
    assert_eq!(boosted.total_hits, 3);
}

#[test]
fn test_range_without_terms_returns_nothing() {
    let index = Index::create_in_memory(schema()).unwrap();
    let mut writer = index.writer(no_merge()).unwrap();
    writer
        .add_document(Document::new().add("id", "1").add("body", "apple banana"))
        .unwrap();
    writer.commit().unwrap();
    writer
        .add_document(Document::new().add("id", "2").add("body", "cherry plum"))
        .unwrap();
    writer.close().unwrap();

    let searcher = index.searcher().unwrap();

    // Bounds fall between dictionary terms.
    let gap = Query::term_range("body", "banana0", "cherry");
    let results = searcher.search(&gap, 10).unwrap();
    assert_eq!(results.total_hits, 0);
    assert!(results.hits.is_empty());
    assert_eq!(searcher.count(&gap).unwrap(), 0);

    // Lower bound above the upper bound.
    let inverted = Query::range(
        "body",
        Bound::Included("plum".to_string()),
        Bound::Included("apple".to_string()),
    );
    let results = searcher.search(&inverted, 10).unwrap();
    assert_eq!(results.total_hits, 0);
    assert!(results.hits.is_empty());
    assert_eq!(searcher.count(&inverted).unwrap(), 0);

    // A range spanning both segments still matches.
    let wide = Query::term_range("body", "b", "d");
    let results = searcher.search(&wide, 10).unwrap();
    let ids: BTreeSet<String> = stored_ids(&results).into_iter().collect();
    assert_eq!(ids, BTreeSet::from(["1".to_string(), "2".to_string()]));
}
