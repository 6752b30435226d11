use lexis::codec::{DEFAULT_BLOCK_SIZE, Posting, PostingDecoder, encode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn postings(rng: &mut StdRng, len: usize) -> Vec<Posting> {
    let mut doc = 0u32;
    (0..len)
        .map(|i| {
            doc += if i == 0 { rng.random_range(0..3) } else { rng.random_range(1..40) };
            let mut pos = 0u32;
            let positions = (0..rng.random_range(1..6))
                .map(|j| {
                    pos += if j == 0 { rng.random_range(0..4) } else { rng.random_range(1..8) };
                    pos
                })
                .collect();
            Posting::with_positions(doc, positions)
        })
        .collect()
}

/// First posting at or after `target`, by linear scan.
fn expected(postings: &[Posting], target: u32) -> Option<&Posting> {
    postings.iter().find(|p| p.doc_id >= target)
}

#[test]
fn test_skip_to_agrees_with_linear_scan() {
    let mut rng = StdRng::seed_from_u64(1234);
    let list = postings(&mut rng, 12_000);
    let last = list.last().map(|p| p.doc_id).unwrap_or(0);

    for block_size in [1, 7, 64, DEFAULT_BLOCK_SIZE, 255] {
        let bytes = encode(&list, true, block_size).unwrap();
        let mut decoder = PostingDecoder::from_vec(bytes).unwrap();
        assert_eq!(decoder.len(), list.len() as u64);

        let mut target = 0u32;
        loop {
            target += rng.random_range(1..2_000);
            match expected(&list, target) {
                Some(want) => {
                    assert!(decoder.skip_to(target).unwrap(), "block size {block_size}");
                    assert_eq!(decoder.doc_id(), want.doc_id);
                    assert_eq!(decoder.freq(), want.freq);
                    if rng.random_bool(0.3) {
                        assert_eq!(decoder.positions().unwrap(), want.positions.as_slice());
                    }
                }
                None => {
                    assert!(target > last);
                    assert!(!decoder.skip_to(target).unwrap());
                    assert!(decoder.is_exhausted());
                    break;
                }
            }
        }
    }
}

#[test]
fn test_mixed_next_and_skip_visits_every_posting_once() {
    let mut rng = StdRng::seed_from_u64(99);
    let list = postings(&mut rng, 3_000);
    let bytes = encode(&list, true, 32).unwrap();
    let mut decoder = PostingDecoder::from_vec(bytes).unwrap();

    let mut seen = Vec::new();
    while !decoder.is_exhausted() {
        seen.push(decoder.doc_id());
        if rng.random_bool(0.5) {
            decoder.next().unwrap();
        } else {
            // Skipping to the next id is equivalent to next().
            let target = decoder.doc_id() + 1;
            decoder.skip_to(target).unwrap();
        }
    }

    let all: Vec<u32> = list.iter().map(|p| p.doc_id).collect();
    assert_eq!(seen, all);
}

#[test]
fn test_empty_list_starts_exhausted() {
    let bytes = encode(&[], false, DEFAULT_BLOCK_SIZE).unwrap();
    let mut decoder = PostingDecoder::from_vec(bytes).unwrap();
    assert!(decoder.is_empty());
    assert!(decoder.is_exhausted());
    assert!(!decoder.skip_to(0).unwrap());
    assert!(!decoder.next().unwrap());
}
