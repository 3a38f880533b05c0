use std::collections::BTreeMap;

use proptest::prelude::*;
use qlb_hpc::result::{LatencyDistribution, MultiDecoderLogicalErrorRates};
use qlb_hpc::{ErrorStatistics, LogicalErrorResult, MonteCarloResult};

fn logical() -> impl Strategy<Value = LogicalErrorResult> {
    (0u64..1_000_000, 0u64..1000, 0u64..10, 0u32..10_000).prop_map(
        |(errors, discards, panics, elapsed)| LogicalErrorResult {
            errors,
            discards,
            panics,
            // Whole seconds keep floating point addition exact.
            elapsed: elapsed as f64,
        },
    )
}

fn multi() -> impl Strategy<Value = MultiDecoderLogicalErrorRates> {
    prop::collection::btree_map(
        prop::sample::select(vec!["mwpm", "union-find", "bp-osd"]).prop_map(String::from),
        logical(),
        0..3,
    )
    .prop_map(|results| MultiDecoderLogicalErrorRates { results })
}

fn latency() -> impl Strategy<Value = LatencyDistribution> {
    prop::collection::vec(-9i32..4, 0..20).prop_map(|exponents| {
        let mut distribution = LatencyDistribution::default();
        for exponent in exponents {
            distribution.record(10f64.powi(exponent) * 2.0);
        }
        distribution.sum = distribution.sum.round();
        distribution
    })
}

fn fold<R: MonteCarloResult>(parts: &[R]) -> Option<R> {
    parts
        .iter()
        .cloned()
        .reduce(|acc, part| acc.combine(&part))
}

proptest! {
    #[test]
    fn logical_counts_combine_associatively(a in logical(), b in logical(), c in logical()) {
        prop_assert_eq!(a.combine(&b).combine(&c), a.combine(&b.combine(&c)));
        prop_assert_eq!(a.combine(&b), b.combine(&a));
    }

    #[test]
    fn dispatch_order_does_not_change_totals(
        parts in prop::collection::vec(logical(), 1..12),
        seed in any::<u64>(),
    ) {
        let mut shuffled = parts.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed % len as u64) as usize);
        shuffled.reverse();
        prop_assert_eq!(fold(&parts), fold(&shuffled));
        let total = fold(&parts).unwrap();
        prop_assert_eq!(total.errors, parts.iter().map(|part| part.errors).sum::<u64>());
    }

    #[test]
    fn decoder_maps_merge_per_key(a in multi(), b in multi(), c in multi()) {
        let left = a.combine(&b).combine(&c);
        prop_assert_eq!(&left, &a.combine(&b.combine(&c)));
        for (decoder, result) in &left.results {
            let expected: u64 = [&a, &b, &c]
                .iter()
                .filter_map(|part| part.results.get(decoder))
                .map(|part| part.errors)
                .sum();
            prop_assert_eq!(result.errors, expected);
        }
        let min = left.results.values().map(|result| result.errors).min().unwrap_or(0);
        prop_assert_eq!(left.errors(), min);
    }

    #[test]
    fn latency_histograms_merge_bin_wise(a in latency(), b in latency(), c in latency()) {
        let merged = a.combine(&b).combine(&c);
        prop_assert_eq!(&merged, &a.combine(&b.combine(&c)));
        prop_assert_eq!(merged.count(), a.count() + b.count() + c.count());
    }
}

#[test]
fn empty_decoder_map_reports_zero_errors() {
    let empty = MultiDecoderLogicalErrorRates {
        results: BTreeMap::new(),
    };
    assert_eq!(empty.errors(), 0);
    assert_eq!(empty.combine(&empty), empty);
}

#[test]
fn mapping_form_rejects_unknown_decoder_fields() {
    let value = serde_json::json!({"results": {}, "decoders": 3});
    assert!(MultiDecoderLogicalErrorRates::from_mapping(&value).is_err());
    let value = serde_json::json!({"errors": 4});
    assert_eq!(
        LogicalErrorResult::from_mapping(&value).unwrap(),
        LogicalErrorResult::with_errors(4)
    );
}
