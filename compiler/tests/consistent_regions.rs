// Consistent-region tests: membership, merging and start-operator checks.
//
// Regions are declared on composites and entered through operator
// annotations. After the pipeline runs, each member operator carries a
// single region entry naming the merged region.

mod common;

use common::{cc_entry, cc_region, oper, transform, AppBuilder, Node};
use ltp::adl::{Annotation, Application};
use ltp::consistent::ENTRY_TAG;
use ltp::diag::codes;
use ltp::model::LogicalModel;
use ltp::pass::PassId;
use ltp::pipeline::{run_pipeline, TransformState};
use ltp::TransformOptions;

fn entry(out: &ltp::padl::PhysicalApplication, index: u64) -> Option<Annotation> {
    oper(out, index)
        .annotations
        .iter()
        .find(|a| a.tag == ENTRY_TAG)
        .cloned()
}

fn cc_model(app: &Application) -> ltp::diag::Result<LogicalModel> {
    let mut state = TransformState::new(app);
    run_pipeline(&mut state, PassId::CcRegions, TransformOptions::default(), |_, _| {})?;
    state
        .logical
        .take()
        .ok_or_else(|| ltp::TransformError::internal("no model"))
}

/// A and B start regions 0 and 1; both feed Snk.
fn two_regions() -> (AppBuilder, Node, Node, Node) {
    let mut b = AppBuilder::new("TwoRegions");
    let main = b.main();
    b.annotate(main, cc_region(0, false));
    b.annotate(main, cc_region(1, false));
    let a = b.primitive(main, "A", 0, 0, 1);
    let bb = b.primitive(main, "B", 1, 0, 1);
    let snk = b.primitive(main, "Snk", 2, 2, 0);
    b.annotate(a, cc_entry(0, true, false));
    b.annotate(bb, cc_entry(1, true, false));
    b.annotate(snk, cc_entry(0, false, true));
    b.connect(a, 0, snk, 0);
    b.connect(bb, 0, snk, 1);
    (b, a, bb, snk)
}

// ── Membership ──────────────────────────────────────────────────────────────

#[test]
fn members_carry_the_region_entry() {
    let mut b = AppBuilder::new("Chain");
    let main = b.main();
    b.annotate(main, cc_region(3, false));
    let src = b.primitive(main, "Src", 0, 0, 1);
    let mid = b.primitive(main, "Mid", 1, 1, 1);
    let snk = b.primitive(main, "Snk", 2, 1, 0);
    b.annotate(src, cc_entry(3, true, false));
    b.annotate(mid, cc_entry(3, false, false));
    b.connect(src, 0, mid, 0);
    b.connect(mid, 0, snk, 0);
    let out = transform(&b.build());

    let src_entry = entry(&out, 0).expect("start operator is a member");
    assert_eq!(src_entry.value("index"), Some("3"));
    assert_eq!(src_entry.value("logicalIndex"), Some("3"));
    assert_eq!(src_entry.value("drainTimeout"), Some("180"));
    assert_eq!(src_entry.value("resetTimeout"), Some("180.5"));
    assert_eq!(src_entry.value("isStartOfRegion"), Some("true"));
    assert_eq!(src_entry.value("isEndOfRegion"), None);

    let mid_entry = entry(&out, 1).expect("annotated operator is a member");
    assert_eq!(mid_entry.value("isStartOfRegion"), None);

    // Operators without an entry annotation stay outside.
    assert!(entry(&out, 2).is_none());
}

#[test]
fn end_of_region_stops_the_walk() {
    let mut b = AppBuilder::new("Ended");
    let main = b.main();
    b.annotate(main, cc_region(0, false));
    let src = b.primitive(main, "Src", 0, 0, 1);
    let end = b.primitive(main, "End", 0, 1, 1);
    let after = b.primitive(main, "After", 0, 1, 0);
    b.annotate(src, cc_entry(0, true, false));
    b.annotate(end, cc_entry(0, false, true));
    b.annotate(after, cc_entry(0, false, false));
    b.connect(src, 0, end, 0);
    b.connect(end, 0, after, 0);

    let model = cc_model(&b.build()).unwrap();
    let region = model.cc.find_region(0, 0).unwrap();
    let members: Vec<u64> = model.cc.region(region).unwrap().operators.iter().map(|o| o.0).collect();
    assert_eq!(members, vec![0, 1]);
}

#[test]
fn unknown_region_index_is_internal() {
    let mut b = AppBuilder::new("Unknown");
    let main = b.main();
    let src = b.primitive(main, "Src", 0, 0, 0);
    b.annotate(src, cc_entry(9, true, false));
    let err = ltp::transform(&b.build(), TransformOptions::default()).unwrap_err();
    assert!(err.is_internal());
}

// ── Merging ─────────────────────────────────────────────────────────────────

#[test]
fn shared_operator_merges_regions() {
    let (b, _, _, _) = two_regions();
    let model = cc_model(&b.build()).unwrap();
    let r0 = model.cc.find_region(0, 0).unwrap();
    let r1 = model.cc.find_region(1, 0).unwrap();
    assert_eq!(model.cc.merged_region(r0).unwrap(), r0);
    assert_eq!(model.cc.merged_region(r1).unwrap(), r0);
    let members: Vec<u64> = model.cc.region(r0).unwrap().operators.iter().map(|o| o.0).collect();
    assert_eq!(members, vec![0, 1, 2]);
}

#[test]
fn merged_members_report_the_surviving_region() {
    let (b, _, _, _) = two_regions();
    let out = transform(&b.build());
    for i in 0..3 {
        let e = entry(&out, i).unwrap_or_else(|| panic!("operator {} has no entry", i));
        assert_eq!(e.value("index"), Some("0"), "operator {}", i);
        assert_eq!(e.value("logicalIndex"), Some("0"), "operator {}", i);
    }
    assert_eq!(entry(&out, 2).unwrap().value("isEndOfRegion"), Some("true"));
}

// ── Parallel regions ────────────────────────────────────────────────────────

/// A parallel source that starts a region, feeding one sink.
fn parallel_start(operator_driven: bool) -> Application {
    region_start(operator_driven, Some(2))
}

/// Src starts region 0 and feeds Snk; Src is replicated when `width` is set.
fn region_start(operator_driven: bool, width: Option<i64>) -> Application {
    let mut b = AppBuilder::new("ParallelStart");
    let main = b.main();
    b.annotate(main, cc_region(0, operator_driven));
    let src = b.primitive(main, "Src", 0, 0, 1);
    let snk = b.primitive(main, "Snk", 1, 1, 0);
    b.annotate(src, cc_entry(0, true, false));
    b.annotate(snk, cc_entry(0, false, true));
    b.connect(src, 0, snk, 0);
    if let Some(width) = width {
        b.parallel(src, width);
    }
    b.build()
}

#[test]
fn replicated_start_operator_seeds_a_channel_region() {
    let model = cc_model(&parallel_start(false)).unwrap();
    let r0 = model.cc.find_region(0, 0).unwrap();
    let r1 = model.cc.find_region(0, 1).unwrap();
    assert_ne!(r0, r1);
    assert_eq!(model.cc.region(r1).unwrap().logical_index, 0);
    assert_eq!(model.cc.start_operators.len(), 2);
    // The merge point joins both channels into one region.
    assert_eq!(model.cc.merged_region(r1).unwrap(), r0);
}

#[test]
fn periodic_region_accepts_replicated_starts() {
    let out = transform(&parallel_start(false));
    // Src[0], Snk and Src[1].
    for i in [0, 1, 2] {
        assert_eq!(entry(&out, i).unwrap().value("index"), Some("0"));
    }
    assert_eq!(entry(&out, 2).unwrap().value("isStartOfRegion"), Some("true"));
}

#[test]
fn operator_driven_region_rejects_several_starts() {
    let err = ltp::transform(&parallel_start(true), TransformOptions::default()).unwrap_err();
    assert_eq!(err.code(), Some(codes::TOO_MANY_START_OPERATORS));
    match err {
        ltp::TransformError::Config { substitution, .. } => assert_eq!(substitution, "0"),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn operator_driven_region_accepts_one_start() {
    let out = ltp::transform(&region_start(true, None), TransformOptions::default()).unwrap();
    assert_eq!(out.pes.len(), 2);
    for i in [0, 1] {
        assert_eq!(entry(&out, i).unwrap().value("index"), Some("0"));
    }
    assert_eq!(entry(&out, 0).unwrap().value("isStartOfRegion"), Some("true"));
}

#[test]
fn operator_driven_region_accepts_single_channel_start() {
    let out = ltp::transform(&region_start(true, Some(1)), TransformOptions::default()).unwrap();
    assert_eq!(out.pes.len(), 2);
    assert_eq!(entry(&out, 0).unwrap().value("isStartOfRegion"), Some("true"));
    assert_eq!(entry(&out, 1).unwrap().value("index"), Some("0"));
}
