//! # Validation Tier Tests (T0-T4)
//!
//! If ANY tier fails, the monitor is INVALID.
//!
//! ## Tiers
//! - T0: Input Integrity
//! - T1: Gating and Consent
//! - T2: Memory Consolidation
//! - T3: Persistence and Recovery
//! - T4: End-to-End Cycle

use homeostat_core::{
    Artifact, Goal, Homeostat, HomeostatConfig, HomeostatError, ManualClock, MemoryAuditSink,
    NodeState, SequentialIds, Timestamp,
};
use std::sync::Arc;

fn monitor() -> (Homeostat, Arc<MemoryAuditSink>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
    let audit = Arc::new(MemoryAuditSink::new());
    let homeostat = Homeostat::new(
        HomeostatConfig::default(),
        clock.clone(),
        Arc::new(SequentialIds::new()),
        audit.clone(),
    )
    .expect("default config is valid");
    (homeostat, audit, clock)
}

// =============================================================================
// TIER T0: INPUT INTEGRITY
// =============================================================================

mod t0_input_integrity {
    use super::*;

    /// T0.1: Garbage dimension values degrade to neutral, never fail.
    #[test]
    fn invalid_scores_become_neutral() {
        let (homeostat, _, _) = monitor();
        let raw = br#"{"nodeId":"individual","dimensionScores":{"coherence":"high","logical":7.5}}"#;
        assert_eq!(homeostat.ingest_json(raw).expect("ingest"), 1);

        let state = homeostat.node_state("individual").expect("stored");
        assert_eq!(state.dimension("coherence"), Some(0.5));
        assert_eq!(state.dimension("logical"), Some(0.5));
    }

    /// T0.2: Every metric stays in [0, 1] with substituted inputs marked.
    #[test]
    fn metrics_bounded_without_input() {
        let (homeostat, _, _) = monitor();
        let samples = homeostat.sample_cycle();
        assert!(!samples.is_empty());
        for sample in samples {
            assert!((0.0..=1.0).contains(&sample.value), "{:?}", sample);
        }
    }

    /// T0.3: Input with no node id is rejected.
    #[test]
    fn missing_node_id_rejected() {
        let (homeostat, _, _) = monitor();
        let result = homeostat.ingest_json(br#"{"dimensionScores":{"coherence":0.9}}"#);
        assert!(matches!(result, Err(HomeostatError::InputError(_))));
    }
}

// =============================================================================
// TIER T1: GATING AND CONSENT
// =============================================================================

mod t1_gating {
    use super::*;
    use homeostat_core::{ConsentOutcome, PolicyAction, decide};

    fn uniform(id: &str, score: f64) -> Artifact {
        [
            "privacy",
            "safety",
            "transparency",
            "beneficence",
            "autonomy",
            "fairness",
        ]
        .iter()
        .fold(Artifact::new(id), |a, concern| a.with_attestation(*concern, score))
    }

    /// T1.1: Decision precedence.
    #[test]
    fn precedence() {
        assert_eq!(decide(0.45, true), PolicyAction::Blocked);
        assert_eq!(decide(0.75, false), PolicyAction::Flagged);
        assert_eq!(decide(0.85, true), PolicyAction::Allowed);
    }

    /// T1.2: Goal references matching active goals align the artifact.
    #[test]
    fn aligned_high_scoring_artifact_is_mutually_accepted() {
        let (homeostat, _, _) = monitor();
        homeostat.ingest_node_state(
            NodeState::new("individual", Timestamp(1))
                .with_goal(Goal::new("growth", 0.8, 0.8))
                .with_goal(Goal::new("care", 0.6, 0.8)),
        );
        let artifact = uniform("art-1", 0.9)
            .with_goal_ref("growth")
            .with_goal_ref("care");

        let submission = homeostat.submit_artifact(&artifact, None).expect("submit");
        assert_eq!(submission.decision.action, PolicyAction::Allowed);
        assert_eq!(submission.consent.outcome, ConsentOutcome::MutualAccept);
    }

    /// T1.3: Modified artifacts are only partially consented.
    #[test]
    fn modified_artifact_is_partial() {
        let (homeostat, _, _) = monitor();
        homeostat.ingest_node_state(
            NodeState::new("individual", Timestamp(1)).with_goal(Goal::new("growth", 0.8, 0.8)),
        );
        homeostat.ingest_node_state(
            NodeState::new("collective", Timestamp(1)).with_goal(Goal::new("care", 0.8, 0.8)),
        );
        let artifact = Artifact::new("art-2")
            .with_attestation("privacy", 0.7)
            .with_goal_ref("growth")
            .with_goal_ref("care");
        let filters = vec!["privacy".to_string()];

        let submission = homeostat
            .submit_artifact(&artifact, Some(filters.as_slice()))
            .expect("submit");
        assert_eq!(submission.decision.action, PolicyAction::Modified);
        assert!(submission.consent.party_a_consent);
        assert!(!submission.consent.party_b_consent);
        assert_eq!(submission.consent.outcome, ConsentOutcome::Partial);
    }

    /// T1.4: Consent is exchanged at most once per decision.
    #[test]
    fn consent_once_per_decision() {
        let (homeostat, _, _) = monitor();
        let submission = homeostat
            .submit_artifact(&uniform("art-3", 0.9), None)
            .expect("submit");
        let second = homeostat.negotiate(&submission.decision.id);
        assert!(matches!(
            second,
            Err(HomeostatError::ConsentAlreadyRecorded(_))
        ));
    }
}

// =============================================================================
// TIER T2: MEMORY CONSOLIDATION
// =============================================================================

mod t2_memory {
    use super::*;
    use homeostat_core::{AnchorFilter, FragmentPayload, NodeId};
    use std::collections::BTreeSet;

    fn pattern_tags() -> BTreeSet<String> {
        ["rhythm", "weekly"].iter().map(|t| (*t).to_string()).collect()
    }

    /// T2.1: Eleven identical-tag pattern fragments make exactly one anchor.
    #[test]
    fn eleven_fragments_one_anchor() {
        let (homeostat, _, _) = monitor();
        let significances = [0.5, 0.6, 0.7, 0.8, 0.9, 0.5, 0.6, 0.7, 0.8, 0.9, 0.6];
        for (i, significance) in significances.iter().enumerate() {
            homeostat.store_fragment(
                NodeId::from("individual"),
                "pattern",
                FragmentPayload::new(format!("observation {}", i), "noted"),
                *significance,
                pattern_tags(),
            );
        }

        let report = homeostat.consolidate();
        assert_eq!(report.anchors_created.len(), 1);

        let anchors = homeostat.retrieve_anchors(&AnchorFilter::default(), 10);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].source_fragment_ids.len(), 11);

        let average = significances.iter().sum::<f64>() / significances.len() as f64;
        assert!((anchors[0].reliability - (average * 1.2).min(1.0)).abs() < 1e-9);
    }

    /// T2.2: Consolidating twice creates nothing new.
    #[test]
    fn consolidation_idempotent() {
        let (homeostat, _, _) = monitor();
        for i in 0..10 {
            homeostat.store_fragment(
                NodeId::from("collective"),
                "pattern",
                FragmentPayload::new(format!("event {}", i), "noted"),
                0.5,
                pattern_tags(),
            );
        }
        assert_eq!(homeostat.consolidate().anchors_created.len(), 1);
        assert!(homeostat.consolidate().anchors_created.is_empty());
        assert_eq!(homeostat.memory_statistics().anchors, 1);
    }
}

// =============================================================================
// TIER T3: PERSISTENCE AND RECOVERY
// =============================================================================

mod t3_persistence {
    use super::*;
    use homeostat_core::{
        AuditRecord, SnapshotStore, decode_lines, encode_line, snapshot_from_bytes,
        snapshot_to_bytes,
    };
    use tempfile::tempdir;

    /// T3.1: A corrupt snapshot is rejected and the monitor starts fresh.
    #[test]
    fn corrupt_snapshot_falls_back_to_defaults() {
        let (homeostat, _, _) = monitor();
        homeostat.sample_cycle();
        let mut bytes = snapshot_to_bytes(&homeostat.snapshot()).expect("serialize");
        let len = bytes.len();
        bytes.truncate(len / 2);

        let (fresh, _, _) = monitor();
        match snapshot_from_bytes(&bytes) {
            Ok(snapshot) => fresh.restore(snapshot),
            Err(e) => assert!(matches!(e, HomeostatError::SerializationError(_))),
        }
        assert_eq!(fresh.cycle(), 0);
    }

    /// T3.1b: An unreadable snapshot database does not stop startup.
    #[test]
    fn garbage_snapshot_file_starts_fresh() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("snapshot.redb");
        std::fs::write(&path, [0xde, 0xad, 0xbe, 0xef].repeat(512)).expect("write garbage");

        let store = SnapshotStore::open(&path).expect("unreadable file is replaced");
        let (fresh, _, _) = monitor();
        if let Some(snapshot) = store.load().expect("load") {
            fresh.restore(snapshot);
        }
        assert_eq!(fresh.cycle(), 0);

        fresh.sample_cycle();
        store.save(&fresh.snapshot()).expect("save");
        assert_eq!(store.load().expect("load").map(|s| s.cycle), Some(1));
    }

    /// T3.2: A torn trailing audit line is skipped.
    #[test]
    fn truncated_audit_line_skipped() {
        let (homeostat, audit, _) = monitor();
        homeostat.autotune_tick();
        homeostat.drift_tick();

        let mut text = String::new();
        for record in audit.records() {
            text.push_str(&encode_line(&record).expect("encode"));
        }
        text.truncate(text.len() - 10);

        let readout = decode_lines(&text);
        assert_eq!(readout.records.len(), 1);
        assert!(matches!(readout.records[0], AuditRecord::Tuning(_)));
        assert!(readout.torn_tail);
    }

    /// T3.3: State survives a save, reopen, restore.
    #[test]
    fn restart_resumes_state() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("homeostat.redb");

        let (homeostat, _, _) = monitor();
        homeostat.sample_cycle();
        homeostat.aggregate_cycle();
        let before = homeostat.autotune_tick();
        {
            let store = SnapshotStore::open(&path).expect("open");
            store.save(&homeostat.snapshot()).expect("save");
        }

        let store = SnapshotStore::open(&path).expect("reopen");
        let snapshot = store.load().expect("load").expect("present");
        let (restored, _, _) = monitor();
        restored.restore(snapshot);

        assert_eq!(restored.cycle(), 1);
        assert_eq!(restored.tuning_state(10).value, before.next);
        assert!(restored.latest_index("equilibrium").is_some());
    }
}

// =============================================================================
// TIER T4: END-TO-END CYCLE
// =============================================================================

mod t4_end_to_end {
    use super::*;
    use std::time::Duration;

    /// T4.1: Ingest → sample → aggregate → tune → drift, all bounded and
    /// audited.
    #[test]
    fn full_cycle() {
        let (homeostat, audit, clock) = monitor();
        homeostat
            .ingest_json(
                br#"[
                    {"nodeId":"individual","dimensionScores":{"coherence":0.95,"emotional":0.8,"logical":0.7,"philosophical":0.6},
                     "goals":[{"name":"growth","priority":0.9,"strength":0.9}]},
                    {"nodeId":"collective","dimensionScores":{"coherence":0.6,"emotional":0.5,"logical":0.8,"philosophical":0.7},
                     "goals":[{"name":"growth","priority":0.4,"strength":0.8}]}
                ]"#,
            )
            .expect("ingest");

        for _ in 0..3 {
            homeostat.sample_cycle();
            clock.advance(Duration::from_secs(300));
        }
        let records = homeostat.aggregate_cycle();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert!((0.0..=1.0).contains(&record.value));
            let weight_sum: f64 = record.weights.values().sum();
            assert!((weight_sum - 1.0).abs() < 1e-6);
        }

        let tuning = homeostat.autotune_tick();
        assert!(tuning.delta.abs() <= 0.05 + 1e-12);

        let drift = homeostat.drift_tick();
        assert_eq!(drift.drift, 1.0 - drift.alignment);
        assert!(drift.recalibrated);

        let kinds: Vec<&str> = audit.records().iter().map(|r| r.kind()).collect();
        assert!(kinds.contains(&"tuning"));
        assert!(kinds.contains(&"drift"));
        assert_eq!(homeostat.cycle(), 3);
    }
}
